use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use super::{DataPackage, RtdeClient};
use crate::{DriverError, Result};

const STANDARD_DIGITAL_PINS: u8 = 8;
const CONFIGURABLE_DIGITAL_PINS: u8 = 8;
const TOOL_DIGITAL_PINS: u8 = 2;
const ANALOG_OUTPUTS: u8 = 2;
const BIT_REGISTERS: std::ops::RangeInclusive<u32> = 64..=127;
const INT_REGISTERS: std::ops::RangeInclusive<u32> = 24..=47;
const DOUBLE_REGISTERS: std::ops::RangeInclusive<u32> = 24..=47;

const MASK_FIELDS: [&str; 5] = [
    "speed_slider_mask",
    "standard_digital_output_mask",
    "configurable_digital_output_mask",
    "tool_digital_output_mask",
    "standard_analog_output_mask",
];

/// Analog output interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogOutputType {
    Current,
    Voltage,
}

/// Writes the input recipe of the cyclic exchange.
///
/// Values are staged on one package that mirrors the recipe; each call
/// stages its fields, sends the package and clears every mask again so a
/// later call does not re-apply an old output. Every field a call touches
/// must be part of the negotiated input recipe, otherwise the call fails.
pub struct RtdeWriter {
    client: Arc<RtdeClient>,
    package: Mutex<Option<DataPackage>>,
}

impl RtdeWriter {
    pub fn new(client: Arc<RtdeClient>) -> Self {
        let package = client.input_recipe().map(DataPackage::new);
        Self {
            client,
            package: Mutex::new(package),
        }
    }

    /// Sets the speed slider, `fraction` in [0, 1].
    pub async fn send_speed_slider(&self, fraction: f64) -> bool {
        if !(0.0..=1.0).contains(&fraction) {
            warn!("speed slider fraction {} outside [0, 1]", fraction);
            return false;
        }
        self.send(|p| {
            p.set_data("speed_slider_mask", 1u32)?;
            p.set_data("speed_slider_fraction", fraction)
        })
        .await
    }

    pub async fn send_standard_digital_output(&self, pin: u8, value: bool) -> bool {
        if pin >= STANDARD_DIGITAL_PINS {
            warn!("standard digital output {} does not exist", pin);
            return false;
        }
        self.send_digital("standard_digital_output", pin, value).await
    }

    pub async fn send_configurable_digital_output(&self, pin: u8, value: bool) -> bool {
        if pin >= CONFIGURABLE_DIGITAL_PINS {
            warn!("configurable digital output {} does not exist", pin);
            return false;
        }
        self.send_digital("configurable_digital_output", pin, value).await
    }

    pub async fn send_tool_digital_output(&self, pin: u8, value: bool) -> bool {
        if pin >= TOOL_DIGITAL_PINS {
            warn!("tool digital output {} does not exist", pin);
            return false;
        }
        self.send_digital("tool_digital_output", pin, value).await
    }

    /// Sets analog output `pin` to `fraction` of its range.
    pub async fn send_standard_analog_output(&self, pin: u8, fraction: f64, kind: AnalogOutputType) -> bool {
        if pin >= ANALOG_OUTPUTS || !(0.0..=1.0).contains(&fraction) {
            warn!("analog output {} cannot take {}", pin, fraction);
            return false;
        }
        let type_bit = match kind {
            AnalogOutputType::Current => 0,
            AnalogOutputType::Voltage => 1u8 << pin,
        };
        self.send(|p| {
            p.set_data("standard_analog_output_mask", 1u8 << pin)?;
            p.set_data("standard_analog_output_type", type_bit)?;
            p.set_data(&format!("standard_analog_output_{pin}"), fraction)
        })
        .await
    }

    pub async fn send_input_bit_register(&self, register: u32, value: bool) -> bool {
        if !BIT_REGISTERS.contains(&register) {
            warn!("input bit register {} outside {:?}", register, BIT_REGISTERS);
            return false;
        }
        self.send(|p| p.set_data(&format!("input_bit_register_{register}"), value))
            .await
    }

    pub async fn send_input_int_register(&self, register: u32, value: i32) -> bool {
        if !INT_REGISTERS.contains(&register) {
            warn!("input int register {} outside {:?}", register, INT_REGISTERS);
            return false;
        }
        self.send(|p| p.set_data(&format!("input_int_register_{register}"), value))
            .await
    }

    pub async fn send_input_double_register(&self, register: u32, value: f64) -> bool {
        if !DOUBLE_REGISTERS.contains(&register) {
            warn!("input double register {} outside {:?}", register, DOUBLE_REGISTERS);
            return false;
        }
        self.send(|p| p.set_data(&format!("input_double_register_{register}"), value))
            .await
    }

    async fn send_digital(&self, field: &str, pin: u8, value: bool) -> bool {
        let mask = 1u8 << pin;
        self.send(|p| {
            p.set_data(&format!("{field}_mask"), mask)?;
            p.set_data(field, if value { mask } else { 0u8 })
        })
        .await
    }

    async fn send(&self, stage: impl FnOnce(&mut DataPackage) -> Result<()>) -> bool {
        match self.try_send(stage).await {
            Ok(()) => true,
            Err(e) => {
                warn!("input recipe write failed: {}", e);
                false
            }
        }
    }

    async fn try_send(&self, stage: impl FnOnce(&mut DataPackage) -> Result<()>) -> Result<()> {
        let mut guard = self.package.lock().await;
        let package = guard
            .as_mut()
            .ok_or_else(|| DriverError::InvalidConfig("no input recipe configured".to_string()))?;

        let mut staged = package.clone();
        stage(&mut staged)?;
        self.client.send_input(&staged).await?;

        for mask in MASK_FIELDS {
            if let Some(zero) = staged.get(mask).map(|v| super::RtdeValue::zero(v.data_type())) {
                staged.set_data(mask, zero)?;
            }
        }
        *package = staged;
        Ok(())
    }
}
