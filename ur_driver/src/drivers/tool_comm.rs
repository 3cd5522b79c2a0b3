//! RS485 communication through the tool flange.
//!
//! Applied by the control program when it starts, so the settings travel
//! with the rendered program rather than over a socket. Only e-series
//! controllers have the interface.

use int_enum::IntEnum;
use serde::{Deserialize, Serialize};

use crate::control::ToolVoltage;
use crate::{DriverError, Result};

/// Baud rates the tool interface accepts.
pub const TOOL_BAUD_RATES: [u32; 8] = [9600, 19200, 38400, 57600, 115200, 1_000_000, 2_000_000, 5_000_000];

#[repr(i32)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum ToolParity {
    None = 0,
    Odd = 1,
    Even = 2,
}

/// Tool communication settings. Idle times are counted in characters.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ToolCommSetup {
    pub tool_voltage: ToolVoltage,
    pub baud_rate: u32,
    pub parity: ToolParity,
    pub stop_bits: u32,
    pub rx_idle_chars: f32,
    pub tx_idle_chars: f32,
}

impl Default for ToolCommSetup {
    fn default() -> Self {
        Self {
            tool_voltage: ToolVoltage::Off,
            baud_rate: 9600,
            parity: ToolParity::Odd,
            stop_bits: 1,
            rx_idle_chars: 1.5,
            tx_idle_chars: 3.5,
        }
    }
}

impl ToolCommSetup {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(DriverError::InvalidConfig(msg));
        if !TOOL_BAUD_RATES.contains(&self.baud_rate) {
            return invalid(format!(
                "tool baud rate {} is not one of {:?}",
                self.baud_rate, TOOL_BAUD_RATES
            ));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return invalid(format!("tool stop bits {} outside [1, 2]", self.stop_bits));
        }
        if !(1.0..=40.0).contains(&self.rx_idle_chars) {
            return invalid(format!("tool rx idle chars {} outside [1, 40]", self.rx_idle_chars));
        }
        if !(0.0..=40.0).contains(&self.tx_idle_chars) {
            return invalid(format!("tool tx idle chars {} outside [0, 40]", self.tx_idle_chars));
        }
        Ok(())
    }

    /// Program lines that power the tool and open the interface.
    pub fn to_script(&self) -> String {
        format!(
            "set_tool_voltage({})\nset_tool_communication(True, {}, {}, {}, {}, {})",
            i32::from(self.tool_voltage),
            self.baud_rate,
            i32::from(self.parity),
            self.stop_bits,
            self.rx_idle_chars,
            self.tx_idle_chars
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        ToolCommSetup::default().validate().unwrap();
    }

    #[test]
    fn test_limits() {
        let cases = [
            ToolCommSetup {
                baud_rate: 14400,
                ..ToolCommSetup::default()
            },
            ToolCommSetup {
                stop_bits: 3,
                ..ToolCommSetup::default()
            },
            ToolCommSetup {
                rx_idle_chars: 0.5,
                ..ToolCommSetup::default()
            },
            ToolCommSetup {
                tx_idle_chars: 40.5,
                ..ToolCommSetup::default()
            },
            ToolCommSetup {
                rx_idle_chars: f32::NAN,
                ..ToolCommSetup::default()
            },
        ];
        for setup in cases {
            assert!(matches!(setup.validate(), Err(DriverError::InvalidConfig(_))), "{setup:?}");
        }

        let edge = ToolCommSetup {
            baud_rate: 5_000_000,
            stop_bits: 2,
            rx_idle_chars: 40.0,
            tx_idle_chars: 0.0,
            ..ToolCommSetup::default()
        };
        edge.validate().unwrap();
    }

    #[test]
    fn test_script_lines() {
        let setup = ToolCommSetup {
            tool_voltage: ToolVoltage::V24,
            baud_rate: 115200,
            parity: ToolParity::Even,
            ..ToolCommSetup::default()
        };
        assert_eq!(
            setup.to_script(),
            "set_tool_voltage(24)\nset_tool_communication(True, 115200, 2, 1, 1.5, 3.5)"
        );
    }

    #[test]
    fn test_partial_json() {
        let setup: ToolCommSetup = serde_json::from_str(r#"{"baud_rate": 57600, "parity": "None"}"#).unwrap();
        assert_eq!(setup.baud_rate, 57600);
        assert_eq!(setup.parity, ToolParity::None);
        assert_eq!(setup.stop_bits, 1);
    }
}
