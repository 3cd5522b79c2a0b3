use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ToolCommSetup;
use crate::{DriverError, Payload, Result};

/// Everything needed to bring up a [`UrDriver`](super::UrDriver).
///
/// ```rust,ignore
/// let mut config = DriverConfig::new("192.168.56.101");
/// config.output_recipe = vec!["timestamp".into(), "actual_q".into()];
/// config.headless_mode = true;
///
/// if let Err(e) = config.validate() {
///     println!("Configuration error: {}", e);
///     return;
/// }
/// ```
///
/// Driver-hosted ports (reverse, script sender, trajectory, script command)
/// may be 0 to bind an ephemeral port; the bound port is what the robot
/// program is told to connect to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    pub robot_ip: String,
    pub rtde_port: u16,
    pub primary_port: u16,
    pub reverse_port: u16,
    pub script_sender_port: u16,
    pub trajectory_port: u16,
    pub script_command_port: u16,
    /// IP the driver-hosted sockets bind to and the robot connects back to.
    /// Defaults to all interfaces, advertising the interface facing the robot.
    pub reverse_ip: Option<String>,
    pub output_recipe: Vec<String>,
    pub input_recipe: Vec<String>,
    /// Cyclic exchange frequency in Hz, instead of the controller default.
    pub target_frequency: Option<f64>,
    pub servoj_gain: u32,
    pub servoj_lookahead_time: f64,
    pub force_mode_damping: f64,
    pub force_mode_gain_scaling: f64,
    pub default_payload: Payload,
    /// Tool flange RS485 setup applied by the control program. e-series
    /// only.
    pub tool_comm_setup: Option<ToolCommSetup>,
    pub headless_mode: bool,
    pub calibration_checksum: Option<String>,
    pub non_blocking_read: bool,
    pub connection_lost_periods: u32,
    pub status_read_timeout_ms: u64,
    pub script_command_reconnect_interval_ms: u64,
}

impl DriverConfig {
    pub fn new(robot_ip: impl Into<String>) -> Self {
        Self {
            robot_ip: robot_ip.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| DriverError::InvalidConfig(format!("could not parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(DriverError::InvalidConfig(msg));
        if self.robot_ip.is_empty() {
            return invalid("robot IP cannot be empty".to_string());
        }
        if self.rtde_port == 0 || self.primary_port == 0 {
            return invalid("robot ports must be greater than 0".to_string());
        }
        let hosted = [
            self.reverse_port,
            self.script_sender_port,
            self.trajectory_port,
            self.script_command_port,
        ];
        for (i, port) in hosted.iter().enumerate() {
            if *port != 0 && hosted[i + 1..].contains(port) {
                return invalid(format!("port {port} is configured for two driver sockets"));
            }
        }
        if self.output_recipe.is_empty() {
            return invalid("output recipe cannot be empty".to_string());
        }
        if !(100..=2000).contains(&self.servoj_gain) {
            return invalid(format!("servoj gain {} outside [100, 2000]", self.servoj_gain));
        }
        if !(0.03..=0.2).contains(&self.servoj_lookahead_time) {
            return invalid(format!(
                "servoj lookahead time {} outside [0.03, 0.2]",
                self.servoj_lookahead_time
            ));
        }
        if !(0.0..=1.0).contains(&self.force_mode_damping) {
            return invalid(format!("force mode damping {} outside [0, 1]", self.force_mode_damping));
        }
        if !(0.0..=2.0).contains(&self.force_mode_gain_scaling) {
            return invalid(format!(
                "force mode gain scaling {} outside [0, 2]",
                self.force_mode_gain_scaling
            ));
        }
        let payload = &self.default_payload;
        if !payload.mass.is_finite() || payload.mass < 0.0 {
            return invalid(format!("default payload mass {} is not a non-negative number", payload.mass));
        }
        if payload.cog.iter().any(|c| !c.is_finite()) {
            return invalid(format!("default payload center of gravity {:?} is not finite", payload.cog));
        }
        if let Some(setup) = &self.tool_comm_setup {
            setup.validate()?;
        }
        if let Some(frequency) = self.target_frequency {
            if !(frequency > 0.0 && frequency <= 500.0) {
                return invalid(format!("target frequency {frequency} outside (0, 500]"));
            }
        }
        if self.status_read_timeout_ms == 0 || self.script_command_reconnect_interval_ms == 0 {
            return invalid("status read timeout and reconnect interval must be greater than 0".to_string());
        }
        if self.connection_lost_periods == 0 {
            return invalid("connection lost periods must be greater than 0".to_string());
        }
        self.reverse_bind_ip()?;
        Ok(())
    }

    /// `robot_ip:port` for one of the robot's interfaces.
    pub fn connection_url(&self, port: u16) -> String {
        format!("{}:{}", self.robot_ip, port)
    }

    pub fn reverse_bind_ip(&self) -> Result<IpAddr> {
        match &self.reverse_ip {
            Some(ip) => ip
                .parse()
                .map_err(|_| DriverError::InvalidConfig(format!("reverse IP {ip} is not an IP address"))),
            None => Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        }
    }

    pub fn status_read_timeout(&self) -> Duration {
        Duration::from_millis(self.status_read_timeout_ms)
    }

    pub fn script_command_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.script_command_reconnect_interval_ms)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            robot_ip: "192.168.56.101".to_string(),
            rtde_port: 30004,
            primary_port: 30001,
            reverse_port: 50001,
            script_sender_port: 50002,
            trajectory_port: 50003,
            script_command_port: 50004,
            reverse_ip: None,
            output_recipe: vec!["timestamp".to_string(), "actual_q".to_string()],
            input_recipe: Vec::new(),
            target_frequency: None,
            servoj_gain: 2000,
            servoj_lookahead_time: 0.03,
            force_mode_damping: 0.025,
            force_mode_gain_scaling: 0.5,
            default_payload: Payload::default(),
            tool_comm_setup: None,
            headless_mode: false,
            calibration_checksum: None,
            non_blocking_read: false,
            connection_lost_periods: 50,
            status_read_timeout_ms: 5000,
            script_command_reconnect_interval_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        DriverConfig::default().validate().unwrap();
    }

    #[test]
    fn test_ranges_are_checked() {
        let mut config = DriverConfig::default();
        config.servoj_gain = 50;
        assert!(config.validate().is_err());

        let mut config = DriverConfig::default();
        config.servoj_lookahead_time = 0.5;
        assert!(config.validate().is_err());

        let mut config = DriverConfig::default();
        config.force_mode_gain_scaling = 2.5;
        assert!(config.validate().is_err());

        let mut config = DriverConfig::default();
        config.reverse_ip = Some("not-an-ip".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tool_comm_setup_is_checked() {
        let config = DriverConfig::from_json(
            r#"{"robot_ip": "10.0.0.2", "tool_comm_setup": {"tool_voltage": "V24", "baud_rate": 115200}}"#,
        )
        .unwrap();
        let setup = config.tool_comm_setup.unwrap();
        assert_eq!(setup.baud_rate, 115200);
        assert_eq!(setup.rx_idle_chars, 1.5);

        let mut config = DriverConfig::default();
        config.tool_comm_setup = Some(ToolCommSetup {
            baud_rate: 1200,
            ..ToolCommSetup::default()
        });
        assert!(matches!(config.validate(), Err(DriverError::InvalidConfig(_))));
    }

    #[test]
    fn test_payload_must_be_finite() {
        for mass in [f64::NAN, f64::INFINITY, -0.5] {
            let mut config = DriverConfig::default();
            config.default_payload.mass = mass;
            assert!(matches!(config.validate(), Err(DriverError::InvalidConfig(_))), "mass {mass}");
        }

        let mut config = DriverConfig::default();
        config.default_payload.cog[2] = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_hosted_ports_rejected_but_zero_allowed() {
        let mut config = DriverConfig::default();
        config.trajectory_port = config.reverse_port;
        assert!(config.validate().is_err());

        config.reverse_port = 0;
        config.trajectory_port = 0;
        config.script_command_port = 0;
        config.script_sender_port = 0;
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = DriverConfig::from_json(r#"{"robot_ip": "10.0.0.2", "headless_mode": true}"#).unwrap();
        assert_eq!(config.robot_ip, "10.0.0.2");
        assert!(config.headless_mode);
        assert_eq!(config.reverse_port, 50001);
        assert_eq!(config.connection_url(config.primary_port), "10.0.0.2:30001");
        assert!(DriverConfig::from_json("{").is_err());
    }
}
