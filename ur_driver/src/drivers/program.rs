//! Robot program rendering.
//!
//! The program text itself comes from outside the driver. The driver only
//! fills in the values it owns: where to connect back to and the tuning
//! values from the configuration.

use super::ToolCommSetup;
use crate::comm::MULT_JOINTSTATE;
use crate::Payload;

/// Values substituted into the robot program.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramParameters {
    pub reverse_ip: String,
    pub reverse_port: u16,
    pub trajectory_port: u16,
    pub script_command_port: u16,
    pub servoj_gain: u32,
    pub servoj_lookahead_time: f64,
    pub force_mode_damping: f64,
    pub force_mode_gain_scaling: f64,
    pub default_payload: Payload,
    pub tool_comm_setup: Option<ToolCommSetup>,
}

/// Turns the parameters into program text.
pub trait ProgramTemplate: Send + Sync {
    fn render(&self, params: &ProgramParameters) -> String;
}

/// Template with `{{NAME}}` placeholders:
/// `REVERSE_IP`, `REVERSE_PORT`, `TRAJECTORY_PORT`, `SCRIPT_COMMAND_PORT`,
/// `SERVO_J_GAIN`, `SERVO_J_LOOKAHEAD_TIME`, `FORCE_MODE_DAMPING`,
/// `FORCE_MODE_GAIN_SCALING`, `PAYLOAD_MASS`, `PAYLOAD_COG`,
/// `JOINT_STATE_MULT` and `TOOL_COMM_SETUP`. The last one expands to the
/// tool communication setup lines, or to nothing when none is configured.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderTemplate {
    source: String,
}

impl PlaceholderTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into() }
    }
}

impl ProgramTemplate for PlaceholderTemplate {
    fn render(&self, params: &ProgramParameters) -> String {
        let cog = params.default_payload.cog;
        let replacements = [
            ("{{REVERSE_IP}}", params.reverse_ip.clone()),
            ("{{REVERSE_PORT}}", params.reverse_port.to_string()),
            ("{{TRAJECTORY_PORT}}", params.trajectory_port.to_string()),
            ("{{SCRIPT_COMMAND_PORT}}", params.script_command_port.to_string()),
            ("{{SERVO_J_GAIN}}", params.servoj_gain.to_string()),
            ("{{SERVO_J_LOOKAHEAD_TIME}}", params.servoj_lookahead_time.to_string()),
            ("{{FORCE_MODE_DAMPING}}", params.force_mode_damping.to_string()),
            ("{{FORCE_MODE_GAIN_SCALING}}", params.force_mode_gain_scaling.to_string()),
            ("{{PAYLOAD_MASS}}", params.default_payload.mass.to_string()),
            ("{{PAYLOAD_COG}}", format!("[{}, {}, {}]", cog[0], cog[1], cog[2])),
            ("{{JOINT_STATE_MULT}}", MULT_JOINTSTATE.to_string()),
            (
                "{{TOOL_COMM_SETUP}}",
                params.tool_comm_setup.map(|setup| setup.to_script()).unwrap_or_default(),
            ),
        ];
        replacements
            .iter()
            .fold(self.source.clone(), |text, (key, value)| text.replace(key, value))
    }
}

/// Any closure from parameters to program text is a template.
impl<F> ProgramTemplate for F
where
    F: Fn(&ProgramParameters) -> String + Send + Sync,
{
    fn render(&self, params: &ProgramParameters) -> String {
        self(params)
    }
}
