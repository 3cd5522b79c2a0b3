use int_enum::IntEnum;
use serde::{Deserialize, Serialize};

/// Interpretation of the reverse socket frame by the robot program.
#[repr(i32)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, IntEnum)]
pub enum ControlMode {
    /// The robot program stops listening and exits.
    Stopped = -2,
    Uninitialized = -1,
    /// Keepalive, the robot holds position.
    Idle = 0,
    Servoj = 1,
    Speedj = 2,
    /// Motion comes from the trajectory socket.
    Forward = 3,
    Speedl = 4,
    Pose = 5,
    Freedrive = 6,
    ToolInContact = 7,
}

impl ControlMode {
    /// Modes in which the robot moves to a new setpoint every cycle.
    pub fn is_realtime(&self) -> bool {
        matches!(self, Self::Servoj | Self::Speedj | Self::Speedl | Self::Pose)
    }
}

#[repr(i32)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum TrajectoryControlMessage {
    Cancel = -1,
    Noop = 0,
    Start = 1,
}

#[repr(i32)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum FreedriveControlMessage {
    Stop = -1,
    Noop = 0,
    Start = 1,
}

/// Motion type of one forwarded trajectory point.
#[repr(i32)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum TrajectoryMotionType {
    Joint = 0,
    Cartesian = 1,
    JointSpline = 2,
}

#[repr(i32)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum TrajectorySplineType {
    Cubic = 1,
    Quintic = 2,
    Quadratic = 3,
}

/// Terminal outcome of a forwarded trajectory.
#[repr(i32)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum TrajectoryResult {
    Success = 0,
    Canceled = 1,
    Failure = 2,
}

#[repr(i32)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum ToolContactResult {
    Success = 0,
    Canceled = 1,
}

#[repr(i32)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum ScriptCommand {
    ZeroFtSensor = 0,
    SetPayload = 1,
    SetToolVoltage = 2,
    StartForceMode = 3,
    EndForceMode = 4,
    StartToolContact = 5,
    EndToolContact = 6,
    SetGravity = 7,
    StartPayloadEstimation = 8,
}

/// Tool supply voltage in volts.
#[repr(i32)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum ToolVoltage {
    Off = 0,
    V12 = 12,
    V24 = 24,
}

/// How the force frame is interpreted while in force mode.
#[repr(i32)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum ForceModeType {
    /// Force frame transformed so its y-axis aligns with the TCP motion.
    AlignedToMotion = 1,
    /// Task frame used as is.
    TaskFrame = 2,
    /// Force frame x-axis projected onto the task frame xy-plane.
    Projected = 3,
}

/// Motion used to estimate the payload.
#[repr(i32)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum PayloadEstimationType {
    FrontLift = 1,
    FrontDrag = 2,
    TopLift = 3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_modes() {
        let realtime: Vec<_> = [
            ControlMode::Stopped,
            ControlMode::Idle,
            ControlMode::Servoj,
            ControlMode::Speedj,
            ControlMode::Forward,
            ControlMode::Speedl,
            ControlMode::Pose,
            ControlMode::Freedrive,
            ControlMode::ToolInContact,
        ]
        .into_iter()
        .filter(ControlMode::is_realtime)
        .collect();
        assert_eq!(
            realtime,
            vec![ControlMode::Servoj, ControlMode::Speedj, ControlMode::Speedl, ControlMode::Pose]
        );
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(i32::from(ControlMode::Stopped), -2);
        assert_eq!(i32::from(TrajectoryControlMessage::Cancel), -1);
        assert_eq!(TrajectoryResult::try_from(1), Ok(TrajectoryResult::Canceled));
        assert!(TrajectoryResult::try_from(3).is_err());
        assert_eq!(i32::from(ScriptCommand::StartPayloadEstimation), 8);
    }
}
