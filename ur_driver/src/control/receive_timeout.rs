use std::time::Duration;

use tracing::warn;

use super::ControlMode;
use crate::{DriverError, Result};

/// Upper bound for the receive timeout while the robot follows realtime
/// setpoints.
pub const MAX_REALTIME_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long the robot program waits for the next reverse frame before it
/// considers the connection stalled and stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotReceiveTimeout {
    /// Blocking read, the robot waits forever.
    Off,
    Bounded(Duration),
}

impl RobotReceiveTimeout {
    pub fn millisec(ms: u64) -> Self {
        Self::Bounded(Duration::from_millis(ms))
    }

    /// Negative values count as zero. A duration too long to represent,
    /// infinity included, means waiting forever.
    pub fn sec(seconds: f64) -> Self {
        match Duration::try_from_secs_f64(seconds.max(0.0)) {
            Ok(timeout) => Self::Bounded(timeout),
            Err(_) => Self::Off,
        }
    }

    pub fn off() -> Self {
        Self::Off
    }

    /// Wire value in milliseconds for use with `mode`, given the control
    /// period `step`. Zero means blocking.
    ///
    /// Realtime modes refuse `Off` and anything above
    /// [`MAX_REALTIME_TIMEOUT`]. Bounded timeouts are rounded to the nearest
    /// multiple of `step` (at least one step).
    pub fn verify(&self, mode: ControlMode, step: Duration) -> Result<i32> {
        let timeout = match self {
            Self::Off if mode.is_realtime() => {
                return Err(DriverError::InvalidArgument(format!(
                    "{mode:?} needs a bounded receive timeout"
                )))
            }
            Self::Off => return Ok(0),
            Self::Bounded(timeout) => *timeout,
        };
        if mode.is_realtime() && timeout > MAX_REALTIME_TIMEOUT {
            return Err(DriverError::InvalidArgument(format!(
                "{mode:?} allows a receive timeout of at most {} ms, got {} ms",
                MAX_REALTIME_TIMEOUT.as_millis(),
                timeout.as_millis()
            )));
        }

        let step_us = step.as_micros().max(1);
        let steps = ((timeout.as_micros() + step_us / 2) / step_us).max(1);
        let rounded = Duration::from_micros((steps * step_us) as u64);
        if rounded != timeout {
            warn!(
                "receive timeout {:?} is not a multiple of the control period {:?}, using {:?}",
                timeout, step, rounded
            );
        }
        i32::try_from(rounded.as_millis())
            .map_err(|_| DriverError::InvalidArgument(format!("receive timeout {rounded:?} is too long")))
    }
}

impl Default for RobotReceiveTimeout {
    fn default() -> Self {
        Self::millisec(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Duration = Duration::from_millis(2);

    #[test]
    fn test_realtime_caps_timeout() {
        let timeout = RobotReceiveTimeout::millisec(1001);
        assert!(timeout.verify(ControlMode::Servoj, STEP).is_err());
        assert!(RobotReceiveTimeout::off().verify(ControlMode::Speedl, STEP).is_err());
        assert_eq!(RobotReceiveTimeout::millisec(1000).verify(ControlMode::Pose, STEP).unwrap(), 1000);
    }

    #[test]
    fn test_non_realtime_allows_long_or_blocking() {
        assert_eq!(RobotReceiveTimeout::off().verify(ControlMode::Idle, STEP).unwrap(), 0);
        assert_eq!(RobotReceiveTimeout::sec(5.0).verify(ControlMode::Forward, STEP).unwrap(), 5000);
    }

    #[test]
    fn test_unrepresentable_seconds_mean_blocking() {
        assert_eq!(RobotReceiveTimeout::sec(f64::INFINITY), RobotReceiveTimeout::Off);
        assert_eq!(RobotReceiveTimeout::sec(1e30), RobotReceiveTimeout::Off);
        assert_eq!(RobotReceiveTimeout::sec(-2.0), RobotReceiveTimeout::Bounded(Duration::ZERO));
        // and so stay refused where the robot must not block
        assert!(RobotReceiveTimeout::sec(f64::INFINITY).verify(ControlMode::Servoj, STEP).is_err());
    }

    #[test]
    fn test_rounds_to_control_period() {
        let step = Duration::from_millis(8);
        assert_eq!(RobotReceiveTimeout::millisec(20).verify(ControlMode::Servoj, step).unwrap(), 24);
        assert_eq!(RobotReceiveTimeout::millisec(19).verify(ControlMode::Servoj, step).unwrap(), 16);
        assert_eq!(RobotReceiveTimeout::millisec(1).verify(ControlMode::Servoj, step).unwrap(), 8);
    }
}
