use std::net::IpAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{CallbackSlot, TrajectoryMotionType, TrajectoryResult, TrajectorySplineType};
use crate::comm::{take_i32_frame, ConnectionHandler, DisconnectReason, FrameWriter, TcpServer};
use crate::{DriverError, Result, Vector6d};

/// Values per trajectory point frame.
pub const TRAJECTORY_MESSAGE_LEN: usize = 21;

pub const DEFAULT_BLEND_RADIUS: f32 = 0.052;

/// Spline segment end point. The degree follows from which derivatives are
/// supplied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplinePoint {
    Quadratic {
        positions: Vector6d,
    },
    Cubic {
        positions: Vector6d,
        velocities: Vector6d,
    },
    Quintic {
        positions: Vector6d,
        velocities: Vector6d,
        accelerations: Vector6d,
    },
}

impl SplinePoint {
    pub fn spline_type(&self) -> TrajectorySplineType {
        match self {
            Self::Quadratic { .. } => TrajectorySplineType::Quadratic,
            Self::Cubic { .. } => TrajectorySplineType::Cubic,
            Self::Quintic { .. } => TrajectorySplineType::Quintic,
        }
    }

    fn parts(&self) -> (&Vector6d, Option<&Vector6d>, Option<&Vector6d>) {
        match self {
            Self::Quadratic { positions } => (positions, None, None),
            Self::Cubic { positions, velocities } => (positions, Some(velocities), None),
            Self::Quintic {
                positions,
                velocities,
                accelerations,
            } => (positions, Some(velocities), Some(accelerations)),
        }
    }
}

/// Where the trajectory channel is in its per-trajectory lifecycle.
///
/// The terminal outcomes are transient: reporting one returns the channel to
/// `Idle`, see [`TrajectoryPointInterface::last_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrajectoryState {
    Idle,
    Streaming { expected: u32, sent: u32 },
}

struct Channel {
    state: TrajectoryState,
    /// Locally canceled trajectories whose outcome the robot still owes.
    unconfirmed_cancels: u32,
}

struct TrajectoryShared {
    channel: Mutex<Channel>,
    last_result: Mutex<Option<TrajectoryResult>>,
    done: CallbackSlot<TrajectoryResult>,
}

impl TrajectoryShared {
    fn state(&self) -> TrajectoryState {
        self.channel.lock().state
    }

    /// Ends the current trajectory with `result`. Outcomes arriving while
    /// idle are dropped so every trajectory reports exactly once.
    fn finish(&self, result: TrajectoryResult) {
        {
            let mut channel = self.channel.lock();
            if channel.state == TrajectoryState::Idle {
                info!("dropping trajectory result {:?}, no trajectory in flight", result);
                return;
            }
            channel.state = TrajectoryState::Idle;
            *self.last_result.lock() = Some(result);
        }
        self.notify(result);
    }

    /// Ends the current trajectory as canceled before the robot confirms it.
    /// The robot's own report for it is swallowed when it arrives.
    fn cancel_locally(&self) -> bool {
        {
            let mut channel = self.channel.lock();
            if channel.state == TrajectoryState::Idle {
                return false;
            }
            channel.state = TrajectoryState::Idle;
            channel.unconfirmed_cancels += 1;
            *self.last_result.lock() = Some(TrajectoryResult::Canceled);
        }
        self.notify(TrajectoryResult::Canceled);
        true
    }

    fn robot_reported(&self, result: TrajectoryResult) {
        {
            let mut channel = self.channel.lock();
            if channel.unconfirmed_cancels > 0 {
                channel.unconfirmed_cancels -= 1;
                info!("robot reported {:?} for an already canceled trajectory", result);
                return;
            }
        }
        self.finish(result);
    }

    fn notify(&self, result: TrajectoryResult) {
        info!("trajectory finished: {:?}", result);
        if !self.done.call(result) {
            warn!("trajectory finished without a registered result callback");
        }
    }
}

impl ConnectionHandler for TrajectoryShared {
    fn on_disconnect(&self, reason: DisconnectReason) {
        // a new program connection owes nothing for the old one
        self.channel.lock().unconfirmed_cancels = 0;
        let result = match reason {
            DisconnectReason::Closed => TrajectoryResult::Failure,
            DisconnectReason::Shutdown => TrajectoryResult::Canceled,
        };
        self.finish(result);
    }

    fn on_data(&self, buf: &mut BytesMut) -> Option<Bytes> {
        while let Some(values) = take_i32_frame(buf, 1) {
            match TrajectoryResult::try_from(values[0]) {
                Ok(result) => self.robot_reported(result),
                Err(raw) => warn!("robot reported unknown trajectory result {}", raw),
            }
        }
        None
    }
}

/// Trajectory channel: forwards whole trajectories point by point and
/// reports how each one ended.
pub struct TrajectoryPointInterface {
    server: TcpServer,
    shared: Arc<TrajectoryShared>,
}

impl TrajectoryPointInterface {
    pub async fn bind(ip: IpAddr, port: u16, token: &CancellationToken) -> Result<Self> {
        let shared = Arc::new(TrajectoryShared {
            channel: Mutex::new(Channel {
                state: TrajectoryState::Idle,
                unconfirmed_cancels: 0,
            }),
            last_result: Mutex::new(None),
            done: CallbackSlot::new(),
        });
        let server = TcpServer::bind("trajectory", ip, port, shared.clone(), token).await?;
        Ok(Self { server, shared })
    }

    pub fn local_port(&self) -> u16 {
        self.server.local_port()
    }

    pub fn is_connected(&self) -> bool {
        self.server.is_connected()
    }

    pub fn state(&self) -> TrajectoryState {
        self.shared.state()
    }

    /// Outcome of the most recently finished trajectory.
    pub fn last_result(&self) -> Option<TrajectoryResult> {
        *self.shared.last_result.lock()
    }

    /// Replaces the listener notified once per finished trajectory.
    pub fn register_done_callback(&self, callback: impl Fn(TrajectoryResult) + Send + Sync + 'static) {
        self.shared.done.set(callback);
    }

    /// Moves `Idle` to `Streaming`, expecting `point_count` points.
    pub fn begin(&self, point_count: i32) -> Result<()> {
        let expected = u32::try_from(point_count)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| DriverError::InvalidArgument(format!("cannot start a trajectory of {point_count} points")))?;
        let mut channel = self.shared.channel.lock();
        if let TrajectoryState::Streaming { expected, sent } = channel.state {
            return Err(DriverError::InvalidArgument(format!(
                "a trajectory is already in flight ({sent}/{expected} points sent)"
            )));
        }
        channel.state = TrajectoryState::Streaming { expected, sent: 0 };
        Ok(())
    }

    /// Undoes [`begin`](Self::begin) when the start message never reached
    /// the robot. No result is reported.
    pub fn abandon_start(&self) {
        let mut channel = self.shared.channel.lock();
        if let TrajectoryState::Streaming { sent: 0, .. } = channel.state {
            channel.state = TrajectoryState::Idle;
        }
    }

    /// Ends a streaming trajectory as canceled once the cancel message went
    /// out. Fails when idle. The robot's confirmation that follows is not
    /// reported again, so a trajectory started meanwhile keeps streaming.
    pub fn cancel(&self) -> Result<()> {
        if self.shared.cancel_locally() {
            Ok(())
        } else {
            Err(DriverError::InvalidArgument("no trajectory to cancel".to_string()))
        }
    }

    pub async fn write_trajectory_point(
        &self,
        positions: &Vector6d,
        cartesian: bool,
        goal_time: f32,
        blend_radius: f32,
    ) -> Result<()> {
        check_non_negative("goal time", goal_time)?;
        check_non_negative("blend radius", blend_radius)?;
        let motion = if cartesian {
            TrajectoryMotionType::Cartesian
        } else {
            TrajectoryMotionType::Joint
        };

        let mut frame = FrameWriter::new(TRAJECTORY_MESSAGE_LEN);
        frame
            .put_scaled_all(positions)?
            .put_scaled_all(&[0.0; 12])?
            .put_scaled(goal_time as f64)?
            .put_scaled(blend_radius as f64)?
            .put_i32(motion.into());
        self.send_point(frame.finish()).await
    }

    pub async fn write_trajectory_spline_point(&self, point: &SplinePoint, goal_time: f32) -> Result<()> {
        check_non_negative("goal time", goal_time)?;
        let (positions, velocities, accelerations) = point.parts();

        let mut frame = FrameWriter::new(TRAJECTORY_MESSAGE_LEN);
        frame
            .put_scaled_all(positions)?
            .put_scaled_all(velocities.unwrap_or(&[0.0; 6]))?
            .put_scaled_all(accelerations.unwrap_or(&[0.0; 6]))?
            .put_scaled(goal_time as f64)?
            .put_i32(point.spline_type().into())
            .put_i32(TrajectoryMotionType::JointSpline.into());
        self.send_point(frame.finish()).await
    }

    pub async fn shutdown(&self) {
        self.server.shutdown().await;
    }

    /// Takes a finished frame, so a refused value never claims a point.
    async fn send_point(&self, frame: Bytes) -> Result<()> {
        self.reserve()?;
        let written = self.server.write(&frame).await;
        if written.is_err() {
            self.release();
        }
        written
    }

    fn reserve(&self) -> Result<()> {
        let mut channel = self.shared.channel.lock();
        match channel.state {
            TrajectoryState::Streaming { expected, sent } if sent < expected => {
                channel.state = TrajectoryState::Streaming {
                    expected,
                    sent: sent + 1,
                };
                Ok(())
            }
            TrajectoryState::Streaming { expected, .. } => Err(DriverError::InvalidArgument(format!(
                "all {expected} announced points were already sent"
            ))),
            TrajectoryState::Idle => Err(DriverError::InvalidArgument(
                "no trajectory started, send a start control message first".to_string(),
            )),
        }
    }

    fn release(&self) {
        let mut channel = self.shared.channel.lock();
        if let TrajectoryState::Streaming { expected, sent } = channel.state {
            channel.state = TrajectoryState::Streaming {
                expected,
                sent: sent.saturating_sub(1),
            };
        }
    }
}

fn check_non_negative(what: &str, value: f32) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(DriverError::InvalidArgument(format!("{what} must be a non-negative number, got {value}")))
    }
}
