use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    CallbackSlot, ControlMode, FreedriveControlMessage, RobotReceiveTimeout, TrajectoryControlMessage,
};
use crate::comm::{ConnectionHandler, DisconnectReason, FrameWriter, TcpServer};
use crate::{DriverError, Result, Vector6d};

/// Values per reverse frame: timeout, six payload values, control mode.
pub const REVERSE_MESSAGE_LEN: usize = 8;

struct ReverseHandler {
    program_state: Arc<CallbackSlot<bool>>,
}

impl ConnectionHandler for ReverseHandler {
    fn on_connect(&self, _peer: SocketAddr) {
        self.program_state.call(true);
    }

    fn on_disconnect(&self, _reason: DisconnectReason) {
        self.program_state.call(false);
    }

    fn on_data(&self, buf: &mut BytesMut) -> Option<Bytes> {
        // the robot never talks on this socket
        debug!("reverse socket: discarding {} unexpected bytes", buf.len());
        buf.clear();
        None
    }
}

/// Reverse channel: per-cycle setpoints and keepalives for the robot
/// program.
///
/// A successful write means the frame reached the socket, not that the
/// robot accepted it. The robot program waits at most the frame's receive
/// timeout for the next one, so callers must write every cycle while moving.
pub struct ReverseInterface {
    server: TcpServer,
    program_state: Arc<CallbackSlot<bool>>,
    step: Duration,
}

impl ReverseInterface {
    pub async fn bind(ip: IpAddr, port: u16, step: Duration, token: &CancellationToken) -> Result<Self> {
        let program_state = Arc::new(CallbackSlot::new());
        let handler = Arc::new(ReverseHandler {
            program_state: program_state.clone(),
        });
        let server = TcpServer::bind("reverse", ip, port, handler, token).await?;
        Ok(Self {
            server,
            program_state,
            step,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.server.local_port()
    }

    pub fn is_connected(&self) -> bool {
        self.server.is_connected()
    }

    /// Fired with `true` when the robot program connects and `false` when
    /// it goes away.
    pub fn register_program_state_callback(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.program_state.set(callback);
    }

    pub async fn write_joint_command(
        &self,
        values: &Vector6d,
        mode: ControlMode,
        timeout: RobotReceiveTimeout,
    ) -> Result<()> {
        match mode {
            ControlMode::Stopped | ControlMode::Uninitialized | ControlMode::Forward | ControlMode::Freedrive => {
                return Err(DriverError::InvalidArgument(format!(
                    "{mode:?} cannot carry a joint command"
                )))
            }
            _ => {}
        }
        let timeout = timeout.verify(mode, self.step)?;

        let mut frame = FrameWriter::new(REVERSE_MESSAGE_LEN);
        frame.put_i32(timeout).put_scaled_all(values)?.put_i32(mode.into());
        self.server.write(&frame.finish()).await
    }

    pub async fn write_keepalive(&self, timeout: RobotReceiveTimeout) -> Result<()> {
        self.write_mode_only(ControlMode::Idle, timeout).await
    }

    pub async fn write_trajectory_control_message(
        &self,
        action: TrajectoryControlMessage,
        point_count: i32,
        timeout: RobotReceiveTimeout,
    ) -> Result<()> {
        let timeout = timeout.verify(ControlMode::Forward, self.step)?;
        let mut frame = FrameWriter::new(REVERSE_MESSAGE_LEN);
        frame.put_i32(timeout).put_i32(action.into()).put_i32(point_count);
        self.write_with_mode(frame, ControlMode::Forward).await
    }

    pub async fn write_freedrive_control_message(
        &self,
        action: FreedriveControlMessage,
        timeout: RobotReceiveTimeout,
    ) -> Result<()> {
        let timeout = timeout.verify(ControlMode::Freedrive, self.step)?;
        let mut frame = FrameWriter::new(REVERSE_MESSAGE_LEN);
        frame.put_i32(timeout).put_i32(action.into());
        self.write_with_mode(frame, ControlMode::Freedrive).await
    }

    /// Tells the robot program to stop listening and exit.
    pub async fn stop_control(&self) -> Result<()> {
        self.write_mode_only(ControlMode::Stopped, RobotReceiveTimeout::Off).await
    }

    pub async fn shutdown(&self) {
        self.server.shutdown().await;
    }

    async fn write_mode_only(&self, mode: ControlMode, timeout: RobotReceiveTimeout) -> Result<()> {
        let timeout = timeout.verify(mode, self.step)?;
        let mut frame = FrameWriter::new(REVERSE_MESSAGE_LEN);
        frame.put_i32(timeout);
        self.write_with_mode(frame, mode).await
    }

    /// Zero pads up to the last slot and puts `mode` there.
    async fn write_with_mode(&self, mut frame: FrameWriter, mode: ControlMode) -> Result<()> {
        while frame.remaining() > 1 {
            frame.put_i32(0);
        }
        frame.put_i32(mode.into());
        self.server.write(&frame.finish()).await
    }
}
