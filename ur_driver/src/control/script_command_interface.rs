use std::net::IpAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{CallbackSlot, ForceModeType, PayloadEstimationType, ScriptCommand, ToolContactResult, ToolVoltage};
use crate::comm::{take_i32_frame, ConnectionHandler, FrameWriter, TcpServer};
use crate::{DriverError, Payload, Result, Vector3d, Vector6Uint32, Vector6d};

/// Values per script command frame.
pub const SCRIPT_COMMAND_MESSAGE_LEN: usize = 28;

const RESULT_TOOL_CONTACT: i32 = 0;
const RESULT_PAYLOAD_ESTIMATION: i32 = 1;

/// Force mode request as forwarded to the robot.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceModeParameters {
    /// Force frame relative to the base frame, as a pose.
    pub task_frame: Vector6d,
    /// 1 makes the robot compliant along the axis, 0 keeps it stiff.
    pub selection_vector: Vector6Uint32,
    pub wrench: Vector6d,
    pub mode: ForceModeType,
    /// Speed limits on compliant axes, deviation limits on the others.
    pub limits: Vector6d,
    pub damping: f64,
    pub gain_scaling: f64,
}

#[derive(Default)]
struct ScriptResults {
    tool_contact: CallbackSlot<ToolContactResult>,
    payload_estimation: CallbackSlot<()>,
}

impl ConnectionHandler for ScriptResults {
    fn on_data(&self, buf: &mut BytesMut) -> Option<Bytes> {
        while let Some(values) = take_i32_frame(buf, 2) {
            match (values[0], values[1]) {
                (RESULT_TOOL_CONTACT, raw) => match ToolContactResult::try_from(raw) {
                    Ok(result) => {
                        info!("tool contact finished: {:?}", result);
                        if !self.tool_contact.call(result) {
                            warn!("tool contact finished without a registered result callback");
                        }
                    }
                    Err(raw) => warn!("robot reported unknown tool contact result {}", raw),
                },
                (RESULT_PAYLOAD_ESTIMATION, _) => {
                    info!("payload estimation finished");
                    if !self.payload_estimation.call(()) {
                        warn!("payload estimation finished without a registered result callback");
                    }
                }
                (kind, value) => warn!("robot sent unknown script result {} ({})", kind, value),
            }
        }
        None
    }
}

/// Script command channel: one-shot commands to the running robot program.
///
/// Every command needs the robot program connected; without it the write
/// fails immediately. The robot program reconnects on its own after a
/// restart, and [`ensure_listening`](Self::ensure_listening) brings back a
/// listener that died.
pub struct ScriptCommandInterface {
    server: TcpServer,
    results: Arc<ScriptResults>,
}

impl ScriptCommandInterface {
    pub async fn bind(ip: IpAddr, port: u16, token: &CancellationToken) -> Result<Self> {
        let results = Arc::new(ScriptResults::default());
        let server = TcpServer::bind("script command", ip, port, results.clone(), token).await?;
        Ok(Self { server, results })
    }

    pub fn local_port(&self) -> u16 {
        self.server.local_port()
    }

    pub fn client_connected(&self) -> bool {
        self.server.is_connected()
    }

    pub async fn ensure_listening(&self) -> Result<()> {
        self.server.relisten().await
    }

    pub fn register_tool_contact_result_callback(&self, callback: impl Fn(ToolContactResult) + Send + Sync + 'static) {
        self.results.tool_contact.set(callback);
    }

    pub fn register_payload_estimation_result_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.results.payload_estimation.set(move |()| callback());
    }

    pub async fn zero_ft_sensor(&self) -> Result<()> {
        self.send(ScriptCommand::ZeroFtSensor, |_| Ok(())).await
    }

    pub async fn set_payload(&self, payload: &Payload) -> Result<()> {
        if !payload.mass.is_finite() || payload.mass < 0.0 {
            return Err(DriverError::InvalidArgument(format!("payload mass {} kg", payload.mass)));
        }
        self.send(ScriptCommand::SetPayload, |frame| {
            frame.put_scaled(payload.mass)?.put_scaled_all(&payload.cog)?;
            Ok(())
        })
        .await
    }

    pub async fn set_tool_voltage(&self, voltage: ToolVoltage) -> Result<()> {
        self.send(ScriptCommand::SetToolVoltage, |frame| {
            frame.put_scaled(i32::from(voltage) as f64)?;
            Ok(())
        })
        .await
    }

    pub async fn start_force_mode(&self, params: &ForceModeParameters) -> Result<()> {
        if let Some(axis) = params.selection_vector.iter().position(|s| *s > 1) {
            return Err(DriverError::InvalidArgument(format!(
                "selection vector entry {axis} must be 0 or 1, got {}",
                params.selection_vector[axis]
            )));
        }
        if !(0.0..=1.0).contains(&params.damping) {
            return Err(DriverError::InvalidArgument(format!("force mode damping {} outside [0, 1]", params.damping)));
        }
        if !(0.0..=2.0).contains(&params.gain_scaling) {
            return Err(DriverError::InvalidArgument(format!(
                "force mode gain scaling {} outside [0, 2]",
                params.gain_scaling
            )));
        }
        let selection: Vec<i32> = params.selection_vector.iter().map(|s| *s as i32).collect();
        self.send(ScriptCommand::StartForceMode, |frame| {
            frame
                .put_scaled_all(&params.task_frame)?
                .put_i32_all(&selection)
                .put_scaled_all(&params.wrench)?
                .put_i32(params.mode.into())
                .put_scaled_all(&params.limits)?
                .put_scaled(params.damping)?
                .put_scaled(params.gain_scaling)?;
            Ok(())
        })
        .await
    }

    pub async fn end_force_mode(&self) -> Result<()> {
        self.send(ScriptCommand::EndForceMode, |_| Ok(())).await
    }

    pub async fn start_tool_contact(&self) -> Result<()> {
        self.send(ScriptCommand::StartToolContact, |_| Ok(())).await
    }

    pub async fn end_tool_contact(&self) -> Result<()> {
        self.send(ScriptCommand::EndToolContact, |_| Ok(())).await
    }

    /// Sets the gravity direction (m/s^2, base frame).
    pub async fn set_gravity(&self, gravity: &Vector3d) -> Result<()> {
        self.send(ScriptCommand::SetGravity, |frame| {
            frame.put_scaled_all(gravity)?;
            Ok(())
        })
        .await
    }

    /// Starts the payload estimation motion. Distances in m, speed in m/s.
    pub async fn start_payload_estimation(
        &self,
        kind: PayloadEstimationType,
        move_distance: f64,
        secondary_move_distance: f64,
        move_speed: f64,
    ) -> Result<()> {
        for (what, value) in [
            ("move distance", move_distance),
            ("secondary move distance", secondary_move_distance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(DriverError::InvalidArgument(format!("{what} {value} m")));
            }
        }
        if !move_speed.is_finite() || move_speed <= 0.0 {
            return Err(DriverError::InvalidArgument(format!("move speed {move_speed} m/s")));
        }
        self.send(ScriptCommand::StartPayloadEstimation, |frame| {
            frame
                .put_i32(kind.into())
                .put_scaled(move_distance)?
                .put_scaled(secondary_move_distance)?
                .put_scaled(move_speed)?;
            Ok(())
        })
        .await
    }

    pub async fn shutdown(&self) {
        self.server.shutdown().await;
    }

    /// Builds the whole frame before touching the socket, so a value the
    /// wire cannot carry fails the command without sending anything.
    async fn send(&self, command: ScriptCommand, body: impl FnOnce(&mut FrameWriter) -> Result<()>) -> Result<()> {
        let mut frame = FrameWriter::new(SCRIPT_COMMAND_MESSAGE_LEN);
        frame.put_i32(command.into());
        body(&mut frame)?;
        self.server.write(&frame.finish()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn force_mode() -> ForceModeParameters {
        ForceModeParameters {
            task_frame: [0.0; 6],
            selection_vector: [0, 0, 1, 0, 0, 0],
            wrench: [0.0, 0.0, -10.0, 0.0, 0.0, 0.0],
            mode: ForceModeType::TaskFrame,
            limits: [0.1; 6],
            damping: 0.025,
            gain_scaling: 0.5,
        }
    }

    #[tokio::test]
    async fn test_commands_fail_without_robot_program() {
        let script = ScriptCommandInterface::bind(Ipv4Addr::LOCALHOST.into(), 0, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!script.client_connected());
        assert!(matches!(script.zero_ft_sensor().await, Err(DriverError::NotConnected(_))));
    }

    #[tokio::test]
    async fn test_arguments_checked_before_io() {
        let script = ScriptCommandInterface::bind(Ipv4Addr::LOCALHOST.into(), 0, &CancellationToken::new())
            .await
            .unwrap();
        let mut params = force_mode();
        params.selection_vector[3] = 2;
        assert!(matches!(script.start_force_mode(&params).await, Err(DriverError::InvalidArgument(_))));

        let mut params = force_mode();
        params.damping = 1.5;
        assert!(matches!(script.start_force_mode(&params).await, Err(DriverError::InvalidArgument(_))));

        let payload = Payload {
            mass: -1.0,
            cog: [0.0; 3],
        };
        assert!(matches!(script.set_payload(&payload).await, Err(DriverError::InvalidArgument(_))));

        // not connected either, so only a refused value can be InvalidArgument
        let payload = Payload {
            mass: 1.0,
            cog: [0.0, f64::NAN, 0.0],
        };
        assert!(matches!(script.set_payload(&payload).await, Err(DriverError::InvalidArgument(_))));
        assert!(matches!(
            script.set_gravity(&[0.0, 0.0, -9.81e4]).await,
            Err(DriverError::InvalidArgument(_))
        ));
        assert!(matches!(
            script
                .start_payload_estimation(PayloadEstimationType::TopLift, 0.1, 0.0, 0.0)
                .await,
            Err(DriverError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_results_dispatch_to_their_callbacks() {
        let results = ScriptResults::default();
        let contacts = Arc::new(AtomicUsize::new(0));
        let estimations = Arc::new(AtomicUsize::new(0));
        let seen = contacts.clone();
        results.tool_contact.set(move |result| {
            assert_eq!(result, ToolContactResult::Canceled);
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let seen = estimations.clone();
        results.payload_estimation.set(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let mut buf = BytesMut::new();
        for value in [RESULT_TOOL_CONTACT, 1, RESULT_PAYLOAD_ESTIMATION, 0, 9, 9] {
            buf.extend_from_slice(&value.to_be_bytes());
        }
        assert!(results.on_data(&mut buf).is_none());
        assert_eq!(contacts.load(Ordering::SeqCst), 1);
        assert_eq!(estimations.load(Ordering::SeqCst), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_force_mode_frame_layout() {
        let params = force_mode();
        let mut frame = FrameWriter::new(SCRIPT_COMMAND_MESSAGE_LEN);
        frame.put_i32(ScriptCommand::StartForceMode.into());
        frame
            .put_scaled_all(&params.task_frame)
            .unwrap()
            .put_i32_all(&[0, 0, 1, 0, 0, 0])
            .put_scaled_all(&params.wrench)
            .unwrap()
            .put_i32(params.mode.into())
            .put_scaled_all(&params.limits)
            .unwrap()
            .put_scaled(params.damping)
            .unwrap()
            .put_scaled(params.gain_scaling)
            .unwrap();
        assert_eq!(frame.remaining(), 0);
    }
}
