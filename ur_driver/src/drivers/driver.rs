use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{DriverConfig, ProgramParameters, ProgramTemplate};
use crate::control::{
    ControlMode, ForceModeParameters, ForceModeType, FreedriveControlMessage, PayloadEstimationType,
    ReverseInterface, RobotReceiveTimeout, ScriptCommandInterface, ScriptSender, SplinePoint,
    ToolContactResult, ToolVoltage, TrajectoryControlMessage, TrajectoryPointInterface, TrajectoryResult,
    TrajectoryState,
};
use crate::primary::{self, StatusValidator, VersionInformation};
use crate::rtde::{DataPackage, RtdeClient, RtdeSettings, RtdeWriter};
use crate::{DriverError, Payload, Result, Vector3d, Vector6Uint32, Vector6d};

/// Poll window of [`UrDriver::get_data_package`] unless reads are
/// non-blocking.
pub const DATA_PACKAGE_WINDOW: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostedPorts {
    pub reverse: u16,
    pub script_sender: u16,
    pub trajectory: u16,
    pub script_command: u16,
}

/// The robot driver: owns every channel and routes the public API to them.
///
/// Write methods return `true` once the frame is on the socket. `false`
/// means it was refused locally (bad argument, wrong state) or the socket
/// was not connected or failed; the reason is logged. No write is retried.
pub struct UrDriver {
    config: DriverConfig,
    rtde: Arc<RtdeClient>,
    rtde_writer: RtdeWriter,
    validator: StatusValidator,
    reverse: ReverseInterface,
    trajectory: TrajectoryPointInterface,
    script_command: Arc<ScriptCommandInterface>,
    script_sender: ScriptSender,
    robot_version: VersionInformation,
    token: CancellationToken,
}

impl UrDriver {
    /// Brings up every channel.
    ///
    /// Order: negotiate the cyclic exchange, read version and calibration
    /// from the status stream, bind the reverse, trajectory and script
    /// command sockets, then provisioning. In headless mode the program is
    /// pushed to the robot before returning. Cyclic frames only flow after
    /// [`start_rtde_communication`](Self::start_rtde_communication).
    ///
    /// A calibration mismatch is logged and does not fail construction.
    pub async fn new(config: DriverConfig, template: impl ProgramTemplate) -> Result<Self> {
        config.validate()?;
        let token = CancellationToken::new();

        let settings = RtdeSettings {
            output_recipe: config.output_recipe.clone(),
            input_recipe: config.input_recipe.clone(),
            target_frequency: config.target_frequency,
            connection_lost_periods: config.connection_lost_periods,
        };
        let rtde = Arc::new(RtdeClient::connect(&config.connection_url(config.rtde_port), &settings, &token).await?);

        let validator = StatusValidator::new();
        if let Err(e) = validator
            .collect(&config.connection_url(config.primary_port), config.status_read_timeout())
            .await
        {
            warn!("could not read version and calibration from the status stream: {}", e);
        }
        match &config.calibration_checksum {
            Some(expected) => {
                validator.check_calibration(expected);
            }
            None => match validator.calibration_checksum() {
                Some(actual) => info!("robot calibration checksum is {}", actual),
                None => warn!("robot calibration unknown"),
            },
        }
        let robot_version = validator.read_version().unwrap_or_else(|| rtde.version());
        if config.tool_comm_setup.is_some() && !robot_version.is_e_series() {
            token.cancel();
            return Err(DriverError::InvalidConfig(format!(
                "tool communication needs an e-series controller, the robot runs {robot_version}"
            )));
        }

        let bind_ip = config.reverse_bind_ip()?;
        let step = rtde.period();
        let reverse = ReverseInterface::bind(bind_ip, config.reverse_port, step, &token).await?;
        let trajectory = TrajectoryPointInterface::bind(bind_ip, config.trajectory_port, &token).await?;
        let script_command =
            Arc::new(ScriptCommandInterface::bind(bind_ip, config.script_command_port, &token).await?);

        let advertised_ip = match &config.reverse_ip {
            Some(ip) => ip.clone(),
            None => rtde.local_addr().ip().to_string(),
        };
        let program = template.render(&ProgramParameters {
            reverse_ip: advertised_ip,
            reverse_port: reverse.local_port(),
            trajectory_port: trajectory.local_port(),
            script_command_port: script_command.local_port(),
            servoj_gain: config.servoj_gain,
            servoj_lookahead_time: config.servoj_lookahead_time,
            force_mode_damping: config.force_mode_damping,
            force_mode_gain_scaling: config.force_mode_gain_scaling,
            default_payload: config.default_payload,
            tool_comm_setup: config.tool_comm_setup,
        });
        let script_sender = ScriptSender::bind(bind_ip, config.script_sender_port, program, &token).await?;

        tokio::spawn(supervise_script_command(
            script_command.clone(),
            config.script_command_reconnect_interval(),
            token.clone(),
        ));

        let rtde_writer = RtdeWriter::new(rtde.clone());
        let driver = Self {
            config,
            rtde,
            rtde_writer,
            validator,
            reverse,
            trajectory,
            script_command,
            script_sender,
            robot_version,
            token,
        };

        if driver.config.headless_mode {
            info!("headless mode, sending the control program to the robot");
            driver.push_program().await?;
        }
        info!(
            "driver ready: controller {}, {} Hz, reverse port {}",
            driver.robot_version,
            driver.rtde.frequency(),
            driver.reverse.local_port()
        );
        Ok(driver)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Latest cyclic frame. Waits up to [`DATA_PACKAGE_WINDOW`] for one,
    /// or makes a single attempt when reads are non-blocking. `None` when
    /// nothing arrived or the session failed (logged).
    pub async fn get_data_package(&self) -> Option<DataPackage> {
        let window = if self.config.non_blocking_read {
            Duration::ZERO
        } else {
            DATA_PACKAGE_WINDOW
        };
        match self.rtde.poll(window).await {
            Ok(package) => package,
            Err(e) if e.is_fatal() => {
                error!("cyclic exchange unavailable: {}", e);
                None
            }
            Err(e) => {
                warn!("reading a data package failed: {}", e);
                None
            }
        }
    }

    /// Cyclic exchange frequency in Hz, for pacing control loops.
    pub fn control_frequency(&self) -> f64 {
        self.rtde.frequency()
    }

    /// Starts the cyclic exchange. Kept separate from construction so
    /// consumers can be wired up before frames flow.
    pub async fn start_rtde_communication(&self) -> Result<()> {
        self.rtde.start().await
    }

    pub async fn pause_rtde_communication(&self) -> Result<()> {
        self.rtde.pause().await
    }

    pub fn rtde_output_recipe(&self) -> Vec<String> {
        self.rtde.output_recipe().names()
    }

    pub fn rtde_writer(&self) -> &RtdeWriter {
        &self.rtde_writer
    }

    pub fn version(&self) -> VersionInformation {
        self.robot_version
    }

    pub async fn write_joint_command(
        &self,
        values: &Vector6d,
        mode: ControlMode,
        timeout: RobotReceiveTimeout,
    ) -> bool {
        report("joint command", self.reverse.write_joint_command(values, mode, timeout).await)
    }

    /// Keeps the robot program alive while no motion is commanded.
    pub async fn write_keepalive(&self, timeout: RobotReceiveTimeout) -> bool {
        report("keepalive", self.reverse.write_keepalive(timeout).await)
    }

    /// Starts, cancels or keeps alive trajectory forwarding.
    ///
    /// `Start` announces `point_count` points and is refused while another
    /// trajectory is in flight. `Cancel` is only valid while streaming and
    /// reports [`TrajectoryResult::Canceled`] through the done callback.
    pub async fn write_trajectory_control_message(
        &self,
        action: TrajectoryControlMessage,
        point_count: i32,
        timeout: RobotReceiveTimeout,
    ) -> bool {
        report("trajectory control message", self.trajectory_control(action, point_count, timeout).await)
    }

    async fn trajectory_control(
        &self,
        action: TrajectoryControlMessage,
        point_count: i32,
        timeout: RobotReceiveTimeout,
    ) -> Result<()> {
        match action {
            TrajectoryControlMessage::Start => {
                self.trajectory.begin(point_count)?;
                let written = self
                    .reverse
                    .write_trajectory_control_message(action, point_count, timeout)
                    .await;
                if written.is_err() {
                    self.trajectory.abandon_start();
                }
                written
            }
            TrajectoryControlMessage::Cancel => {
                if self.trajectory.state() == TrajectoryState::Idle {
                    return Err(DriverError::InvalidArgument("no trajectory to cancel".to_string()));
                }
                self.reverse
                    .write_trajectory_control_message(action, 0, timeout)
                    .await?;
                // already idle if the robot reported the outcome first
                let _ = self.trajectory.cancel();
                Ok(())
            }
            TrajectoryControlMessage::Noop => {
                self.reverse
                    .write_trajectory_control_message(action, 0, timeout)
                    .await
            }
        }
    }

    pub async fn write_freedrive_control_message(
        &self,
        action: FreedriveControlMessage,
        timeout: RobotReceiveTimeout,
    ) -> bool {
        report(
            "freedrive control message",
            self.reverse.write_freedrive_control_message(action, timeout).await,
        )
    }

    /// Forwards one plain point of the announced trajectory.
    pub async fn write_trajectory_point(
        &self,
        positions: &Vector6d,
        cartesian: bool,
        goal_time: f32,
        blend_radius: f32,
    ) -> bool {
        report(
            "trajectory point",
            self.trajectory
                .write_trajectory_point(positions, cartesian, goal_time, blend_radius)
                .await,
        )
    }

    /// Forwards one spline point; the variant picks quadratic, cubic or
    /// quintic interpolation.
    pub async fn write_trajectory_spline_point(&self, point: &SplinePoint, goal_time: f32) -> bool {
        report(
            "trajectory spline point",
            self.trajectory.write_trajectory_spline_point(point, goal_time).await,
        )
    }

    pub fn trajectory_state(&self) -> TrajectoryState {
        self.trajectory.state()
    }

    pub async fn zero_ft_sensor(&self) -> bool {
        report("zero force torque sensor", self.script_command.zero_ft_sensor().await)
    }

    pub async fn set_payload(&self, mass: f64, cog: &Vector3d) -> bool {
        let payload = Payload { mass, cog: *cog };
        report("set payload", self.script_command.set_payload(&payload).await)
    }

    pub async fn set_tool_voltage(&self, voltage: ToolVoltage) -> bool {
        report("set tool voltage", self.script_command.set_tool_voltage(voltage).await)
    }

    /// Enters force mode. `force_type` is 1, 2 or 3, see [`ForceModeType`].
    /// Damping and gain scaling come from the configuration.
    pub async fn start_force_mode(
        &self,
        task_frame: &Vector6d,
        selection_vector: &Vector6Uint32,
        wrench: &Vector6d,
        force_type: u32,
        limits: &Vector6d,
    ) -> bool {
        let mode = match i32::try_from(force_type).ok().and_then(|t| ForceModeType::try_from(t).ok()) {
            Some(mode) => mode,
            None => {
                warn!("start force mode failed: force mode type {} is not 1, 2 or 3", force_type);
                return false;
            }
        };
        let params = ForceModeParameters {
            task_frame: *task_frame,
            selection_vector: *selection_vector,
            wrench: *wrench,
            mode,
            limits: *limits,
            damping: self.config.force_mode_damping,
            gain_scaling: self.config.force_mode_gain_scaling,
        };
        report("start force mode", self.script_command.start_force_mode(&params).await)
    }

    pub async fn end_force_mode(&self) -> bool {
        report("end force mode", self.script_command.end_force_mode().await)
    }

    /// Makes the robot stop its current motion on tool contact. The outcome
    /// arrives through the tool contact callback.
    pub async fn start_tool_contact(&self) -> bool {
        report("start tool contact", self.script_command.start_tool_contact().await)
    }

    pub async fn end_tool_contact(&self) -> bool {
        report("end tool contact", self.script_command.end_tool_contact().await)
    }

    pub async fn set_gravity(&self, gravity: &Vector3d) -> bool {
        report("set gravity", self.script_command.set_gravity(gravity).await)
    }

    /// Completion arrives through the payload estimation callback.
    pub async fn start_payload_estimation(
        &self,
        kind: PayloadEstimationType,
        move_distance: f64,
        secondary_move_distance: f64,
        move_speed: f64,
    ) -> bool {
        report(
            "start payload estimation",
            self.script_command
                .start_payload_estimation(kind, move_distance, secondary_move_distance, move_speed)
                .await,
        )
    }

    /// Whether the robot program is connected to the script command socket.
    pub fn script_command_connected(&self) -> bool {
        self.script_command.client_connected()
    }

    /// Whether the robot program holds both the reverse and trajectory
    /// sockets.
    pub fn robot_program_connected(&self) -> bool {
        self.reverse.is_connected() && self.trajectory.is_connected()
    }

    /// Ports the driver-hosted sockets are bound to. Differs from the
    /// configuration when it asked for ephemeral ports.
    pub fn hosted_ports(&self) -> HostedPorts {
        HostedPorts {
            reverse: self.reverse.local_port(),
            script_sender: self.script_sender.local_port(),
            trajectory: self.trajectory.local_port(),
            script_command: self.script_command.local_port(),
        }
    }

    /// Single listener, last registration wins. Runs on the trajectory
    /// channel's task and must not block.
    pub fn register_trajectory_done_callback(&self, callback: impl Fn(TrajectoryResult) + Send + Sync + 'static) {
        self.trajectory.register_done_callback(callback);
    }

    /// Single listener, last registration wins.
    pub fn register_tool_contact_result_callback(
        &self,
        callback: impl Fn(ToolContactResult) + Send + Sync + 'static,
    ) {
        self.script_command.register_tool_contact_result_callback(callback);
    }

    /// Single listener, last registration wins.
    pub fn register_payload_estimation_result_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.script_command.register_payload_estimation_result_callback(callback);
    }

    /// Single listener, last registration wins. Called with `true` when the
    /// robot program connects to the reverse socket, `false` when it leaves.
    pub fn register_program_state_callback(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.reverse.register_program_state_callback(callback);
    }

    /// Tells the robot program to stop listening.
    pub async fn stop_control(&self) -> bool {
        report("stop control", self.reverse.stop_control().await)
    }

    pub fn check_calibration(&self, checksum: &str) -> bool {
        self.validator.check_calibration(checksum)
    }

    /// Sends arbitrary program text to the robot over the status interface.
    pub async fn send_script(&self, program: &str) -> bool {
        report(
            "send script",
            primary::send_script(&self.config.connection_url(self.config.primary_port), program).await,
        )
    }

    /// Provisions the rendered control program: pushed over the status
    /// interface in headless mode, otherwise served to the robot's loader
    /// on request.
    pub async fn send_robot_program(&self) -> bool {
        if self.config.headless_mode {
            return report("send robot program", self.push_program().await);
        }
        if self.script_sender.is_listening() {
            info!(
                "control program is served on port {} when the robot requests it",
                self.script_sender.local_port()
            );
            true
        } else {
            warn!("send robot program failed: the program socket is not listening");
            false
        }
    }

    async fn push_program(&self) -> Result<()> {
        primary::send_script(
            &self.config.connection_url(self.config.primary_port),
            self.script_sender.program(),
        )
        .await
    }

    /// Closes every channel. An in-flight trajectory is reported canceled.
    pub async fn shutdown(&self) {
        info!("shutting down the driver");
        if self.trajectory.state() != TrajectoryState::Idle {
            let _ = self.trajectory.cancel();
        }
        self.token.cancel();
        self.rtde.close().await;
        self.reverse.shutdown().await;
        self.trajectory.shutdown().await;
        self.script_command.shutdown().await;
        self.script_sender.shutdown().await;
    }
}

impl Drop for UrDriver {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn report(what: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("{} failed: {}", what, e);
            false
        }
    }
}

/// Keeps the script command socket available: logs when the robot program
/// drops and reconnects, and rebinds the listener if it died.
async fn supervise_script_command(
    script_command: Arc<ScriptCommandInterface>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut was_connected = script_command.client_connected();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        let connected = script_command.client_connected();
        if connected != was_connected {
            if connected {
                info!("script command interface reconnected");
            } else {
                warn!("script command interface lost its client, waiting for the robot program to reconnect");
            }
            was_connected = connected;
        }
        if let Err(e) = script_command.ensure_listening().await {
            warn!("script command interface not listening, retrying: {}", e);
        }
    }
    debug!("script command supervisor stopped");
}
