//! The control program running on the robot.
//!
//! Connects back to the driver's reverse, trajectory and script command
//! sockets, records everything it receives and answers the way the real
//! program does: trajectory results once all announced points arrived, tool
//! contact and payload estimation results on request.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::SharedState;

pub const MULT_JOINTSTATE: f64 = 1_000_000.0;

pub const MODE_STOPPED: i32 = -2;
pub const MODE_SERVOJ: i32 = 1;
pub const MODE_FORWARD: i32 = 3;

pub const TRAJECTORY_START: i32 = 1;
pub const TRAJECTORY_CANCEL: i32 = -1;

pub const TRAJECTORY_SUCCESS: i32 = 0;
pub const TRAJECTORY_CANCELED: i32 = 1;

pub const CMD_START_TOOL_CONTACT: i32 = 5;
pub const CMD_START_PAYLOAD_ESTIMATION: i32 = 8;

const REVERSE_LEN: usize = 8;
const TRAJECTORY_LEN: usize = 21;
const SCRIPT_COMMAND_LEN: usize = 28;

#[derive(Debug, Clone, Copy)]
pub struct ProgramPorts {
    pub reverse: u16,
    pub trajectory: u16,
    pub script_command: u16,
}

#[derive(Debug, Clone)]
pub struct ProgramOptions {
    /// Report success once every announced trajectory point arrived.
    pub auto_complete_trajectories: bool,
    /// Report canceled after a cancel control message.
    pub confirm_cancel: bool,
    /// Tool contact result sent after a start tool contact command.
    pub tool_contact_result: Option<i32>,
    /// Report completion after a start payload estimation command.
    pub report_payload_estimation: bool,
}

impl Default for ProgramOptions {
    fn default() -> Self {
        Self {
            auto_complete_trajectories: true,
            confirm_cancel: true,
            tool_contact_result: Some(0),
            report_payload_estimation: true,
        }
    }
}

/// Everything the program received.
#[derive(Debug, Clone, Default)]
pub struct ProgramLog {
    pub reverse_frames: Vec<Vec<i32>>,
    pub trajectory_points: Vec<Vec<i32>>,
    pub script_commands: Vec<Vec<i32>>,
    pub stopped: bool,
}

#[derive(Default)]
struct Trajectory {
    expected: i32,
    received: i32,
}

#[derive(Clone)]
struct Shared {
    log: Arc<Mutex<ProgramLog>>,
    trajectory: Arc<Mutex<Option<Trajectory>>>,
    trajectory_writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    script_writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    options: ProgramOptions,
    state: SharedState,
    token: CancellationToken,
}

pub struct ExternalControlProgram {
    host: String,
    ports: ProgramPorts,
    shared: Shared,
    script_reader: Mutex<Option<JoinHandle<()>>>,
}

impl ExternalControlProgram {
    pub async fn connect(
        host: &str,
        ports: ProgramPorts,
        options: ProgramOptions,
        state: SharedState,
    ) -> io::Result<Self> {
        let reverse = connect(host, ports.reverse).await?;
        let trajectory = connect(host, ports.trajectory).await?;
        let script_command = connect(host, ports.script_command).await?;
        info!("robot program connected to the driver");

        let shared = Shared {
            log: Arc::new(Mutex::new(ProgramLog::default())),
            trajectory: Arc::new(Mutex::new(None)),
            trajectory_writer: Arc::new(Mutex::new(None)),
            script_writer: Arc::new(Mutex::new(None)),
            options,
            state,
            token: CancellationToken::new(),
        };

        let (reverse_reader, reverse_writer) = reverse.into_split();
        tokio::spawn(read_reverse(reverse_reader, reverse_writer, shared.clone()));

        let (trajectory_reader, trajectory_writer) = trajectory.into_split();
        *shared.trajectory_writer.lock().await = Some(trajectory_writer);
        tokio::spawn(read_trajectory(trajectory_reader, shared.clone()));

        let program = Self {
            host: host.to_string(),
            ports,
            shared,
            script_reader: Mutex::new(None),
        };
        program.attach_script_command(script_command).await;
        Ok(program)
    }

    pub async fn log(&self) -> ProgramLog {
        self.shared.log.lock().await.clone()
    }

    /// Drops the script command connection, as a restarting program would.
    pub async fn disconnect_script_command(&self) {
        if let Some(task) = self.script_reader.lock().await.take() {
            task.abort();
        }
        if let Some(mut writer) = self.shared.script_writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        info!("robot program dropped the script command connection");
    }

    pub async fn reconnect_script_command(&self) -> io::Result<()> {
        let stream = connect(&self.host, self.ports.script_command).await?;
        self.attach_script_command(stream).await;
        info!("robot program reconnected the script command connection");
        Ok(())
    }

    /// Reports a trajectory result regardless of the trajectory state.
    pub async fn send_trajectory_result(&self, result: i32) -> io::Result<()> {
        write_values(&self.shared.trajectory_writer, &[result]).await
    }

    /// Ends the program, closing every connection.
    pub async fn close(&self) {
        self.shared.token.cancel();
        self.disconnect_script_command().await;
        if let Some(mut writer) = self.shared.trajectory_writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    async fn attach_script_command(&self, stream: TcpStream) {
        let (reader, writer) = stream.into_split();
        *self.shared.script_writer.lock().await = Some(writer);
        let task = tokio::spawn(read_script_commands(reader, self.shared.clone()));
        if let Some(old) = self.script_reader.lock().await.replace(task) {
            old.abort();
        }
    }
}

impl Drop for ExternalControlProgram {
    fn drop(&mut self) {
        self.shared.token.cancel();
    }
}

async fn connect(host: &str, port: u16) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

async fn read_frame(reader: &mut OwnedReadHalf, len: usize, token: &CancellationToken) -> Option<Vec<i32>> {
    let mut buf = vec![0u8; len * 4];
    let read = tokio::select! {
        _ = token.cancelled() => return None,
        read = reader.read_exact(&mut buf) => read,
    };
    read.ok()?;
    Some(
        buf.chunks_exact(4)
            .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

async fn write_values(writer: &Mutex<Option<OwnedWriteHalf>>, values: &[i32]) -> io::Result<()> {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
    match writer.lock().await.as_mut() {
        Some(writer) => writer.write_all(&bytes).await,
        None => Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed")),
    }
}

async fn read_reverse(mut reader: OwnedReadHalf, writer: OwnedWriteHalf, shared: Shared) {
    while let Some(frame) = read_frame(&mut reader, REVERSE_LEN, &shared.token).await {
        shared.log.lock().await.reverse_frames.push(frame.clone());
        match frame[7] {
            MODE_SERVOJ => {
                let mut state = shared.state.lock().await;
                for (q, raw) in state.q.iter_mut().zip(&frame[1..7]) {
                    *q = *raw as f64 / MULT_JOINTSTATE;
                }
            }
            MODE_FORWARD if frame[1] == TRAJECTORY_START => {
                debug!("trajectory of {} points announced", frame[2]);
                *shared.trajectory.lock().await = Some(Trajectory {
                    expected: frame[2],
                    received: 0,
                });
            }
            MODE_FORWARD if frame[1] == TRAJECTORY_CANCEL => {
                shared.trajectory.lock().await.take();
                if shared.options.confirm_cancel {
                    let _ = write_values(&shared.trajectory_writer, &[TRAJECTORY_CANCELED]).await;
                }
            }
            MODE_STOPPED => {
                info!("robot program asked to stop");
                shared.log.lock().await.stopped = true;
                shared.token.cancel();
                break;
            }
            _ => {}
        }
    }
    drop(writer);
    debug!("reverse connection closed");
}

async fn read_trajectory(mut reader: OwnedReadHalf, shared: Shared) {
    while let Some(point) = read_frame(&mut reader, TRAJECTORY_LEN, &shared.token).await {
        shared.log.lock().await.trajectory_points.push(point);
        let finished = {
            let mut trajectory = shared.trajectory.lock().await;
            match trajectory.as_mut() {
                Some(t) => {
                    t.received += 1;
                    t.received >= t.expected
                }
                None => false,
            }
        };
        if finished && shared.options.auto_complete_trajectories {
            shared.trajectory.lock().await.take();
            let _ = write_values(&shared.trajectory_writer, &[TRAJECTORY_SUCCESS]).await;
        }
    }
    shared.trajectory_writer.lock().await.take();
    debug!("trajectory connection closed");
}

async fn read_script_commands(mut reader: OwnedReadHalf, shared: Shared) {
    while let Some(command) = read_frame(&mut reader, SCRIPT_COMMAND_LEN, &shared.token).await {
        shared.log.lock().await.script_commands.push(command.clone());
        match command[0] {
            CMD_START_TOOL_CONTACT => {
                if let Some(result) = shared.options.tool_contact_result {
                    let _ = write_values(&shared.script_writer, &[0, result]).await;
                }
            }
            CMD_START_PAYLOAD_ESTIMATION if shared.options.report_payload_estimation => {
                let _ = write_values(&shared.script_writer, &[1, 0]).await;
            }
            _ => {}
        }
    }
    debug!("script command connection closed");
}

/// Asks the driver's program socket for the control program, the way the
/// robot's loader does.
pub async fn request_program(host: &str, port: u16) -> io::Result<String> {
    let mut stream = connect(host, port).await?;
    stream.write_all(b"request_program\n").await?;
    let mut program = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let wait = if program.is_empty() {
            Duration::from_secs(2)
        } else {
            Duration::from_millis(200)
        };
        match tokio::time::timeout(wait, stream.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => program.extend_from_slice(&buf[..n]),
            Ok(Err(e)) => return Err(e),
        }
    }
    Ok(String::from_utf8_lossy(&program).to_string())
}
