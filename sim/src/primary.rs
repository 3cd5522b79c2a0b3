//! Robot side of the status interface.
//!
//! Every client gets the version message once and a robot state package
//! with kinematics info every 100 ms. Whatever a client writes is treated as
//! program text and recorded once the client closes its side.

use std::io;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{RobotConfig, SharedState};

pub const ROBOT_STATE: u8 = 16;
pub const ROBOT_MESSAGE: u8 = 20;
pub const KINEMATICS_INFO: u8 = 5;
pub const VERSION_MESSAGE: u8 = 3;

const STATE_PERIOD: Duration = Duration::from_millis(100);

pub fn version_message(robot: &RobotConfig) -> BytesMut {
    let name = b"URControl";
    let mut body = BytesMut::new();
    body.put_u8(ROBOT_MESSAGE);
    body.put_u64(0);
    body.put_i8(-2);
    body.put_u8(VERSION_MESSAGE);
    body.put_i8(name.len() as i8);
    body.put_slice(name);
    body.put_u8(robot.version.major);
    body.put_u8(robot.version.minor);
    body.put_i32(robot.version.bugfix as i32);
    body.put_i32(robot.version.build as i32);
    body.put_slice(b"01-01-2024, 00:00:00");
    with_length(body)
}

pub fn robot_state(robot: &RobotConfig) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_u8(ROBOT_STATE);

    // a robot mode sub-package the driver has to skip
    body.put_i32(5 + 8);
    body.put_u8(0);
    body.put_u64(0);

    body.put_i32(5 + 6 * 4 + 4 * 6 * 8 + 4);
    body.put_u8(KINEMATICS_INFO);
    for _ in 0..6 {
        body.put_u32(0);
    }
    for values in [&robot.dh_theta, &robot.dh_a, &robot.dh_d, &robot.dh_alpha] {
        values.iter().for_each(|v| body.put_f64(*v));
    }
    body.put_u32(robot.calibration_status);
    with_length(body)
}

fn with_length(body: BytesMut) -> BytesMut {
    let mut package = BytesMut::with_capacity(body.len() + 4);
    package.put_i32(body.len() as i32 + 4);
    package.put_slice(&body);
    package
}

pub async fn serve(listener: TcpListener, robot: RobotConfig, state: SharedState, token: CancellationToken) {
    loop {
        let (socket, peer) = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("status interface accept failed: {}", e);
                    continue;
                }
            },
        };
        debug!("status client connected from {}", peer);
        let robot = robot.clone();
        let state = state.clone();
        let token = token.child_token();
        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, robot, state, token).await {
                debug!("status client ended: {}", e);
            }
        });
    }
}

async fn handle_client(
    socket: TcpStream,
    robot: RobotConfig,
    state: SharedState,
    token: CancellationToken,
) -> io::Result<()> {
    let (mut reader, mut writer) = socket.into_split();
    let mut program = Vec::new();
    let mut buffer = vec![0u8; 4096];
    let mut ticker = tokio::time::interval(STATE_PERIOD);

    writer.write_all(&version_message(&robot)).await?;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                // the peer may already have closed its read side
                if writer.write_all(&robot_state(&robot)).await.is_err() {
                    break;
                }
            }
            read = reader.read(&mut buffer) => match read? {
                0 => break,
                n => program.extend_from_slice(&buffer[..n]),
            },
        }
    }

    if !program.is_empty() {
        let text = String::from_utf8_lossy(&program).to_string();
        info!("received {} bytes of program text", text.len());
        state.lock().await.scripts.push(text);
    }
    Ok(())
}
