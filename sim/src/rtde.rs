//! Robot side of the cyclic exchange protocol.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{RobotConfig, SharedState};

pub const REQUEST_PROTOCOL_VERSION: u8 = b'V';
pub const GET_URCONTROL_VERSION: u8 = b'v';
pub const TEXT_MESSAGE: u8 = b'M';
pub const DATA_PACKAGE: u8 = b'U';
pub const SETUP_OUTPUTS: u8 = b'O';
pub const SETUP_INPUTS: u8 = b'I';
pub const START: u8 = b'S';
pub const PAUSE: u8 = b'P';

const OUTPUT_RECIPE_ID: u8 = 1;
const INPUT_RECIPE_ID: u8 = 2;

/// Behaviour knobs of the simulated cyclic exchange server.
#[derive(Debug, Clone)]
pub struct RtdeOptions {
    /// Protocol versions the server accepts.
    pub accepted_versions: Vec<u16>,
    /// Input fields reported as claimed by another client.
    pub claimed_inputs: Vec<String>,
    /// Text message sent right after connection.
    pub greeting: Option<String>,
}

impl Default for RtdeOptions {
    fn default() -> Self {
        Self {
            accepted_versions: vec![1, 2],
            claimed_inputs: Vec::new(),
            greeting: Some("simulated controller ready".to_string()),
        }
    }
}

/// Type of an output field, `None` if the controller does not know it.
pub fn output_type(name: &str) -> Option<&'static str> {
    let ty = match name {
        "timestamp" | "speed_scaling" | "target_speed_fraction" | "actual_execution_time"
        | "standard_analog_input0" | "standard_analog_input1" | "tool_analog_input0" => "DOUBLE",
        "actual_q" | "actual_qd" | "actual_current" | "target_q" | "target_qd" | "target_qdd"
        | "actual_TCP_pose" | "actual_TCP_speed" | "actual_TCP_force" | "target_TCP_pose"
        | "joint_temperatures" => "VECTOR6D",
        "joint_mode" => "VECTOR6INT32",
        "robot_mode" | "safety_mode" => "INT32",
        "runtime_state" | "robot_status_bits" | "safety_status_bits" | "output_bit_registers0_to_31"
        | "output_bit_registers32_to_63" => "UINT32",
        "actual_digital_input_bits" | "actual_digital_output_bits" => "UINT64",
        "tool_mode" => "UINT32",
        "tool_output_voltage" => "INT32",
        "tool_accelerometer_values" => "VECTOR3D",
        _ => return register_type(name, "output"),
    };
    Some(ty)
}

/// Type of an input field, `None` if the controller does not know it.
pub fn input_type(name: &str) -> Option<&'static str> {
    let ty = match name {
        "speed_slider_mask" => "UINT32",
        "speed_slider_fraction" | "standard_analog_output_0" | "standard_analog_output_1" => "DOUBLE",
        "standard_digital_output_mask"
        | "standard_digital_output"
        | "configurable_digital_output_mask"
        | "configurable_digital_output"
        | "tool_digital_output_mask"
        | "tool_digital_output"
        | "standard_analog_output_mask"
        | "standard_analog_output_type" => "UINT8",
        _ => return register_type(name, "input"),
    };
    Some(ty)
}

fn register_type(name: &str, direction: &str) -> Option<&'static str> {
    let rest = name.strip_prefix(direction)?.strip_prefix('_')?;
    let (ty, index) = if let Some(index) = rest.strip_prefix("bit_register_") {
        ("BOOL", index)
    } else if let Some(index) = rest.strip_prefix("int_register_") {
        ("INT32", index)
    } else if let Some(index) = rest.strip_prefix("double_register_") {
        ("DOUBLE", index)
    } else {
        return None;
    };
    let index: u32 = index.parse().ok()?;
    let valid = if ty == "BOOL" { (64..=127).contains(&index) } else { index <= 47 };
    valid.then_some(ty)
}

/// Serves the cyclic exchange protocol until `token` is cancelled.
pub async fn serve(
    listener: TcpListener,
    robot: RobotConfig,
    options: RtdeOptions,
    state: SharedState,
    token: CancellationToken,
) {
    let started = Instant::now();
    loop {
        let (socket, peer) = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("cyclic exchange accept failed: {}", e);
                    continue;
                }
            },
        };
        info!("cyclic exchange client connected from {}", peer);
        let session = Session {
            robot: robot.clone(),
            options: options.clone(),
            state: state.clone(),
            started,
            token: token.child_token(),
        };
        tokio::spawn(async move {
            if let Err(e) = session.run(socket).await {
                debug!("cyclic exchange session ended: {}", e);
            }
        });
    }
}

struct Session {
    robot: RobotConfig,
    options: RtdeOptions,
    state: SharedState,
    started: Instant,
    token: CancellationToken,
}

struct Negotiated {
    protocol: u16,
    frequency: f64,
    outputs: Vec<(String, &'static str)>,
    inputs: Vec<(String, &'static str)>,
}

impl Session {
    async fn run(self, socket: TcpStream) -> io::Result<()> {
        let _ = socket.set_nodelay(true);
        let (mut reader, writer) = socket.into_split();
        let writer = Arc::new(Mutex::new(writer));
        let mut negotiated = Negotiated {
            protocol: 1,
            frequency: self.robot.default_frequency(),
            outputs: Vec::new(),
            inputs: Vec::new(),
        };
        let mut streamer: Option<JoinHandle<()>> = None;

        if let Some(greeting) = &self.options.greeting {
            let mut payload = BytesMut::new();
            payload.put_u8(greeting.len() as u8);
            payload.put_slice(greeting.as_bytes());
            payload.put_u8(3);
            payload.put_slice(b"sim");
            payload.put_u8(1);
            send(&writer, TEXT_MESSAGE, &payload).await?;
        }

        let result = loop {
            let package = tokio::select! {
                _ = self.token.cancelled() => break Ok(()),
                package = read_package(&mut reader) => package,
            };
            let (kind, payload) = match package {
                Ok(package) => package,
                Err(e) => break Err(e),
            };
            match kind {
                REQUEST_PROTOCOL_VERSION => {
                    let requested = payload
                        .get(..2)
                        .map(|b| u16::from_be_bytes([b[0], b[1]]))
                        .unwrap_or(0);
                    let accepted = self.options.accepted_versions.contains(&requested);
                    if accepted {
                        negotiated.protocol = requested;
                    }
                    send(&writer, kind, &[accepted as u8]).await?;
                }
                GET_URCONTROL_VERSION => {
                    let version = self.robot.version;
                    let mut reply = BytesMut::new();
                    reply.put_u32(version.major as u32);
                    reply.put_u32(version.minor as u32);
                    reply.put_u32(version.bugfix);
                    reply.put_u32(version.build);
                    send(&writer, kind, &reply).await?;
                }
                SETUP_OUTPUTS => {
                    let mut names = &payload[..];
                    if negotiated.protocol >= 2 && names.len() >= 8 {
                        negotiated.frequency = names.get_f64();
                    }
                    let names = split_names(names);
                    let types: Vec<&'static str> =
                        names.iter().map(|n| output_type(n).unwrap_or("NOT_FOUND")).collect();
                    negotiated.outputs = names.into_iter().zip(types.iter().copied()).collect();
                    let mut reply = BytesMut::new();
                    if negotiated.protocol >= 2 {
                        reply.put_u8(OUTPUT_RECIPE_ID);
                    }
                    reply.put_slice(types.join(",").as_bytes());
                    send(&writer, kind, &reply).await?;
                }
                SETUP_INPUTS => {
                    let names = split_names(&payload);
                    let types: Vec<&'static str> = names
                        .iter()
                        .map(|n| {
                            if self.options.claimed_inputs.contains(n) {
                                "IN_USE"
                            } else {
                                input_type(n).unwrap_or("NOT_FOUND")
                            }
                        })
                        .collect();
                    negotiated.inputs = names.into_iter().zip(types.iter().copied()).collect();
                    let mut reply = BytesMut::new();
                    if negotiated.protocol >= 2 {
                        reply.put_u8(INPUT_RECIPE_ID);
                    }
                    reply.put_slice(types.join(",").as_bytes());
                    send(&writer, kind, &reply).await?;
                }
                START => {
                    let ok = !negotiated.outputs.is_empty()
                        && negotiated.outputs.iter().all(|(_, ty)| *ty != "NOT_FOUND");
                    send(&writer, kind, &[ok as u8]).await?;
                    if ok && streamer.is_none() {
                        info!("streaming {} fields at {} Hz", negotiated.outputs.len(), negotiated.frequency);
                        streamer = Some(tokio::spawn(stream_outputs(
                            writer.clone(),
                            negotiated.outputs.clone(),
                            negotiated.frequency,
                            negotiated.protocol,
                            self.state.clone(),
                            self.started,
                        )));
                    }
                }
                PAUSE => {
                    if let Some(task) = streamer.take() {
                        task.abort();
                    }
                    send(&writer, kind, &[1]).await?;
                }
                DATA_PACKAGE => {
                    let body = if negotiated.protocol >= 2 {
                        payload.strip_prefix(&[INPUT_RECIPE_ID])
                    } else {
                        Some(&payload[..])
                    };
                    if let Some(body) = body {
                        let values = decode_inputs(&negotiated.inputs, body);
                        debug!("received inputs {:?}", values);
                        self.state.lock().await.inputs.push(values);
                    } else {
                        warn!("data package for unknown recipe");
                    }
                }
                other => warn!("ignoring package type {}", other),
            }
        };

        if let Some(task) = streamer.take() {
            task.abort();
        }
        result
    }
}

async fn stream_outputs(
    writer: Arc<Mutex<OwnedWriteHalf>>,
    outputs: Vec<(String, &'static str)>,
    frequency: f64,
    protocol: u16,
    state: SharedState,
    started: Instant,
) {
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / frequency));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let payload = {
            let mut state = state.lock().await;
            if state.stalled {
                continue;
            }
            let timestamp = started.elapsed().as_secs_f64();
            let mut payload = BytesMut::new();
            if protocol >= 2 {
                payload.put_u8(OUTPUT_RECIPE_ID);
            }
            for (name, ty) in &outputs {
                encode_output(&mut payload, name, ty, &state.q, timestamp);
            }
            state.last_timestamp = Some(timestamp);
            payload
        };
        if send(&writer, DATA_PACKAGE, &payload).await.is_err() {
            break;
        }
    }
}

fn encode_output(buf: &mut BytesMut, name: &str, ty: &str, q: &[f64; 6], timestamp: f64) {
    match (name, ty) {
        ("timestamp", _) => buf.put_f64(timestamp),
        ("actual_q" | "target_q", _) => q.iter().for_each(|v| buf.put_f64(*v)),
        ("speed_scaling" | "target_speed_fraction", _) => buf.put_f64(1.0),
        // running, normal, playing
        ("robot_mode", _) => buf.put_i32(7),
        ("safety_mode", _) => buf.put_i32(1),
        ("runtime_state", _) => buf.put_u32(2),
        (_, "BOOL") => buf.put_u8(0),
        (_, "UINT8") => buf.put_u8(0),
        (_, "UINT32") => buf.put_u32(0),
        (_, "INT32") => buf.put_i32(0),
        (_, "UINT64") | (_, "DOUBLE") => buf.put_u64(0),
        (_, "VECTOR3D") => buf.put_bytes(0, 24),
        (_, "VECTOR6D") => buf.put_bytes(0, 48),
        (_, _) => buf.put_bytes(0, 24),
    }
}

fn decode_inputs(inputs: &[(String, &'static str)], mut payload: &[u8]) -> HashMap<String, f64> {
    let mut values = HashMap::new();
    for (name, ty) in inputs {
        let needed = match *ty {
            "BOOL" | "UINT8" => 1,
            "UINT32" | "INT32" => 4,
            _ => 8,
        };
        if payload.remaining() < needed {
            break;
        }
        let value = match *ty {
            "BOOL" | "UINT8" => payload.get_u8() as f64,
            "UINT32" => payload.get_u32() as f64,
            "INT32" => payload.get_i32() as f64,
            _ => payload.get_f64(),
        };
        values.insert(name.clone(), value);
    }
    values
}

fn split_names(payload: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(payload)
        .split(',')
        .map(|name| name.trim().to_string())
        .collect()
}

async fn read_package(reader: &mut (impl AsyncReadExt + Unpin)) -> io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 3];
    reader.read_exact(&mut header).await?;
    let size = u16::from_be_bytes([header[0], header[1]]) as usize;
    if size < 3 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "package smaller than header"));
    }
    let mut payload = vec![0u8; size - 3];
    reader.read_exact(&mut payload).await?;
    Ok((header[2], payload))
}

async fn send(writer: &Mutex<OwnedWriteHalf>, kind: u8, payload: &[u8]) -> io::Result<()> {
    let mut package = BytesMut::with_capacity(payload.len() + 3);
    package.put_u16((payload.len() + 3) as u16);
    package.put_u8(kind);
    package.put_slice(payload);
    writer.lock().await.write_all(&package).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_names() {
        assert_eq!(input_type("input_bit_register_64"), Some("BOOL"));
        assert_eq!(input_type("input_bit_register_12"), None);
        assert_eq!(input_type("input_double_register_47"), Some("DOUBLE"));
        assert_eq!(output_type("output_int_register_3"), Some("INT32"));
        assert_eq!(output_type("input_int_register_3"), None);
        assert_eq!(output_type("bogus"), None);
    }
}
