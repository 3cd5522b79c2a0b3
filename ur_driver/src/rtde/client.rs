use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{split, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::package::{encode_package, read_package, text_message, PackageType, RawPackage};
use super::{DataPackage, Recipe, RecipeKind};
use crate::comm::connect_with_retries;
use crate::primary::VersionInformation;
use crate::{DriverError, Result};

const PROTOCOL_VERSION: u16 = 2;
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// What to negotiate with the robot.
#[derive(Debug, Clone)]
pub struct RtdeSettings {
    pub output_recipe: Vec<String>,
    pub input_recipe: Vec<String>,
    /// Overrides the controller's default frequency.
    pub target_frequency: Option<f64>,
    /// Periods without a frame, while streaming, before the session is lost.
    pub connection_lost_periods: u32,
}

impl Default for RtdeSettings {
    fn default() -> Self {
        Self {
            output_recipe: vec!["timestamp".to_string()],
            input_recipe: Vec::new(),
            target_frequency: None,
            connection_lost_periods: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Negotiated,
    Started,
    Paused,
    ConnectionLost(String),
    ProtocolFailure(String),
    Closed,
}

impl SessionState {
    fn check(&self) -> Result<()> {
        match self {
            Self::ConnectionLost(msg) => Err(DriverError::ConnectionLost(msg.clone())),
            Self::ProtocolFailure(msg) => Err(DriverError::Protocol(msg.clone())),
            Self::Closed => Err(DriverError::ConnectionLost("cyclic exchange session closed".to_string())),
            _ => Ok(()),
        }
    }
}

struct Shared {
    /// Most recent unread frame. Older unread frames are overwritten.
    latest: parking_lot::Mutex<Option<DataPackage>>,
    arrived: Notify,
    state: watch::Sender<SessionState>,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
        self.arrived.notify_waiters();
    }
}

/// Client side of the cyclic exchange protocol.
///
/// Construction negotiates the protocol version, the frequency and both
/// recipes. Frames only flow after [`RtdeClient::start`].
pub struct RtdeClient {
    local_addr: SocketAddr,
    version: VersionInformation,
    protocol_version: u16,
    frequency: f64,
    output_recipe: Arc<Recipe>,
    input_recipe: Option<Arc<Recipe>>,
    writer: Mutex<WriteHalf<TcpStream>>,
    replies: Mutex<mpsc::UnboundedReceiver<(PackageType, bool)>>,
    shared: Arc<Shared>,
    token: CancellationToken,
}

impl RtdeClient {
    pub async fn connect(
        addr: &str,
        settings: &RtdeSettings,
        parent: &CancellationToken,
    ) -> Result<Self> {
        if settings.output_recipe.is_empty() {
            return Err(DriverError::InvalidConfig("output recipe is empty".to_string()));
        }
        let stream = connect_with_retries("cyclic exchange", addr, 3, Duration::from_millis(500)).await?;
        let local_addr = stream.local_addr()?;
        let (mut reader, mut writer) = split(stream);

        let protocol_version = negotiate_protocol_version(&mut reader, &mut writer).await?;
        let version = query_controller_version(&mut reader, &mut writer).await?;
        let frequency = settings
            .target_frequency
            .unwrap_or(if version.major >= 5 { 500.0 } else { 125.0 });
        if frequency <= 0.0 {
            return Err(DriverError::InvalidConfig(format!("invalid cyclic frequency {frequency}")));
        }

        let mut payload = BytesMut::new();
        if protocol_version >= 2 {
            payload.put_f64(frequency);
        }
        payload.put_slice(settings.output_recipe.join(",").as_bytes());
        let reply = request(&mut reader, &mut writer, PackageType::SetupOutputs, &payload).await?;
        let output_recipe = Recipe::from_setup_reply(
            RecipeKind::Output,
            &settings.output_recipe,
            &reply.payload,
            protocol_version >= 2,
        )?;

        let input_recipe = if settings.input_recipe.is_empty() {
            None
        } else {
            let names = settings.input_recipe.join(",");
            let reply = request(&mut reader, &mut writer, PackageType::SetupInputs, names.as_bytes()).await?;
            Some(Arc::new(Recipe::from_setup_reply(
                RecipeKind::Input,
                &settings.input_recipe,
                &reply.payload,
                protocol_version >= 2,
            )?))
        };

        info!(
            "cyclic exchange negotiated: protocol v{}, controller {}, {} Hz, {} output fields",
            protocol_version,
            version,
            frequency,
            output_recipe.fields.len()
        );

        let (state, _) = watch::channel(SessionState::Negotiated);
        let shared = Arc::new(Shared {
            latest: parking_lot::Mutex::new(None),
            arrived: Notify::new(),
            state,
        });
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let output_recipe = Arc::new(output_recipe);
        let token = parent.child_token();
        let lost_after = period_of(frequency) * settings.connection_lost_periods.max(1);

        tokio::spawn(receive_loop(
            reader,
            output_recipe.clone(),
            shared.clone(),
            reply_tx,
            lost_after,
            token.clone(),
        ));

        Ok(Self {
            local_addr,
            version,
            protocol_version,
            frequency,
            output_recipe,
            input_recipe,
            writer: Mutex::new(writer),
            replies: Mutex::new(reply_rx),
            shared,
            token,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Controller version reported during negotiation.
    pub fn version(&self) -> VersionInformation {
        self.version
    }

    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn period(&self) -> Duration {
        period_of(self.frequency)
    }

    pub fn output_recipe(&self) -> Arc<Recipe> {
        self.output_recipe.clone()
    }

    pub fn input_recipe(&self) -> Option<Arc<Recipe>> {
        self.input_recipe.clone()
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Asks the robot to start streaming. Idempotent while started.
    pub async fn start(&self) -> Result<()> {
        self.control(PackageType::Start, SessionState::Started).await
    }

    /// Stops streaming without dropping the session.
    pub async fn pause(&self) -> Result<()> {
        self.control(PackageType::Pause, SessionState::Paused).await
    }

    async fn control(&self, kind: PackageType, target: SessionState) -> Result<()> {
        let mut replies = self.replies.lock().await;
        self.state().check()?;
        if self.state() == target {
            return Ok(());
        }
        while replies.try_recv().is_ok() {}

        self.send(kind, &[]).await?;
        match timeout(REPLY_TIMEOUT, replies.recv()).await {
            Ok(Some((reply, true))) if reply == kind => Ok(()),
            Ok(Some((reply, false))) if reply == kind => {
                Err(DriverError::Protocol(format!("robot refused {kind:?}")))
            }
            Ok(Some((reply, _))) => Err(DriverError::Protocol(format!(
                "expected {kind:?} reply, got {reply:?}"
            ))),
            Ok(None) => {
                self.state().check()?;
                Err(DriverError::ConnectionLost("cyclic exchange receiver stopped".to_string()))
            }
            Err(_) => Err(DriverError::Timeout(format!("no reply to {kind:?}"))),
        }
    }

    /// Returns the most recent unread frame, waiting at most `window` for
    /// one to arrive. A zero window makes a single attempt.
    pub async fn poll(&self, window: Duration) -> Result<Option<DataPackage>> {
        let deadline = Instant::now() + window;
        loop {
            // registered before the slot is checked so no wakeup is missed
            let arrived = self.shared.arrived.notified();
            // a failed session hands out no stale frame
            self.state().check()?;
            if let Some(package) = self.shared.latest.lock().take() {
                return Ok(Some(package));
            }
            if window.is_zero() || timeout_at(deadline, arrived).await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Sends one frame of the input recipe.
    pub async fn send_input(&self, package: &DataPackage) -> Result<()> {
        let recipe = package.recipe();
        if recipe.kind != RecipeKind::Input {
            return Err(DriverError::InvalidArgument("only input recipe packages can be sent".to_string()));
        }
        self.state().check()?;
        self.send(PackageType::DataPackage, &package.encode()).await
    }

    async fn send(&self, kind: PackageType, payload: &[u8]) -> Result<()> {
        let bytes = encode_package(kind, payload)?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| DriverError::Transport(format!("cyclic exchange write failed: {e}")))
    }

    /// Ends the session and closes the socket.
    pub async fn close(&self) {
        self.token.cancel();
        let _ = self.writer.lock().await.shutdown().await;
        self.shared.latest.lock().take();
        self.shared.set_state(SessionState::Closed);
    }
}

impl Drop for RtdeClient {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn period_of(frequency: f64) -> Duration {
    Duration::from_micros((1_000_000.0 / frequency).round() as u64)
}

async fn request(
    reader: &mut ReadHalf<TcpStream>,
    writer: &mut WriteHalf<TcpStream>,
    kind: PackageType,
    payload: &[u8],
) -> Result<RawPackage> {
    writer.write_all(&encode_package(kind, payload)?).await?;
    let deadline = Instant::now() + REPLY_TIMEOUT;
    loop {
        let package = timeout_at(deadline, read_package(reader))
            .await
            .map_err(|_| DriverError::Timeout(format!("no reply to {kind:?}")))??;
        match package.kind {
            k if k == kind => return Ok(package),
            PackageType::TextMessage => info!("robot: {}", text_message(&package.payload)),
            other => {
                return Err(DriverError::Protocol(format!(
                    "expected {kind:?} reply, got {other:?}"
                )))
            }
        }
    }
}

async fn negotiate_protocol_version(
    reader: &mut ReadHalf<TcpStream>,
    writer: &mut WriteHalf<TcpStream>,
) -> Result<u16> {
    for version in (1..=PROTOCOL_VERSION).rev() {
        let reply = request(reader, writer, PackageType::RequestProtocolVersion, &version.to_be_bytes()).await?;
        if reply.payload.first().copied().unwrap_or(0) != 0 {
            return Ok(version);
        }
        warn!("robot refused cyclic exchange protocol version {}", version);
    }
    Err(DriverError::Protocol("robot accepted no supported protocol version".to_string()))
}

async fn query_controller_version(
    reader: &mut ReadHalf<TcpStream>,
    writer: &mut WriteHalf<TcpStream>,
) -> Result<VersionInformation> {
    let reply = request(reader, writer, PackageType::GetUrControlVersion, &[]).await?;
    let mut payload = &reply.payload[..];
    if payload.len() < 16 {
        return Err(DriverError::Protocol(format!(
            "controller version reply of {} bytes",
            payload.len()
        )));
    }
    Ok(VersionInformation {
        major: payload.get_u32(),
        minor: payload.get_u32(),
        bugfix: payload.get_u32(),
        build: payload.get_u32(),
    })
}

async fn receive_loop(
    mut reader: ReadHalf<TcpStream>,
    recipe: Arc<Recipe>,
    shared: Arc<Shared>,
    replies: mpsc::UnboundedSender<(PackageType, bool)>,
    lost_after: Duration,
    token: CancellationToken,
) {
    let outcome = loop {
        let streaming = *shared.state.borrow() == SessionState::Started;
        let read = async {
            if streaming {
                timeout(lost_after, read_package(&mut reader))
                    .await
                    .unwrap_or_else(|_| {
                        Err(DriverError::ConnectionLost(format!("no frame received for {lost_after:?}")))
                    })
            } else {
                read_package(&mut reader).await
            }
        };
        let package = tokio::select! {
            _ = token.cancelled() => break SessionState::Closed,
            package = read => package,
        };
        let package = match package {
            Ok(package) => package,
            Err(DriverError::Protocol(msg)) => break SessionState::ProtocolFailure(msg),
            Err(e) => break SessionState::ConnectionLost(e.to_string()),
        };

        match package.kind {
            PackageType::DataPackage => match DataPackage::decode(recipe.clone(), &package.payload) {
                Ok(frame) => {
                    *shared.latest.lock() = Some(frame);
                    shared.arrived.notify_waiters();
                }
                Err(e) => break SessionState::ProtocolFailure(e.to_string()),
            },
            PackageType::Start | PackageType::Pause => {
                let accepted = package.payload.first().copied().unwrap_or(0) != 0;
                if accepted {
                    let state = if package.kind == PackageType::Start {
                        SessionState::Started
                    } else {
                        SessionState::Paused
                    };
                    debug!("cyclic exchange now {:?}", state);
                    shared.set_state(state);
                }
                let _ = replies.send((package.kind, accepted));
            }
            PackageType::TextMessage => warn!("robot: {}", text_message(&package.payload)),
            other => debug!("ignoring unexpected {:?} package", other),
        }
    };

    match &outcome {
        SessionState::Closed => debug!("cyclic exchange receiver closed"),
        state => error!("cyclic exchange session ended: {:?}", state),
    }
    shared.set_state(outcome);
}
