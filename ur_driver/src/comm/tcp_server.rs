use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use bytes::{Bytes, BytesMut};
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{DriverError, Result};

/// Why a client went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed the socket or a read failed.
    Closed,
    /// The server itself is shutting down.
    Shutdown,
}

/// Per-socket protocol logic plugged into a [`TcpServer`].
///
/// Callbacks run on the server's reader task and must not block.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn on_connect(&self, _peer: SocketAddr) {}

    fn on_disconnect(&self, _reason: DisconnectReason) {}

    /// Consumes whatever complete messages `buf` holds. Returned bytes are
    /// written back to the client.
    fn on_data(&self, buf: &mut BytesMut) -> Option<Bytes>;
}

struct Client {
    id: u64,
    writer: WriteHalf<TcpStream>,
}

type ClientSlot = Arc<Mutex<Option<Client>>>;

/// Single-client TCP server hosted by the driver.
///
/// The robot program connects back to it. A second concurrent client is
/// refused. Writes are serialized through the client slot so exactly one
/// frame is in flight at a time.
pub struct TcpServer {
    name: &'static str,
    local_addr: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
    client: ClientSlot,
    connected: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
    token: CancellationToken,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TcpServer {
    /// Binds `ip:port` and starts accepting. Port 0 picks an ephemeral port,
    /// see [`TcpServer::local_port`].
    pub async fn bind(
        name: &'static str,
        ip: IpAddr,
        port: u16,
        handler: Arc<dyn ConnectionHandler>,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port))
            .await
            .map_err(|e| DriverError::Transport(format!("{name} socket: bind {ip}:{port} failed: {e}")))?;
        let local_addr = listener.local_addr()?;
        info!("{} socket listening on {}", name, local_addr);

        let server = Self {
            name,
            local_addr,
            handler,
            client: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            next_id: Arc::new(AtomicU64::new(1)),
            token: parent.child_token(),
            accept_task: parking_lot::Mutex::new(None),
        };
        server.spawn_accept_loop(listener);
        Ok(server)
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// False once the accept loop has died or the server was shut down.
    pub fn is_listening(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.accept_task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Rebinds the listener on the port it had before. Used to bring a dead
    /// accept loop back; an already listening server is left alone.
    pub async fn relisten(&self) -> Result<()> {
        if self.is_listening() {
            return Ok(());
        }
        if self.token.is_cancelled() {
            return Err(DriverError::Transport(format!("{} socket is shut down", self.name)));
        }
        let listener = TcpListener::bind(self.local_addr)
            .await
            .map_err(|e| DriverError::Transport(format!("{} socket: rebind failed: {e}", self.name)))?;
        info!("{} socket listening again on {}", self.name, self.local_addr);
        self.spawn_accept_loop(listener);
        Ok(())
    }

    /// Writes one complete frame to the connected client.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut slot = self.client.lock().await;
        let client = slot.as_mut().ok_or(DriverError::NotConnected(self.name))?;
        if let Err(e) = client.writer.write_all(data).await {
            warn!("{} socket: write failed, dropping client: {}", self.name, e);
            *slot = None;
            self.connected.store(false, Ordering::SeqCst);
            return Err(DriverError::Transport(format!("{} socket: {e}", self.name)));
        }
        Ok(())
    }

    /// Stops accepting, closes the client socket and waits for nothing.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let mut slot = self.client.lock().await;
        if let Some(mut client) = slot.take() {
            let _ = client.writer.shutdown().await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn spawn_accept_loop(&self, listener: TcpListener) {
        let task = tokio::spawn(accept_loop(
            self.name,
            listener,
            self.handler.clone(),
            self.client.clone(),
            self.connected.clone(),
            self.next_id.clone(),
            self.token.clone(),
        ));
        if let Some(old) = self.accept_task.lock().replace(task) {
            old.abort();
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn accept_loop(
    name: &'static str,
    listener: TcpListener,
    handler: Arc<dyn ConnectionHandler>,
    client: ClientSlot,
    connected: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
    token: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                // the owner notices through is_listening() and relistens
                warn!("{} socket: accept failed, no longer listening: {}", name, e);
                break;
            }
        };

        let mut slot = client.lock().await;
        if slot.is_some() {
            warn!("{} socket: refusing {}, a client is already connected", name, peer);
            drop(stream);
            continue;
        }
        let _ = stream.set_nodelay(true);
        let (reader, writer) = split(stream);
        let id = next_id.fetch_add(1, Ordering::SeqCst);
        *slot = Some(Client { id, writer });
        connected.store(true, Ordering::SeqCst);
        drop(slot);

        info!("{} socket: robot connected from {}", name, peer);
        handler.on_connect(peer);
        tokio::spawn(read_loop(
            name,
            id,
            reader,
            handler.clone(),
            client.clone(),
            connected.clone(),
            token.clone(),
        ));
    }
    debug!("{} socket: accept loop finished", name);
}

async fn read_loop(
    name: &'static str,
    id: u64,
    mut reader: ReadHalf<TcpStream>,
    handler: Arc<dyn ConnectionHandler>,
    client: ClientSlot,
    connected: Arc<AtomicBool>,
    token: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(1024);
    let reason = loop {
        let read = tokio::select! {
            _ = token.cancelled() => break DisconnectReason::Shutdown,
            read = reader.read_buf(&mut buf) => read,
        };
        match read {
            Ok(0) => break DisconnectReason::Closed,
            Ok(_) => {
                if let Some(reply) = handler.on_data(&mut buf) {
                    let mut slot = client.lock().await;
                    if let Some(current) = slot.as_mut().filter(|c| c.id == id) {
                        if let Err(e) = current.writer.write_all(&reply).await {
                            warn!("{} socket: reply failed: {}", name, e);
                            break DisconnectReason::Closed;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("{} socket: read failed: {}", name, e);
                break DisconnectReason::Closed;
            }
        }
    };

    let mut slot = client.lock().await;
    if slot.as_ref().is_some_and(|c| c.id == id) {
        *slot = None;
        connected.store(false, Ordering::SeqCst);
    }
    drop(slot);

    info!("{} socket: robot disconnected ({:?})", name, reason);
    handler.on_disconnect(reason);
}
