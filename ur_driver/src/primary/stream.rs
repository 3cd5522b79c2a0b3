use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::package::{decode_packages, PrimaryPackage};
use crate::comm::connect_with_retries;
use crate::{DriverError, Result};

const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection to the robot's status interface.
///
/// The robot pushes status packages as soon as a client connects and
/// executes any program text written to the same socket.
pub struct PrimaryStream {
    stream: TcpStream,
    buf: BytesMut,
}

impl PrimaryStream {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = connect_with_retries("status stream", addr, 3, Duration::from_millis(500)).await?;
        debug!("status stream connected to {}", addr);
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        })
    }

    /// Waits for more bytes and returns whatever packages they completed.
    pub async fn read_packages(&mut self) -> Result<Vec<PrimaryPackage>> {
        let n = self.stream.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(DriverError::ConnectionLost("robot closed the status stream".to_string()));
        }
        decode_packages(&mut self.buf)
    }

    /// Hands program text to the robot for immediate execution.
    pub async fn send_script(&mut self, program: &str) -> Result<()> {
        if program.trim().is_empty() {
            return Err(DriverError::InvalidArgument("refusing to send an empty program".to_string()));
        }
        self.stream
            .write_all(program.as_bytes())
            .await
            .map_err(|e| DriverError::Transport(format!("status stream write failed: {e}")))?;
        if !program.ends_with('\n') {
            self.stream.write_all(b"\n").await?;
        }
        self.stream.flush().await?;
        info!("sent {} bytes of program text to the robot", program.len());
        Ok(())
    }

    /// Half-closes the socket and drains status data until the robot closes
    /// its side, so unread data does not reset the connection under the
    /// program just sent.
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        let drain = async {
            loop {
                self.buf.clear();
                match self.stream.read_buf(&mut self.buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if timeout(CLOSE_DRAIN_TIMEOUT, drain).await.is_err() {
            debug!("robot kept the status stream open, dropping it");
        }
        Ok(())
    }
}

/// Opens a short-lived status connection and sends `program` over it.
pub async fn send_script(addr: &str, program: &str) -> Result<()> {
    let mut stream = PrimaryStream::connect(addr).await?;
    stream.send_script(program).await?;
    stream.close().await
}
