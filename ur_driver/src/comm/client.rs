use std::time::Duration;

use bytes::BytesMut;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::warn;

use crate::{DriverError, Result};

/// Connects to one of the robot's own servers, retrying a few times since
/// the controller may still be booting its interfaces.
pub async fn connect_with_retries(name: &str, addr: &str, retries: u32, delay: Duration) -> Result<TcpStream> {
    let retries = retries.max(1);
    for attempt in 0..retries {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => {
                warn!("{} connection to {} failed (attempt {}): {}", name, addr, attempt + 1, e);
                if attempt + 1 < retries {
                    sleep(delay).await;
                }
            }
        }
    }
    Err(DriverError::Transport(format!("could not connect {name} to {addr}")))
}

/// Splits complete `\n` terminated lines off the front of `buffer`.
/// A trailing `\r` is dropped with the newline.
pub fn extract_lines(buffer: &mut BytesMut) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let chunk = buffer.split_to(pos + 1);
        let line = String::from_utf8_lossy(&chunk[..pos]);
        lines.push(line.trim_end_matches('\r').to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_lines_keeps_partial_tail() {
        let mut buf = BytesMut::from(&b"request_program\r\nreq"[..]);
        assert_eq!(extract_lines(&mut buf), vec!["request_program".to_string()]);
        assert_eq!(&buf[..], b"req");
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let result = connect_with_retries("test", &addr, 2, Duration::from_millis(1)).await;
        assert!(matches!(result, Err(DriverError::Transport(_))));
    }
}
