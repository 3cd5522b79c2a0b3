use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::comm::{extract_lines, ConnectionHandler, TcpServer};
use crate::Result;

pub const PROGRAM_REQUEST: &str = "request_program";

struct ProgramServer {
    program: Arc<str>,
}

impl ConnectionHandler for ProgramServer {
    fn on_connect(&self, peer: SocketAddr) {
        info!("program loader connected from {}", peer);
    }

    fn on_data(&self, buf: &mut BytesMut) -> Option<Bytes> {
        let mut reply = BytesMut::new();
        for line in extract_lines(buf) {
            if line.trim() == PROGRAM_REQUEST {
                let program = &self.program;
                info!("robot requested the control program, sending {} bytes", program.len());
                reply.extend_from_slice(program.as_bytes());
                if !program.ends_with('\n') {
                    reply.extend_from_slice(b"\n");
                }
            } else {
                warn!("program loader sent unexpected line {:?}", line);
            }
        }
        (!reply.is_empty()).then(|| reply.freeze())
    }
}

/// Provisioning service: hands the rendered control program to the
/// robot-side loader when it asks for it.
pub struct ScriptSender {
    server: TcpServer,
    program: Arc<str>,
}

impl ScriptSender {
    pub async fn bind(ip: IpAddr, port: u16, program: String, token: &CancellationToken) -> Result<Self> {
        let program: Arc<str> = program.into();
        let handler = Arc::new(ProgramServer {
            program: program.clone(),
        });
        let server = TcpServer::bind("script sender", ip, port, handler, token).await?;
        Ok(Self { server, program })
    }

    pub fn local_port(&self) -> u16 {
        self.server.local_port()
    }

    pub fn is_listening(&self) -> bool {
        self.server.is_listening()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub async fn shutdown(&self) {
        self.server.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_serves_program_on_request() {
        let token = CancellationToken::new();
        let program = "def prog():\n  textmsg(\"hi\")\nend".to_string();
        let sender = ScriptSender::bind(Ipv4Addr::LOCALHOST.into(), 0, program, &token)
            .await
            .unwrap();

        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, sender.local_port())).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"request_program\n").await.unwrap();

        let mut lines = BufReader::new(reader).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("def prog():"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("  textmsg(\"hi\")"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("end"));
    }
}
