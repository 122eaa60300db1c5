//! TCP transport.

use super::frame::{read_message, write_message};
use super::{Link, LinkReader, LinkWriter, Transport, WireMessage};
use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::{Result, TetherError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Opens length-prefixed JSON sessions over TCP.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: ClientConfig::CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, endpoint: Endpoint) -> Result<Link> {
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(endpoint.socket_addr()),
        )
        .await
        .map_err(|_| {
            TetherError::transport(
                endpoint,
                format!("connect timed out after {:?}", self.connect_timeout),
            )
        })?
        .map_err(|e| TetherError::transport(endpoint, e.to_string()))?;

        stream
            .set_nodelay(true)
            .map_err(|e| TetherError::transport(endpoint, e.to_string()))?;
        debug!("TCP session established with {}", endpoint);

        let (reader, writer) = stream.into_split();
        Ok(Link::new(
            TcpLinkReader {
                endpoint,
                reader: BufReader::new(reader),
            },
            TcpLinkWriter {
                endpoint,
                writer: Some(writer),
            },
        ))
    }
}

struct TcpLinkReader {
    endpoint: Endpoint,
    reader: BufReader<OwnedReadHalf>,
}

#[async_trait]
impl LinkReader for TcpLinkReader {
    async fn recv(&mut self) -> Result<Option<WireMessage>> {
        read_message(&mut self.reader).await.map_err(|e| match e {
            TetherError::Io { message, .. } => TetherError::transport(self.endpoint, message),
            other => other,
        })
    }
}

struct TcpLinkWriter {
    endpoint: Endpoint,
    writer: Option<OwnedWriteHalf>,
}

#[async_trait]
impl LinkWriter for TcpLinkWriter {
    async fn send(&mut self, message: &WireMessage) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TetherError::transport(self.endpoint, "session closed"))?;
        write_message(writer, message).await.map_err(|e| match e {
            TetherError::Io { message, .. } => TetherError::transport(self.endpoint, message),
            other => other,
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            // The peer may already be gone; a failed FIN is not worth reporting.
            let _ = writer.shutdown().await;
            debug!("TCP session with {} closed", self.endpoint);
        }
        Ok(())
    }
}
