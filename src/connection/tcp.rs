//! Direct TCP (and TLS) links.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::{Channel, ConnectError, ConnectionConfig, Connector, Established};

const READ_BUFFER: usize = 16 * 1024;

/// [`Channel`] over any async byte stream.
pub struct StreamChannel<S> {
    stream: S,
    buf: Box<[u8]>,
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: vec![0u8; READ_BUFFER].into_boxed_slice(),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

#[async_trait]
impl<S> Channel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        let n = self.stream.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        trace!(bytes = n, "received");
        Ok(Some(Bytes::copy_from_slice(&self.buf[..n])))
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Connects straight to the device over TCP, with TLS when configured.
#[derive(Debug, Clone, Default)]
pub struct DirectConnector;

impl DirectConnector {
    pub fn new() -> Self {
        Self
    }
}

async fn open_tcp(config: &ConnectionConfig) -> Result<TcpStream, ConnectError> {
    let addr = (config.host.as_str(), config.port());
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ConnectError::Timeout(config.connect_timeout))?
        .map_err(|e| ConnectError::ConnectionFailed(format!("{}: {}", config.authority(), e)))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[async_trait]
impl Connector for DirectConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Established, ConnectError> {
        if config.transport.is_relay() {
            return Err(ConnectError::Unsupported(format!(
                "{:?} links need a relay connector",
                config.transport
            )));
        }

        debug!(host = %config.host, port = config.port(), tls = config.tls, "connecting");
        let stream = open_tcp(config).await?;

        if config.uses_tls() {
            return connect_tls(stream, config).await;
        }
        Ok(Established::plain(Box::new(StreamChannel::new(stream))))
    }
}

#[cfg(feature = "tls")]
async fn connect_tls(stream: TcpStream, config: &ConnectionConfig) -> Result<Established, ConnectError> {
    super::tls::connect(stream, config).await
}

#[cfg(not(feature = "tls"))]
async fn connect_tls(_stream: TcpStream, _config: &ConnectionConfig) -> Result<Established, ConnectError> {
    Err(ConnectError::Unsupported(
        "TLS support not compiled in (enable the `tls` feature)".into(),
    ))
}
