//! Virtual channels tunneled over a relay (CIRA or APF).
//!
//! The tunnel owner (the CIRA server, an APF relay) sits on the
//! [`RelayEndpoint`] side: it pushes bytes coming from the device with
//! [`on_data`](RelayEndpoint::on_data), reports channel state with
//! [`on_state_change`](RelayEndpoint::on_state_change) and forwards whatever
//! [`next_write`](RelayEndpoint::next_write) yields. The session core holds
//! the [`RelayChannel`] side.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Channel, ConnectError, ConnectionConfig, Connector, Established};

/// Channel state reported by the tunnel: closed.
pub const CHANNEL_CLOSED: u8 = 0;

/// Channel state reported by the tunnel: open.
pub const CHANNEL_OPEN: u8 = 2;

#[derive(Debug)]
enum RelayEvent {
    Data(Bytes),
    State(u8),
}

/// Session side of a tunneled channel.
#[derive(Debug)]
pub struct RelayChannel {
    events: mpsc::UnboundedReceiver<RelayEvent>,
    writes: Option<mpsc::UnboundedSender<Bytes>>,
    open: bool,
    closed: bool,
}

/// Tunnel side of a tunneled channel.
#[derive(Debug)]
pub struct RelayEndpoint {
    events: mpsc::UnboundedSender<RelayEvent>,
    writes: mpsc::UnboundedReceiver<Bytes>,
}

/// Create a connected channel/endpoint pair.
pub fn relay_pair() -> (RelayChannel, RelayEndpoint) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (write_tx, write_rx) = mpsc::unbounded_channel();
    (
        RelayChannel {
            events: event_rx,
            writes: Some(write_tx),
            open: false,
            closed: false,
        },
        RelayEndpoint {
            events: event_tx,
            writes: write_rx,
        },
    )
}

impl RelayEndpoint {
    /// Bytes received from the device.
    pub fn on_data(&self, data: impl Into<Bytes>) {
        let _ = self.events.send(RelayEvent::Data(data.into()));
    }

    /// Channel state change: [`CHANNEL_CLOSED`] or [`CHANNEL_OPEN`].
    pub fn on_state_change(&self, state: u8) {
        let _ = self.events.send(RelayEvent::State(state));
    }

    /// Next chunk the session wants delivered to the device; `None` once
    /// the session closed its side.
    pub async fn next_write(&mut self) -> Option<Bytes> {
        self.writes.recv().await
    }

    /// Non-blocking variant of [`next_write`](Self::next_write).
    pub fn try_next_write(&mut self) -> Option<Bytes> {
        self.writes.try_recv().ok()
    }

    /// True once the session side dropped or closed the channel.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

impl RelayChannel {
    /// Wait until the tunnel reports the channel open.
    pub async fn wait_open(&mut self) -> Result<(), ConnectError> {
        while !self.open {
            match self.events.recv().await {
                Some(RelayEvent::State(CHANNEL_OPEN)) => self.open = true,
                Some(RelayEvent::State(_)) | None => {
                    self.closed = true;
                    return Err(ConnectError::ChannelClosed);
                }
                // data before open is not expected; drop it
                Some(RelayEvent::Data(data)) => {
                    trace!(bytes = data.len(), "dropping data received before open");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for RelayChannel {
    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let writes = self
            .writes
            .as_ref()
            .filter(|_| !self.closed)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "relay channel closed"))?;
        writes
            .send(Bytes::copy_from_slice(data))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "relay endpoint gone"))
    }

    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        if self.closed {
            return Ok(None);
        }
        loop {
            match self.events.recv().await {
                Some(RelayEvent::Data(data)) => return Ok(Some(data)),
                Some(RelayEvent::State(CHANNEL_OPEN)) => self.open = true,
                Some(RelayEvent::State(_)) | None => {
                    self.closed = true;
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&mut self) {
        self.closed = true;
        self.writes = None;
        self.events.close();
    }
}

/// Something that can open tunneled channels to a device.
#[async_trait]
pub trait RelayTunnel: Send + Sync {
    async fn open_channel(&self, host: &str, port: u16) -> Result<RelayChannel, ConnectError>;
}

/// [`Connector`] over a [`RelayTunnel`].
pub struct RelayConnector<T> {
    tunnel: Arc<T>,
}

impl<T: RelayTunnel> RelayConnector<T> {
    pub fn new(tunnel: Arc<T>) -> Self {
        Self { tunnel }
    }
}

#[async_trait]
impl<T: RelayTunnel + 'static> Connector for RelayConnector<T> {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Established, ConnectError> {
        debug!(host = %config.host, transport = ?config.transport, "opening relay channel");
        let mut channel = self.tunnel.open_channel(&config.host, config.port()).await?;
        tokio::time::timeout(config.connect_timeout, channel.wait_open())
            .await
            .map_err(|_| ConnectError::Timeout(config.connect_timeout))??;
        Ok(Established::plain(Box::new(channel)))
    }
}
