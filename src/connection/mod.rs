//! Link layer between the session core and the device.
//!
//! A link is anything that moves bytes both ways: a TCP socket, a TLS
//! stream, or a virtual channel tunneled over a relay. All of them implement
//! [`Channel`], and a [`Connector`] produces them on demand.
//!
//! # Supported Transports
//!
//! - **Direct** ([`DirectConnector`]): TCP, optionally wrapped in TLS with a
//!   post-handshake trust evaluation (`tls` feature, default).
//! - **Relay** ([`RelayConnector`]): channels opened by a [`RelayTunnel`]
//!   implementation (CIRA / APF). No TLS on these.

/// Connection configuration types.
pub mod config;

/// Tunneled virtual channels.
pub mod relay;

/// Plain TCP transport.
pub mod tcp;

/// rustls client and certificate capture.
#[cfg(feature = "tls")]
pub mod tls;

/// Trust decision for TLS links.
pub mod trust;

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub use config::{
    ConnectionConfig, SessionTuning, TlsOptions, TransportMode, AMT_HTTPS_PORT, AMT_HTTP_PORT,
};
pub use relay::{relay_pair, RelayChannel, RelayConnector, RelayEndpoint, RelayTunnel};
pub use tcp::{DirectConnector, StreamChannel};
pub use trust::{cert_fingerprint, decide_trust, normalize_fingerprint, CaOutcome, PinOutcome, TrustLevel};

/// Errors raised while establishing a link.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Failed to establish initial connection to the device.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection attempt timed out.
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    /// TLS handshake or TLS setup failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The device certificate failed trust evaluation. Fatal for the session.
    #[error("Certificate rejected: {0}")]
    TrustRejected(String),

    /// Configuration is invalid or incomplete.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The relay channel closed before it opened.
    #[error("Relay channel closed")]
    ChannelClosed,

    /// The requested transport is not available.
    #[error("Unsupported transport: {0}")]
    Unsupported(String),

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectError {
    /// Errors that must cancel the whole session instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectError::TrustRejected(_))
    }
}

/// A bidirectional byte link.
#[async_trait]
pub trait Channel: Send {
    /// Write all of `data`.
    async fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Next chunk of incoming bytes; `None` once the peer has closed.
    ///
    /// Must be cancel safe: dropping the future loses no data.
    async fn recv(&mut self) -> io::Result<Option<Bytes>>;

    /// Close the link. Errors are ignored.
    async fn close(&mut self);
}

/// TLS facts established during connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSession {
    pub trust: TrustLevel,
    /// DER of the device's end-entity certificate.
    pub peer_certificate: Option<Vec<u8>>,
    /// SHA-384 of `peer_certificate`, lowercase hex.
    pub fingerprint: Option<String>,
}

/// A connected link plus what was learned while opening it.
pub struct Established {
    pub channel: Box<dyn Channel>,
    pub tls: Option<TlsSession>,
}

impl Established {
    pub fn plain(channel: Box<dyn Channel>) -> Self {
        Self { channel, tls: None }
    }
}

impl std::fmt::Debug for Established {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Established").field("tls", &self.tls).finish()
    }
}

/// Opens links to a device.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Established, ConnectError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ConnectError::TrustRejected("pin".into()).is_fatal());
        assert!(!ConnectError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!ConnectError::Tls("handshake".into()).is_fatal());
        assert!(!ConnectError::ChannelClosed.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = ConnectError::ConnectionFailed("refused".into());
        assert_eq!(err.to_string(), "Connection failed: refused");
    }
}
