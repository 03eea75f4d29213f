//! Serialized request session for one device.
//!
//! Each [`AmtConnection`] owns a background task that holds the link, the
//! pending call queue and the authentication state. Handles only send
//! commands to that task, so callers never block on the device and never
//! share mutable state with it.
//!
//! # Example
//!
//! ```rust,ignore
//! use amtwsman::session::{AjaxRequest, AmtConnection};
//!
//! let conn = AmtConnection::builder("192.168.1.20")
//!     .credentials("admin", "P@ssw0rd")
//!     .spawn()?;
//!
//! let reply = conn.call(AjaxRequest::new(envelope)).await;
//! ```

mod actor;
mod queue;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::auth::TicketProvider;
use crate::connection::{
    ConnectError, ConnectionConfig, Connector, DirectConnector, SessionTuning, TlsOptions,
    TransportMode, TrustLevel,
};
use crate::error::{Error, Result};

use self::actor::{Command, SessionCore};

/// Status codes delivered in [`AjaxResponse::status`] besides real HTTP
/// statuses.
pub mod status {
    /// Authentication failed after every challenge retry.
    pub const UNAUTHORIZED: u16 = 401;
    /// The call exhausted its attempts without a response.
    pub const TIMEOUT: u16 = 408;
    /// The device changed its Digest realm.
    pub const REALM_CHANGED: u16 = 997;
    /// The device certificate failed trust evaluation.
    pub const TRUST_FAILURE: u16 = 998;
    /// Cancellation without callbacks.
    pub const SILENT_CANCEL: u16 = 999;
}

/// Opaque value echoed back with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Tag(pub u64);

impl From<u64> for Tag {
    fn from(value: u64) -> Self {
        Tag(value)
    }
}

/// Queue placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal,
    /// Goes in front of every queued call.
    High,
}

/// One HTTP exchange to run on the session.
#[derive(Debug, Clone)]
pub struct AjaxRequest {
    pub body: Bytes,
    pub tag: Tag,
    pub priority: Priority,
    pub url: String,
    pub method: String,
}

impl AjaxRequest {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            tag: Tag::default(),
            priority: Priority::Normal,
            url: "/wsman".to_string(),
            method: "POST".to_string(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }
}

/// Whether the device answered at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyKind {
    /// The device sent an HTTP response (any status).
    Success,
    /// Synthetic failure; `status` holds one of the [`status`] codes.
    Error,
}

/// Completion of an [`AjaxRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AjaxResponse {
    pub body: Option<Bytes>,
    pub kind: ReplyKind,
    pub status: u16,
    pub tag: Tag,
}

impl AjaxResponse {
    /// Device answered with 200.
    pub fn is_ok(&self) -> bool {
        self.kind == ReplyKind::Success && self.status == 200
    }
}

/// Invoked exactly once per call, on the session task.
pub type AjaxCallback = Box<dyn FnOnce(AjaxResponse) + Send + 'static>;

/// Link state as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketState {
    #[default]
    Idle,
    Connecting,
    Ready,
}

impl SocketState {
    pub fn as_u8(&self) -> u8 {
        match self {
            SocketState::Idle => 0,
            SocketState::Connecting => 1,
            SocketState::Ready => 2,
        }
    }
}

/// What the session has learned about the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Firmware version from the `Server` header.
    pub amt_version: Option<String>,
    pub digest_realm: Option<String>,
    pub trust_level: TrustLevel,
    /// DER of the device certificate.
    #[serde(skip)]
    pub peer_certificate: Option<Vec<u8>>,
    pub peer_fingerprint: Option<String>,
    pub socket_state: SocketState,
    /// Code the session was cancelled with, if any.
    pub fail_all: Option<u16>,
}

/// Handle to a device session. Cheap to clone; the session task stops once
/// every handle is dropped.
#[derive(Clone)]
pub struct AmtConnection {
    commands: mpsc::UnboundedSender<Command>,
    info: Arc<RwLock<ConnectionInfo>>,
    config: Arc<ConnectionConfig>,
}

impl fmt::Debug for AmtConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmtConnection")
            .field("host", &self.config.host)
            .field("port", &self.config.port())
            .field("state", &self.info.read().socket_state)
            .finish()
    }
}

impl AmtConnection {
    /// Start a session task for `config` on the current tokio runtime.
    pub fn create(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        ticket_provider: Option<Arc<dyn TicketProvider>>,
    ) -> Result<Self> {
        config.validate().map_err(|e| match e {
            ConnectError::InvalidConfig(msg) => Error::Config(msg),
            other => Error::Connect(other),
        })?;
        if config.uses_kerberos() && !ticket_provider.as_ref().is_some_and(|p| p.is_available()) {
            warn!(host = %config.host, "Kerberos selected but no ticket provider is available");
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::config("AmtConnection must be created inside a tokio runtime"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let info = Arc::new(RwLock::new(ConnectionInfo::default()));
        let config = Arc::new(config);
        let core = SessionCore::new(config.clone(), connector, ticket_provider, info.clone(), rx);
        runtime.spawn(core.run());

        debug!(host = %config.host, port = config.port(), "session started");
        Ok(Self {
            commands: tx,
            info,
            config,
        })
    }

    /// Builder with direct transport defaults.
    pub fn builder(host: impl Into<String>) -> AmtConnectionBuilder {
        AmtConnectionBuilder::new(ConnectionConfig::new(host))
    }

    /// Queue a call. `callback` runs exactly once on the session task, never
    /// inside this function.
    pub fn perform_ajax(&self, request: AjaxRequest, callback: AjaxCallback) {
        if self.commands.send(Command::Submit(request, callback)).is_err() {
            warn!(host = %self.config.host, "session task is gone; call dropped");
        }
    }

    /// Run a call and wait for its response. `None` when the call was
    /// cancelled silently (code 999) or the session is gone.
    pub async fn call(&self, request: AjaxRequest) -> Option<AjaxResponse> {
        let (tx, rx) = oneshot::channel();
        self.perform_ajax(
            request,
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
        );
        rx.await.ok()
    }

    /// Fail every queued and in-flight call with `code` and refuse all
    /// later ones. Code 999 suppresses the callbacks.
    pub fn cancel_all_queries(&self, code: u16) {
        let _ = self.commands.send(Command::CancelAll(code));
    }

    /// Snapshot of what the session knows about the device.
    pub fn info(&self) -> ConnectionInfo {
        self.info.read().clone()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

/// Builder for [`AmtConnection`].
pub struct AmtConnectionBuilder {
    config: ConnectionConfig,
    connector: Option<Arc<dyn Connector>>,
    ticket_provider: Option<Arc<dyn TicketProvider>>,
}

impl AmtConnectionBuilder {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            connector: None,
            ticket_provider: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = username.into();
        self.config.password = password.into();
        self
    }

    pub fn tls(mut self, tls: bool) -> Self {
        self.config.tls = tls;
        self
    }

    pub fn tls_options(mut self, options: TlsOptions) -> Self {
        self.config.tls_options = options;
        self
    }

    pub fn transport(mut self, transport: TransportMode) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn expected_realm(mut self, realm: impl Into<String>) -> Self {
        self.config.expected_realm = Some(realm.into());
        self
    }

    pub fn tuning(mut self, tuning: SessionTuning) -> Self {
        self.config.tuning = tuning;
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn ticket_provider(mut self, provider: Arc<dyn TicketProvider>) -> Self {
        self.ticket_provider = Some(provider);
        self
    }

    pub fn spawn(self) -> Result<AmtConnection> {
        let connector = match self.connector {
            Some(connector) => connector,
            None if self.config.transport.is_relay() => {
                return Err(Error::config(format!(
                    "{:?} transport requires a relay connector",
                    self.config.transport
                )));
            }
            None => Arc::new(DirectConnector::new()),
        };
        AmtConnection::create(self.config, connector, self.ticket_provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req = AjaxRequest::new("<Envelope/>");
        assert_eq!(req.url, "/wsman");
        assert_eq!(req.method, "POST");
        assert_eq!(req.priority, Priority::Normal);
        assert_eq!(req.tag, Tag(0));
    }

    #[test]
    fn test_socket_state_codes() {
        assert_eq!(SocketState::Idle.as_u8(), 0);
        assert_eq!(SocketState::Connecting.as_u8(), 1);
        assert_eq!(SocketState::Ready.as_u8(), 2);
    }

    #[test]
    fn test_create_outside_runtime_fails() {
        let err = AmtConnection::builder("10.0.0.1").spawn().unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_relay_without_connector_rejected() {
        let err = AmtConnection::builder("10.0.0.1")
            .transport(TransportMode::Cira)
            .spawn()
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let err = AmtConnection::builder("").spawn().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
