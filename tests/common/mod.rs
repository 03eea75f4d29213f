//! Shared test utilities for the amtwsman test suite.
//!
//! This module provides:
//! - A scripted in-memory [`Connector`] handing out relay endpoints
//! - Helpers to read requests and write canned device responses
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use amtwsman::connection::{
    relay_pair, ConnectError, ConnectionConfig, Connector, Established, RelayEndpoint,
};
use amtwsman::http::{Direction, HttpMessage, MessageParser};
use amtwsman::session::{AjaxRequest, AjaxResponse, AmtConnection};

// ============================================================================
// Scripted Connector
// ============================================================================

/// What the next connect attempt does.
#[derive(Debug, Clone)]
pub enum ConnectStep {
    /// Hand out a fresh relay endpoint.
    Accept,
    /// Fail like a refused TCP connect.
    Refuse,
    /// Fail trust evaluation.
    RejectCertificate,
}

/// In-memory device link factory.
pub struct MockConnector {
    script: Mutex<VecDeque<ConnectStep>>,
    fallback: ConnectStep,
    attempts: AtomicUsize,
    endpoints: mpsc::UnboundedSender<RelayEndpoint>,
}

impl MockConnector {
    /// Accept every connect; endpoints arrive on the returned receiver.
    pub fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<RelayEndpoint>) {
        Self::scripted(Vec::new(), ConnectStep::Accept)
    }

    /// Refuse every connect.
    pub fn refusing() -> Arc<Self> {
        Self::scripted(Vec::new(), ConnectStep::Refuse).0
    }

    /// Run `steps` in order, then `fallback` forever.
    pub fn scripted(
        steps: Vec<ConnectStep>,
        fallback: ConnectStep,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RelayEndpoint>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(steps.into()),
            fallback,
            attempts: AtomicUsize::new(0),
            endpoints: tx,
        });
        (connector, rx)
    }

    /// Number of connect attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Established, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            ConnectStep::Accept => {
                let (channel, endpoint) = relay_pair();
                let _ = self.endpoints.send(endpoint);
                Ok(Established::plain(Box::new(channel)))
            }
            ConnectStep::Refuse => Err(ConnectError::ConnectionFailed("connection refused".into())),
            ConnectStep::RejectCertificate => {
                Err(ConnectError::TrustRejected("fingerprint mismatch".into()))
            }
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Plain-HTTP device config with Digest credentials.
pub fn device_config() -> ConnectionConfig {
    ConnectionConfig::new("amt.test").with_credentials("admin", "P@ssw0rd")
}

/// Session over `connector` with [`device_config`].
pub fn connect(connector: Arc<MockConnector>) -> AmtConnection {
    connect_with(device_config(), connector)
}

pub fn connect_with(config: ConnectionConfig, connector: Arc<MockConnector>) -> AmtConnection {
    AmtConnection::create(config, connector, None).expect("valid test config")
}

// ============================================================================
// Device Side Helpers
// ============================================================================

/// Next endpoint handed out by the connector.
pub async fn next_endpoint(endpoints: &mut mpsc::UnboundedReceiver<RelayEndpoint>) -> RelayEndpoint {
    endpoints.recv().await.expect("connector dropped")
}

/// Read one complete request written by the session.
pub async fn read_request(endpoint: &mut RelayEndpoint) -> HttpMessage {
    let mut parser = MessageParser::new(Direction::Request);
    loop {
        let chunk = endpoint
            .next_write()
            .await
            .expect("session closed the channel");
        let mut messages = parser.push(&chunk).expect("session wrote valid HTTP");
        if !messages.is_empty() {
            return messages.remove(0);
        }
    }
}

/// Body of a request as text.
pub fn body_text(message: &HttpMessage) -> String {
    String::from_utf8_lossy(&message.body).into_owned()
}

/// A Content-Length framed response.
pub fn response(status: u16, reason: &str, headers: &[(&str, &str)], body: &str) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {} {}\r\n", status, reason);
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
    out.into_bytes()
}

/// 200 OK with `body`.
pub fn ok(body: &str) -> Vec<u8> {
    response(
        200,
        "OK",
        &[
            ("Server", "Intel(R) Active Management Technology 11.8.50.3425"),
            ("Content-Type", "application/soap+xml; charset=UTF-8"),
        ],
        body,
    )
}

/// 401 carrying a Digest challenge.
pub fn challenge(realm: &str, nonce: &str) -> Vec<u8> {
    let header = format!("Digest realm=\"{}\", nonce=\"{}\", stale=\"false\", qop=\"auth\"", realm, nonce);
    response(401, "Unauthorized", &[("WWW-Authenticate", header.as_str())], "")
}

/// Queue a call and return a receiver for its reply. Calls submitted this
/// way reach the session in submission order.
pub fn submit(conn: &AmtConnection, request: AjaxRequest) -> oneshot::Receiver<AjaxResponse> {
    let (tx, rx) = oneshot::channel();
    conn.perform_ajax(
        request,
        Box::new(move |reply| {
            let _ = tx.send(reply);
        }),
    );
    rx
}
