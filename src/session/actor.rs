//! The session task.
//!
//! One task per device owns the link, the queue and the auth state. Every
//! state change happens inside [`SessionCore::run`]; handles talk to it
//! through [`Command`]s only.

use bytes::Bytes;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::VecDeque;
use std::future::pending;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use super::queue::{CallQueue, PendingCall};
use super::{status, AjaxCallback, AjaxRequest, ConnectionInfo, SocketState};
use crate::auth::kerberos::negotiate_header;
use crate::auth::{service_principal, DigestChallenge, DigestState, TicketProvider};
use crate::connection::{Channel, ConnectError, ConnectionConfig, Connector, Established, TrustLevel};
use crate::http::{write_request, Direction, Headers, HttpMessage, HttpRequest, MessageParser};

static SERVER_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Intel\(R\) Active Management Technology\s+(\S+)")
        .expect("Invalid server header regex")
});

/// Firmware version from an AMT `Server` header.
pub(crate) fn parse_amt_version(server: &str) -> Option<String> {
    SERVER_VERSION
        .captures(server)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub(crate) enum Command {
    Submit(AjaxRequest, AjaxCallback),
    CancelAll(u16),
}

type ConnectFuture = BoxFuture<'static, Result<Established, ConnectError>>;

pub(crate) struct SessionCore {
    config: Arc<ConnectionConfig>,
    connector: Arc<dyn Connector>,
    tickets: Option<Arc<dyn TicketProvider>>,
    info: Arc<RwLock<ConnectionInfo>>,
    commands: mpsc::UnboundedReceiver<Command>,

    /// Calls waiting for a slot.
    queue: CallQueue,
    /// Dispatched calls, oldest first.
    active: VecDeque<PendingCall>,

    state: SocketState,
    link: Option<Box<dyn Channel>>,
    connecting: Option<ConnectFuture>,
    parser: MessageParser,

    digest: DigestState,
    /// Consecutive 401s answered for the head call.
    auth_attempts: u32,
    fail_all: Option<u16>,

    retry_at: Option<Instant>,
    idle_deadline: Option<Instant>,
}

async fn poll_connect(connecting: &mut Option<ConnectFuture>) -> Result<Established, ConnectError> {
    match connecting {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn recv_link(link: &mut Option<Box<dyn Channel>>) -> io::Result<Option<Bytes>> {
    match link {
        Some(link) => link.recv().await,
        None => pending().await,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

impl SessionCore {
    pub fn new(
        config: Arc<ConnectionConfig>,
        connector: Arc<dyn Connector>,
        tickets: Option<Arc<dyn TicketProvider>>,
        info: Arc<RwLock<ConnectionInfo>>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let digest = DigestState::new(config.expected_realm.clone());
        Self {
            config,
            connector,
            tickets,
            info,
            commands,
            queue: CallQueue::default(),
            active: VecDeque::new(),
            state: SocketState::Idle,
            link: None,
            connecting: None,
            parser: MessageParser::new(Direction::Response),
            digest,
            auth_attempts: 0,
            fail_all: None,
            retry_at: None,
            idle_deadline: None,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Submit(request, callback)) => self.submit(request, callback).await,
                    Some(Command::CancelAll(code)) => self.cancel_all(code).await,
                    None => break,
                },
                result = poll_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connected(result).await;
                }
                received = recv_link(&mut self.link) => match received {
                    Ok(Some(data)) => self.on_data(data).await,
                    Ok(None) => self.link_closed("closed by device").await,
                    Err(e) => {
                        debug!(host = %self.config.host, error = %e, "link read failed");
                        self.link_down("read error").await;
                    }
                },
                _ = sleep_opt(self.retry_at) => self.on_retry_timer().await,
                _ = sleep_opt(self.idle_deadline) => {
                    debug!(host = %self.config.host, "link idle timeout");
                    self.link_closed("idle timeout").await;
                }
            }
        }

        self.close_link().await;
        debug!(host = %self.config.host, "session task finished");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn submit(&mut self, request: AjaxRequest, callback: AjaxCallback) {
        let call = PendingCall::new(request, callback, self.config.tuning.max_attempts);

        if let Some(code) = self.fail_all {
            if code != status::SILENT_CANCEL {
                call.fail(code);
            }
            return;
        }
        if self.config.uses_kerberos() && !self.kerberos_available() {
            warn!(host = %self.config.host, "no Kerberos ticket provider; failing call");
            call.fail(status::UNAUTHORIZED);
            return;
        }

        trace!(tag = ?call.request.tag, priority = ?call.request.priority, "call queued");
        self.queue.push(call);
        self.dispatch().await;
    }

    async fn cancel_all(&mut self, code: u16) {
        info!(
            host = %self.config.host,
            code,
            active = self.active.len(),
            queued = self.queue.len(),
            "cancelling all calls"
        );
        self.fail_all = Some(code);
        self.info.write().fail_all = Some(code);

        let calls: Vec<PendingCall> = self.active.drain(..).chain(self.queue.drain()).collect();
        for call in calls {
            if code != status::SILENT_CANCEL {
                call.fail(code);
            }
        }

        self.connecting = None;
        self.retry_at = None;
        self.close_link().await;
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    async fn dispatch(&mut self) {
        while self.active.len() < self.config.tuning.max_active {
            let Some(call) = self.queue.pop() else {
                break;
            };
            self.active.push_back(call);
            if self.state == SocketState::Ready {
                let idx = self.active.len() - 1;
                if !self.send_call(idx).await {
                    return;
                }
            }
        }

        if self.state == SocketState::Idle && !self.active.is_empty() && self.retry_at.is_none() {
            self.start_connect();
        }
    }

    fn start_connect(&mut self) {
        if self.connecting.is_some() {
            return;
        }
        debug!(host = %self.config.host, port = self.config.port(), "opening link");
        let connector = self.connector.clone();
        let config = self.config.clone();
        self.connecting = Some(Box::pin(async move { connector.connect(&config).await }));
        self.set_state(SocketState::Connecting);
    }

    /// Send the active call at `idx`. Returns false if the link went down.
    async fn send_call(&mut self, idx: usize) -> bool {
        let Some(call) = self.active.get(idx) else {
            return false;
        };
        let method = call.request.method.clone();
        let url = call.request.url.clone();
        let body = call.request.body.clone();
        let tag = call.request.tag;

        let mut request = HttpRequest::new(method.as_str(), url.as_str())
            .header("Host", self.config.authority());
        if !body.is_empty() {
            request = request.header("Content-Type", "application/soap+xml; charset=utf-8");
        }
        if let Some(authorization) = self.authorization(&method, &url).await {
            request = request.header("Authorization", authorization);
        }
        let bytes = write_request(&request.body(body));

        let Some(link) = self.link.as_mut() else {
            return false;
        };
        match link.send(&bytes).await {
            Ok(()) => {
                trace!(tag = ?tag, bytes = bytes.len(), "request sent");
                self.touch();
                true
            }
            Err(e) => {
                debug!(host = %self.config.host, error = %e, "link write failed");
                self.link_down("write error").await;
                false
            }
        }
    }

    async fn authorization(&mut self, method: &str, url: &str) -> Option<String> {
        if !self.config.uses_kerberos() {
            return self
                .digest
                .authorize(&self.config.username, &self.config.password, method, url);
        }

        let provider = self.tickets.clone()?;
        let spn = service_principal(&self.config.host);
        match provider.acquire_ticket(&spn).await {
            Ok(ticket) => {
                if let Err(e) = provider.purge_cached_tickets().await {
                    debug!(error = %e, "failed to purge cached tickets");
                }
                Some(negotiate_header(&ticket))
            }
            Err(e) => {
                warn!(spn = %spn, error = %e, "Kerberos ticket unavailable; sending without credentials");
                None
            }
        }
    }

    fn kerberos_available(&self) -> bool {
        self.tickets.as_ref().is_some_and(|t| t.is_available())
    }

    // ========================================================================
    // Link events
    // ========================================================================

    async fn on_connected(&mut self, result: Result<Established, ConnectError>) {
        match result {
            Ok(established) => {
                let (trust, certificate, fingerprint) = match established.tls {
                    Some(tls) => (tls.trust, tls.peer_certificate, tls.fingerprint),
                    None => (TrustLevel::None, None, None),
                };
                {
                    let mut info = self.info.write();
                    info.trust_level = trust;
                    info.peer_certificate = certificate;
                    info.peer_fingerprint = fingerprint;
                }

                self.link = Some(established.channel);
                self.parser.reset();
                self.set_state(SocketState::Ready);
                self.touch();
                debug!(host = %self.config.host, trust = %trust, in_flight = self.active.len(), "link ready");

                for idx in 0..self.active.len() {
                    if !self.send_call(idx).await {
                        return;
                    }
                }
                self.dispatch().await;
            }
            Err(e) if e.is_fatal() => {
                warn!(host = %self.config.host, error = %e, "device rejected");
                self.cancel_all(status::TRUST_FAILURE).await;
            }
            Err(e) => {
                debug!(host = %self.config.host, error = %e, "connect failed");
                self.link_down("connect failed").await;
            }
        }
    }

    async fn on_data(&mut self, data: Bytes) {
        self.touch();
        match self.parser.push(&data) {
            Ok(messages) => {
                for message in messages {
                    self.on_message(message).await;
                    if self.link.is_none() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!(host = %self.config.host, error = %e, "invalid HTTP framing from device");
                self.link_down("framing error").await;
            }
        }
    }

    /// The link ended, by the device or by the idle timer. A close-delimited
    /// response still being read is complete at this point.
    async fn link_closed(&mut self, reason: &str) {
        let message = self.parser.finish();
        self.close_link().await;
        match message {
            Some(message) => self.on_message(message).await,
            None => self.link_down(reason).await,
        }
    }

    async fn on_message(&mut self, message: HttpMessage) {
        let code = message.status().unwrap_or_default();
        self.record_server(&message.headers);

        if (100..200).contains(&code) {
            trace!(status = code, "skipping informational response");
            return;
        }

        if message.headers.has_token("connection", "close") {
            self.close_link().await;
        }
        if self.active.is_empty() {
            debug!(status = code, "dropping unsolicited response");
            return;
        }

        if code == status::UNAUTHORIZED && self.auth_attempts < self.config.tuning.auth_retries {
            self.auth_attempts += 1;
            let challenge = message
                .headers
                .get_all("www-authenticate")
                .find_map(DigestChallenge::parse);
            if let Some(challenge) = challenge {
                if let Err(mismatch) = self.digest.accept(challenge) {
                    warn!(
                        host = %self.config.host,
                        expected = %mismatch.expected,
                        actual = %mismatch.actual,
                        "Digest realm changed"
                    );
                    self.cancel_all(status::REALM_CHANGED).await;
                    return;
                }
                self.info.write().digest_realm = self.digest.realm().map(str::to_string);
            }
            debug!(attempt = self.auth_attempts, "authentication challenge; reconnecting");
            self.close_link().await;
            self.start_connect();
            return;
        }

        let Some(call) = self.active.pop_front() else {
            return;
        };
        self.auth_attempts = 0;
        debug!(status = code, tag = ?call.request.tag, "call complete");
        call.succeed(code, message.body);
        self.dispatch().await;
    }

    fn record_server(&self, headers: &Headers) {
        if let Some(version) = headers.get("server").and_then(parse_amt_version) {
            let mut info = self.info.write();
            if info.amt_version.as_deref() != Some(version.as_str()) {
                debug!(version = %version, "AMT firmware version");
                info.amt_version = Some(version);
            }
        }
    }

    async fn on_retry_timer(&mut self) {
        self.retry_at = None;
        if self.active.front().is_some_and(|c| c.attempts_left == 0) {
            if let Some(call) = self.active.pop_front() {
                warn!(host = %self.config.host, tag = ?call.request.tag, "call failed after all attempts");
                self.auth_attempts = 0;
                call.fail(status::TIMEOUT);
            }
        }
        self.dispatch().await;
    }

    /// The link is gone (or never came up). Charge the head call one attempt
    /// and schedule a retry.
    async fn link_down(&mut self, reason: &str) {
        self.close_link().await;
        let delay = self.config.tuning.retry_delay;
        match self.active.front_mut() {
            Some(head) => {
                head.attempts_left = head.attempts_left.saturating_sub(1);
                debug!(
                    reason,
                    tag = ?head.request.tag,
                    attempts_left = head.attempts_left,
                    "link lost with calls in flight"
                );
                self.retry_at = Some(Instant::now() + delay);
            }
            None => trace!(reason, "link closed while idle"),
        }
    }

    async fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        self.parser.reset();
        self.idle_deadline = None;
        if self.connecting.is_none() {
            self.set_state(SocketState::Idle);
        }
    }

    fn touch(&mut self) {
        if self.state == SocketState::Ready {
            self.idle_deadline = Some(Instant::now() + self.config.tuning.idle_timeout);
        }
    }

    fn set_state(&mut self, state: SocketState) {
        if self.state != state {
            trace!(from = ?self.state, to = ?state, "socket state");
        }
        self.state = state;
        self.info.write().socket_state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amt_version() {
        assert_eq!(
            parse_amt_version("Intel(R) Active Management Technology 11.8.50.3425"),
            Some("11.8.50.3425".to_string())
        );
        assert_eq!(parse_amt_version("nginx/1.25"), None);
    }
}
