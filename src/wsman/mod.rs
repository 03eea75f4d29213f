//! WS-Management operations over an [`AmtConnection`].
//!
//! [`WsmanStack`] builds the SOAP envelope for each operation, hands it to
//! the session queue and parses whatever comes back.
//!
//! # Example
//!
//! ```rust,ignore
//! use amtwsman::wsman::WsmanStack;
//!
//! let wsman = WsmanStack::new(conn);
//! let settings = wsman.get("AMT_GeneralSettings", &[]).await?;
//! println!("{}", settings.body["HostName"]);
//! ```

pub mod envelope;
pub mod resource;
pub mod response;

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, trace};

use crate::session::{AjaxRequest, AmtConnection, Priority, ReplyKind};

pub use envelope::DeliveryMode;
pub use resource::resource_uri;
pub use response::{parse_response, WsmanResponse};

/// Upper bound on Pull round trips in [`WsmanStack::enumerate_all`].
const MAX_PULLS: usize = 1000;

/// WS-Management call failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WsmanError {
    /// Transport failure (synthetic status) or a non-200 answer without a
    /// SOAP fault.
    #[error("HTTP status {status}")]
    Http { status: u16 },

    /// The device answered with a SOAP fault.
    #[error("WS-Management fault {code}: {reason}")]
    Fault {
        code: String,
        subcode: Option<String>,
        reason: String,
    },

    /// The response was not a usable envelope.
    #[error("Invalid response: {0}")]
    Parse(String),

    /// The call was cancelled without a reply.
    #[error("Call cancelled")]
    Cancelled,
}

/// WS-Management client for one device.
#[derive(Debug)]
pub struct WsmanStack {
    connection: AmtConnection,
    next_message_id: AtomicU64,
}

impl WsmanStack {
    pub fn new(connection: AmtConnection) -> Self {
        Self {
            connection,
            next_message_id: AtomicU64::new(0),
        }
    }

    pub fn connection(&self) -> &AmtConnection {
        &self.connection
    }

    fn message_id(&self) -> u64 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn execute(&self, envelope: String, message_id: u64, priority: Priority) -> Result<WsmanResponse, WsmanError> {
        trace!(message_id, "sending WS-Management request");
        let request = AjaxRequest::new(envelope)
            .with_tag(message_id)
            .with_priority(priority);
        let reply = self
            .connection
            .call(request)
            .await
            .ok_or(WsmanError::Cancelled)?;

        if reply.kind == ReplyKind::Error {
            debug!(message_id, status = reply.status, "call failed");
            return Err(WsmanError::Http {
                status: reply.status,
            });
        }

        let body = reply.body.unwrap_or_default();
        let text = String::from_utf8_lossy(&body);
        match parse_response(&text) {
            Err(fault @ WsmanError::Fault { .. }) => Err(fault),
            _ if reply.status != 200 => Err(WsmanError::Http {
                status: reply.status,
            }),
            parsed => parsed,
        }
    }

    /// Fetch one instance.
    pub async fn get(&self, class: &str, selectors: &[(&str, &str)]) -> Result<WsmanResponse, WsmanError> {
        let id = self.message_id();
        let envelope = envelope::get(&resource_uri(class), selectors, id);
        self.execute(envelope, id, Priority::Normal).await
    }

    /// Replace an instance's properties.
    pub async fn put(
        &self,
        class: &str,
        properties: &Value,
        selectors: &[(&str, &str)],
    ) -> Result<WsmanResponse, WsmanError> {
        let id = self.message_id();
        let envelope = envelope::put(&resource_uri(class), properties, selectors, id);
        self.execute(envelope, id, Priority::Normal).await
    }

    /// Create an instance.
    pub async fn create(&self, class: &str, properties: &Value) -> Result<WsmanResponse, WsmanError> {
        let id = self.message_id();
        let envelope = envelope::create(&resource_uri(class), properties, id);
        self.execute(envelope, id, Priority::Normal).await
    }

    /// Delete an instance.
    pub async fn delete(&self, class: &str, selectors: &[(&str, &str)]) -> Result<WsmanResponse, WsmanError> {
        let id = self.message_id();
        let envelope = envelope::delete(&resource_uri(class), selectors, id);
        self.execute(envelope, id, Priority::Normal).await
    }

    /// Start an enumeration; the response carries the context for [`pull`](Self::pull).
    pub async fn enumerate(&self, class: &str) -> Result<WsmanResponse, WsmanError> {
        let id = self.message_id();
        let envelope = envelope::enumerate(&resource_uri(class), id);
        self.execute(envelope, id, Priority::Normal).await
    }

    /// Fetch the next batch of an enumeration.
    pub async fn pull(&self, class: &str, context: &str) -> Result<WsmanResponse, WsmanError> {
        let id = self.message_id();
        let envelope = envelope::pull(&resource_uri(class), context, id);
        self.execute(envelope, id, Priority::Normal).await
    }

    /// Invoke a class method.
    pub async fn exec_method(
        &self,
        class: &str,
        method: &str,
        args: &Value,
        selectors: &[(&str, &str)],
    ) -> Result<WsmanResponse, WsmanError> {
        let id = self.message_id();
        let envelope = envelope::exec_method(&resource_uri(class), method, args, selectors, id);
        self.execute(envelope, id, Priority::Normal).await
    }

    pub async fn subscribe(
        &self,
        class: &str,
        mode: DeliveryMode,
        notify_to: Option<&str>,
        selectors: &[(&str, &str)],
    ) -> Result<WsmanResponse, WsmanError> {
        let id = self.message_id();
        let envelope = envelope::subscribe(&resource_uri(class), mode, notify_to, selectors, id);
        self.execute(envelope, id, Priority::Normal).await
    }

    pub async fn unsubscribe(&self, class: &str, selectors: &[(&str, &str)]) -> Result<WsmanResponse, WsmanError> {
        let id = self.message_id();
        let envelope = envelope::unsubscribe(&resource_uri(class), selectors, id);
        self.execute(envelope, id, Priority::Normal).await
    }

    /// WS-Management Identify. Sent ahead of queued calls.
    pub async fn identify(&self) -> Result<WsmanResponse, WsmanError> {
        let id = self.message_id();
        self.execute(envelope::identify(), id, Priority::High).await
    }

    /// Enumerate followed by Pull until the device signals the end.
    pub async fn enumerate_all(&self, class: &str) -> Result<Vec<Value>, WsmanError> {
        let started = self.enumerate(class).await?;
        let mut items = started.items();
        let mut context = started.enumeration_context().map(str::to_string);

        for _ in 0..MAX_PULLS {
            let Some(ctx) = context.take() else {
                return Ok(items);
            };
            let batch = self.pull(class, &ctx).await?;
            items.extend(batch.items());
            if batch.end_of_sequence() {
                return Ok(items);
            }
            context = batch.enumeration_context().map(str::to_string);
        }

        Err(WsmanError::Parse(format!(
            "enumeration of {} did not finish after {} pulls",
            class, MAX_PULLS
        )))
    }
}
