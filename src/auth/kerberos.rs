//! Kerberos ticket capability.
//!
//! Acquiring a ticket is platform specific (and, on some hosts, purges the
//! OS ticket cache as a side effect), so the session core only talks to a
//! [`TicketProvider`]. Hosts without Kerberos simply don't supply one.

use async_trait::async_trait;
use thiserror::Error;

/// Username sentinel that selects Kerberos instead of Digest.
pub const KERBEROS_USER: &str = "*";

/// Errors from a ticket provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KerberosError {
    #[error("Kerberos is not available on this host")]
    Unavailable,

    #[error("Failed to acquire ticket for '{spn}': {message}")]
    AcquireFailed { spn: String, message: String },
}

/// Source of base64-encoded SPNEGO tokens.
#[async_trait]
pub trait TicketProvider: Send + Sync {
    /// Whether this host can produce tickets at all.
    fn is_available(&self) -> bool;

    /// Fetch a base64 ticket for `spn` (e.g. `HTTP/amt.example.com`).
    async fn acquire_ticket(&self, spn: &str) -> Result<String, KerberosError>;

    /// Drop tickets cached by the platform.
    async fn purge_cached_tickets(&self) -> Result<(), KerberosError> {
        Ok(())
    }
}

/// Service principal for a device host name.
pub fn service_principal(host: &str) -> String {
    format!("HTTP/{}", host)
}

/// `Authorization` header value for a ticket.
pub fn negotiate_header(ticket: &str) -> String {
    format!("Negotiate {}", ticket)
}

/// Provider returning a fixed ticket. Useful for tests and for hosts where
/// the ticket is obtained out of band.
#[derive(Debug, Clone)]
pub struct StaticTicketProvider {
    ticket: Option<String>,
}

impl StaticTicketProvider {
    pub fn new(ticket: impl Into<String>) -> Self {
        Self {
            ticket: Some(ticket.into()),
        }
    }

    /// A provider that reports Kerberos as unavailable.
    pub fn unavailable() -> Self {
        Self { ticket: None }
    }
}

#[async_trait]
impl TicketProvider for StaticTicketProvider {
    fn is_available(&self) -> bool {
        self.ticket.is_some()
    }

    async fn acquire_ticket(&self, _spn: &str) -> Result<String, KerberosError> {
        self.ticket.clone().ok_or(KerberosError::Unavailable)
    }
}
