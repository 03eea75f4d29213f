//! # amtwsman - Intel AMT WS-Management client
//!
//! amtwsman talks to the WS-Management endpoint of Intel AMT firmware over a
//! hand-rolled HTTP/1.1 transport. One session per device serializes calls,
//! retries transport failures, answers Digest (or Kerberos) challenges and
//! evaluates TLS trust.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         WsmanStack (wsman)                          │
//! │          Get / Put / Enumerate / Pull / Exec / Subscribe            │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │  AjaxRequest + callback
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     AmtConnection (session actor)                   │
//! │      priority queue, retry timer, 401 handling, cancel_all          │
//! └─────────────────────────────────────────────────────────────────────┘
//!          │                         │                         │
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │   HTTP framer   │   │   Digest / Kerberos │   │ Connector + Channel │
//! │     (http)      │   │       (auth)        │   │  TCP, TLS, relay    │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use amtwsman::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let conn = AmtConnection::builder("10.0.0.21")
//!         .credentials("admin", "P@ssw0rd")
//!         .tls(true)
//!         .spawn()?;
//!
//!     let wsman = WsmanStack::new(conn);
//!     let settings = wsman.get("AMT_GeneralSettings", &[]).await?;
//!     println!("{}", settings.body);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::auth::{DigestChallenge, DigestState, TicketProvider};
    pub use crate::config::Config;
    pub use crate::connection::{
        Channel, ConnectError, ConnectionConfig, Connector, DirectConnector, RelayConnector,
        SessionTuning, TlsOptions, TransportMode, TrustLevel,
    };
    pub use crate::error::{Error, Result};
    pub use crate::interceptor::HttpInterceptor;
    pub use crate::session::{
        status, AjaxRequest, AjaxResponse, AmtConnection, ConnectionInfo, Priority, ReplyKind,
    };
    pub use crate::wsman::{WsmanError, WsmanResponse, WsmanStack};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases.
pub mod error;

/// MD5 primitives, HTTP Digest authentication and the Kerberos seam.
pub mod auth;

/// Incremental HTTP/1.1 parsing and serialization.
pub mod http;

// ============================================================================
// Transport
// ============================================================================

/// Link establishment: configuration, TCP/TLS and relay channels, TLS trust.
pub mod connection;

/// The per-device session: request queue, retries and authentication.
pub mod session;

/// Digest credential rewriting for proxied web sessions.
pub mod interceptor;

// ============================================================================
// Protocol
// ============================================================================

/// WS-Management envelopes and response parsing.
pub mod wsman;

// ============================================================================
// Configuration and Observability
// ============================================================================

/// Device profile files.
pub mod config;

/// Logging setup.
pub mod telemetry;

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of amtwsman.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
