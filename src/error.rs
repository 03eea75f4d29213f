//! Error types for amtwsman.
//!
//! Runtime failures of individual WSMAN calls never surface here; they are
//! delivered through the per-call reply as a status code (see
//! [`crate::session::status`]). This type covers construction-time and
//! configuration problems, plus the typed errors of each layer so callers
//! can use `?` across them.

use std::path::PathBuf;
use thiserror::Error;

use crate::connection::ConnectError;
use crate::http::FramingError;
use crate::wsman::WsmanError;

/// Result type alias for amtwsman operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for amtwsman.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration is invalid or incomplete.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Failed to read or parse a configuration file.
    #[error("Failed to load configuration from '{path}': {message}")]
    ConfigLoad {
        /// Path to the configuration file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Named device profile does not exist.
    #[error("Profile '{0}' not found in configuration")]
    ProfileNotFound(String),

    // ========================================================================
    // Layer Errors
    // ========================================================================
    /// Failed to establish a link to the device.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// HTTP framing error.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// WSMAN call failed.
    #[error(transparent)]
    Wsman(#[from] WsmanError),

    /// The session task has shut down.
    #[error("Session closed")]
    SessionClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Check whether the error is caused by invalid user input rather than
    /// the device or the network.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::ConfigLoad { .. } | Error::ProfileNotFound(_)
        )
    }
}
