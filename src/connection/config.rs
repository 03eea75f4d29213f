//! Connection configuration
//!
//! Device address, credentials, TLS options and the timing knobs of the
//! session queue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::ConnectError;
use crate::auth::KERBEROS_USER;

/// AMT WSMAN port without TLS.
pub const AMT_HTTP_PORT: u16 = 16992;

/// AMT WSMAN port with TLS.
pub const AMT_HTTPS_PORT: u16 = 16993;

/// Default TCP/TLS connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;

/// How bytes reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Plain TCP or TLS socket to the device.
    #[default]
    Direct,
    /// Tunneled channel over a CIRA connection initiated by the device.
    Cira,
    /// Tunneled channel through an APF relay.
    ApfRelay,
}

impl TransportMode {
    /// Tunneled transports never get a TLS trust evaluation.
    pub fn is_relay(&self) -> bool {
        !matches!(self, TransportMode::Direct)
    }
}

/// TLS trust material.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsOptions {
    /// PEM files with trusted CA certificates.
    #[serde(default)]
    pub ca_certificates: Vec<PathBuf>,

    /// PEM client certificate chain for mutual TLS.
    #[serde(default)]
    pub client_certificate: Option<PathBuf>,

    /// PEM private key matching `client_certificate`.
    #[serde(default)]
    pub client_key: Option<PathBuf>,

    /// Pinned SHA-384 fingerprint of the device certificate (hex, colons
    /// optional).
    #[serde(default)]
    pub fingerprint: Option<String>,

    /// Name to verify the certificate against when it differs from `host`.
    #[serde(default)]
    pub server_name: Option<String>,
}

impl TlsOptions {
    pub fn has_ca(&self) -> bool {
        !self.ca_certificates.is_empty()
    }

    pub fn has_pin(&self) -> bool {
        self.fingerprint
            .as_deref()
            .is_some_and(|fp| !fp.trim().is_empty())
    }
}

/// Timing and budget knobs for the session queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTuning {
    /// Calls dispatched on the link at once.
    #[serde(default = "default_max_active")]
    pub max_active: usize,

    /// Attempts per call before it fails with 408.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before resubmitting after a dropped link.
    #[serde(default = "default_retry_delay")]
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Ready link with no traffic for this long is treated as closed.
    #[serde(default = "default_idle_timeout")]
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Consecutive 401 responses answered with a fresh challenge.
    #[serde(default = "default_auth_retries")]
    pub auth_retries: u32,
}

fn default_max_active() -> usize {
    1
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(6)
}

fn default_auth_retries() -> u32 {
    3
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(DEFAULT_CONNECT_TIMEOUT)
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            max_active: default_max_active(),
            max_attempts: default_max_attempts(),
            retry_delay: default_retry_delay(),
            idle_timeout: default_idle_timeout(),
            auth_retries: default_auth_retries(),
        }
    }
}

impl SessionTuning {
    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_auth_retries(mut self, retries: u32) -> Self {
        self.auth_retries = retries;
        self
    }
}

/// Everything needed to reach and authenticate against one device.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,

    /// Defaults to 16993 with TLS, 16992 without.
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub tls: bool,

    #[serde(default)]
    pub tls_options: TlsOptions,

    #[serde(default)]
    pub transport: TransportMode,

    /// Digest realm the device must present.
    #[serde(default)]
    pub expected_realm: Option<String>,

    #[serde(default = "default_connect_timeout")]
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(default)]
    pub tuning: SessionTuning,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port())
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .field("tls_options", &self.tls_options)
            .field("transport", &self.transport)
            .field("expected_realm", &self.expected_realm)
            .field("connect_timeout", &self.connect_timeout)
            .field("tuning", &self.tuning)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            username: "admin".to_string(),
            password: String::new(),
            tls: false,
            tls_options: TlsOptions::default(),
            transport: TransportMode::Direct,
            expected_realm: None,
            connect_timeout: default_connect_timeout(),
            tuning: SessionTuning::default(),
        }
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConnectError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ConnectError::InvalidConfig(format!("Failed to read config file: {}", e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConnectError> {
        toml::from_str(content)
            .map_err(|e| ConnectError::InvalidConfig(format!("Failed to parse config: {}", e)))
    }

    /// Port actually used.
    pub fn port(&self) -> u16 {
        self.port
            .unwrap_or(if self.tls { AMT_HTTPS_PORT } else { AMT_HTTP_PORT })
    }

    /// `host:port` as sent in the `Host` header.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port())
        } else {
            format!("{}:{}", self.host, self.port())
        }
    }

    /// Kerberos is selected by the `*` username.
    pub fn uses_kerberos(&self) -> bool {
        self.username == KERBEROS_USER
    }

    /// TLS applies only to direct links.
    pub fn uses_tls(&self) -> bool {
        self.tls && !self.transport.is_relay()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_tls_options(mut self, options: TlsOptions) -> Self {
        self.tls_options = options;
        self
    }

    pub fn with_transport(mut self, transport: TransportMode) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_expected_realm(mut self, realm: impl Into<String>) -> Self {
        self.expected_realm = Some(realm.into());
        self
    }

    pub fn with_tuning(mut self, tuning: SessionTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Check the configuration before a session is started.
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.host.trim().is_empty() {
            return Err(ConnectError::InvalidConfig("host must not be empty".into()));
        }
        if self.port == Some(0) {
            return Err(ConnectError::InvalidConfig("port must not be zero".into()));
        }
        if self.username.is_empty() {
            return Err(ConnectError::InvalidConfig("username must not be empty".into()));
        }
        if self.tuning.max_active == 0 {
            return Err(ConnectError::InvalidConfig("max_active must be at least 1".into()));
        }
        if self.tuning.max_attempts == 0 {
            return Err(ConnectError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.tls_options.client_certificate.is_some() != self.tls_options.client_key.is_some() {
            return Err(ConnectError::InvalidConfig(
                "client_certificate and client_key must be set together".into(),
            ));
        }
        Ok(())
    }
}
