//! Profile configuration for amtwsman
//!
//! A config file holds named device profiles, each a full
//! [`ConnectionConfig`]:
//!
//! ```toml
//! default_profile = "lab-01"
//!
//! [profiles.lab-01]
//! host = "10.0.0.21"
//! username = "admin"
//! password = "P@ssw0rd"
//! tls = true
//!
//! [profiles.lab-01.tuning]
//! retry_delay = "750ms"
//! ```
//!
//! Files are looked up in this order:
//! - An explicit `--config` path
//! - `$AMTWSMAN_CONFIG`
//! - `<config dir>/amtwsman/config.toml`
//! - `./amtwsman.toml`

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::connection::ConnectionConfig;
use crate::error::{Error, Result};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "AMTWSMAN_CONFIG";

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    /// Device profiles by name.
    pub profiles: IndexMap<String, ConnectionConfig>,
}

impl Config {
    /// Load from `explicit`, or from the first standard location that
    /// exists. Missing files yield an empty configuration.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::search_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => Self::from_file(path),
            None => {
                debug!("no configuration file found");
                Ok(Self::default())
            }
        }
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            paths.push(PathBuf::from(env_path));
        }
        if let Some(path) = default_path() {
            paths.push(path);
        }
        paths.push(PathBuf::from("amtwsman.toml"));
        paths
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        debug!(path = %path.display(), profiles = config.profiles.len(), "loaded configuration");
        Ok(config)
    }

    /// Parse TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Result<&ConnectionConfig> {
        self.profiles
            .get(name)
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))
    }

    /// Resolve `name`, falling back to `default_profile`. `Ok(None)` when
    /// neither is set.
    pub fn select(&self, name: Option<&str>) -> Result<Option<&ConnectionConfig>> {
        match name.or(self.default_profile.as_deref()) {
            Some(name) => self.profile(name).map(Some),
            None => Ok(None),
        }
    }

    /// Profile names in file order.
    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}

/// `<config dir>/amtwsman/config.toml`, when the platform has a config dir.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("amtwsman").join("config.toml"))
}
