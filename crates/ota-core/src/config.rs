//! Update client configuration
//!
//! Loaded from a TOML file by the daemon; all fields have defaults so a
//! partial file (or none at all) still yields a usable configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ContextError;

/// Configuration for the update client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaConfig {
    /// Base URL of the deployment server
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Directory holding the state store, device_type file and update
    /// modules
    #[serde(default = "default_data_store_dir")]
    pub data_store_dir: PathBuf,
    /// Wall-clock budget for a single update-module invocation, in seconds
    #[serde(default = "default_module_timeout")]
    pub module_timeout_seconds: u64,
    /// Interval between deployment polls, in seconds
    #[serde(default = "default_poll_interval")]
    pub update_poll_interval_seconds: u64,
    /// TLS credentials, passed through to the HTTP client
    #[serde(default)]
    pub tls: TlsConfig,
}

/// TLS credential paths. Opaque to the core; consumed by the transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Server CA certificate to trust
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_certificate_path: Option<PathBuf>,
    /// Client certificate for mutual TLS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate_path: Option<PathBuf>,
    /// Private key matching the client certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key_path: Option<PathBuf>,
}

fn default_server_url() -> String {
    "https://updates.example.com".to_string()
}

fn default_data_store_dir() -> PathBuf {
    PathBuf::from("/var/lib/otad")
}

fn default_module_timeout() -> u64 {
    900
}

fn default_poll_interval() -> u64 {
    1800
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            data_store_dir: default_data_store_dir(),
            module_timeout_seconds: default_module_timeout(),
            update_poll_interval_seconds: default_poll_interval(),
            tls: TlsConfig::default(),
        }
    }
}

impl OtaConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ContextError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ContextError::Config(e.to_string()))
    }

    /// Path of the device_type file.
    pub fn device_type_path(&self) -> PathBuf {
        self.data_store_dir.join("device_type")
    }

    /// Path of the state store database.
    pub fn store_path(&self) -> PathBuf {
        self.data_store_dir.join("ota-store.db")
    }

    /// Directory scanned for update-module executables.
    pub fn modules_path(&self) -> PathBuf {
        self.data_store_dir.join("modules").join("v3")
    }

    /// Scratch directory for per-install module work dirs.
    pub fn modules_work_path(&self) -> PathBuf {
        self.data_store_dir.join("modules-work")
    }
}
