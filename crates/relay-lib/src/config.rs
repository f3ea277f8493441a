// ============================
// relay-lib/src/config.rs
// ============================
//! Configuration management for the relay server.
//!
//! Settings are loaded in three layers, later layers taking precedence:
//! 1. Built-in defaults
//! 2. `config/default.toml` (optional)
//! 3. `APP_`-prefixed environment variables
//!
//! Two deployment environment variables sit outside the `APP_` scheme and
//! are applied on top: `PORT` (free-tier hosts inject it) and
//! `RENDER_EXTERNAL_URL` (enables the keep-alive self-ping).

use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub relay: RelaySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory holding the local snapshot file
    pub data_path: PathBuf,
    /// Directory holding uploaded files
    pub uploads_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelaySettings {
    /// How many historical messages `room-joined` ships (must be >= 100)
    pub history_limit: usize,
    /// Quiet window of the snapshot coalescer, in milliseconds
    pub coalesce_window_ms: u64,
    /// Cadence of the keep-alive self-ping, in seconds
    pub keepalive_interval_secs: u64,
}

impl Settings {
    /// Load configuration from defaults, file and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/default")
    }

    /// Load configuration with an explicit file path
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let mut settings: Settings = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()?;

        // Hosting platforms inject PORT directly
        if let Ok(port) = std::env::var("PORT") {
            settings.server.port = port
                .parse()
                .map_err(|_| ConfigError::Message(format!("invalid PORT value: {port}")))?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// The external URL used by the keep-alive probe, if deployed behind one
    pub fn external_url() -> Option<String> {
        std::env::var("RENDER_EXTERNAL_URL").ok().filter(|u| !u.is_empty())
    }

    /// Raw service-account JSON selecting the cloud persistence variant
    pub fn service_account_json() -> Option<String> {
        std::env::var("FIREBASE_SERVICE_ACCOUNT").ok().filter(|v| !v.is_empty())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.history_limit < 100 {
            return Err(ConfigError::Message(
                "relay.history_limit must be at least 100".to_string(),
            ));
        }
        if self.relay.coalesce_window_ms == 0 {
            return Err(ConfigError::Message(
                "relay.coalesce_window_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageSettings {
                data_path: PathBuf::from("data"),
                uploads_path: PathBuf::from("uploads"),
            },
            relay: RelaySettings {
                history_limit: 100,
                coalesce_window_ms: 2000,
                keepalive_interval_secs: 300,
            },
        }
    }
}
