//! Non-sensitive process settings from environment variables.

use std::env;
use std::path::PathBuf;

/// Process-scoped settings with platform defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Data directory holding the store, lock file, and sidecar state
    pub data_dir: PathBuf,
    /// SQLite database file path
    pub database_path: PathBuf,
    /// Path (or bare name resolved via PATH) of the sidecar binary
    pub sidecar_binary: String,
    /// Loopback management URL of the sidecar
    pub management_url: String,
    /// Host the HTTP server binds to
    pub host: String,
    /// Port the HTTP server binds to
    pub port: u16,
}

/// Errors that can occur when resolving settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Platform data directory not found; set TOLLGATE_DATA_DIR")]
    NoDataDir,

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}

impl Settings {
    /// Resolve settings from environment variables and platform defaults.
    pub fn from_env() -> Result<Self, SettingsError> {
        let data_dir = match env::var("TOLLGATE_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::data_dir()
                .ok_or(SettingsError::NoDataDir)?
                .join("tollgate"),
        };

        let database_path = env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("tollgate.db"));

        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| SettingsError::InvalidValue {
                var: "PORT".to_string(),
                value: raw,
            })?,
            Err(_) => 3000,
        };

        Ok(Self {
            data_dir,
            database_path,
            sidecar_binary: env::var("SIDECAR_BINARY_PATH")
                .unwrap_or_else(|_| "cliproxyapi".to_string()),
            management_url: env::var("SIDECAR_MANAGEMENT_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8317".to_string()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
        })
    }

    /// Path of the generated sidecar YAML config.
    pub fn sidecar_config_path(&self) -> PathBuf {
        self.data_dir.join("sidecar-config.yaml")
    }

    /// Directory the sidecar keeps its own state in.
    ///
    /// The server owns placement only; it never interprets the contents.
    pub fn sidecar_state_dir(&self) -> PathBuf {
        self.data_dir.join("sidecar")
    }
}
