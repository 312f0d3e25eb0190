//! Configuration management for tollgate.
//!
//! Configuration is split between secrets (environment variables only,
//! never written to disk) and settings (environment variables with
//! defaults derived from the platform data directory).
//!
//! # Secrets
//! - `ADMIN_PASSWORD` - initial admin password, consumed on first run only
//! - `TOLLGATE_ENCRYPTION_KEY` - 32-byte symmetric key, hex or base64
//!
//! # Settings
//! - `TOLLGATE_DATA_DIR` - data directory (default: platform data dir)
//! - `DATABASE_PATH` - SQLite file (default: `<data_dir>/tollgate.db`)
//! - `SIDECAR_BINARY_PATH` - sidecar executable (default: `cliproxyapi`)
//! - `SIDECAR_MANAGEMENT_URL` - loopback management endpoint
//! - `PORT` - admin/gateway listen port (default: 3000)

mod secrets;
mod settings;

pub use secrets::{Secrets, SecretsError};
pub use settings::{Settings, SettingsError};

/// Combined process configuration.
///
/// Runtime-tunable values (proxy port, model mappings, rate limits) live
/// in the settings table of the store instead; this struct only carries
/// what must be known before the store is open.
#[derive(Debug, Clone)]
pub struct Config {
    /// Secrets loaded from environment variables
    pub secrets: Secrets,
    /// Settings loaded from environment variables with defaults
    pub settings: Settings,
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Secrets error: {0}")]
    Secrets(#[from] SecretsError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the encryption key is missing or the data
    /// directory cannot be determined.
    pub fn load() -> Result<Self, ConfigError> {
        let secrets = Secrets::from_env()?;
        let settings = Settings::from_env()?;
        Ok(Self { secrets, settings })
    }

    /// Address the HTTP server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }
}
