//! Secrets configuration loaded from environment variables only.
//!
//! These are sensitive values that should never be written to files or
//! committed to version control.

use std::env;

/// Secrets loaded exclusively from environment variables.
#[derive(Debug, Clone)]
pub struct Secrets {
    /// Initial admin password (env: ADMIN_PASSWORD).
    ///
    /// Only consulted when no admin digest exists in the store yet; on
    /// subsequent runs the variable is ignored.
    pub admin_password: Option<String>,

    /// Symmetric key for sealing provider credentials
    /// (env: TOLLGATE_ENCRYPTION_KEY, 32 bytes as hex or base64).
    ///
    /// Changing this key after first run makes every stored provider
    /// credential unreadable. There is no in-place rotation.
    pub encryption_key: String,
}

/// Errors that can occur when loading secrets
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("Missing required secret: {0}")]
    MissingSecret(String),
}

impl Secrets {
    /// Load secrets from environment variables.
    ///
    /// Also loads a .env file if present (development convenience);
    /// production should rely on actual environment variables.
    pub fn from_env() -> Result<Self, SecretsError> {
        let _ = dotenvy::dotenv();
        Self::from_env_inner()
    }

    pub(crate) fn from_env_inner() -> Result<Self, SecretsError> {
        let encryption_key = env::var("TOLLGATE_ENCRYPTION_KEY")
            .map_err(|_| SecretsError::MissingSecret("TOLLGATE_ENCRYPTION_KEY".to_string()))?;

        Ok(Self {
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            encryption_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        unsafe {
            env::remove_var("ADMIN_PASSWORD");
            env::remove_var("TOLLGATE_ENCRYPTION_KEY");
        }
    }

    #[test]
    fn test_missing_encryption_key_is_an_error() {
        let _lock = crate::ENV_MUTEX.lock().unwrap();
        clear_env();

        let result = Secrets::from_env_inner();
        assert!(result.is_err());
    }

    #[test]
    fn test_secrets_from_env() {
        let _lock = crate::ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("TOLLGATE_ENCRYPTION_KEY", "a".repeat(64));
            env::set_var("ADMIN_PASSWORD", "hunter2");
        }

        let secrets = Secrets::from_env_inner().unwrap();
        assert_eq!(secrets.encryption_key.len(), 64);
        assert_eq!(secrets.admin_password.as_deref(), Some("hunter2"));

        clear_env();
    }
}
