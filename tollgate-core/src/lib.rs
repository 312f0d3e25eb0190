//! tollgate-core: process configuration and cryptographic primitives.
//!
//! This crate provides:
//! - Configuration loading (env secrets + derived paths and ports)
//! - Authenticated encryption for provider credential blobs
//! - API key generation, hashing, and verification

pub mod config;
pub mod crypto;

// Re-export commonly used types
pub use config::{Config, ConfigError, Secrets, Settings};
pub use crypto::{
    CryptoError, GeneratedKey, TokenCipher, generate_api_key, hash_password, key_prefix,
    verify_api_key, verify_password,
};

#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
