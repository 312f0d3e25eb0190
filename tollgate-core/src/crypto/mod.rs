//! Cryptographic primitives: credential sealing and API key material.
//!
//! Two concerns live here and nowhere else:
//! - [`TokenCipher`] seals provider credential JSON with AES-256-GCM.
//!   Only this module ever sees the plaintext.
//! - API keys of the form `sk-<name>-<32 hex chars>` are generated,
//!   digested with argon2id, and verified in constant time.

mod cipher;
mod keys;

pub use cipher::TokenCipher;
pub use keys::{
    GeneratedKey, generate_api_key, hash_password, key_prefix, verify_api_key, verify_password,
};

/// Errors from sealing, opening, or key digest operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The configured key is not 32 bytes of hex or base64
    #[error("encryption key must be a 32-byte key encoded as hex (64 chars) or base64 (44 chars)")]
    InvalidKey,

    /// Encryption failed (should not happen with a valid key)
    #[error("failed to seal credentials: {0}")]
    Seal(String),

    /// Ciphertext rejected: wrong key, truncation, or tampering.
    ///
    /// Fatal for the affected row; the caller surfaces it upstream and
    /// never re-keys silently.
    #[error("credential blob rejected: wrong key or corrupted data")]
    Unsealable,

    /// Password hashing failed
    #[error("failed to compute digest: {0}")]
    Digest(String),
}
