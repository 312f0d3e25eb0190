//! AES-256-GCM sealing for provider credential blobs.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;

use super::CryptoError;

const NONCE_SIZE: usize = 12;

/// Authenticated symmetric cipher over credential JSON.
///
/// Constructed once at startup from the configured key and read-only
/// afterwards. Each ciphertext carries a fresh random nonce, so sealing
/// the same plaintext twice yields different blobs.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher")
    }
}

fn decode_key(key_str: &str) -> Result<[u8; 32], CryptoError> {
    if let Ok(bytes) = hex::decode(key_str) {
        if bytes.len() == 32 {
            let mut key = [0u8; 32];
            key.copy_from_slice(&bytes);
            return Ok(key);
        }
    }

    if let Ok(bytes) = BASE64.decode(key_str) {
        if bytes.len() == 32 {
            let mut key = [0u8; 32];
            key.copy_from_slice(&bytes);
            return Ok(key);
        }
    }

    Err(CryptoError::InvalidKey)
}

impl TokenCipher {
    /// Build a cipher from a 32-byte key encoded as hex or base64.
    pub fn from_key_str(key_str: &str) -> Result<Self, CryptoError> {
        let key = decode_key(key_str)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { cipher })
    }

    /// Seal a credential document. Output is `base64(nonce || ciphertext)`.
    pub fn seal(&self, tokens: &serde_json::Value) -> Result<String, CryptoError> {
        let plaintext = serde_json::to_vec(tokens).map_err(|e| CryptoError::Seal(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|e| CryptoError::Seal(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(combined))
    }

    /// Open a sealed credential document.
    ///
    /// Any tampering, truncation, or key mismatch yields
    /// [`CryptoError::Unsealable`], never partial plaintext.
    pub fn open(&self, sealed: &str) -> Result<serde_json::Value, CryptoError> {
        let combined = BASE64.decode(sealed).map_err(|_| CryptoError::Unsealable)?;

        if combined.len() < NONCE_SIZE {
            return Err(CryptoError::Unsealable);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Unsealable)?;

        serde_json::from_slice(&plaintext).map_err(|_| CryptoError::Unsealable)
    }
}
