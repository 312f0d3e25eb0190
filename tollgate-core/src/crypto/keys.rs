//! API key material and password digests.

use argon2::{
    Argon2, PasswordHasher, PasswordVerifier,
    password_hash::{PasswordHash, SaltString, rand_core::OsRng},
};
use rand::Rng;

use super::CryptoError;

/// A freshly generated API key.
///
/// `full_key` is returned to the caller exactly once; only `prefix` and
/// `hash` are ever persisted.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// The plaintext key, `sk-<name>-<32 hex chars>`
    pub full_key: String,
    /// Publicly displayable prefix, `sk-<name>`
    pub prefix: String,
    /// Argon2id digest of the full key
    pub hash: String,
}

/// Draw a new API key for `name` and digest it.
pub fn generate_api_key(name: &str) -> Result<GeneratedKey, CryptoError> {
    let random_bytes: [u8; 16] = rand::thread_rng().gen();
    let prefix = format!("sk-{}", name);
    let full_key = format!("{}-{}", prefix, hex::encode(random_bytes));
    let hash = hash_password(&full_key)?;

    Ok(GeneratedKey {
        full_key,
        prefix,
        hash,
    })
}

/// Verify a presented key against a stored argon2id digest.
///
/// Argon2 verification is constant-time with respect to the digest.
pub fn verify_api_key(full_key: &str, hash: &str) -> bool {
    verify_password(full_key, hash)
}

/// Extract the lookup prefix from a bearer key: everything up to the
/// second hyphen (`sk-alice-91ff…` → `sk-alice`).
///
/// Returns `None` for keys that do not have the expected shape.
pub fn key_prefix(bearer: &str) -> Option<&str> {
    let rest = bearer.strip_prefix("sk-")?;
    let second = rest.find('-')?;
    if second == 0 || rest.len() == second + 1 {
        return None;
    }
    Some(&bearer[..3 + second])
}

/// Compute an argon2id digest with a fresh salt.
pub fn hash_password(secret: &str) -> Result<String, CryptoError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CryptoError::Digest(e.to_string()))
}

/// Verify a secret against a stored argon2id digest.
pub fn verify_password(secret: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_shape() {
        let key = generate_api_key("alice").unwrap();

        assert_eq!(key.prefix, "sk-alice");
        assert!(key.full_key.starts_with("sk-alice-"));
        // prefix + hyphen + 32 hex chars
        assert_eq!(key.full_key.len(), key.prefix.len() + 1 + 32);
        assert!(key.hash.starts_with("$argon2"));
    }

    #[test]
    fn test_generated_key_verifies() {
        let key = generate_api_key("alice").unwrap();

        assert!(verify_api_key(&key.full_key, &key.hash));
        assert!(!verify_api_key("sk-alice-0000000000000000", &key.hash));
    }

    #[test]
    fn test_two_keys_differ() {
        let a = generate_api_key("alice").unwrap();
        let b = generate_api_key("alice").unwrap();

        assert_ne!(a.full_key, b.full_key);
        assert_ne!(a.hash, b.hash);
        assert_eq!(a.prefix, b.prefix);
    }

    #[test]
    fn test_key_prefix_extraction() {
        assert_eq!(
            key_prefix("sk-alice-91ff36cd91ff36cd91ff36cd91ff36cd"),
            Some("sk-alice")
        );
        assert_eq!(key_prefix("sk-bob_2-abcd"), Some("sk-bob_2"));
        assert_eq!(key_prefix("sk-alice"), None);
        assert_eq!(key_prefix("sk--abcd"), None);
        assert_eq!(key_prefix("sk-alice-"), None);
        assert_eq!(key_prefix("Bearer nonsense"), None);
        assert_eq!(key_prefix(""), None);
    }

    #[test]
    fn test_password_digest_roundtrip() {
        let hash = hash_password("correct horse").unwrap();

        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-digest"));
    }
}
