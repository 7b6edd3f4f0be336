//! Password encoding and constant-time comparison
//!
//! - [`Argon2PasswordEncoder`] - PHC-format Argon2id hashes with a random salt
//! - [`NoopPasswordEncoder`] - plain text, for tests and demos only
//! - [`DelegatingPasswordEncoder`] - picks an encoder from an `{id}` prefix so
//!   stored hashes can migrate between algorithms
//!
//! Token-style secrets (CSRF tokens, API keys) are compared with
//! [`constant_time_eq`], which hashes both sides with BLAKE3 before a
//! `subtle` comparison so timing is independent of content and length.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::AuthenticationError;

/// Encodes raw passwords and verifies them against stored encodings
pub trait PasswordEncoder: Send + Sync {
    /// Encode a raw password for storage
    ///
    /// # Errors
    ///
    /// Returns [`AuthenticationError::InternalService`] if the encoder fails
    /// (e.g. no randomness available for the salt).
    fn encode(&self, raw: &str) -> Result<String, AuthenticationError>;

    /// Whether `raw` matches the stored encoding
    fn matches(&self, raw: &str, encoded: &str) -> bool;

    /// Whether the stored encoding should be re-encoded
    fn upgrade_encoding(&self, _encoded: &str) -> bool {
        false
    }
}

/// Constant-time equality for secrets of arbitrary length
#[inline]
pub fn constant_time_eq(provided: &str, expected: &str) -> bool {
    let provided: [u8; 32] = blake3::hash(provided.as_bytes()).into();
    let expected: [u8; 32] = blake3::hash(expected.as_bytes()).into();
    provided.ct_eq(&expected).into()
}

/// Argon2id encoder producing PHC strings
#[derive(Debug, Clone, Default)]
pub struct Argon2PasswordEncoder;

impl Argon2PasswordEncoder {
    /// Create an encoder with default Argon2 parameters
    pub fn new() -> Self {
        Self
    }
}

impl PasswordEncoder for Argon2PasswordEncoder {
    fn encode(&self, raw: &str) -> Result<String, AuthenticationError> {
        let mut salt_bytes = [0u8; 16];
        getrandom::getrandom(&mut salt_bytes)
            .map_err(|e| AuthenticationError::InternalService(e.to_string()))?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AuthenticationError::InternalService(e.to_string()))?;
        let hash = Argon2::default()
            .hash_password(raw.as_bytes(), &salt)
            .map_err(|e| AuthenticationError::InternalService(e.to_string()))?;
        Ok(hash.to_string())
    }

    fn matches(&self, raw: &str, encoded: &str) -> bool {
        match PasswordHash::new(encoded) {
            Ok(parsed) => Argon2::default()
                .verify_password(raw.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                warn!(error = %e, "Stored password is not a valid PHC string");
                false
            }
        }
    }
}

/// Plain-text encoder; never use outside tests
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPasswordEncoder;

impl PasswordEncoder for NoopPasswordEncoder {
    fn encode(&self, raw: &str) -> Result<String, AuthenticationError> {
        Ok(raw.to_string())
    }

    fn matches(&self, raw: &str, encoded: &str) -> bool {
        constant_time_eq(raw, encoded)
    }
}

/// Dispatches on an `{id}` prefix of the stored encoding
///
/// New passwords are encoded with the default id. Stored values without a
/// recognised prefix never match.
#[derive(Clone)]
pub struct DelegatingPasswordEncoder {
    encoding_id: String,
    encoders: HashMap<String, Arc<dyn PasswordEncoder>>,
}

impl std::fmt::Debug for DelegatingPasswordEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.encoders.keys().collect();
        ids.sort();
        f.debug_struct("DelegatingPasswordEncoder")
            .field("encoding_id", &self.encoding_id)
            .field("encoders", &ids)
            .finish()
    }
}

impl Default for DelegatingPasswordEncoder {
    fn default() -> Self {
        Self::new("argon2", Arc::new(Argon2PasswordEncoder))
            .with_encoder("noop", Arc::new(NoopPasswordEncoder))
    }
}

impl DelegatingPasswordEncoder {
    /// Create with the encoder used for new passwords
    pub fn new(encoding_id: impl Into<String>, encoder: Arc<dyn PasswordEncoder>) -> Self {
        let encoding_id = encoding_id.into();
        let mut encoders: HashMap<String, Arc<dyn PasswordEncoder>> = HashMap::new();
        encoders.insert(encoding_id.clone(), encoder);
        Self {
            encoding_id,
            encoders,
        }
    }

    /// Register an additional encoder for verification
    pub fn with_encoder(mut self, id: impl Into<String>, encoder: Arc<dyn PasswordEncoder>) -> Self {
        self.encoders.insert(id.into(), encoder);
        self
    }

    fn split(encoded: &str) -> Option<(&str, &str)> {
        let rest = encoded.strip_prefix('{')?;
        let end = rest.find('}')?;
        Some((&rest[..end], &rest[end + 1..]))
    }
}

impl PasswordEncoder for DelegatingPasswordEncoder {
    fn encode(&self, raw: &str) -> Result<String, AuthenticationError> {
        let encoder = self.encoders.get(&self.encoding_id).ok_or_else(|| {
            AuthenticationError::InternalService(format!(
                "no password encoder registered for id {}",
                self.encoding_id
            ))
        })?;
        Ok(format!("{{{}}}{}", self.encoding_id, encoder.encode(raw)?))
    }

    fn matches(&self, raw: &str, encoded: &str) -> bool {
        let Some((id, hash)) = Self::split(encoded) else {
            warn!("Stored password has no encoder id prefix");
            return false;
        };
        match self.encoders.get(id) {
            Some(encoder) => encoder.matches(raw, hash),
            None => {
                warn!(encoder_id = id, "No password encoder registered for id");
                false
            }
        }
    }

    fn upgrade_encoding(&self, encoded: &str) -> bool {
        match Self::split(encoded) {
            Some((id, hash)) if id == self.encoding_id => self
                .encoders
                .get(id)
                .is_some_and(|e| e.upgrade_encoding(hash)),
            _ => true,
        }
    }
}
