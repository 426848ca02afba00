//! Cryptographic primitives for kvdrop.
//!
//! This module provides:
//! - Device-adaptive Argon2id key derivation (12-64 MiB based on RAM)
//! - XChaCha20-Poly1305 envelopes with 192-bit nonces
//! - [`Cipher`], which seals and opens envelopes for one protection mode
//!
//! # Security Notes
//!
//! - XChaCha20 uses 192-bit nonces (24 bytes), safe for random generation
//! - Every password-protected secret gets its own random 16-byte salt
//! - The AEAD key is expanded from the master key via HKDF-SHA256
//! - Wrong passwords and tampered envelopes produce the same error

mod cipher;
mod kdf;

pub use cipher::{open, open_bytes, seal, Cipher};
pub use kdf::{derive, derive_from_params, detect_available_ram_mb, Argon2Params};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Key size for XChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed: wrong key or password, tampered or malformed envelope.
    ///
    /// No details are provided so that callers cannot tell the causes apart.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Invalid key encoding or length.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// The operating system random source is unavailable.
    #[error("random source unavailable: {0}")]
    RandomUnavailable(String),
}

/// A 256-bit master key.
///
/// Either produced by Argon2id from a password or generated at random.
/// Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    /// Generate a random key.
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_SIZE];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| CryptoError::RandomUnavailable(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Create a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Encode as URL-safe base64 for out-of-band transfer.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(URL_SAFE_NO_PAD.encode(self.0))
    }

    /// Decode a key previously produced by [`SecretKey::to_base64`].
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let decoded = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(text.trim())
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?,
        );
        let bytes: [u8; KEY_SIZE] = decoded.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                decoded.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

// Don't leak secret in debug output
impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// A user-supplied password. Zeroed on drop.
#[derive(Clone)]
pub struct Password(Zeroizing<String>);

impl Password {
    /// Wrap a password.
    pub fn new(password: impl Into<String>) -> Self {
        Self(Zeroizing::new(password.into()))
    }

    /// Get the password bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Password([REDACTED])")
    }
}

/// How a secret is protected.
#[derive(Debug, Clone)]
pub enum Protection {
    /// A random key is generated; it must travel out-of-band.
    NoPassword,
    /// The key is derived from a password with Argon2id.
    Password(Password),
}
