//! Envelope - the self-describing container for an encrypted payload.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::TypesError;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size (128 bits = 16 bytes).
pub const TAG_SIZE: usize = 16;

/// Argon2 salt size (128 bits = 16 bytes).
pub const SALT_SIZE: usize = 16;

/// Ceiling on Argon2 memory accepted from an envelope (256 MiB).
const MAX_MEMORY_KIB: u32 = 256 * 1024;

/// Ceiling on Argon2 passes accepted from an envelope.
const MAX_ITERATIONS: u32 = 10;

/// Ceiling on Argon2 lanes accepted from an envelope.
const MAX_PARALLELISM: u32 = 8;

/// Domain label mixed into the associated data of every envelope.
const AAD_LABEL: &[u8] = b"kvdrop-envelope";

/// Password hashing algorithm recorded in [`KdfParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum KdfAlgorithm {
    /// Argon2id, version 0x13
    Argon2id = 1,
}

/// Everything a reader needs to reproduce a password-derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Hashing algorithm
    pub algorithm: KdfAlgorithm,
    /// Random per-secret salt
    pub salt: [u8; SALT_SIZE],
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism (lanes)
    pub parallelism: u32,
}

impl KdfParams {
    /// Whether the cost parameters are within what a reader is willing to spend.
    ///
    /// Envelopes come from an untrusted store, so a reader must refuse
    /// parameters that would make it allocate or hash without bound.
    pub fn is_within_limits(&self) -> bool {
        self.memory_kib > 0
            && self.memory_kib <= MAX_MEMORY_KIB
            && (1..=MAX_ITERATIONS).contains(&self.iterations)
            && (1..=MAX_PARALLELISM).contains(&self.parallelism)
    }

    fn write_aad(&self, out: &mut Vec<u8>) {
        out.push(self.algorithm as u8);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.memory_kib.to_le_bytes());
        out.extend_from_slice(&self.iterations.to_le_bytes());
        out.extend_from_slice(&self.parallelism.to_le_bytes());
    }
}

/// An authenticated-encrypted payload.
///
/// This is what the remote store holds. The store can see the header
/// (version and KDF parameters) but never the plaintext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Format version (currently 1)
    pub version: u8,
    /// Key derivation parameters, present for password-protected payloads
    pub kdf: Option<KdfParams>,
    /// Encryption nonce (24 bytes for XChaCha20)
    pub nonce: [u8; NONCE_SIZE],
    /// Encrypted payload, without the tag
    pub ciphertext: Vec<u8>,
    /// Poly1305 authentication tag
    pub tag: [u8; TAG_SIZE],
}

impl Envelope {
    /// Associated data binding the header to the ciphertext.
    ///
    /// Encryption and decryption must both use this so that a modified
    /// version or KDF header fails authentication.
    pub fn associated_data(version: u8, kdf: Option<&KdfParams>) -> Vec<u8> {
        let mut aad = Vec::with_capacity(AAD_LABEL.len() + 2 + SALT_SIZE + 13);
        aad.extend_from_slice(AAD_LABEL);
        aad.push(version);
        match kdf {
            Some(params) => {
                aad.push(1);
                params.write_aad(&mut aad);
            }
            None => aad.push(0),
        }
        aad
    }

    /// Associated data for this envelope's own header.
    pub fn header_aad(&self) -> Vec<u8> {
        Self::associated_data(self.version, self.kdf.as_ref())
    }

    /// Whether this envelope carries password derivation parameters.
    pub fn is_password_protected(&self) -> bool {
        self.kdf.is_some()
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec(self).map_err(TypesError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        rmp_serde::from_slice(bytes).map_err(TypesError::Deserialization)
    }

    /// Encode as URL-safe base64 text.
    pub fn to_armored(&self) -> Result<String, TypesError> {
        Ok(URL_SAFE_NO_PAD.encode(self.to_bytes()?))
    }

    /// Decode from URL-safe base64 text.
    pub fn from_armored(text: &str) -> Result<Self, TypesError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(text.trim())
            .map_err(|e| TypesError::InvalidArmor(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

// Ciphertext is opaque; keep Debug output short.
impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("version", &self.version)
            .field("kdf", &self.kdf)
            .field("ciphertext", &format!("[{} bytes]", self.ciphertext.len()))
            .finish()
    }
}

/// JSON document shape for storing an envelope in a JSON key-value store.
///
/// Serializes as `{"encrypted": true, "payload": "<base64>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoredEnvelope {
    /// Always true for documents produced by kvdrop
    pub encrypted: bool,
    /// Armored envelope (see [`Envelope::to_armored`])
    pub payload: String,
}

impl ArmoredEnvelope {
    /// Wrap an envelope.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, TypesError> {
        Ok(Self {
            encrypted: true,
            payload: envelope.to_armored()?,
        })
    }

    /// Unwrap the envelope, rejecting documents not marked as encrypted.
    pub fn to_envelope(&self) -> Result<Envelope, TypesError> {
        if !self.encrypted {
            return Err(TypesError::InvalidArmor("document is not encrypted".into()));
        }
        Envelope::from_armored(&self.payload)
    }
}
