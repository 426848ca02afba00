//! Envelope sealing and opening (XChaCha20-Poly1305).

use std::collections::HashMap;
use std::sync::Mutex;

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    Tag, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use kvdrop_types::{Envelope, KdfParams, Token, ENVELOPE_VERSION, NONCE_SIZE, TAG_SIZE};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use super::kdf::{derive, derive_from_params, Argon2Params};
use super::{CryptoError, Password, Protection, SecretKey, KEY_SIZE};

/// Expand the AEAD key from a master key.
fn aead_key(master: &SecretKey) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(b"kvdrop-envelope-key-v1"), master.as_bytes());
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(b"envelope-encryption", &mut key[..])
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(key)
}

/// Encrypt `plaintext` into a new envelope.
///
/// Draws a fresh random 192-bit nonce on every call; fails rather than
/// encrypting if the random source is unavailable. `kdf` is recorded in the
/// envelope header and authenticated along with the ciphertext.
pub fn seal(
    plaintext: &[u8],
    key: &SecretKey,
    kdf: Option<KdfParams>,
) -> Result<Envelope, CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce).map_err(|e| CryptoError::RandomUnavailable(e.to_string()))?;

    let subkey = aead_key(key)?;
    let cipher = XChaCha20Poly1305::new_from_slice(&subkey[..])
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let aad = Envelope::associated_data(ENVELOPE_VERSION, kdf.as_ref());

    let mut buffer = plaintext.to_vec();
    let tag = match cipher.encrypt_in_place_detached(XNonce::from_slice(&nonce), &aad, &mut buffer)
    {
        Ok(tag) => tag,
        Err(_) => {
            buffer.zeroize();
            return Err(CryptoError::EncryptionFailed("aead encrypt failed".into()));
        }
    };

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(Envelope {
        version: ENVELOPE_VERSION,
        kdf,
        nonce,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Decrypt an envelope.
///
/// Fails closed: any version mismatch, out-of-range KDF header, tag
/// mismatch or modified byte yields [`CryptoError::AuthenticationFailed`]
/// and no plaintext.
pub fn open(envelope: &Envelope, key: &SecretKey) -> Result<Vec<u8>, CryptoError> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(CryptoError::AuthenticationFailed);
    }
    if let Some(kdf) = &envelope.kdf {
        if !kdf.is_within_limits() {
            return Err(CryptoError::AuthenticationFailed);
        }
    }

    let subkey = aead_key(key)?;
    let cipher = XChaCha20Poly1305::new_from_slice(&subkey[..])
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    let aad = envelope.header_aad();

    let mut buffer = envelope.ciphertext.clone();
    match cipher.decrypt_in_place_detached(
        XNonce::from_slice(&envelope.nonce),
        &aad,
        &mut buffer,
        Tag::from_slice(&envelope.tag),
    ) {
        Ok(()) => Ok(buffer),
        Err(_) => {
            buffer.zeroize();
            Err(CryptoError::AuthenticationFailed)
        }
    }
}

/// Decode and decrypt a serialized envelope.
///
/// Undecodable or truncated bytes are an authentication failure.
pub fn open_bytes(bytes: &[u8], key: &SecretKey) -> Result<Vec<u8>, CryptoError> {
    let envelope = Envelope::from_bytes(bytes).map_err(|_| CryptoError::AuthenticationFailed)?;
    open(&envelope, key)
}

fn fresh_password_key(
    password: &Password,
    params: Argon2Params,
) -> Result<(KdfParams, SecretKey), CryptoError> {
    let (key, kdf) = derive(&Protection::Password(password.clone()), None, params)?;
    let kdf = kdf.ok_or_else(|| {
        CryptoError::KeyDerivationFailed("password derivation returned no params".into())
    })?;
    Ok((kdf, key))
}

enum KeyMode {
    Key(SecretKey),
    Password {
        password: Password,
        params: Argon2Params,
    },
}

/// Seals and opens envelopes for one protection mode.
///
/// A password cipher draws a fresh salt for every new secret. Re-sealing
/// under the same token with [`Cipher::seal_for`] reuses that token's key,
/// so a monitor pushing every few seconds does not rerun Argon2 on every
/// tick. Nonces are always fresh.
///
/// Keys derived while opening live in a separate cache that is only filled
/// after an envelope authenticates; they are never used for sealing.
pub struct Cipher {
    mode: KeyMode,
    sealing: Mutex<HashMap<Token, (KdfParams, SecretKey)>>,
    opened: Mutex<Option<(KdfParams, SecretKey)>>,
}

impl Cipher {
    /// Create a cipher for the given protection with device-adaptive Argon2 cost.
    ///
    /// `NoPassword` generates a random key; fetch it with
    /// [`Cipher::shared_key`] to hand to the reader.
    pub fn new(protection: Protection) -> Result<Self, CryptoError> {
        Self::with_params(protection, Argon2Params::default())
    }

    /// Create a cipher with explicit Argon2 cost.
    pub fn with_params(protection: Protection, params: Argon2Params) -> Result<Self, CryptoError> {
        match protection {
            Protection::NoPassword => Ok(Self::from_key(SecretKey::random()?)),
            Protection::Password(password) => Ok(Self::from_password(password, params)),
        }
    }

    /// Create a cipher around an existing key.
    pub fn from_key(key: SecretKey) -> Self {
        Self::with_mode(KeyMode::Key(key))
    }

    /// Create a password cipher. Nothing is derived until first use.
    pub fn from_password(password: Password, params: Argon2Params) -> Self {
        Self::with_mode(KeyMode::Password { password, params })
    }

    fn with_mode(mode: KeyMode) -> Self {
        Self {
            mode,
            sealing: Mutex::new(HashMap::new()),
            opened: Mutex::new(None),
        }
    }

    /// The raw key, for ciphers that are not password based.
    pub fn shared_key(&self) -> Option<&SecretKey> {
        match &self.mode {
            KeyMode::Key(key) => Some(key),
            KeyMode::Password { .. } => None,
        }
    }

    /// Whether this cipher derives keys from a password.
    pub fn is_password_based(&self) -> bool {
        matches!(self.mode, KeyMode::Password { .. })
    }

    /// Encrypt into a new envelope.
    ///
    /// A password cipher derives a new key under a fresh salt on every call.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
        match &self.mode {
            KeyMode::Key(key) => seal(plaintext, key, None),
            KeyMode::Password { password, params } => {
                let (kdf, key) = fresh_password_key(password, *params)?;
                seal(plaintext, &key, Some(kdf))
            }
        }
    }

    /// Encrypt a new value for the record under `token`.
    ///
    /// A password cipher derives a key for `token` on first use and reuses
    /// it (salt included) for later values under the same token.
    pub fn seal_for(&self, token: &Token, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
        match &self.mode {
            KeyMode::Key(key) => seal(plaintext, key, None),
            KeyMode::Password { password, params } => {
                let mut sealing = self.sealing.lock().unwrap_or_else(|e| e.into_inner());
                if !sealing.contains_key(token) {
                    let derived = fresh_password_key(password, *params)?;
                    sealing.insert(token.clone(), derived);
                }
                match sealing.get(token) {
                    Some((kdf, key)) => seal(plaintext, key, Some(*kdf)),
                    None => Err(CryptoError::KeyDerivationFailed("no sealing key".into())),
                }
            }
        }
    }

    /// Decrypt an envelope.
    ///
    /// A password cipher derives the key from the envelope's own KDF header.
    /// The last key that opened an envelope is remembered, so repeated reads
    /// of the same record skip Argon2. A cache miss runs Argon2 synchronously
    /// at the header's cost, capped by [`KdfParams::is_within_limits`].
    pub fn open(&self, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
        match &self.mode {
            KeyMode::Key(key) => open(envelope, key),
            KeyMode::Password { password, .. } => {
                let kdf = envelope.kdf.ok_or(CryptoError::AuthenticationFailed)?;
                {
                    let opened = self.opened.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some((params, key)) = opened.as_ref() {
                        if *params == kdf {
                            return open(envelope, key);
                        }
                    }
                }

                let key = derive_from_params(password, &kdf)?;
                let plaintext = open(envelope, &key)?;
                *self.opened.lock().unwrap_or_else(|e| e.into_inner()) = Some((kdf, key));
                Ok(plaintext)
            }
        }
    }

    /// Decode and decrypt a serialized envelope.
    pub fn open_bytes(&self, bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let envelope =
            Envelope::from_bytes(bytes).map_err(|_| CryptoError::AuthenticationFailed)?;
        self.open(&envelope)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.mode {
            KeyMode::Key(_) => "key",
            KeyMode::Password { .. } => "password",
        };
        f.debug_struct("Cipher")
            .field("mode", &mode)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> Argon2Params {
        Argon2Params::custom(1024, 1, 1)
    }

    fn key() -> SecretKey {
        SecretKey::random().unwrap()
    }

    // ===========================================
    // XChaCha20-Poly1305 Tests (192-bit nonces)
    // ===========================================

    #[test]
    fn seal_open_roundtrip() {
        let key = key();
        let plaintext = b"Hello, drop world!";

        let envelope = seal(plaintext, &key, None).unwrap();
        assert_eq!(envelope.nonce.len(), 24, "Must use 192-bit nonces for XChaCha20");
        assert_eq!(envelope.ciphertext.len(), plaintext.len());

        let opened = open(&envelope, &key).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn random_nonces_never_repeat() {
        let key = key();
        let plaintext = b"Same message";

        let e1 = seal(plaintext, &key, None).unwrap();
        let e2 = seal(plaintext, &key, None).unwrap();

        assert_ne!(e1.nonce, e2.nonce);
        assert_ne!(e1.ciphertext, e2.ciphertext);
        assert_eq!(open(&e1, &key).unwrap(), plaintext);
        assert_eq!(open(&e2, &key).unwrap(), plaintext);
    }

    #[test]
    fn ciphertext_does_not_contain_plaintext() {
        let key = key();
        let plaintext = b"sk_live_1234567890abcdef";
        let envelope = seal(plaintext, &key, None).unwrap();
        let bytes = envelope.to_bytes().unwrap();
        assert!(!bytes
            .windows(plaintext.len())
            .any(|w| w == plaintext.as_slice()));
    }

    #[test]
    fn wrong_key_fails() {
        let envelope = seal(b"Secret message", &key(), None).unwrap();
        let result = open(&envelope, &key());
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn every_bit_flip_is_detected() {
        let key = key();
        let envelope = seal(b"tamper target", &key, None).unwrap();

        for byte in 0..envelope.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = envelope.clone();
                tampered.ciphertext[byte] ^= 1 << bit;
                assert!(matches!(
                    open(&tampered, &key),
                    Err(CryptoError::AuthenticationFailed)
                ));
            }
        }
        for byte in 0..TAG_SIZE {
            for bit in 0..8 {
                let mut tampered = envelope.clone();
                tampered.tag[byte] ^= 1 << bit;
                assert!(matches!(
                    open(&tampered, &key),
                    Err(CryptoError::AuthenticationFailed)
                ));
            }
        }
    }

    #[test]
    fn header_tampering_is_detected() {
        let key = key();
        let mut envelope = seal(b"header bound", &key, None).unwrap();
        envelope.kdf = Some(fast().with_salt([1; 16]));
        assert!(matches!(
            open(&envelope, &key),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let key = key();
        let mut envelope = seal(b"v1", &key, None).unwrap();
        envelope.version = 2;
        assert!(matches!(
            open(&envelope, &key),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let key = key();
        let bytes = seal(b"truncate me", &key, None)
            .unwrap()
            .to_bytes()
            .unwrap();
        for len in [0, 1, bytes.len() / 2, bytes.len() - 1] {
            assert!(matches!(
                open_bytes(&bytes[..len], &key),
                Err(CryptoError::AuthenticationFailed)
            ));
        }
    }

    #[test]
    fn empty_and_large_plaintexts() {
        let key = key();
        assert_eq!(open(&seal(b"", &key, None).unwrap(), &key).unwrap(), b"");

        let large = vec![0x42u8; 1024 * 1024];
        assert_eq!(open(&seal(&large, &key, None).unwrap(), &key).unwrap(), large);
    }

    // ===========================================
    // Cipher Tests
    // ===========================================

    #[test]
    fn no_password_cipher_exposes_shared_key() {
        let writer = Cipher::with_params(Protection::NoPassword, fast()).unwrap();
        let envelope = writer.seal(b"out of band").unwrap();
        assert!(envelope.kdf.is_none());

        let exported = writer.shared_key().unwrap().to_base64();
        let reader = Cipher::from_key(SecretKey::from_base64(&exported).unwrap());
        assert_eq!(reader.open(&envelope).unwrap(), b"out of band");
    }

    #[test]
    fn password_cipher_roundtrip_with_fresh_reader() {
        let writer = Cipher::from_password(Password::new("correct horse"), fast());
        let envelope = writer.seal(b"protected").unwrap();
        assert!(envelope.is_password_protected());
        assert!(writer.shared_key().is_none());

        let reader = Cipher::from_password(Password::new("correct horse"), fast());
        assert_eq!(reader.open(&envelope).unwrap(), b"protected");
    }

    #[test]
    fn separately_sealed_secrets_use_distinct_salts() {
        let writer = Cipher::from_password(Password::new("pw"), fast());
        let e1 = writer.seal(b"one").unwrap();
        let e2 = writer.seal(b"two").unwrap();

        assert_ne!(e1.kdf.unwrap().salt, e2.kdf.unwrap().salt);
        assert_ne!(e1.nonce, e2.nonce);
    }

    #[test]
    fn same_token_reseal_reuses_salt_with_fresh_nonce() {
        let writer = Cipher::from_password(Password::new("pw"), fast());
        let token = Token::new("office-ip").unwrap();
        let other = Token::new("home-ip").unwrap();

        let e1 = writer.seal_for(&token, b"one").unwrap();
        let e2 = writer.seal_for(&token, b"two").unwrap();
        let e3 = writer.seal_for(&other, b"one").unwrap();

        assert_eq!(e1.kdf, e2.kdf);
        assert_ne!(e1.nonce, e2.nonce);
        assert_ne!(e1.kdf.unwrap().salt, e3.kdf.unwrap().salt);

        let reader = Cipher::from_password(Password::new("pw"), fast());
        assert_eq!(reader.open(&e2).unwrap(), b"two");
    }

    #[test]
    fn failed_open_leaves_sealing_params_alone() {
        let cipher = Cipher::from_password(Password::new("pw"), fast());
        let token = Token::new("porch-sensor").unwrap();
        let before = cipher.seal_for(&token, b"before").unwrap();

        let weak = KdfParams {
            memory_kib: 8,
            ..fast().with_salt([0xAA; 16])
        };
        let hostile = seal(b"forged", &key(), Some(weak)).unwrap();
        assert!(matches!(
            cipher.open(&hostile),
            Err(CryptoError::AuthenticationFailed)
        ));

        let after = cipher.seal_for(&token, b"after").unwrap();
        assert_eq!(after.kdf, before.kdf);

        let fresh = cipher.seal(b"fresh").unwrap().kdf.unwrap();
        assert_ne!(fresh.salt, [0xAA; 16]);
        assert_eq!(fresh.memory_kib, 1024);

        assert_eq!(cipher.open(&after).unwrap(), b"after");
    }

    #[test]
    fn costly_header_is_refused_before_derivation() {
        let reader = Cipher::from_password(Password::new("pw"), fast());
        let costly = KdfParams {
            memory_kib: u32::MAX,
            iterations: u32::MAX,
            ..fast().with_salt([7; 16])
        };
        let envelope = seal(b"slow", &key(), Some(costly)).unwrap();

        let start = std::time::Instant::now();
        assert!(matches!(
            reader.open(&envelope),
            Err(CryptoError::AuthenticationFailed)
        ));
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn separate_writers_use_separate_salts() {
        let a = Cipher::from_password(Password::new("pw"), fast());
        let b = Cipher::from_password(Password::new("pw"), fast());
        let ea = a.seal(b"x").unwrap();
        let eb = b.seal(b"x").unwrap();
        assert_ne!(ea.kdf.unwrap().salt, eb.kdf.unwrap().salt);
    }

    #[test]
    fn wrong_password_matches_tamper_error() {
        let writer = Cipher::from_password(Password::new("right"), fast());
        let envelope = writer.seal(b"secret").unwrap();

        let wrong = Cipher::from_password(Password::new("wrong"), fast());
        let wrong_err = wrong.open(&envelope).unwrap_err();

        let mut tampered = envelope.clone();
        tampered.ciphertext[0] ^= 0x01;
        let tamper_err = writer.open(&tampered).unwrap_err();

        assert_eq!(wrong_err.to_string(), tamper_err.to_string());
        assert!(matches!(wrong_err, CryptoError::AuthenticationFailed));
        assert!(matches!(tamper_err, CryptoError::AuthenticationFailed));
    }

    #[test]
    fn password_cipher_rejects_keyed_envelope() {
        let keyed = seal(b"no kdf", &key(), None).unwrap();
        let reader = Cipher::from_password(Password::new("pw"), fast());
        assert!(matches!(
            reader.open(&keyed),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn cipher_debug_is_redacted() {
        let cipher = Cipher::from_key(key());
        assert!(format!("{:?}", cipher).contains("REDACTED"));
    }
}
