//! Password-based key derivation.

use argon2::{Algorithm, Argon2, Params, Version};
use kvdrop_types::{KdfAlgorithm, KdfParams, SALT_SIZE};

use super::{CryptoError, Password, Protection, SecretKey, KEY_SIZE};

/// Argon2id parameters for device-adaptive key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

impl Argon2Params {
    /// Create parameters based on available RAM in MB.
    ///
    /// Scaling:
    /// - < 2000 MB: 12 MiB, 3 iterations (low-end mobile)
    /// - < 4000 MB: 19 MiB, 2 iterations (mid-range mobile)
    /// - < 8000 MB: 46 MiB, 1 iteration (high-end mobile)
    /// - >= 8000 MB: 64 MiB, 3 iterations (desktop)
    pub fn for_ram_mb(ram_mb: u64) -> Self {
        let (memory_mib, iterations, parallelism) = if ram_mb < 2000 {
            (12, 3, 1)
        } else if ram_mb < 4000 {
            (19, 2, 1)
        } else if ram_mb < 8000 {
            (46, 1, 1)
        } else {
            (64, 3, 4)
        };
        Self {
            memory_kib: memory_mib * 1024,
            iterations,
            parallelism,
        }
    }

    /// Explicit parameters.
    ///
    /// Values the argon2 crate rejects surface as
    /// [`CryptoError::KeyDerivationFailed`] at derivation time.
    pub fn custom(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }

    /// Get memory in MiB.
    pub fn memory_mib(&self) -> u32 {
        self.memory_kib / 1024
    }

    /// Get memory in KiB.
    pub fn memory_kib(&self) -> u32 {
        self.memory_kib
    }

    /// Get iteration count.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Get lane count.
    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    /// Record these parameters with a salt, for storage in an envelope.
    pub fn with_salt(&self, salt: [u8; SALT_SIZE]) -> KdfParams {
        KdfParams {
            algorithm: KdfAlgorithm::Argon2id,
            salt,
            memory_kib: self.memory_kib,
            iterations: self.iterations,
            parallelism: self.parallelism,
        }
    }

    fn from_kdf(params: &KdfParams) -> Self {
        Self::custom(params.memory_kib, params.iterations, params.parallelism)
    }

    /// Convert to argon2 Params.
    fn to_argon2_params(self) -> Result<Params, CryptoError> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))
    }
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self::for_ram_mb(detect_available_ram_mb())
    }
}

/// Detect available RAM in megabytes.
pub fn detect_available_ram_mb() -> u64 {
    use sysinfo::System;
    let sys = System::new_all();
    sys.total_memory() / (1024 * 1024) // Convert bytes to MB
}

/// Derive a master key.
///
/// - `NoPassword`: a random key and no parameters; `salt` is ignored.
/// - `Password`: Argon2id over the password. A fresh random salt is drawn
///   unless `salt` is given (to reproduce an earlier key).
pub fn derive(
    protection: &Protection,
    salt: Option<[u8; SALT_SIZE]>,
    params: Argon2Params,
) -> Result<(SecretKey, Option<KdfParams>), CryptoError> {
    match protection {
        Protection::NoPassword => Ok((SecretKey::random()?, None)),
        Protection::Password(password) => {
            let salt = match salt {
                Some(salt) => salt,
                None => random_salt()?,
            };
            let kdf = params.with_salt(salt);
            let key = hash_password(password, &kdf.salt, params)?;
            Ok((key, Some(kdf)))
        }
    }
}

/// Reproduce a password-derived key from the parameters stored in an envelope.
///
/// Parameters outside the accepted limits are reported as
/// [`CryptoError::AuthenticationFailed`], the same as a wrong password.
pub fn derive_from_params(password: &Password, kdf: &KdfParams) -> Result<SecretKey, CryptoError> {
    if !kdf.is_within_limits() {
        return Err(CryptoError::AuthenticationFailed);
    }
    match kdf.algorithm {
        KdfAlgorithm::Argon2id => hash_password(password, &kdf.salt, Argon2Params::from_kdf(kdf))
            .map_err(|_| CryptoError::AuthenticationFailed),
    }
}

fn hash_password(
    password: &Password,
    salt: &[u8],
    params: Argon2Params,
) -> Result<SecretKey, CryptoError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2_params()?);

    let mut output = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    let key = SecretKey::from_bytes(output);
    zeroize::Zeroize::zeroize(&mut output);
    Ok(key)
}

fn random_salt() -> Result<[u8; SALT_SIZE], CryptoError> {
    let mut salt = [0u8; SALT_SIZE];
    getrandom::getrandom(&mut salt).map_err(|e| CryptoError::RandomUnavailable(e.to_string()))?;
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast() -> Argon2Params {
        Argon2Params::custom(1024, 1, 1)
    }

    fn password(pw: &str) -> Protection {
        Protection::Password(Password::new(pw))
    }

    // ===========================================
    // Argon2 Parameter Tests
    // ===========================================

    #[test]
    fn argon2_parameters_scale_with_ram() {
        // Low-end mobile: 12 MiB
        let params_low = Argon2Params::for_ram_mb(1500);
        assert_eq!(params_low.memory_mib(), 12);
        assert_eq!(params_low.iterations(), 3);

        // Mid-range mobile: 19 MiB
        let params_mid = Argon2Params::for_ram_mb(3000);
        assert_eq!(params_mid.memory_mib(), 19);
        assert_eq!(params_mid.iterations(), 2);

        // High-end mobile: 46 MiB
        let params_high = Argon2Params::for_ram_mb(6000);
        assert_eq!(params_high.memory_mib(), 46);
        assert_eq!(params_high.iterations(), 1);

        // Desktop: 64 MiB
        let params_desktop = Argon2Params::for_ram_mb(16000);
        assert_eq!(params_desktop.memory_mib(), 64);
        assert_eq!(params_desktop.iterations(), 3);
    }

    #[test]
    fn password_derivation_takes_measurable_time() {
        // Use low-end params for faster test
        let params = Argon2Params::for_ram_mb(1500);

        let start = std::time::Instant::now();
        let (key, kdf) = derive(&password("my-secure-passphrase"), None, params).unwrap();
        let elapsed = start.elapsed();

        assert_eq!(key.as_bytes().len(), KEY_SIZE);
        assert_eq!(kdf.unwrap().memory_kib, 12 * 1024);
        assert!(
            elapsed >= Duration::from_millis(5),
            "Argon2 was too fast: {:?}",
            elapsed
        );
        assert!(elapsed <= Duration::from_secs(10));
    }

    // ===========================================
    // Derivation Tests
    // ===========================================

    #[test]
    fn same_password_and_salt_is_deterministic() {
        let salt = [0x11; SALT_SIZE];
        let (k1, p1) = derive(&password("same"), Some(salt), fast()).unwrap();
        let (k2, p2) = derive(&password("same"), Some(salt), fast()).unwrap();

        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_eq!(p1, p2);
    }

    #[test]
    fn different_salts_give_different_keys() {
        let (k1, p1) = derive(&password("same"), None, fast()).unwrap();
        let (k2, p2) = derive(&password("same"), None, fast()).unwrap();

        assert_ne!(p1.unwrap().salt, p2.unwrap().salt);
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn different_passwords_give_different_keys() {
        let salt = [0x22; SALT_SIZE];
        let (k1, _) = derive(&password("passphrase-1"), Some(salt), fast()).unwrap();
        let (k2, _) = derive(&password("passphrase-2"), Some(salt), fast()).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn no_password_yields_random_key_without_params() {
        let (k1, p1) = derive(&Protection::NoPassword, None, fast()).unwrap();
        let (k2, _) = derive(&Protection::NoPassword, Some([0; SALT_SIZE]), fast()).unwrap();

        assert!(p1.is_none());
        assert_eq!(k1.as_bytes().len(), KEY_SIZE);
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn reproduce_from_stored_params() {
        let pw = Password::new("reproduce-me");
        let (key, kdf) = derive(&Protection::Password(pw.clone()), None, fast()).unwrap();

        let again = derive_from_params(&pw, &kdf.unwrap()).unwrap();
        assert_eq!(key.as_bytes(), again.as_bytes());
    }

    #[test]
    fn hostile_params_are_an_authentication_failure() {
        let pw = Password::new("pw");
        let mut kdf = fast().with_salt([0; SALT_SIZE]);
        kdf.memory_kib = u32::MAX;

        let result = derive_from_params(&pw, &kdf);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn invalid_custom_params_fail_derivation() {
        let result = derive(&password("pw"), None, Argon2Params::custom(1, 1, 1));
        assert!(matches!(result, Err(CryptoError::KeyDerivationFailed(_))));
    }

    // ===========================================
    // System Detection Test
    // ===========================================

    #[test]
    fn detect_ram_returns_reasonable_value() {
        let ram_mb = detect_available_ram_mb();
        // Should be at least 512 MB on any modern system
        assert!(ram_mb >= 512, "Detected RAM: {} MB", ram_mb);
        // Should be less than 1 TB (sanity check)
        assert!(ram_mb < 1024 * 1024, "Detected RAM: {} MB", ram_mb);
    }
}
