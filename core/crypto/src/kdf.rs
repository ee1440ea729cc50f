//! Password key derivation.
//!
//! Argon2id is the primary algorithm: memory-hard, resistant to both GPU
//! and time-memory trade-off attacks. PBKDF2-HMAC-SHA512 is available as a
//! fallback for deployments that cannot afford Argon2's memory cost.
//!
//! Cost parameters are fixed when a `PasswordHasher` is built, never per
//! call, so a stored credential always verifies with the parameters that
//! produced it.

use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use sealcore_common::{Error, Result};
use crate::config::CryptoConfig;
use crate::keys::{MasterKey, KEY_LENGTH};
use crate::memory::constant_time_compare;
use crate::random::RandomSource;

/// Salt length for password credentials (128-bit).
pub const SALT_LENGTH: usize = 16;

/// Length of the derived password hash (256-bit).
pub const HASH_LENGTH: usize = 32;

/// Encoded credential length: salt || hash.
pub const CREDENTIAL_LENGTH: usize = SALT_LENGTH + HASH_LENGTH;

/// Lowest accepted PBKDF2 iteration count.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// Default PBKDF2 iteration count.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 210_000;

/// Longest PBKDF2 output (one SHA-512 block).
pub const MAX_PBKDF2_OUTPUT: usize = 64;

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Cost used for stored password credentials: 64 MiB, one pass, four lanes.
    pub fn service() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 1,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for constrained hosts.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    fn argon2(&self, output_len: usize) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(output_len),
        )
        .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::service()
    }
}

/// Which derivation backs a `PasswordHasher`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordAlgorithm {
    /// Argon2id with `KdfParams`.
    #[default]
    Argon2id,
    /// PBKDF2-HMAC-SHA512 with a fixed iteration count.
    Pbkdf2Sha512,
}

/// Salt for key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt([u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate(random: &RandomSource) -> Result<Self> {
        Ok(Self(random.array()?))
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

/// Derive a master key from a password and salt using Argon2id.
///
/// # Preconditions
/// - `params` must have valid Argon2id parameters
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - Returns error if Argon2id parameters are invalid
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<MasterKey> {
    let mut key_bytes = Zeroizing::new([0u8; KEY_LENGTH]);
    params
        .argon2(KEY_LENGTH)?
        .hash_password_into(password, salt.as_bytes(), &mut key_bytes[..])
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(MasterKey::from_bytes(*key_bytes))
}

/// Derive `output.len()` bytes with PBKDF2-HMAC-SHA512.
///
/// # Errors
/// - `InvalidInput` if `iterations` is below MIN_PBKDF2_ITERATIONS
/// - `InvalidInput` if `output` is empty or longer than MAX_PBKDF2_OUTPUT
pub fn derive_key_pbkdf2(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    output: &mut [u8],
) -> Result<()> {
    if iterations < MIN_PBKDF2_ITERATIONS {
        return Err(Error::InvalidInput(format!(
            "PBKDF2 requires at least {} iterations, got {}",
            MIN_PBKDF2_ITERATIONS, iterations
        )));
    }
    if output.is_empty() || output.len() > MAX_PBKDF2_OUTPUT {
        return Err(Error::InvalidInput(format!(
            "PBKDF2 output must be 1..={} bytes, got {}",
            MAX_PBKDF2_OUTPUT,
            output.len()
        )));
    }

    pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, iterations, output);
    Ok(())
}

/// Stored password verifier: salt || hash.
///
/// Created once when a credential is set, read-only afterwards, and only
/// ever compared, never reversed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedCredential {
    salt: [u8; SALT_LENGTH],
    hash: [u8; HASH_LENGTH],
}

impl DerivedCredential {
    /// Get the salt.
    pub fn salt(&self) -> Salt {
        Salt(self.salt)
    }

    /// Get the derived hash.
    pub fn hash(&self) -> &[u8; HASH_LENGTH] {
        &self.hash
    }

    /// Serialize as salt || hash.
    pub fn to_bytes(&self) -> Zeroizing<[u8; CREDENTIAL_LENGTH]> {
        let mut out = Zeroizing::new([0u8; CREDENTIAL_LENGTH]);
        out[..SALT_LENGTH].copy_from_slice(&self.salt);
        out[SALT_LENGTH..].copy_from_slice(&self.hash);
        out
    }

    /// Parse salt || hash.
    ///
    /// # Errors
    /// - `InvalidInput` unless `bytes` is exactly CREDENTIAL_LENGTH long
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CREDENTIAL_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Credential must be {} bytes, got {}",
                CREDENTIAL_LENGTH,
                bytes.len()
            )));
        }

        let mut credential = Self {
            salt: [0u8; SALT_LENGTH],
            hash: [0u8; HASH_LENGTH],
        };
        credential.salt.copy_from_slice(&bytes[..SALT_LENGTH]);
        credential.hash.copy_from_slice(&bytes[SALT_LENGTH..]);
        Ok(credential)
    }

    /// Encode as standard base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.to_bytes()[..])
    }

    /// Decode from standard base64.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|_| Error::InvalidInput("Credential is not valid base64".to_string()))?,
        );
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for DerivedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedCredential([REDACTED])")
    }
}

/// Hashes and verifies passwords with parameters fixed at construction.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    algorithm: PasswordAlgorithm,
    params: KdfParams,
    pbkdf2_iterations: u32,
}

impl PasswordHasher {
    /// Argon2id hasher with the given costs.
    pub fn argon2id(params: KdfParams) -> Self {
        Self {
            algorithm: PasswordAlgorithm::Argon2id,
            params,
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }

    /// PBKDF2-HMAC-SHA512 hasher.
    ///
    /// # Errors
    /// - `InvalidInput` if `iterations` is below MIN_PBKDF2_ITERATIONS
    pub fn pbkdf2(iterations: u32) -> Result<Self> {
        if iterations < MIN_PBKDF2_ITERATIONS {
            return Err(Error::InvalidInput(format!(
                "PBKDF2 requires at least {} iterations, got {}",
                MIN_PBKDF2_ITERATIONS, iterations
            )));
        }

        Ok(Self {
            algorithm: PasswordAlgorithm::Pbkdf2Sha512,
            params: KdfParams::default(),
            pbkdf2_iterations: iterations,
        })
    }

    /// Hasher selected by `config.password_algorithm`.
    ///
    /// # Errors
    /// - `InvalidInput` if PBKDF2 is selected with too few iterations
    pub fn from_config(config: &CryptoConfig) -> Result<Self> {
        match config.password_algorithm {
            PasswordAlgorithm::Argon2id => Ok(Self::argon2id(config.kdf)),
            PasswordAlgorithm::Pbkdf2Sha512 => Self::pbkdf2(config.pbkdf2_iterations),
        }
    }

    /// Algorithm in use.
    pub fn algorithm(&self) -> PasswordAlgorithm {
        self.algorithm
    }

    /// Hash `password` under a fresh salt from the system random source.
    ///
    /// Every byte string is a valid password, including the empty one.
    ///
    /// # Errors
    /// - `EntropyUnavailable` if no salt could be drawn
    pub fn hash_password(&self, password: &[u8]) -> Result<DerivedCredential> {
        self.hash_password_with(password, &RandomSource::system())
    }

    /// Hash `password` under a fresh salt drawn from `random`.
    pub fn hash_password_with(
        &self,
        password: &[u8],
        random: &RandomSource,
    ) -> Result<DerivedCredential> {
        let salt = Salt::generate(random)?;
        let hash = self.compute(password, &salt)?;

        Ok(DerivedCredential {
            salt: salt.0,
            hash: *hash,
        })
    }

    /// Check `password` against a stored credential.
    ///
    /// Recomputes the hash with the stored salt and compares in constant time.
    /// Any failure to recompute verifies as `false`.
    pub fn verify_password(&self, password: &[u8], credential: &DerivedCredential) -> bool {
        match self.compute(password, &credential.salt()) {
            Ok(computed) => constant_time_compare(&computed[..], credential.hash()),
            Err(_) => false,
        }
    }

    /// Check `password` against an encoded salt || hash; malformed input verifies as `false`.
    pub fn verify_encoded(&self, password: &[u8], stored: &[u8]) -> bool {
        DerivedCredential::from_bytes(stored)
            .map(|credential| self.verify_password(password, &credential))
            .unwrap_or(false)
    }

    fn compute(&self, password: &[u8], salt: &Salt) -> Result<Zeroizing<[u8; HASH_LENGTH]>> {
        let mut hash = Zeroizing::new([0u8; HASH_LENGTH]);

        match self.algorithm {
            PasswordAlgorithm::Argon2id => self
                .params
                .argon2(HASH_LENGTH)?
                .hash_password_into(password, salt.as_bytes(), &mut hash[..])
                .map_err(|e| Error::Crypto(format!("Password hashing failed: {}", e)))?,
            PasswordAlgorithm::Pbkdf2Sha512 => derive_key_pbkdf2(
                password,
                salt.as_bytes(),
                self.pbkdf2_iterations,
                &mut hash[..],
            )?,
        }

        Ok(hash)
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::argon2id(KdfParams::service())
    }
}

/// Hash `password` with the default Argon2id hasher.
pub fn hash_password(password: &[u8]) -> Result<DerivedCredential> {
    PasswordHasher::default().hash_password(password)
}

/// Verify `password` with the default Argon2id hasher.
pub fn verify_password(password: &[u8], credential: &DerivedCredential) -> bool {
    PasswordHasher::default().verify_password(password, credential)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            memory_cost: 8 * 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_derive_key_deterministic() {
        let password = b"test-password-123";
        let salt = Salt::from_bytes([42u8; SALT_LENGTH]);

        let key1 = derive_key(password, &salt, &fast_params()).unwrap();
        let key2 = derive_key(password, &salt, &fast_params()).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_salt() {
        let password = b"test-password-123";
        let salt1 = Salt::from_bytes([1u8; SALT_LENGTH]);
        let salt2 = Salt::from_bytes([2u8; SALT_LENGTH]);

        let key1 = derive_key(password, &salt1, &fast_params()).unwrap();
        let key2 = derive_key(password, &salt2, &fast_params()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_accepts_empty_password() {
        let salt = Salt::from_bytes([0u8; SALT_LENGTH]);
        let empty = derive_key(b"", &salt, &fast_params()).unwrap();
        let other = derive_key(b"x", &salt, &fast_params()).unwrap();
        assert_ne!(empty.as_bytes(), other.as_bytes());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdfParams {
            memory_cost: 1,
            time_cost: 0,
            parallelism: 0,
        };
        let salt = Salt::from_bytes([0u8; SALT_LENGTH]);
        assert!(matches!(
            derive_key(b"pw", &salt, &params),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_hash_and_verify_password() {
        let hasher = PasswordHasher::argon2id(fast_params());
        let credential = hasher.hash_password(b"secure-password").unwrap();

        assert!(hasher.verify_password(b"secure-password", &credential));
        assert!(!hasher.verify_password(b"wrong-password", &credential));
        assert!(!hasher.verify_password(b"", &credential));

        let empty = hasher.hash_password(b"").unwrap();
        assert!(hasher.verify_password(b"", &empty));
        assert!(!hasher.verify_password(b"secure-password", &empty));
    }

    #[test]
    fn test_same_password_gets_fresh_salt_and_hash() {
        let hasher = PasswordHasher::argon2id(fast_params());
        let a = hasher.hash_password(b"pw").unwrap();
        let b = hasher.hash_password(b"pw").unwrap();

        assert_ne!(a.salt(), b.salt());
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_empty_password_roundtrips() {
        let argon2 = PasswordHasher::argon2id(fast_params());
        let credential = argon2.hash_password(b"").unwrap();
        assert!(argon2.verify_password(b"", &credential));
        assert!(!argon2.verify_password(b"\0", &credential));

        let pbkdf2 = PasswordHasher::pbkdf2(MIN_PBKDF2_ITERATIONS).unwrap();
        let credential = pbkdf2.hash_password(b"").unwrap();
        assert!(pbkdf2.verify_password(b"", &credential));
    }

    #[test]
    fn test_credential_encoding() {
        let hasher = PasswordHasher::argon2id(fast_params());
        let credential = hasher.hash_password(b"pw").unwrap();

        let bytes = credential.to_bytes();
        assert_eq!(bytes.len(), CREDENTIAL_LENGTH);
        assert_eq!(&bytes[..SALT_LENGTH], credential.salt().as_bytes());

        let decoded = DerivedCredential::from_base64(&credential.to_base64()).unwrap();
        assert!(hasher.verify_password(b"pw", &decoded));
        assert!(hasher.verify_encoded(b"pw", &bytes[..]));
    }

    #[test]
    fn test_malformed_credential_verifies_false() {
        let hasher = PasswordHasher::argon2id(fast_params());
        assert!(!hasher.verify_encoded(b"pw", &[0u8; CREDENTIAL_LENGTH - 1]));
        assert!(DerivedCredential::from_base64("%%%").is_err());
    }

    #[test]
    fn test_pbkdf2_bounds() {
        let mut out = [0u8; 32];
        assert!(derive_key_pbkdf2(b"pw", b"salt", MIN_PBKDF2_ITERATIONS - 1, &mut out).is_err());

        let mut too_long = [0u8; MAX_PBKDF2_OUTPUT + 1];
        assert!(derive_key_pbkdf2(b"pw", b"salt", MIN_PBKDF2_ITERATIONS, &mut too_long).is_err());

        assert!(PasswordHasher::pbkdf2(1_000).is_err());
    }

    #[test]
    fn test_pbkdf2_hasher() {
        let hasher = PasswordHasher::pbkdf2(MIN_PBKDF2_ITERATIONS).unwrap();
        assert_eq!(hasher.algorithm(), PasswordAlgorithm::Pbkdf2Sha512);

        let credential = hasher.hash_password(b"fallback-password").unwrap();
        assert!(hasher.verify_password(b"fallback-password", &credential));
        assert!(!hasher.verify_password(b"fallback-passwore", &credential));
    }

    #[test]
    fn test_from_config_selects_algorithm() {
        let config = CryptoConfig {
            kdf: fast_params(),
            ..CryptoConfig::default()
        };
        assert_eq!(
            PasswordHasher::from_config(&config).unwrap().algorithm(),
            PasswordAlgorithm::Argon2id
        );

        let config = CryptoConfig {
            password_algorithm: PasswordAlgorithm::Pbkdf2Sha512,
            pbkdf2_iterations: MIN_PBKDF2_ITERATIONS,
            ..CryptoConfig::default()
        };
        let hasher = PasswordHasher::from_config(&config).unwrap();
        assert_eq!(hasher.algorithm(), PasswordAlgorithm::Pbkdf2Sha512);

        let credential = hasher.hash_password(b"pw").unwrap();
        assert!(hasher.verify_password(b"pw", &credential));

        let config = CryptoConfig {
            password_algorithm: PasswordAlgorithm::Pbkdf2Sha512,
            pbkdf2_iterations: 10,
            ..CryptoConfig::default()
        };
        assert!(matches!(
            PasswordHasher::from_config(&config),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_pbkdf2_deterministic() {
        let mut a = [0u8; MAX_PBKDF2_OUTPUT];
        let mut b = [0u8; MAX_PBKDF2_OUTPUT];
        derive_key_pbkdf2(b"pw", b"0123456789abcdef", MIN_PBKDF2_ITERATIONS, &mut a).unwrap();
        derive_key_pbkdf2(b"pw", b"0123456789abcdef", MIN_PBKDF2_ITERATIONS, &mut b).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, [0u8; MAX_PBKDF2_OUTPUT]);
    }
}
