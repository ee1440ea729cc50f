//! Crypto core configuration.
//!
//! Limits and cost parameters only. Key material is never part of the
//! configuration; it is supplied separately through `MasterKey`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use sealcore_common::{Error, Result};
use crate::aead::{NonceStrategy, DEFAULT_MAX_PLAINTEXT_SIZE};
use crate::kdf::{
    KdfParams, PasswordAlgorithm, DEFAULT_PBKDF2_ITERATIONS, MIN_PBKDF2_ITERATIONS,
};
use crate::memory::MAX_BUFFER_SIZE;
use crate::random::{DEFAULT_RETRIES, MAX_RANDOM_BYTES};

/// Settings applied when a `CryptoContext` is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Largest plaintext accepted by encrypt, in bytes.
    pub max_plaintext_size: usize,
    /// Largest single random_bytes request.
    pub max_random_bytes: usize,
    /// Retries granted to the hardware entropy source.
    pub rng_retries: u32,
    /// Argon2id costs for password hashing.
    pub kdf: KdfParams,
    /// Password hashing algorithm.
    pub password_algorithm: PasswordAlgorithm,
    /// PBKDF2 iterations when `password_algorithm` is PBKDF2.
    pub pbkdf2_iterations: u32,
    /// Nonce construction for encrypt.
    pub nonce_strategy: NonceStrategy,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            max_plaintext_size: DEFAULT_MAX_PLAINTEXT_SIZE,
            max_random_bytes: MAX_RANDOM_BYTES,
            rng_retries: DEFAULT_RETRIES,
            kdf: KdfParams::default(),
            password_algorithm: PasswordAlgorithm::default(),
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            nonce_strategy: NonceStrategy::default(),
        }
    }
}

impl CryptoConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Serialization(format!("Invalid crypto config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Reject limits that are zero or exceed what the primitives support.
    pub fn validate(&self) -> Result<()> {
        if self.max_plaintext_size == 0 || self.max_plaintext_size > MAX_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "max_plaintext_size must be 1..={}",
                MAX_BUFFER_SIZE
            )));
        }
        if self.max_random_bytes == 0 || self.max_random_bytes > MAX_RANDOM_BYTES {
            return Err(Error::Config(format!(
                "max_random_bytes must be 1..={}",
                MAX_RANDOM_BYTES
            )));
        }
        if self.rng_retries == 0 {
            return Err(Error::Config("rng_retries must be at least 1".to_string()));
        }
        if self.pbkdf2_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(Error::Config(format!(
                "pbkdf2_iterations must be at least {}",
                MIN_PBKDF2_ITERATIONS
            )));
        }

        argon2::Params::new(
            self.kdf.memory_cost,
            self.kdf.time_cost,
            self.kdf.parallelism,
            None,
        )
        .map_err(|e| Error::Config(format!("Invalid KDF parameters: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = CryptoConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_plaintext_size, 50 * 1024 * 1024);
        assert_eq!(config.rng_retries, 10);
        assert_eq!(config.nonce_strategy, NonceStrategy::Random);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CryptoConfig::from_json_str(
            r#"{ "nonce_strategy": "sequence", "password_algorithm": "pbkdf2_sha512" }"#,
        )
        .unwrap();

        assert_eq!(config.nonce_strategy, NonceStrategy::Sequence);
        assert_eq!(config.password_algorithm, PasswordAlgorithm::Pbkdf2Sha512);
        assert_eq!(config.max_plaintext_size, DEFAULT_MAX_PLAINTEXT_SIZE);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            CryptoConfig::from_json_str(r#"{ "max_plaintext_size": 0 }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            CryptoConfig::from_json_str(r#"{ "pbkdf2_iterations": 10 }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            CryptoConfig::from_json_str(
                r#"{ "kdf": { "memory_cost": 1, "time_cost": 0, "parallelism": 0 } }"#
            ),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            CryptoConfig::from_json_str("not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_plaintext_size": 1024, "rng_retries": 3 }}"#).unwrap();

        let config = CryptoConfig::load(file.path()).unwrap();
        assert_eq!(config.max_plaintext_size, 1024);
        assert_eq!(config.rng_retries, 3);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            CryptoConfig::load("/nonexistent/sealcore.json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = CryptoConfig {
            nonce_strategy: NonceStrategy::Sequence,
            ..CryptoConfig::default()
        };
        let parsed = CryptoConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
