//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use sealcore_common::{Error, Result};
use crate::random::RandomSource;

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Environment variable read by `MasterKey::from_env` callers by default.
pub const DEFAULT_MASTER_KEY_ENV: &str = "SEALCORE_MASTER_KEY";

/// Domain tag appended to every subkey derivation.
const SUBKEY_DOMAIN: &[u8] = b"sealcore-subkey-v1";

/// The process's symmetric root key.
///
/// Supplied once by an external secret store. Never serialized, never
/// logged, never cloned; zeroized when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a master key from a slice.
    ///
    /// # Errors
    /// - `InvalidKeyLength` unless `key` is exactly KEY_LENGTH bytes
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LENGTH {
            return Err(Error::InvalidKeyLength {
                expected: KEY_LENGTH,
                actual: key.len(),
            });
        }

        let mut bytes = [0u8; KEY_LENGTH];
        bytes.copy_from_slice(key);
        Ok(Self { key: bytes })
    }

    /// Decode a standard-alphabet base64 key.
    ///
    /// # Errors
    /// - `Config` if the value is not valid base64
    /// - `InvalidKeyLength` if it does not decode to KEY_LENGTH bytes
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|_| Error::Config("Master key is not valid base64".to_string()))?,
        );
        Self::from_slice(&decoded)
    }

    /// Read a base64 key from the environment variable `var`.
    ///
    /// Fails closed: a missing or malformed value is an error, never a default.
    pub fn from_env(var: &str) -> Result<Self> {
        let value = Zeroizing::new(
            std::env::var(var)
                .map_err(|_| Error::Config(format!("{} is not set", var)))?,
        );
        if value.trim().is_empty() {
            return Err(Error::Config(format!("{} is empty", var)));
        }
        Self::from_base64(&value)
    }

    /// Generate a random master key.
    pub fn generate(random: &RandomSource) -> Result<Self> {
        let mut key = [0u8; KEY_LENGTH];
        random.fill(&mut key)?;
        Ok(Self { key })
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Encode the key as standard base64 for hand-off to a secret store.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.key))
    }

    /// Derive a domain-separated subkey for `label`.
    ///
    /// Uses blake2b over key || label || domain tag. Distinct labels
    /// yield independent keys; the same label is deterministic.
    pub fn derive_subkey(&self, label: &[u8]) -> SubKey {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.key);
        hasher.update((label.len() as u64).to_le_bytes());
        hasher.update(label);
        hasher.update(SUBKEY_DOMAIN);

        let mut result = hasher.finalize();
        let mut derived = [0u8; KEY_LENGTH];
        derived.copy_from_slice(&result);
        result.as_mut_slice().zeroize();
        SubKey { key: derived }
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Key derived from a master key for a single purpose.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SubKey {
    key: [u8; KEY_LENGTH],
}

impl SubKey {
    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for SubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubKey([REDACTED])")
    }
}
