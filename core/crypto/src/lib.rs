//! Secure primitives for multi-tenant services.
//!
//! This crate provides:
//! - Tenant-bound authenticated encryption using AES-256-GCM
//! - Password hashing with Argon2id (PBKDF2-HMAC-SHA512 as fallback)
//! - HMAC-SHA256 token signing and SHA-2 digests
//! - Hardware-backed random bytes with OS fallback
//! - Zeroizing buffers and constant-time comparison
//!
//! # Security Guarantees
//! - Key material and decrypted plaintext are zeroized on drop
//! - A ciphertext only opens under the context identifier it was sealed with
//! - No plaintext or key material is ever logged
//! - Tag, MAC and credential checks are constant-time

pub mod aead;
pub mod config;
pub mod context;
pub mod digest;
pub mod kdf;
pub mod keys;
pub mod mac;
pub mod memory;
pub mod random;

pub use aead::{decrypt, encrypt, AeadMessage, NonceStrategy};
pub use config::CryptoConfig;
pub use context::CryptoContext;
pub use digest::{sha256, sha512};
pub use kdf::{
    derive_key, hash_password, verify_password, DerivedCredential, KdfParams, PasswordHasher, Salt,
};
pub use keys::{MasterKey, SubKey};
pub use mac::{sign, verify, MacTag};
pub use memory::{constant_time_compare, wipe, BufferPool, SecureBuffer};
pub use random::{random_bytes, EntropySource, RandomSource};
pub use sealcore_common::{ContextId, Error, ErrorKind, Result};
