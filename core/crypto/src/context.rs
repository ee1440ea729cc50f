//! Master key context: the handle every operation is called through.
//!
//! Built once at service start from an externally supplied key, then
//! shared read-only (typically behind an `Arc`). Holds no per-call state
//! except the optional nonce counter, which is a lock-free atomic.

use std::fmt;

use tracing::{debug, warn};

use sealcore_common::{Error, ErrorKind, Result};
use crate::aead::{self, AeadMessage, NonceSequence, NonceStrategy, MIN_MESSAGE_SIZE, NONCE_SIZE};
use crate::config::CryptoConfig;
use crate::kdf::{DerivedCredential, PasswordHasher};
use crate::keys::{MasterKey, SubKey};
use crate::mac::{self, MacTag};
use crate::memory::SecureBuffer;
use crate::random::RandomSource;

/// Label of the subkey used for token signing.
const MAC_SUBKEY_LABEL: &[u8] = b"mac";

/// Key, limits and randomness for one master key.
pub struct CryptoContext {
    key: MasterKey,
    mac_key: SubKey,
    config: CryptoConfig,
    random: RandomSource,
    nonces: Option<NonceSequence>,
    passwords: PasswordHasher,
}

impl CryptoContext {
    /// Build a context with default configuration.
    ///
    /// # Errors
    /// - `InvalidKeyLength` unless `master_key` is exactly 32 bytes
    pub fn init(master_key: &[u8]) -> Result<Self> {
        Self::with_config(MasterKey::from_slice(master_key)?, CryptoConfig::default())
    }

    /// Build a context with explicit configuration.
    pub fn with_config(key: MasterKey, config: CryptoConfig) -> Result<Self> {
        Self::with_random(key, config, RandomSource::system())
    }

    /// Build a context drawing nonces and salts from `random`.
    ///
    /// The source's retry budget and request cap are taken from `config`.
    pub fn with_random(key: MasterKey, config: CryptoConfig, random: RandomSource) -> Result<Self> {
        config.validate()?;

        let random = random
            .with_retries(config.rng_retries)
            .with_max_request(config.max_random_bytes);

        let nonces = match config.nonce_strategy {
            NonceStrategy::Random => None,
            NonceStrategy::Sequence => Some(NonceSequence::new(&random)?),
        };

        let passwords = PasswordHasher::from_config(&config)?;

        debug!(
            nonce_strategy = ?config.nonce_strategy,
            password_algorithm = ?config.password_algorithm,
            max_plaintext_size = config.max_plaintext_size,
            "Crypto context initialized"
        );

        Ok(Self {
            mac_key: key.derive_subkey(MAC_SUBKEY_LABEL),
            key,
            config,
            random,
            nonces,
            passwords,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &CryptoConfig {
        &self.config
    }

    /// Encrypt `plaintext` bound to the context identifier `aad`.
    ///
    /// # Errors
    /// - `InvalidInput` if `aad` is empty
    /// - `Overflow` if the plaintext exceeds `max_plaintext_size`
    /// - `EntropyUnavailable` if no nonce could be drawn
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<AeadMessage> {
        aead::check_plaintext_size(plaintext.len(), self.config.max_plaintext_size)?;
        let nonce = self.next_nonce()?;
        aead::seal(&self.key, nonce, plaintext, aad)
    }

    /// Decrypt `message`, authenticating it against `aad`.
    ///
    /// # Errors
    /// - `InvalidInput` if `aad` is empty
    /// - `Overflow` if the ciphertext exceeds `max_plaintext_size`
    /// - `AuthenticationFailed` on any tag, key or context mismatch
    pub fn decrypt(&self, message: &AeadMessage, aad: &[u8]) -> Result<SecureBuffer> {
        aead::check_plaintext_size(message.ciphertext().len(), self.config.max_plaintext_size)?;
        aead::open(&self.key, message, aad)
    }

    /// Decrypt from separately stored nonce, ciphertext and tag.
    ///
    /// # Errors
    /// - `InvalidInput` if the nonce or tag has the wrong length
    /// - as for `decrypt`
    pub fn decrypt_parts(
        &self,
        nonce: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
        tag: &[u8],
    ) -> Result<SecureBuffer> {
        let message = AeadMessage::from_parts(nonce, ciphertext, tag)?;
        self.decrypt(&message, aad)
    }

    /// Decrypt an encoded nonce || ciphertext || tag.
    ///
    /// A message too short to hold a nonce and tag is treated as truncated
    /// and fails authentication.
    pub fn decrypt_bytes(&self, bytes: &[u8], aad: &[u8]) -> Result<SecureBuffer> {
        aead::require_aad(aad)?;
        if bytes.len() < MIN_MESSAGE_SIZE {
            warn!(
                target: "sealcore::audit",
                kind = %ErrorKind::AuthenticationFailed,
                context = %String::from_utf8_lossy(aad),
                len = bytes.len(),
                "Truncated AEAD message"
            );
            return Err(Error::AuthenticationFailed);
        }

        self.decrypt(&AeadMessage::from_bytes(bytes)?, aad)
    }

    /// Decrypt `message` under `previous` and encrypt it again under this context.
    ///
    /// Used while rotating keys: the plaintext only ever lives in a wiped buffer.
    pub fn reencrypt_from(
        &self,
        previous: &CryptoContext,
        message: &AeadMessage,
        aad: &[u8],
    ) -> Result<AeadMessage> {
        let plaintext = previous.decrypt(message, aad)?;
        self.encrypt(plaintext.as_bytes(), aad)
    }

    /// Build a context for `new_key` with this context's configuration and
    /// random source.
    ///
    /// This context stays usable until it is dropped, so in-flight work can
    /// finish under the old key.
    pub fn rotate(&self, new_key: MasterKey) -> Result<Self> {
        Self::with_random(new_key, self.config.clone(), self.random.clone())
    }

    /// Sign `msg` with the context's MAC subkey.
    pub fn sign(&self, msg: &[u8]) -> Result<MacTag> {
        mac::sign(self.mac_key.as_bytes(), msg)
    }

    /// Verify a tag produced by `sign`.
    pub fn verify(&self, msg: &[u8], tag: &[u8]) -> bool {
        mac::verify(self.mac_key.as_bytes(), msg, tag)
    }

    /// Hash a password with the configured algorithm and a fresh salt.
    pub fn hash_password(&self, password: &[u8]) -> Result<DerivedCredential> {
        self.passwords.hash_password_with(password, &self.random)
    }

    /// Verify a password against a stored credential.
    pub fn verify_password(&self, password: &[u8], credential: &DerivedCredential) -> bool {
        self.passwords.verify_password(password, credential)
    }

    /// Random bytes from the context's source.
    pub fn random_bytes(&self, n: usize) -> Result<Vec<u8>> {
        self.random.random_bytes(n)
    }

    fn next_nonce(&self) -> Result<[u8; NONCE_SIZE]> {
        match &self.nonces {
            Some(sequence) => sequence.next_nonce(),
            None => self.random.array(),
        }
    }
}

impl fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoContext")
            .field("key", &self.key)
            .field("config", &self.config)
            .field("random", &self.random)
            .finish()
    }
}
