//! Authenticated encryption using AES-256-GCM.
//!
//! The associated data is the tenant or organization identifier. It is not
//! stored in the message: decryption must be given the identical bytes or
//! the tag check fails. A ciphertext sealed for one tenant therefore cannot
//! be opened while claiming to belong to another.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;
use zeroize::Zeroize;

use sealcore_common::{Error, ErrorKind, Result};
use crate::keys::MasterKey;
use crate::memory::{xor_in_place, SecureBuffer};
use crate::random::RandomSource;

/// Nonce size for AES-256-GCM (12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Smallest well-formed message: nonce and tag around an empty ciphertext.
pub const MIN_MESSAGE_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Default plaintext cap (50 MiB).
pub const DEFAULT_MAX_PLAINTEXT_SIZE: usize = 50 * 1024 * 1024;

/// Sealed message: nonce || ciphertext || tag.
#[derive(Clone, PartialEq, Eq)]
pub struct AeadMessage {
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
    tag: [u8; TAG_SIZE],
}

impl AeadMessage {
    /// Assemble a message from separately stored parts.
    ///
    /// # Errors
    /// - `InvalidInput` if the nonce or tag has the wrong length
    pub fn from_parts(nonce: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<Self> {
        let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|_| {
            Error::InvalidInput(format!(
                "Nonce must be {} bytes, got {}",
                NONCE_SIZE,
                nonce.len()
            ))
        })?;
        let tag: [u8; TAG_SIZE] = tag.try_into().map_err(|_| {
            Error::InvalidInput(format!("Tag must be {} bytes, got {}", TAG_SIZE, tag.len()))
        })?;

        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
            tag,
        })
    }

    /// Get the nonce.
    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Get the ciphertext without nonce and tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Get the authentication tag.
    pub fn tag(&self) -> &[u8; TAG_SIZE] {
        &self.tag
    }

    /// Total encoded length.
    pub fn encoded_len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len() + TAG_SIZE
    }

    /// Encode as nonce || ciphertext || tag.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Parse nonce || ciphertext || tag.
    ///
    /// # Errors
    /// - `InvalidInput` if `bytes` is shorter than MIN_MESSAGE_SIZE
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_MESSAGE_SIZE {
            return Err(Error::InvalidInput(format!(
                "Message must be at least {} bytes, got {}",
                MIN_MESSAGE_SIZE,
                bytes.len()
            )));
        }

        let (nonce, rest) = bytes.split_at(NONCE_SIZE);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_SIZE);
        Self::from_parts(nonce, ciphertext, tag)
    }

    /// Encode as standard base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Decode from standard base64.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| Error::InvalidInput("Message is not valid base64".to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for AeadMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AeadMessage")
            .field("nonce", &self.nonce)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// How nonces are produced for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonceStrategy {
    /// Fresh 96-bit CSPRNG value per message.
    #[default]
    Random,
    /// Random 96-bit base XOR a 64-bit message counter.
    Sequence,
}

/// Counter-based nonce generator.
///
/// The base is drawn once; message `n` uses `base XOR n` in the low
/// eight bytes. Nonces never repeat within one generator, and the counter
/// is a lock-free atomic so concurrent callers need no coordination.
pub struct NonceSequence {
    base: [u8; NONCE_SIZE],
    counter: AtomicU64,
}

impl NonceSequence {
    /// Start a sequence with a random base.
    pub fn new(random: &RandomSource) -> Result<Self> {
        Ok(Self::with_base(random.array()?))
    }

    /// Start a sequence from an explicit base at counter zero.
    pub fn with_base(base: [u8; NONCE_SIZE]) -> Self {
        Self {
            base,
            counter: AtomicU64::new(0),
        }
    }

    /// Produce the next nonce.
    ///
    /// # Errors
    /// - `Overflow` once 2^64 - 1 nonces have been issued; the key must be rotated
    pub fn next_nonce(&self) -> Result<[u8; NONCE_SIZE]> {
        let count = self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_add(1))
            .map_err(|_| {
                warn!("Nonce sequence exhausted");
                Error::Overflow {
                    size: usize::MAX,
                    limit: usize::MAX,
                }
            })?;

        let mut nonce = self.base;
        xor_in_place(&mut nonce[NONCE_SIZE - 8..], &count.to_be_bytes())?;
        Ok(nonce)
    }

    /// Number of nonces issued so far.
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for NonceSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonceSequence")
            .field("issued", &self.issued())
            .finish()
    }
}

/// Encrypt plaintext using AES-256-GCM with `aad` bound as associated data.
///
/// # Preconditions
/// - `aad` must be the non-empty tenant or context identifier
/// - `plaintext` must not exceed DEFAULT_MAX_PLAINTEXT_SIZE
///
/// # Postconditions
/// - The nonce is freshly drawn from the system random source
/// - The ciphertext length equals the plaintext length
///
/// # Errors
/// - `InvalidInput` if `aad` is empty
/// - `Overflow` if the plaintext is too large
/// - `EntropyUnavailable` if no nonce could be drawn
pub fn encrypt(key: &MasterKey, plaintext: &[u8], aad: &[u8]) -> Result<AeadMessage> {
    check_plaintext_size(plaintext.len(), DEFAULT_MAX_PLAINTEXT_SIZE)?;
    let nonce = RandomSource::system().array()?;
    seal(key, nonce, plaintext, aad)
}

/// Decrypt a message, verifying its tag against the supplied `aad`.
///
/// # Postconditions
/// - Returns plaintext only if the tag verifies for this key and `aad`
///
/// # Errors
/// - `InvalidInput` if `aad` is empty
/// - `AuthenticationFailed` on wrong key, wrong `aad`, or tampered data;
///   the working buffer is wiped before returning
pub fn decrypt(key: &MasterKey, message: &AeadMessage, aad: &[u8]) -> Result<SecureBuffer> {
    open(key, message, aad)
}

pub(crate) fn check_plaintext_size(size: usize, limit: usize) -> Result<()> {
    if size > limit {
        return Err(Error::Overflow { size, limit });
    }
    Ok(())
}

pub(crate) fn seal(
    key: &MasterKey,
    nonce: [u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<AeadMessage> {
    require_aad(aad)?;

    let mut ciphertext = plaintext.to_vec();
    let sealed = cipher(key).encrypt_in_place_detached(
        GenericArray::from_slice(&nonce),
        aad,
        &mut ciphertext,
    );

    match sealed {
        Ok(tag) => {
            let mut tag_bytes = [0u8; TAG_SIZE];
            tag_bytes.copy_from_slice(&tag);
            Ok(AeadMessage {
                nonce,
                ciphertext,
                tag: tag_bytes,
            })
        }
        Err(_) => {
            ciphertext.zeroize();
            Err(Error::Crypto("Encryption failed".to_string()))
        }
    }
}

pub(crate) fn open(key: &MasterKey, message: &AeadMessage, aad: &[u8]) -> Result<SecureBuffer> {
    require_aad(aad)?;

    let mut buffer = SecureBuffer::from_slice(&message.ciphertext)?;
    let opened = cipher(key).decrypt_in_place_detached(
        GenericArray::from_slice(&message.nonce),
        aad,
        buffer.as_mut_bytes(),
        GenericArray::from_slice(&message.tag),
    );

    match opened {
        Ok(()) => Ok(buffer),
        Err(_) => {
            buffer.wipe();
            warn!(
                target: "sealcore::audit",
                kind = %ErrorKind::AuthenticationFailed,
                context = %String::from_utf8_lossy(aad),
                "AEAD authentication failed"
            );
            Err(Error::AuthenticationFailed)
        }
    }
}

pub(crate) fn require_aad(aad: &[u8]) -> Result<()> {
    if aad.is_empty() {
        return Err(Error::InvalidInput(
            "Associated data (context id) is mandatory".to_string(),
        ));
    }
    Ok(())
}

fn cipher(key: &MasterKey) -> Aes256Gcm {
    Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()))
}
