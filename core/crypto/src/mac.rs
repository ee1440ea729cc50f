//! Keyed message authentication with HMAC-SHA256.
//!
//! Used by token and session services to sign bearer tokens. Verification
//! recomputes the tag and checks it with `constant_time_compare`.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use sealcore_common::{Error, Result};
use crate::memory::constant_time_compare;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 output size (32 bytes).
pub const MAC_TAG_SIZE: usize = 32;

/// An HMAC-SHA256 authentication tag.
///
/// Equality is only available through `verify` or `ct_eq`, both constant-time.
#[derive(Clone, Copy)]
pub struct MacTag([u8; MAC_TAG_SIZE]);

impl MacTag {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; MAC_TAG_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice.
    ///
    /// # Errors
    /// - `InvalidInput` unless `bytes` is MAC_TAG_SIZE long
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let tag: [u8; MAC_TAG_SIZE] = bytes.try_into().map_err(|_| {
            Error::InvalidInput(format!(
                "MAC tag must be {} bytes, got {}",
                MAC_TAG_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(tag))
    }

    /// Get the tag bytes.
    pub fn as_bytes(&self) -> &[u8; MAC_TAG_SIZE] {
        &self.0
    }

    /// Constant-time comparison against raw tag bytes.
    pub fn ct_eq(&self, other: &[u8]) -> bool {
        constant_time_compare(&self.0, other)
    }

    /// URL-safe unpadded base64, the encoding used in bearer tokens.
    pub fn to_base64url(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Parse URL-safe unpadded base64.
    pub fn from_base64url(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| Error::InvalidInput("MAC tag is not valid base64url".to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for MacTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacTag({})", self.to_base64url())
    }
}

/// Compute the HMAC-SHA256 tag of `msg` under `key`.
///
/// Keys of any length are accepted, including the empty key (RFC 2104
/// pads or hashes the key to the block size).
pub fn sign(key: &[u8], msg: &[u8]) -> Result<MacTag> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| Error::InvalidInput("Invalid HMAC key length".to_string()))?;
    mac.update(msg);

    let mut tag = [0u8; MAC_TAG_SIZE];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(MacTag(tag))
}

/// Check `tag` against the HMAC-SHA256 of `msg` under `key`.
///
/// Returns `false` for any malformed input; never an early-exit comparison.
pub fn verify(key: &[u8], msg: &[u8], tag: &[u8]) -> bool {
    match sign(key, msg) {
        Ok(expected) => expected.ct_eq(tag),
        Err(_) => false,
    }
}
