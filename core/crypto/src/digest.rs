//! Unkeyed SHA-2 digests.

use sha2::{Digest, Sha256, Sha512};

/// SHA-256 output size.
pub const SHA256_SIZE: usize = 32;

/// SHA-512 output size.
pub const SHA512_SIZE: usize = 64;

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; SHA256_SIZE] {
    let mut out = [0u8; SHA256_SIZE];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// SHA-512 of `data`.
pub fn sha512(data: &[u8]) -> [u8; SHA512_SIZE] {
    let mut out = [0u8; SHA512_SIZE];
    out.copy_from_slice(&Sha512::digest(data));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_abc() {
        let expected = [
            0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d, 0xae,
            0x22, 0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10, 0xff, 0x61,
            0xf2, 0x00, 0x15, 0xad,
        ];
        assert_eq!(sha256(b"abc"), expected);
    }

    #[test]
    fn test_sha512_abc_prefix() {
        let digest = sha512(b"abc");
        assert_eq!(&digest[..8], &[0xdd, 0xaf, 0x35, 0xa1, 0x93, 0x61, 0x7a, 0xba]);
        assert_eq!(digest.len(), SHA512_SIZE);
    }
}
