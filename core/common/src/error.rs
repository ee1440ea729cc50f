//! Common error types for SealCore.
//!
//! Error messages carry lengths, limits and parameter names only. Key
//! material, plaintext and passwords never appear in a variant.

use std::fmt;

use thiserror::Error;

/// Top-level error type for SealCore operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed lengths, empty required inputs or undecodable encodings.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Key material of the wrong size.
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Tag or associated data mismatch. Callers should treat this as a denial.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Allocation failed or a buffer invariant was violated.
    #[error("Memory error: {0}")]
    MemoryError(String),

    /// Every entropy source failed after bounded retries.
    #[error("Entropy unavailable after {attempts} attempts")]
    EntropyUnavailable { attempts: u32 },

    /// Payload exceeds a configured size cap.
    #[error("Payload of {size} bytes exceeds limit of {limit} bytes")]
    Overflow { size: usize, limit: usize },

    /// A primitive rejected its parameters.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Non-secret classification of this error, safe to hand to audit sinks.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::InvalidKeyLength { .. } => ErrorKind::InvalidKeyLength,
            Self::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            Self::MemoryError(_) => ErrorKind::MemoryError,
            Self::EntropyUnavailable { .. } => ErrorKind::EntropyUnavailable,
            Self::Overflow { .. } => ErrorKind::Overflow,
            Self::Crypto(_) => ErrorKind::Crypto,
            Self::Config(_) => ErrorKind::Config,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether this error should be escalated as a security signal.
    pub fn is_security_event(&self) -> bool {
        matches!(self, Self::AuthenticationFailed)
    }
}

/// Discriminant of [`Error`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    InvalidKeyLength,
    AuthenticationFailed,
    MemoryError,
    EntropyUnavailable,
    Overflow,
    Crypto,
    Config,
    Serialization,
}

impl ErrorKind {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::InvalidKeyLength => "invalid_key_length",
            Self::AuthenticationFailed => "authentication_failed",
            Self::MemoryError => "memory_error",
            Self::EntropyUnavailable => "entropy_unavailable",
            Self::Overflow => "overflow",
            Self::Crypto => "crypto",
            Self::Config => "config",
            Self::Serialization => "serialization",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_authentication_failure_is_security_event() {
        assert!(Error::AuthenticationFailed.is_security_event());
        assert!(!Error::InvalidInput("x".into()).is_security_event());
        assert!(!Error::EntropyUnavailable { attempts: 11 }.is_security_event());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(
            Error::Overflow { size: 2, limit: 1 }.kind().as_str(),
            "overflow"
        );
        assert_eq!(
            Error::AuthenticationFailed.kind().to_string(),
            "authentication_failed"
        );
    }

    #[test]
    fn test_display_has_no_payload_bytes() {
        let err = Error::InvalidKeyLength {
            expected: 32,
            actual: 16,
        };
        assert_eq!(err.to_string(), "Invalid key length: expected 32, got 16");
    }
}
