//! Common types shared across the SealCore crates.
//!
//! This module provides the error taxonomy every primitive reports through
//! and the tenant context identifier used as associated data.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::ContextId;
