//! Error types for artifact retrieval.

use crate::cache::CacheError;
use crate::reference::ReferenceError;
use crate::transport::TransportError;

/// Result type for artifact retrieval operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Umbrella error for artifact retrieval.
///
/// Each variant wraps one failure domain unmodified, so callers can
/// match on the original cause.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A reference or digest failed to parse
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// The registry transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Local cache I/O failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Fetched or cached bytes could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Fetched bytes hashed to a different digest than the reference
    #[error("digest mismatch for {reference}: fetched content hashed to {actual}")]
    DigestMismatch {
        /// The digest-qualified reference that was fetched.
        reference: String,
        /// The digest the fetched bytes actually hashed to.
        actual: String,
    },
}

/// Decompression failures on fetched or cached bytes.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Gzip decompression failed
    #[error("gzip decode failed: {0}")]
    Gzip(#[source] std::io::Error),
}
