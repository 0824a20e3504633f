//! Attachment storage errors.

use thiserror::Error;

use super::AttachmentId;

/// Errors raised by the attachment store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Payload exceeds the size limit.
    #[error("attachment is {size} bytes, the limit is {max}")]
    TooLarge {
        /// Offending size.
        size: u64,
        /// Limit.
        max: u64,
    },

    /// Written size differs too much from the declared size.
    #[error("declared {declared} bytes but received {actual}")]
    SizeMismatch {
        /// Declared size.
        declared: u64,
        /// Bytes actually written.
        actual: u64,
    },

    /// Content no longer matches its recorded checksum.
    #[error("checksum mismatch: expected {expected}, found {actual}")]
    ChecksumMismatch {
        /// Recorded digest.
        expected: String,
        /// Current digest.
        actual: String,
    },

    /// The attachment has no stored payload.
    #[error("attachment {0} has not been stored")]
    NotStored(AttachmentId),

    /// The stored file is missing.
    #[error("attachment file {0} is missing")]
    Missing(String),

    /// A stored path escapes the store root.
    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
