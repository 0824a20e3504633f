//! Attachment storage.
//!
//! Payloads live on the local filesystem under deterministic paths and are
//! written atomically with a SHA-256 checksum; metadata lives in an
//! [`AttachmentIndex`].

mod error;
mod index;
mod model;
mod sanitize;
mod store;

pub use error::{StorageError, StorageResult};
pub use index::{AttachmentIndex, SqliteAttachmentIndex};
pub use model::{Attachment, AttachmentId, StorageInfo};
pub use sanitize::{MAX_FILENAME_BYTES, sanitize_filename};
pub use store::{AttachmentReader, AttachmentStore, LocalAttachmentStore};
