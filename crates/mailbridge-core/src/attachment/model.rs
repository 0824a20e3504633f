//! Attachment metadata.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::{AccountId, UserId};
use crate::compose::EmailId;

/// Unique identifier for an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(pub Uuid);

impl AttachmentId {
    /// Generates a random ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttachmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for AttachmentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A binary payload owned by a user, optionally tied to an account and
/// an email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Unique identifier.
    pub id: AttachmentId,
    /// Owning user.
    pub user_id: UserId,
    /// Owning account, if known.
    pub account_id: Option<AccountId>,
    /// Owning email; `None` marks a temporary upload.
    pub email_id: Option<EmailId>,
    /// Original filename.
    pub filename: String,
    /// MIME type.
    pub content_type: String,
    /// Declared size in bytes.
    pub size: u64,
    /// Path relative to the store root, set once stored.
    pub storage_path: Option<String>,
    /// SHA-256 hex digest, set once stored.
    pub checksum: Option<String>,
    /// Whether the payload has been downloaded from the server.
    pub downloaded: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    /// Creates metadata for a temporary upload.
    #[must_use]
    pub fn new(
        user_id: UserId,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            id: AttachmentId::new(),
            user_id,
            account_id: None,
            email_id: None,
            filename: filename.into(),
            content_type: content_type.into(),
            size,
            storage_path: None,
            checksum: None,
            downloaded: false,
            created_at: Utc::now(),
        }
    }

    /// Sets the owning account.
    #[must_use]
    pub const fn with_account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    /// Sets the owning email.
    #[must_use]
    pub const fn with_email(mut self, email_id: EmailId) -> Self {
        self.email_id = Some(email_id);
        self
    }

    /// Returns true if not yet bound to an email.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        self.email_id.is_none()
    }
}

/// Filesystem facts about a stored attachment, computed on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    /// Absolute path.
    pub path: PathBuf,
    /// Size on disk.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// SHA-256 hex digest of the current content.
    pub checksum: String,
}
