//! Provider adapters.
//!
//! A [`Provider`] hides vendor quirks (server defaults, authentication
//! rules, error tables) behind one contract. Vendor knowledge lives in
//! [`VendorRules`] implementations; [`MailAdapter`] drives the
//! [`MailTransport`] with them, and [`ProviderRegistry`] picks the rules
//! for an account.

mod adapter;
mod error;
mod registry;
mod rules;
mod transport;
pub mod vendors;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::account::{Account, AuthMethod};
use crate::sync::RemoteMessage;

pub use adapter::MailAdapter;
pub use error::{ErrorRule, ProviderError, ProviderErrorKind, classify};
pub use registry::ProviderRegistry;
pub use rules::{ServerDefaults, VendorRules};
pub use transport::{
    Credentials, Endpoint, FetchedMessage, ImapSession, MailTransport, SmtpSession,
    TransportError, TransportErrorKind, TransportResult,
};

/// Which server a connection targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// SMTP submission.
    Submission,
    /// IMAP retrieval.
    Retrieval,
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Submission => "smtp",
            Self::Retrieval => "imap",
        })
    }
}

/// Logical mailbox roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialFolder {
    /// Incoming mail.
    Inbox,
    /// Sent mail.
    Sent,
    /// Drafts.
    Drafts,
    /// Deleted mail.
    Trash,
    /// Spam.
    Junk,
    /// Archived mail.
    Archive,
}

impl SpecialFolder {
    /// All roles.
    pub const ALL: [Self; 6] = [
        Self::Inbox,
        Self::Sent,
        Self::Drafts,
        Self::Trash,
        Self::Junk,
        Self::Archive,
    ];

    /// Logical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Sent => "sent",
            Self::Drafts => "drafts",
            Self::Trash => "trash",
            Self::Junk => "junk",
            Self::Archive => "archive",
        }
    }

    /// Parses a logical name, accepting `spam` for junk.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if name == "spam" {
            return Some(Self::Junk);
        }
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    /// Conventional physical names used by most servers.
    #[must_use]
    pub fn standard_names() -> HashMap<Self, String> {
        [
            (Self::Inbox, "INBOX"),
            (Self::Sent, "Sent"),
            (Self::Drafts, "Drafts"),
            (Self::Trash, "Trash"),
            (Self::Junk, "Junk"),
            (Self::Archive, "Archive"),
        ]
        .into_iter()
        .map(|(f, n)| (f, n.to_string()))
        .collect()
    }
}

/// A composed message ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Envelope sender.
    pub from: String,
    /// Envelope recipients, including Bcc.
    pub recipients: Vec<String>,
    /// Wire bytes.
    pub data: Vec<u8>,
}

/// Vendor-neutral mail provider contract.
#[async_trait]
pub trait Provider: Send {
    /// Connects and authenticates to the given service.
    async fn connect(
        &mut self,
        account: &Account,
        service: Service,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Closes all open sessions. Never fails on already-closed sessions.
    async fn disconnect(&mut self) -> Result<()>;

    /// Opens and closes both services to check the account settings.
    async fn test_connection(&mut self, account: &Account, cancel: &CancellationToken)
    -> Result<()>;

    /// Submits a message over the connected SMTP session.
    async fn send_email(
        &mut self,
        account: &Account,
        message: &OutgoingMessage,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Fetches messages newer than `watermark` from a folder over the
    /// connected IMAP session. `folder` may be a logical special-folder name.
    async fn sync_emails(
        &mut self,
        account: &Account,
        folder: &str,
        watermark: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteMessage>>;

    /// Authentication methods the vendor accepts.
    fn supported_auth_methods(&self) -> &'static [AuthMethod];

    /// Physical names of the special folders.
    fn special_folders(&self) -> HashMap<SpecialFolder, String>;
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn special_folder_names() {
        for folder in SpecialFolder::ALL {
            assert_eq!(SpecialFolder::from_name(folder.as_str()), Some(folder));
        }
        assert_eq!(SpecialFolder::from_name("Spam"), Some(SpecialFolder::Junk));
        assert_eq!(SpecialFolder::from_name("Work"), None);
        assert_eq!(SpecialFolder::standard_names().len(), 6);
    }
}
