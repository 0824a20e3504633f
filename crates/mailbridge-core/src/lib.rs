//! # mailbridge-core
//!
//! Multi-vendor mail delivery and retrieval.
//!
//! This crate provides:
//! - Account model and `SQLite` repository
//! - Provider adapters for Gmail, Outlook, QQ, NetEase, iCloud and custom servers
//! - Retry with exponential backoff and `OAuth2` token refresh
//! - Attachment storage with atomic writes and checksums
//! - Message composition with templates and inline images
//! - Send orchestration with status tracking, history and events
//! - Watermark-based incremental sync
//!
//! Network I/O goes through the [`provider::MailTransport`] trait, so the
//! pipeline can be driven by any SMTP/IMAP implementation.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod account;
pub mod attachment;
pub mod compose;
pub mod config;
mod error;
pub mod provider;
pub mod retry;
pub mod send;
pub mod sync;
pub mod token;

pub use account::{
    Account, AccountId, AccountStore, AuthMethod, ImapConfig, OAuthTokens, Security, SmtpConfig,
    SqliteAccountRepository, UserId, ValidationError, ValidationResult, Vendor, validate_account,
};
pub use attachment::{
    Attachment, AttachmentId, AttachmentIndex, AttachmentStore, LocalAttachmentStore,
    SqliteAttachmentIndex, StorageError, StorageInfo,
};
pub use compose::{
    AttachmentSource, ComposeError, ComposeRequest, ComposedEmail, Composer, EmailId, Template,
    TemplateRef, TemplateSource,
};
pub use config::{ComposeConfig, Config, DeliveryConfig, DomainOverride, StorageConfig};
pub use error::{Error, ErrorKind, Result};
pub use provider::{
    MailAdapter, MailTransport, Provider, ProviderError, ProviderErrorKind, ProviderRegistry,
    Service, SpecialFolder,
};
pub use retry::{Connector, RetryPolicy};
pub use send::{
    BroadcastPublisher, BulkItem, EventPublisher, MailEvent, NoopPublisher, SendHandle,
    SendHistoryStore, SendId, SendOrchestrator, SendResult, SendState, SendStatus,
    SqliteSendHistory, StatusTracker,
};
pub use sync::{Label, RemoteMessage, SyncEngine, SyncResult};
pub use token::{HttpTokenRefresher, TokenManager, TokenRefresher};
