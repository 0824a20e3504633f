//! Compose validation errors.

use thiserror::Error;

use crate::attachment::AttachmentId;

/// Reasons a compose request is rejected before any bytes are produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    /// No sender address.
    #[error("a sender address is required")]
    MissingSender,

    /// An address could not be parsed.
    #[error("invalid {field} address: {address}")]
    InvalidAddress {
        /// Field the address came from.
        field: &'static str,
        /// Offending input.
        address: String,
    },

    /// No to, cc or bcc recipient.
    #[error("at least one recipient is required")]
    NoRecipients,

    /// Too many recipients in total.
    #[error("{count} recipients exceed the limit of {max}")]
    TooManyRecipients {
        /// Recipient count.
        count: usize,
        /// Limit.
        max: usize,
    },

    /// Subject is empty.
    #[error("a subject is required")]
    EmptySubject,

    /// Neither text nor HTML body.
    #[error("a text or HTML body is required")]
    EmptyBody,

    /// Too many attachments.
    #[error("{count} attachments exceed the limit of {max}")]
    TooManyAttachments {
        /// Attachment count.
        count: usize,
        /// Limit.
        max: usize,
    },

    /// One attachment is too large.
    #[error("{filename} is {size} bytes, the limit is {max}")]
    AttachmentTooLarge {
        /// File name.
        filename: String,
        /// Size in bytes.
        size: u64,
        /// Limit.
        max: u64,
    },

    /// File type is not allowed.
    #[error("{filename} has a file type that is not allowed")]
    ExtensionNotAllowed {
        /// File name.
        filename: String,
    },

    /// Custom header name or value is malformed.
    #[error("invalid header {name}")]
    InvalidHeader {
        /// Header name.
        name: String,
    },

    /// Custom header would override a structural header.
    #[error("header {name} cannot be set")]
    ReservedHeader {
        /// Header name.
        name: String,
    },

    /// Template does not exist.
    #[error("template {0} not found")]
    TemplateNotFound(String),

    /// Stored attachment does not exist or belongs to someone else.
    #[error("attachment {0} not found")]
    AttachmentNotFound(AttachmentId),
}
