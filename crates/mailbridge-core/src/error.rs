//! Error types for the core library.

use crate::attachment::StorageError;
use crate::compose::ComposeError;
use crate::provider::{ProviderError, ProviderErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Account or server configuration is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credentials were rejected or must be renewed by the user.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Failure reported by a mail provider, already classified.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Compose request failed validation.
    #[error("Invalid request: {0}")]
    Validation(#[from] ComposeError),

    /// Attachment storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// A referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MIME encoding error.
    #[error("MIME error: {0}")]
    Mime(#[from] mailbridge_mime::Error),

    /// `OAuth2` token endpoint error.
    #[error("OAuth2 error: {0}")]
    OAuth(#[from] mailbridge_oauth::Error),
}

/// Coarse classification of an [`Error`], used for retry decisions,
/// status records and user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Misconfigured account or system.
    Configuration,
    /// Rejected or expired credentials.
    Authentication,
    /// Temporary network or server condition.
    Transient,
    /// Rejected by server policy (recipient, size, spam).
    Policy,
    /// Invalid input.
    Validation,
    /// Attachment storage problem.
    Storage,
    /// Cancelled by the caller.
    Cancelled,
    /// Missing entity.
    NotFound,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Returns the stable snake_case name used in persisted records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Authentication => "authentication",
            Self::Transient => "transient",
            Self::Policy => "policy",
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::Cancelled => "cancelled",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        }
    }

    /// Parses a persisted name, falling back to `Internal`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "configuration" => Self::Configuration,
            "authentication" => Self::Authentication,
            "transient" => Self::Transient,
            "policy" => Self::Policy,
            "validation" => Self::Validation,
            "storage" => Self::Storage,
            "cancelled" => Self::Cancelled,
            "not_found" => Self::NotFound,
            _ => Self::Internal,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classifies this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::Authentication(_) | Self::OAuth(_) => ErrorKind::Authentication,
            Self::Provider(e) => match e.kind {
                ProviderErrorKind::Auth => ErrorKind::Authentication,
                ProviderErrorKind::Transient => ErrorKind::Transient,
                ProviderErrorKind::Policy => ErrorKind::Policy,
                ProviderErrorKind::Unknown => ErrorKind::Internal,
            },
            Self::Validation(_) | Self::Mime(_) => ErrorKind::Validation,
            Self::Storage(_) | Self::Io(_) => ErrorKind::Storage,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Database(_) | Self::Serde(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Returns a message suitable for showing to the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(e) => e.message.clone(),
            Self::Validation(e) => e.to_string(),
            Self::Authentication(msg) => {
                format!("Sign-in failed: {msg}. Check the account credentials.")
            }
            Self::OAuth(_) => {
                "Your authorization has expired. Please sign in to the account again.".to_string()
            }
            Self::Config(msg) => format!("The mail account is not set up correctly: {msg}"),
            Self::Cancelled => "The operation was cancelled.".to_string(),
            Self::NotFound(what) => format!("{what} could not be found."),
            Self::Storage(e) => format!("The attachment could not be saved: {e}"),
            Self::Mime(e) => format!("The message could not be built: {e}"),
            Self::Database(_) | Self::Serde(_) | Self::Io(_) => {
                "An internal error occurred. Please try again later.".to_string()
            }
        }
    }

    /// Creates a not-found error for an entity description.
    #[must_use]
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

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
    fn only_transient_is_retryable() {
        let transient = Error::Provider(ProviderError::new(
            ProviderErrorKind::Transient,
            "Server busy",
            "421 try later",
        ));
        assert!(transient.is_retryable());

        for err in [
            Error::Config("x".into()),
            Error::Authentication("x".into()),
            Error::Cancelled,
            Error::not_found("Account 1"),
            Error::Provider(ProviderError::new(ProviderErrorKind::Unknown, "?", "?")),
            Error::Provider(ProviderError::new(ProviderErrorKind::Policy, "no", "550")),
        ] {
            assert!(!err.is_retryable(), "{err} must not be retryable");
        }
    }

    #[test]
    fn provider_kinds_map_to_error_kinds() {
        let auth = Error::Provider(ProviderError::new(ProviderErrorKind::Auth, "bad", "535"));
        assert_eq!(auth.kind(), ErrorKind::Authentication);
        assert_eq!(auth.user_message(), "bad");
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            ErrorKind::Configuration,
            ErrorKind::Authentication,
            ErrorKind::Transient,
            ErrorKind::Policy,
            ErrorKind::Validation,
            ErrorKind::Storage,
            ErrorKind::Cancelled,
            ErrorKind::NotFound,
            ErrorKind::Internal,
        ] {
            assert_eq!(ErrorKind::from_name(kind.as_str()), kind);
        }
    }
}
