//! Classification of raw transport failures.

use thiserror::Error;

use super::transport::{TransportError, TransportErrorKind};

/// Tag describing how a provider failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// Credentials rejected; the user must fix them.
    Auth,
    /// Temporary condition; retrying may succeed.
    Transient,
    /// Rejected by server policy (recipient, size, content).
    Policy,
    /// Unrecognized failure.
    Unknown,
}

/// A classified provider failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({detail})")]
pub struct ProviderError {
    /// Classification.
    pub kind: ProviderErrorKind,
    /// Human-readable cause.
    pub message: String,
    /// Raw server or transport detail.
    pub detail: String,
}

impl ProviderError {
    /// Creates a classified error.
    #[must_use]
    pub fn new(
        kind: ProviderErrorKind,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: detail.into(),
        }
    }
}

/// One entry of a vendor's error table.
///
/// An entry matches when every given criterion matches: the reply code
/// equals `code`, and the lowercased transport message contains `pattern`.
#[derive(Debug, Clone, Copy)]
pub struct ErrorRule {
    /// Reply code to match.
    pub code: Option<u16>,
    /// Lowercase substring to find in the message.
    pub pattern: Option<&'static str>,
    /// Resulting classification.
    pub kind: ProviderErrorKind,
    /// Human-readable cause.
    pub message: &'static str,
}

impl ErrorRule {
    /// Rule matching a reply code.
    #[must_use]
    pub const fn code(code: u16, kind: ProviderErrorKind, message: &'static str) -> Self {
        Self {
            code: Some(code),
            pattern: None,
            kind,
            message,
        }
    }

    /// Rule matching a message substring.
    #[must_use]
    pub const fn text(pattern: &'static str, kind: ProviderErrorKind, message: &'static str) -> Self {
        Self {
            code: None,
            pattern: Some(pattern),
            kind,
            message,
        }
    }

    /// Rule matching both a reply code and a message substring.
    #[must_use]
    pub const fn code_text(
        code: u16,
        pattern: &'static str,
        kind: ProviderErrorKind,
        message: &'static str,
    ) -> Self {
        Self {
            code: Some(code),
            pattern: Some(pattern),
            kind,
            message,
        }
    }

    fn matches(&self, code: Option<u16>, lowered: &str) -> bool {
        if self.code.is_some() && self.code != code {
            return false;
        }
        self.pattern.is_none_or(|p| lowered.contains(p))
    }
}

const AUTH_PHRASES: &[&str] = &[
    "authenticationfailed",
    "authentication failed",
    "invalid credentials",
    "login failed",
    "username and password not accepted",
];

const NETWORK_PHRASES: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "broken pipe",
    "failed to lookup",
    "dns",
    "name or service not known",
    "temporarily unavailable",
];

/// Classifies a transport error, consulting the vendor table first.
#[must_use]
pub fn classify(table: &[ErrorRule], error: &TransportError) -> ProviderError {
    let lowered = error.message.to_ascii_lowercase();
    let detail = error.to_string();

    if let Some(rule) = table.iter().find(|r| r.matches(error.code, &lowered)) {
        return ProviderError::new(rule.kind, rule.message, detail);
    }

    let (kind, message) = match (error.kind, error.code) {
        (TransportErrorKind::Timeout, _) => (
            ProviderErrorKind::Transient,
            "The mail server did not respond in time",
        ),
        (_, Some(530 | 534 | 535)) => (
            ProviderErrorKind::Auth,
            "The mail server rejected the username or password",
        ),
        (_, Some(550..=554)) => (
            ProviderErrorKind::Policy,
            "The mail server refused the message",
        ),
        (_, Some(421 | 450 | 451 | 452 | 454)) => (
            ProviderErrorKind::Transient,
            "The mail server is temporarily unavailable",
        ),
        _ if AUTH_PHRASES.iter().any(|p| lowered.contains(p)) => (
            ProviderErrorKind::Auth,
            "The mail server rejected the username or password",
        ),
        (TransportErrorKind::Network, _) => (
            ProviderErrorKind::Transient,
            "Could not connect to the mail server",
        ),
        _ if NETWORK_PHRASES.iter().any(|p| lowered.contains(p)) => (
            ProviderErrorKind::Transient,
            "Could not connect to the mail server",
        ),
        (TransportErrorKind::Tls, _) => (
            ProviderErrorKind::Unknown,
            "A secure connection to the mail server could not be established",
        ),
        _ => (ProviderErrorKind::Unknown, "The mail server reported an error"),
    };
    ProviderError::new(kind, message, detail)
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

    fn reply(code: u16, message: &str) -> TransportError {
        TransportError::reply(code, message)
    }

    #[test]
    fn generic_reply_codes() {
        for (code, kind) in [
            (535, ProviderErrorKind::Auth),
            (534, ProviderErrorKind::Auth),
            (530, ProviderErrorKind::Auth),
            (550, ProviderErrorKind::Policy),
            (552, ProviderErrorKind::Policy),
            (554, ProviderErrorKind::Policy),
            (421, ProviderErrorKind::Transient),
            (451, ProviderErrorKind::Transient),
            (454, ProviderErrorKind::Transient),
            (500, ProviderErrorKind::Unknown),
        ] {
            assert_eq!(classify(&[], &reply(code, "x")).kind, kind, "code {code}");
        }
    }

    #[test]
    fn network_failures_are_transient() {
        let timeout = TransportError::new(TransportErrorKind::Timeout, "deadline");
        assert_eq!(classify(&[], &timeout).kind, ProviderErrorKind::Transient);

        let refused = TransportError::new(TransportErrorKind::Protocol, "Connection refused");
        assert_eq!(classify(&[], &refused).kind, ProviderErrorKind::Transient);
    }

    #[test]
    fn imap_auth_text() {
        let err = TransportError::new(
            TransportErrorKind::Protocol,
            "NO [AUTHENTICATIONFAILED] Invalid credentials",
        );
        assert_eq!(classify(&[], &err).kind, ProviderErrorKind::Auth);
    }

    #[test]
    fn vendor_table_wins() {
        const TABLE: &[ErrorRule] = &[ErrorRule::code_text(
            550,
            "daily sending quota",
            ProviderErrorKind::Transient,
            "Daily sending limit reached",
        )];
        let err = reply(550, "5.4.5 Daily sending quota exceeded");
        let classified = classify(TABLE, &err);
        assert_eq!(classified.kind, ProviderErrorKind::Transient);
        assert_eq!(classified.message, "Daily sending limit reached");
        assert!(classified.detail.contains("550"));

        let other = classify(TABLE, &reply(550, "mailbox unavailable"));
        assert_eq!(other.kind, ProviderErrorKind::Policy);
    }
}
