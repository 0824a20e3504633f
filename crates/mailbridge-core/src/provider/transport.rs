//! Raw IMAP/SMTP session primitives.
//!
//! Implementations own the protocol state machines; the core only drives
//! sessions and interprets their failures.

use async_trait::async_trait;
use mailbridge_oauth::sasl::Mechanism;
use thiserror::Error;

use crate::account::Security;

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connection security.
    pub security: Security,
    /// Send an IMAP `ID` command before selecting folders.
    pub announce_client_id: bool,
}

/// Credentials handed to the transport.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username and password (or app password / authorization code).
    Password {
        /// Login name.
        username: String,
        /// Secret.
        password: String,
    },
    /// `OAuth2` bearer token.
    OAuth2 {
        /// Login name.
        username: String,
        /// Current access token.
        access_token: String,
    },
}

impl Credentials {
    /// Login name.
    #[must_use]
    pub fn username(&self) -> &str {
        match self {
            Self::Password { username, .. } | Self::OAuth2 { username, .. } => username,
        }
    }

    /// SASL mechanism to authenticate with.
    #[must_use]
    pub const fn mechanism(&self) -> Mechanism {
        match self {
            Self::Password { .. } => Mechanism::Plain,
            Self::OAuth2 { .. } => Mechanism::XOAuth2,
        }
    }

    /// Base64 SASL initial response.
    #[must_use]
    pub fn initial_response(&self) -> String {
        match self {
            Self::Password { username, password } => {
                self.mechanism().initial_response(username, password)
            }
            Self::OAuth2 {
                username,
                access_token,
            } => self.mechanism().initial_response(username, access_token),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username())
            .field("mechanism", &self.mechanism())
            .finish_non_exhaustive()
    }
}

/// Broad category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// No response in time.
    Timeout,
    /// Connection could not be established or was dropped.
    Network,
    /// TLS negotiation failed.
    Tls,
    /// Server replied with an error status.
    Reply,
    /// Unexpected protocol exchange.
    Protocol,
}

/// Unclassified failure reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render(self))]
pub struct TransportError {
    /// Failure category.
    pub kind: TransportErrorKind,
    /// SMTP reply code, if any.
    pub code: Option<u16>,
    /// Server text or local description.
    pub message: String,
}

fn render(e: &TransportError) -> String {
    match e.code {
        Some(code) => format!("{code} {}", e.message),
        None => e.message.clone(),
    }
}

impl TransportError {
    /// Creates an error without a reply code.
    #[must_use]
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Creates an error from a server reply.
    #[must_use]
    pub fn reply(code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Reply,
            code: Some(code),
            message: message.into(),
        }
    }
}

/// Result of a transport call.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// One message returned by an IMAP fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Folder-local UID.
    pub uid: u32,
    /// Raw flags and keywords, such as `\Seen` or `$Junk`.
    pub flags: Vec<String>,
    /// Raw RFC 5322 bytes (headers at minimum).
    pub raw: Vec<u8>,
}

/// An authenticated SMTP submission session.
#[async_trait]
pub trait SmtpSession: Send {
    /// Transmits one message to the given envelope recipients.
    async fn send(&mut self, from: &str, recipients: &[String], data: &[u8])
    -> TransportResult<()>;

    /// Ends the session.
    async fn quit(&mut self) -> TransportResult<()>;
}

/// An authenticated IMAP retrieval session.
#[async_trait]
pub trait ImapSession: Send {
    /// Fetches messages in `folder` with UID greater than `uid`.
    async fn fetch_since(&mut self, folder: &str, uid: u32) -> TransportResult<Vec<FetchedMessage>>;

    /// Ends the session.
    async fn logout(&mut self) -> TransportResult<()>;
}

/// Opens authenticated sessions.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Connects and authenticates to an SMTP server.
    async fn open_smtp(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> TransportResult<Box<dyn SmtpSession>>;

    /// Connects and authenticates to an IMAP server.
    async fn open_imap(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> TransportResult<Box<dyn ImapSession>>;
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
    fn credentials_pick_mechanism() {
        let password = Credentials::Password {
            username: "u@example.com".into(),
            password: "pw".into(),
        };
        assert_eq!(password.mechanism(), Mechanism::Plain);

        let oauth = Credentials::OAuth2 {
            username: "u@example.com".into(),
            access_token: "tok".into(),
        };
        assert_eq!(oauth.mechanism(), Mechanism::XOAuth2);
        assert_eq!(
            oauth.initial_response(),
            mailbridge_oauth::sasl::xoauth2_response("u@example.com", "tok")
        );
    }

    #[test]
    fn debug_hides_secrets() {
        let creds = Credentials::Password {
            username: "u".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(
            TransportError::reply(535, "5.7.8 bad credentials").to_string(),
            "535 5.7.8 bad credentials"
        );
    }
}
