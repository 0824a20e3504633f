//! SASL initial responses for IMAP `AUTHENTICATE` and SMTP `AUTH`.
//!
//! - PLAIN (RFC 4616) for password and app-password accounts
//! - XOAUTH2 (Google/Microsoft) for `OAuth2` accounts
//! - OAUTHBEARER (RFC 7628) for servers that advertise it

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;

/// A SASL mechanism this crate can produce initial responses for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// `PLAIN`: username and password.
    Plain,
    /// `XOAUTH2`: bearer token, Google/Microsoft dialect.
    XOAuth2,
    /// `OAUTHBEARER`: bearer token, RFC 7628.
    OAuthBearer,
}

impl Mechanism {
    /// Returns the mechanism name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::XOAuth2 => "XOAUTH2",
            Self::OAuthBearer => "OAUTHBEARER",
        }
    }

    /// Returns true for token-based mechanisms.
    #[must_use]
    pub const fn is_oauth(self) -> bool {
        matches!(self, Self::XOAuth2 | Self::OAuthBearer)
    }

    /// Builds the base64 initial response for this mechanism.
    ///
    /// `secret` is the password for `PLAIN` and the access token otherwise.
    #[must_use]
    pub fn initial_response(self, user: &str, secret: &str) -> String {
        match self {
            Self::Plain => plain_response(user, secret),
            Self::XOAuth2 => xoauth2_response(user, secret),
            Self::OAuthBearer => oauthbearer_response(user, secret),
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generates a PLAIN initial response: base64 of `\0<username>\0<password>`.
///
/// The authorization identity is left empty, meaning "same as username".
///
/// ```
/// use mailbridge_oauth::sasl::plain_response;
///
/// let response = plain_response("user@example.com", "password123");
/// ```
#[must_use]
pub fn plain_response(username: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{username}\0{password}"))
}

/// Generates an OAUTHBEARER initial response:
/// base64 of `n,a=<user>,\x01auth=Bearer <token>\x01\x01`.
#[must_use]
pub fn oauthbearer_response(user: &str, token: &str) -> String {
    STANDARD.encode(format!("n,a={user},\x01auth=Bearer {token}\x01\x01"))
}

/// Generates an XOAUTH2 initial response:
/// base64 of `user=<user>\x01auth=Bearer <token>\x01\x01`.
///
/// ```
/// use mailbridge_oauth::sasl::xoauth2_response;
///
/// let response = xoauth2_response("user@gmail.com", "ya29.a0...");
/// ```
#[must_use]
pub fn xoauth2_response(user: &str, token: &str) -> String {
    STANDARD.encode(format!("user={user}\x01auth=Bearer {token}\x01\x01"))
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

    fn decode(response: &str) -> String {
        String::from_utf8(STANDARD.decode(response).unwrap()).unwrap()
    }

    #[test]
    fn test_plain_format() {
        assert_eq!(decode(&plain_response("test", "pass")), "\0test\0pass");
        assert_eq!(
            decode(&plain_response("user", "pass@word!")),
            "\0user\0pass@word!"
        );
    }

    #[test]
    fn test_oauthbearer_format() {
        assert_eq!(
            decode(&oauthbearer_response("test@test.com", "abc")),
            "n,a=test@test.com,\x01auth=Bearer abc\x01\x01"
        );
    }

    #[test]
    fn test_xoauth2_format() {
        assert_eq!(
            decode(&xoauth2_response("test@test.com", "abc")),
            "user=test@test.com\x01auth=Bearer abc\x01\x01"
        );
    }

    #[test]
    fn test_mechanism_dispatch() {
        assert_eq!(
            Mechanism::XOAuth2.initial_response("u@x.com", "t"),
            xoauth2_response("u@x.com", "t")
        );
        assert_eq!(
            Mechanism::Plain.initial_response("u", "p"),
            plain_response("u", "p")
        );
        assert_eq!(Mechanism::OAuthBearer.to_string(), "OAUTHBEARER");
        assert!(Mechanism::XOAuth2.is_oauth());
        assert!(!Mechanism::Plain.is_oauth());
    }

    #[test]
    fn test_responses_hide_credentials() {
        let response = xoauth2_response("user@example.com", "token");
        assert!(!response.contains("user@example.com"));
        assert!(!response.contains("token"));
    }
}
