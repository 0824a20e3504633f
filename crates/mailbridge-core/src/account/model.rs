//! Account model types.

use chrono::{DateTime, Utc};
use mailbridge_oauth::Token;
use serde::{Deserialize, Serialize};

/// Unique identifier for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub i64);

impl AccountId {
    /// Create a new account ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the user owning accounts, sends and uploads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Create a new user ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mail vendors with dedicated handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// Google Gmail.
    Gmail,
    /// Microsoft Outlook / Hotmail / Live.
    Outlook,
    /// Tencent QQ Mail.
    Qq,
    /// NetEase 163 / 126 / yeah.net.
    NetEase,
    /// Apple iCloud Mail.
    ICloud,
    /// Any other IMAP/SMTP server.
    Custom,
}

impl Vendor {
    /// All vendors, in registry order.
    pub const ALL: [Self; 6] = [
        Self::Gmail,
        Self::Outlook,
        Self::Qq,
        Self::NetEase,
        Self::ICloud,
        Self::Custom,
    ];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
            Self::Qq => "qq",
            Self::NetEase => "netease",
            Self::ICloud => "icloud",
            Self::Custom => "custom",
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Gmail => "Gmail",
            Self::Outlook => "Outlook",
            Self::Qq => "QQ Mail",
            Self::NetEase => "NetEase Mail",
            Self::ICloud => "iCloud Mail",
            Self::Custom => "Custom IMAP/SMTP",
        }
    }

    /// Parses a stable name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an account authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Password, app-specific password or authorization code.
    #[default]
    Password,
    /// `OAuth2` bearer token (XOAUTH2).
    #[serde(rename = "oauth2")]
    OAuth2,
}

impl AuthMethod {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::OAuth2 => "oauth2",
        }
    }

    /// Parses a stable name, defaulting to password.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("oauth2") {
            Self::OAuth2
        } else {
            Self::Password
        }
    }
}

/// Security/encryption mode for connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// No encryption (not recommended).
    None,
    /// Implicit TLS (connect directly with TLS).
    #[default]
    Tls,
    /// STARTTLS upgrade after plaintext connect.
    #[serde(rename = "starttls")]
    StartTls,
}

impl Security {
    /// Get display name for the security mode.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::None => "None (insecure)",
            Self::Tls => "SSL/TLS",
            Self::StartTls => "STARTTLS",
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Tls => "tls",
            Self::StartTls => "starttls",
        }
    }

    /// Parses a stable name, defaulting to TLS.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "none" => Self::None,
            "starttls" => Self::StartTls,
            _ => Self::Tls,
        }
    }
}

/// IMAP server configuration. Empty fields are filled from vendor defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImapConfig {
    /// Server hostname.
    pub host: String,
    /// Server port (0 = default for the security mode).
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Username for authentication (empty = email address).
    pub username: String,
}

impl ImapConfig {
    /// Get default port for the security mode.
    #[must_use]
    pub const fn default_port(security: Security) -> u16 {
        match security {
            Security::None | Security::StartTls => 143,
            Security::Tls => 993,
        }
    }
}

/// SMTP server configuration. Empty fields are filled from vendor defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Server hostname.
    pub host: String,
    /// Server port (0 = default for the security mode).
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Username for authentication (empty = email address).
    pub username: String,
}

impl SmtpConfig {
    /// Get default port for the security mode.
    #[must_use]
    pub const fn default_port(security: Security) -> u16 {
        match security {
            Security::None => 25,
            Security::StartTls => 587,
            Security::Tls => 465,
        }
    }
}

/// Stored `OAuth2` token bundle of an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokens {
    /// Current access token.
    pub access_token: String,
    /// Refresh token; without it the user must authorize again.
    pub refresh_token: Option<String>,
    /// Access token expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Registered client ID used for refresh.
    pub client_id: String,
    /// Client secret, for confidential clients.
    pub client_secret: Option<String>,
    /// Granted scope.
    pub scope: Option<String>,
}

impl OAuthTokens {
    /// Converts to the token type understood by the token endpoint client.
    #[must_use]
    pub fn to_token(&self) -> Token {
        Token {
            access_token: self.access_token.clone(),
            token_type: "Bearer".to_string(),
            expires_at: self.expires_at,
            refresh_token: self.refresh_token.clone(),
            scope: self.scope.clone(),
        }
    }

    /// Applies a refreshed token, keeping the old refresh token if the
    /// server did not rotate it.
    pub fn apply(&mut self, token: Token) {
        self.access_token = token.access_token;
        self.expires_at = token.expires_at;
        if let Some(refresh) = token.refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = Some(refresh);
        }
        if token.scope.is_some() {
            self.scope = token.scope;
        }
    }
}

/// Email account configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier (None for unsaved accounts).
    pub id: Option<AccountId>,
    /// Owning user.
    pub user_id: UserId,
    /// Display name for the account.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Explicit vendor; detected from the email domain when `None`.
    pub vendor: Option<Vendor>,
    /// Authentication method.
    pub auth_method: AuthMethod,
    /// IMAP configuration.
    pub imap: ImapConfig,
    /// SMTP configuration.
    pub smtp: SmtpConfig,
    /// Password, app-specific password or authorization code.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    /// `OAuth2` token bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthTokens>,
    /// Whether this is the user's default account.
    pub is_default: bool,
}

impl Account {
    /// Create an account for an email address owned by a user.
    ///
    /// Server settings are left empty; the provider adapter fills in
    /// vendor defaults at connection time.
    #[must_use]
    pub fn with_email(user_id: UserId, email: &str) -> Self {
        let email = email.trim();
        let name = email
            .rsplit_once('@')
            .map_or_else(String::new, |(_, domain)| domain.to_ascii_lowercase());
        Self {
            user_id,
            name,
            email: email.to_string(),
            ..Default::default()
        }
    }

    /// Returns the lowercase domain of the email address.
    #[must_use]
    pub fn domain(&self) -> Option<String> {
        self.email
            .rsplit_once('@')
            .map(|(_, d)| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
    }

    /// Returns the account ID or a configuration error for unsaved accounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the account has not been saved.
    pub fn require_id(&self) -> crate::Result<AccountId> {
        self.id
            .ok_or_else(|| crate::Error::Config(format!("account {} has no id", self.email)))
    }
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

    mod account_id_tests {
        use super::*;

        #[test]
        fn display() {
            let id = AccountId::new(123);
            assert_eq!(format!("{id}"), "123");
        }
    }

    mod vendor_tests {
        use super::*;

        #[test]
        fn names_round_trip() {
            for vendor in Vendor::ALL {
                assert_eq!(Vendor::from_name(vendor.as_str()), Some(vendor));
            }
            assert_eq!(Vendor::from_name(" NetEase "), Some(Vendor::NetEase));
            assert_eq!(Vendor::from_name("yahoo"), None);
        }

        #[test]
        fn serde_names() {
            assert_eq!(serde_json::to_string(&Vendor::ICloud).unwrap(), "\"icloud\"");
            assert_eq!(
                serde_json::from_str::<AuthMethod>("\"oauth2\"").unwrap(),
                AuthMethod::OAuth2
            );
            assert_eq!(
                serde_json::from_str::<Security>("\"starttls\"").unwrap(),
                Security::StartTls
            );
        }
    }

    mod security_tests {
        use super::*;

        #[test]
        fn default_is_tls() {
            assert_eq!(Security::default(), Security::Tls);
        }

        #[test]
        fn default_ports() {
            assert_eq!(ImapConfig::default_port(Security::Tls), 993);
            assert_eq!(ImapConfig::default_port(Security::StartTls), 143);
            assert_eq!(SmtpConfig::default_port(Security::Tls), 465);
            assert_eq!(SmtpConfig::default_port(Security::StartTls), 587);
            assert_eq!(SmtpConfig::default_port(Security::None), 25);
        }

        #[test]
        fn names_round_trip() {
            for s in [Security::None, Security::Tls, Security::StartTls] {
                assert_eq!(Security::from_name(s.as_str()), s);
            }
        }
    }

    mod oauth_tests {
        use super::*;

        #[test]
        fn apply_keeps_refresh_token_when_not_rotated() {
            let mut tokens = OAuthTokens {
                access_token: "old".into(),
                refresh_token: Some("r1".into()),
                client_id: "c".into(),
                ..Default::default()
            };
            tokens.apply(Token::bearer("new"));
            assert_eq!(tokens.access_token, "new");
            assert_eq!(tokens.refresh_token.as_deref(), Some("r1"));

            tokens.apply(Token::bearer("newer").with_refresh_token("r2"));
            assert_eq!(tokens.refresh_token.as_deref(), Some("r2"));
        }
    }

    mod account_tests {
        use super::*;

        #[test]
        fn with_email_sets_domain_name() {
            let account = Account::with_email(UserId::new("u1"), " User@Example.ORG ");
            assert_eq!(account.email, "User@Example.ORG");
            assert_eq!(account.name, "example.org");
            assert_eq!(account.domain().as_deref(), Some("example.org"));
            assert!(account.imap.host.is_empty());
            assert!(account.require_id().is_err());
        }
    }
}
