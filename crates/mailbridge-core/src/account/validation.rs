//! Account validation.

use super::model::{Account, AuthMethod};
use mailbridge_mime::Address;

/// Validation error for account configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Owning user is missing.
    EmptyUserId,
    /// Email address is empty.
    EmptyEmail,
    /// Email address format is invalid.
    InvalidEmail,
    /// Password auth without a stored password.
    EmptyPassword,
    /// `OAuth2` auth without a token bundle.
    MissingOAuthTokens,
    /// `OAuth2` token bundle without a client ID.
    MissingOAuthClientId,
    /// IMAP port set without a host.
    ImapPortWithoutHost,
    /// SMTP port set without a host.
    SmtpPortWithoutHost,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::EmptyUserId => "Owning user is required",
            Self::EmptyEmail => "Email address is required",
            Self::InvalidEmail => "Invalid email address format",
            Self::EmptyPassword => "Password or authorization code is required",
            Self::MissingOAuthTokens => "OAuth2 accounts need an authorized token",
            Self::MissingOAuthClientId => "OAuth2 client ID is required",
            Self::ImapPortWithoutHost => "IMAP port requires an IMAP server",
            Self::SmtpPortWithoutHost => "SMTP port requires an SMTP server",
        }
    }

    /// Get the field name this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptyUserId => "user_id",
            Self::EmptyEmail | Self::InvalidEmail => "email",
            Self::EmptyPassword => "password",
            Self::MissingOAuthTokens | Self::MissingOAuthClientId => "oauth",
            Self::ImapPortWithoutHost => "imap_host",
            Self::SmtpPortWithoutHost => "smtp_host",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ValidationError {}

/// Result of validating an account.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validate an account configuration.
///
/// Server hosts may be empty (vendor defaults apply); vendor-specific rules
/// such as app-password formats are checked by the provider adapter.
///
/// # Errors
///
/// Returns a vector of `ValidationError` if any fields are invalid.
pub fn validate_account(account: &Account) -> ValidationResult {
    let mut errors = Vec::new();

    if account.user_id.as_str().trim().is_empty() {
        errors.push(ValidationError::EmptyUserId);
    }

    if account.email.trim().is_empty() {
        errors.push(ValidationError::EmptyEmail);
    } else if Address::parse(&account.email).is_err() || account.email.contains('<') {
        errors.push(ValidationError::InvalidEmail);
    }

    match account.auth_method {
        AuthMethod::Password => {
            if account.password.is_empty() {
                errors.push(ValidationError::EmptyPassword);
            }
        }
        AuthMethod::OAuth2 => match &account.oauth {
            None => errors.push(ValidationError::MissingOAuthTokens),
            Some(tokens) if tokens.client_id.trim().is_empty() => {
                errors.push(ValidationError::MissingOAuthClientId);
            }
            Some(_) => {}
        },
    }

    if account.imap.port != 0 && account.imap.host.trim().is_empty() {
        errors.push(ValidationError::ImapPortWithoutHost);
    }
    if account.smtp.port != 0 && account.smtp.host.trim().is_empty() {
        errors.push(ValidationError::SmtpPortWithoutHost);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
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
    use crate::account::{OAuthTokens, UserId};

    #[test]
    fn test_validate_empty_account() {
        let errors = validate_account(&Account::default()).unwrap_err();
        assert!(errors.contains(&ValidationError::EmptyUserId));
        assert!(errors.contains(&ValidationError::EmptyEmail));
        assert!(errors.contains(&ValidationError::EmptyPassword));
    }

    #[test]
    fn test_validate_invalid_email() {
        let mut account = Account::with_email(UserId::new("u"), "user@example");
        account.password = "secret".into();
        assert_eq!(
            validate_account(&account).unwrap_err(),
            vec![ValidationError::InvalidEmail]
        );

        account.email = "Name <user@example.com>".into();
        assert!(validate_account(&account).is_err());
    }

    #[test]
    fn test_validate_password_account() {
        let mut account = Account::with_email(UserId::new("u"), "test@gmail.com");
        account.password = "secret".to_string();
        assert!(validate_account(&account).is_ok());
    }

    #[test]
    fn test_validate_oauth_account() {
        let mut account = Account::with_email(UserId::new("u"), "test@outlook.com");
        account.auth_method = AuthMethod::OAuth2;
        assert_eq!(
            validate_account(&account).unwrap_err(),
            vec![ValidationError::MissingOAuthTokens]
        );

        account.oauth = Some(OAuthTokens::default());
        assert_eq!(
            validate_account(&account).unwrap_err()[0].field(),
            "oauth"
        );

        account.oauth = Some(OAuthTokens {
            client_id: "client".into(),
            ..Default::default()
        });
        assert!(validate_account(&account).is_ok());
    }

    #[test]
    fn test_port_without_host() {
        let mut account = Account::with_email(UserId::new("u"), "a@example.com");
        account.password = "p".into();
        account.smtp.port = 2525;
        assert_eq!(
            validate_account(&account).unwrap_err(),
            vec![ValidationError::SmtpPortWithoutHost]
        );
    }
}
