//! Tencent QQ Mail.

use std::collections::HashMap;

use crate::account::{Account, AuthMethod, Security, Vendor};
use crate::provider::{ErrorRule, ProviderErrorKind, ServerDefaults, SpecialFolder, VendorRules};
use crate::{Error, Result};

const ERRORS: &[ErrorRule] = &[
    ErrorRule::text(
        "open smtp flag first",
        ProviderErrorKind::Auth,
        "IMAP/SMTP is disabled; enable it in the QQ Mail settings",
    ),
    ErrorRule::text(
        "login fail",
        ProviderErrorKind::Auth,
        "QQ Mail rejected the login; use the authorization code, not the QQ password",
    ),
    ErrorRule::text(
        "frequency limited",
        ProviderErrorKind::Transient,
        "QQ Mail is rate limiting this account",
    ),
    ErrorRule::text(
        "mailbox is full",
        ProviderErrorKind::Policy,
        "The recipient's mailbox is full",
    ),
];

/// QQ Mail rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct Qq;

/// Returns true for a 16-letter QQ Mail authorization code.
#[must_use]
pub fn is_authorization_code(code: &str) -> bool {
    code.len() == 16 && code.bytes().all(|b| b.is_ascii_alphabetic())
}

impl VendorRules for Qq {
    fn vendor(&self) -> Vendor {
        Vendor::Qq
    }

    fn domains(&self) -> &'static [&'static str] {
        &["qq.com", "foxmail.com", "vip.qq.com"]
    }

    fn imap_defaults(&self, _domain: &str) -> Option<ServerDefaults> {
        Some(ServerDefaults::new("imap.qq.com", 993, Security::Tls))
    }

    fn smtp_defaults(&self, _domain: &str) -> Option<ServerDefaults> {
        Some(ServerDefaults::new("smtp.qq.com", 465, Security::Tls))
    }

    fn auth_methods(&self) -> &'static [AuthMethod] {
        &[AuthMethod::Password]
    }

    fn error_rules(&self) -> &'static [ErrorRule] {
        ERRORS
    }

    fn special_folders(&self) -> HashMap<SpecialFolder, String> {
        [
            (SpecialFolder::Inbox, "INBOX"),
            (SpecialFolder::Sent, "Sent Messages"),
            (SpecialFolder::Drafts, "Drafts"),
            (SpecialFolder::Trash, "Deleted Messages"),
            (SpecialFolder::Junk, "Junk"),
            (SpecialFolder::Archive, "Archive"),
        ]
        .into_iter()
        .map(|(f, n)| (f, n.to_string()))
        .collect()
    }

    fn check_account(&self, account: &Account) -> Result<()> {
        if is_authorization_code(account.password.trim()) {
            Ok(())
        } else {
            Err(Error::Authentication(
                "QQ Mail requires the 16-letter authorization code from the mailbox settings"
                    .into(),
            ))
        }
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
    use crate::account::UserId;

    #[test]
    fn authorization_code_format() {
        assert!(is_authorization_code("abcdefghijklmnop"));
        assert!(!is_authorization_code("abcdefghijklmno"));
        assert!(!is_authorization_code("abcdefgh12345678"));
    }

    #[test]
    fn rejects_oauth_and_plain_passwords() {
        let mut account = Account::with_email(UserId::new("u"), "123@qq.com");
        account.password = "my-qq-password".into();
        assert!(matches!(Qq.validate(&account), Err(Error::Authentication(_))));

        account.auth_method = AuthMethod::OAuth2;
        assert!(matches!(Qq.validate(&account), Err(Error::Config(_))));
    }
}
