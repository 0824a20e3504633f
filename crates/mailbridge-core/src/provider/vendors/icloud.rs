//! Apple iCloud Mail.

use std::collections::HashMap;

use crate::account::{Account, AuthMethod, Security, Vendor};
use crate::provider::{ErrorRule, ProviderErrorKind, ServerDefaults, SpecialFolder, VendorRules};
use crate::{Error, Result};

const ERRORS: &[ErrorRule] = &[
    ErrorRule::code(
        535,
        ProviderErrorKind::Auth,
        "iCloud rejected the login; create an app-specific password at appleid.apple.com",
    ),
    ErrorRule::text(
        "[cs01]",
        ProviderErrorKind::Policy,
        "iCloud rejected the message",
    ),
    ErrorRule::text(
        "[hm08]",
        ProviderErrorKind::Policy,
        "iCloud rejected the message as suspected spam",
    ),
];

/// iCloud rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct ICloud;

/// Returns true for an app-specific password of the form
/// `xxxx-xxxx-xxxx-xxxx`.
#[must_use]
pub fn is_app_password(password: &str) -> bool {
    let groups: Vec<&str> = password.split('-').collect();
    groups.len() == 4
        && groups
            .iter()
            .all(|g| g.len() == 4 && g.bytes().all(|b| b.is_ascii_alphabetic()))
}

impl VendorRules for ICloud {
    fn vendor(&self) -> Vendor {
        Vendor::ICloud
    }

    fn domains(&self) -> &'static [&'static str] {
        &["icloud.com", "me.com", "mac.com"]
    }

    fn imap_defaults(&self, _domain: &str) -> Option<ServerDefaults> {
        Some(ServerDefaults::new("imap.mail.me.com", 993, Security::Tls))
    }

    fn smtp_defaults(&self, _domain: &str) -> Option<ServerDefaults> {
        Some(ServerDefaults::new(
            "smtp.mail.me.com",
            587,
            Security::StartTls,
        ))
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
        if is_app_password(account.password.trim()) {
            Ok(())
        } else {
            Err(Error::Authentication(
                "iCloud requires an app-specific password (xxxx-xxxx-xxxx-xxxx)".into(),
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
    fn app_password_format() {
        assert!(is_app_password("abcd-efgh-ijkl-mnop"));
        assert!(!is_app_password("abcdefghijklmnop"));
        assert!(!is_app_password("abc-defg-hijk-lmno"));
        assert!(!is_app_password("abcd-efgh-ijkl-mnop-qrst"));
        assert!(!is_app_password("ab1d-efgh-ijkl-mnop"));
    }

    #[test]
    fn validate_checks_password() {
        let mut account = Account::with_email(UserId::new("u"), "me@icloud.com");
        account.password = "abcdefghijklmnop".into();
        assert!(matches!(
            ICloud.validate(&account),
            Err(Error::Authentication(_))
        ));

        account.password = "abcd-efgh-ijkl-mnop".into();
        assert!(ICloud.validate(&account).is_ok());
    }
}
