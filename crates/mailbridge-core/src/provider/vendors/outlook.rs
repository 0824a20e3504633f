//! Microsoft Outlook.com and Microsoft 365.

use std::collections::HashMap;

use crate::account::{Account, AuthMethod, Security, Vendor};
use crate::provider::{ErrorRule, ProviderErrorKind, ServerDefaults, SpecialFolder, VendorRules};
use crate::{Error, Result};

/// Consumer domains where Microsoft has disabled basic authentication.
const CONSUMER_DOMAINS: &[&str] = &["outlook.com", "hotmail.com", "live.com", "msn.com"];

const ERRORS: &[ErrorRule] = &[
    ErrorRule::text(
        "basic authentication is disabled",
        ProviderErrorKind::Auth,
        "Outlook no longer accepts passwords; sign in with Microsoft",
    ),
    ErrorRule::code_text(
        535,
        "5.7.139",
        ProviderErrorKind::Auth,
        "Outlook no longer accepts passwords; sign in with Microsoft",
    ),
    ErrorRule::code_text(
        535,
        "5.7.3",
        ProviderErrorKind::Auth,
        "Outlook did not accept the credentials",
    ),
    ErrorRule::text(
        "sendasdenied",
        ProviderErrorKind::Policy,
        "This account is not allowed to send as the given address",
    ),
    ErrorRule::text(
        "outboundspam",
        ProviderErrorKind::Policy,
        "Outlook blocked the message as suspected spam",
    ),
    ErrorRule::code_text(
        550,
        "5.7.520",
        ProviderErrorKind::Policy,
        "Outlook blocked the message as suspected spam",
    ),
    ErrorRule::code(
        432,
        ProviderErrorKind::Transient,
        "Outlook is temporarily throttling connections",
    ),
];

/// Outlook rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct Outlook;

impl VendorRules for Outlook {
    fn vendor(&self) -> Vendor {
        Vendor::Outlook
    }

    fn domains(&self) -> &'static [&'static str] {
        CONSUMER_DOMAINS
    }

    fn imap_defaults(&self, _domain: &str) -> Option<ServerDefaults> {
        Some(ServerDefaults::new(
            "outlook.office365.com",
            993,
            Security::Tls,
        ))
    }

    fn smtp_defaults(&self, _domain: &str) -> Option<ServerDefaults> {
        Some(ServerDefaults::new(
            "smtp.office365.com",
            587,
            Security::StartTls,
        ))
    }

    fn auth_methods(&self) -> &'static [AuthMethod] {
        &[AuthMethod::Password, AuthMethod::OAuth2]
    }

    fn error_rules(&self) -> &'static [ErrorRule] {
        ERRORS
    }

    fn special_folders(&self) -> HashMap<SpecialFolder, String> {
        [
            (SpecialFolder::Inbox, "INBOX"),
            (SpecialFolder::Sent, "Sent"),
            (SpecialFolder::Drafts, "Drafts"),
            (SpecialFolder::Trash, "Deleted"),
            (SpecialFolder::Junk, "Junk"),
            (SpecialFolder::Archive, "Archive"),
        ]
        .into_iter()
        .map(|(f, n)| (f, n.to_string()))
        .collect()
    }

    fn check_account(&self, account: &Account) -> Result<()> {
        let consumer = account
            .domain()
            .is_some_and(|d| CONSUMER_DOMAINS.contains(&d.as_str()));
        if consumer && account.auth_method != AuthMethod::OAuth2 {
            return Err(Error::Config(
                "Outlook.com accounts must sign in with Microsoft (OAuth2)".into(),
            ));
        }
        Ok(())
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
    fn consumer_domains_require_oauth() {
        let mut account = Account::with_email(UserId::new("u"), "me@hotmail.com");
        account.password = "pw".into();
        assert!(matches!(Outlook.validate(&account), Err(Error::Config(_))));

        account.auth_method = AuthMethod::OAuth2;
        assert!(Outlook.validate(&account).is_ok());
    }

    #[test]
    fn business_domains_may_use_password() {
        let mut account = Account::with_email(UserId::new("u"), "me@contoso.example");
        account.password = "pw".into();
        assert!(Outlook.validate(&account).is_ok());
    }
}
