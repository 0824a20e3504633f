//! Arbitrary IMAP/SMTP servers.

use crate::account::{Account, AuthMethod, Vendor};
use crate::provider::{ServerDefaults, VendorRules};
use crate::{Error, Result};

/// Rules for user-configured servers. Nothing is assumed about the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct Custom;

impl VendorRules for Custom {
    fn vendor(&self) -> Vendor {
        Vendor::Custom
    }

    fn domains(&self) -> &'static [&'static str] {
        &[]
    }

    fn imap_defaults(&self, _domain: &str) -> Option<ServerDefaults> {
        None
    }

    fn smtp_defaults(&self, _domain: &str) -> Option<ServerDefaults> {
        None
    }

    fn auth_methods(&self) -> &'static [AuthMethod] {
        &[AuthMethod::Password, AuthMethod::OAuth2]
    }

    fn check_account(&self, account: &Account) -> Result<()> {
        if account.imap.host.trim().is_empty() || account.smtp.host.trim().is_empty() {
            return Err(Error::Config(
                "custom accounts need both an IMAP and an SMTP server".into(),
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
    fn requires_hosts() {
        let mut account = Account::with_email(UserId::new("u"), "me@example.org");
        account.password = "pw".into();
        assert!(matches!(Custom.validate(&account), Err(Error::Config(_))));

        account.imap.host = "mail.example.org".into();
        account.smtp.host = "mail.example.org".into();
        assert!(Custom.validate(&account).is_ok());
    }
}
