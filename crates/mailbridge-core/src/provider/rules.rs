//! Per-vendor knowledge consumed by the generic adapter.

use std::collections::HashMap;

use crate::account::{Account, AuthMethod, Security, Vendor};
use crate::sync::Label;
use crate::{Error, Result};

use super::SpecialFolder;
use super::error::ErrorRule;

/// Server settings a vendor supplies when the account leaves them empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDefaults {
    /// Hostname.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
}

impl ServerDefaults {
    /// Creates server defaults.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, security: Security) -> Self {
        Self {
            host: host.into(),
            port,
            security,
        }
    }
}

/// Vendor-specific rules.
pub trait VendorRules: Send + Sync {
    /// The vendor described.
    fn vendor(&self) -> Vendor;

    /// Email domains served by default.
    fn domains(&self) -> &'static [&'static str];

    /// IMAP defaults for an email domain, if the vendor has fixed servers.
    fn imap_defaults(&self, domain: &str) -> Option<ServerDefaults>;

    /// SMTP defaults for an email domain.
    fn smtp_defaults(&self, domain: &str) -> Option<ServerDefaults>;

    /// Accepted authentication methods.
    fn auth_methods(&self) -> &'static [AuthMethod];

    /// Error table consulted before generic classification.
    fn error_rules(&self) -> &'static [ErrorRule] {
        &[]
    }

    /// Whether the IMAP server expects an `ID` announcement.
    fn announce_client_id(&self) -> bool {
        false
    }

    /// Physical names of special folders.
    fn special_folders(&self) -> HashMap<SpecialFolder, String> {
        SpecialFolder::standard_names()
    }

    /// Maps a vendor-specific flag or keyword to a label.
    fn map_flag(&self, _flag: &str) -> Option<Label> {
        None
    }

    /// Vendor-specific account checks, such as password formats.
    ///
    /// # Errors
    ///
    /// Returns a configuration or authentication error describing the
    /// problem.
    fn check_account(&self, _account: &Account) -> Result<()> {
        Ok(())
    }

    /// Checks the account against this vendor's constraints.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unsupported auth method or any
    /// error from [`VendorRules::check_account`].
    fn validate(&self, account: &Account) -> Result<()> {
        if !self.auth_methods().contains(&account.auth_method) {
            return Err(Error::Config(format!(
                "{} does not support {} authentication",
                self.vendor().display_name(),
                account.auth_method.as_str()
            )));
        }
        self.check_account(account)
    }
}
