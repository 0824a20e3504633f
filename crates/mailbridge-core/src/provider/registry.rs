//! Vendor resolution and adapter construction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::adapter::MailAdapter;
use super::rules::VendorRules;
use super::transport::MailTransport;
use super::vendors::rules_for;
use super::Provider;
use crate::account::{Account, Vendor};
use crate::config::Config;
use crate::{Error, Result};

/// Maps accounts to vendor adapters.
pub struct ProviderRegistry {
    transport: Arc<dyn MailTransport>,
    rules: HashMap<Vendor, Arc<dyn VendorRules>>,
    domains: HashMap<String, Vendor>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("domains", &self.domains)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    /// Builds the registry from the built-in vendors plus configured domain
    /// overrides.
    #[must_use]
    pub fn new(transport: Arc<dyn MailTransport>, config: &Config) -> Self {
        let rules: HashMap<Vendor, Arc<dyn VendorRules>> =
            Vendor::ALL.into_iter().map(|v| (v, rules_for(v))).collect();

        let mut domains = HashMap::new();
        for vendor in Vendor::ALL {
            for domain in rules_for(vendor).domains() {
                domains.insert((*domain).to_string(), vendor);
            }
        }
        for entry in &config.domains {
            domains.insert(entry.domain.trim().to_ascii_lowercase(), entry.vendor);
        }

        Self {
            transport,
            rules,
            domains,
            connect_timeout: config.delivery.connect_timeout(),
        }
    }

    /// Finds the vendor serving an email address.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the domain is unknown.
    pub fn vendor_for_email(&self, email: &str) -> Result<Vendor> {
        let domain = email
            .rsplit_once('@')
            .map(|(_, d)| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .ok_or_else(|| Error::Config(format!("invalid email address: {email}")))?;

        self.domains.get(&domain).copied().ok_or_else(|| {
            Error::Config(format!(
                "unknown mail domain {domain}; configure the account as a custom server"
            ))
        })
    }

    /// Resolves an account's vendor: explicit first, then by domain.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if neither applies.
    pub fn resolve_vendor(&self, account: &Account) -> Result<Vendor> {
        match account.vendor {
            Some(vendor) => Ok(vendor),
            None => self.vendor_for_email(&account.email),
        }
    }

    /// Rules for a vendor.
    #[must_use]
    pub fn rules(&self, vendor: Vendor) -> Arc<dyn VendorRules> {
        self.rules
            .get(&vendor)
            .cloned()
            .unwrap_or_else(|| rules_for(vendor))
    }

    /// Creates a disconnected adapter for an account.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the vendor cannot be resolved.
    pub fn adapter(&self, account: &Account) -> Result<MailAdapter> {
        let vendor = self.resolve_vendor(account)?;
        debug!(email = %account.email, %vendor, "Resolved provider");
        Ok(MailAdapter::new(
            self.rules(vendor),
            Arc::clone(&self.transport),
            self.connect_timeout,
        ))
    }

    /// Creates a boxed provider for an account.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the vendor cannot be resolved.
    pub fn provider_for(&self, account: &Account) -> Result<Box<dyn Provider>> {
        Ok(Box::new(self.adapter(account)?))
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
    use crate::account::{AuthMethod, UserId};
    use crate::config::DomainOverride;
    use crate::provider::{
        Credentials, Endpoint, ImapSession, SmtpSession, SpecialFolder, TransportError,
        TransportErrorKind, TransportResult,
    };
    use async_trait::async_trait;

    struct NoTransport;

    #[async_trait]
    impl MailTransport for NoTransport {
        async fn open_smtp(
            &self,
            _endpoint: &Endpoint,
            _credentials: &Credentials,
        ) -> TransportResult<Box<dyn SmtpSession>> {
            Err(TransportError::new(TransportErrorKind::Network, "offline"))
        }

        async fn open_imap(
            &self,
            _endpoint: &Endpoint,
            _credentials: &Credentials,
        ) -> TransportResult<Box<dyn ImapSession>> {
            Err(TransportError::new(TransportErrorKind::Network, "offline"))
        }
    }

    fn registry(config: &Config) -> ProviderRegistry {
        ProviderRegistry::new(Arc::new(NoTransport), config)
    }

    #[test]
    fn detects_builtin_domains() {
        let registry = registry(&Config::default());
        for (email, vendor) in [
            ("a@gmail.com", Vendor::Gmail),
            ("a@googlemail.com", Vendor::Gmail),
            ("a@Hotmail.com", Vendor::Outlook),
            ("a@foxmail.com", Vendor::Qq),
            ("a@126.com", Vendor::NetEase),
            ("a@me.com", Vendor::ICloud),
        ] {
            assert_eq!(registry.vendor_for_email(email).unwrap(), vendor, "{email}");
        }
    }

    #[test]
    fn unknown_domain_is_config_error() {
        let registry = registry(&Config::default());
        assert!(matches!(
            registry.vendor_for_email("a@unknown.example"),
            Err(Error::Config(_))
        ));
        assert!(registry.vendor_for_email("no-at-sign").is_err());
    }

    #[test]
    fn explicit_vendor_and_overrides() {
        let mut config = Config::default();
        config.domains.push(DomainOverride {
            domain: "Corp.Example".into(),
            vendor: Vendor::Outlook,
        });
        let registry = registry(&config);

        let mut account = Account::with_email(UserId::new("u"), "me@corp.example");
        assert_eq!(registry.resolve_vendor(&account).unwrap(), Vendor::Outlook);

        account.vendor = Some(Vendor::Custom);
        assert_eq!(registry.resolve_vendor(&account).unwrap(), Vendor::Custom);
        assert_eq!(
            registry.adapter(&account).unwrap().rules().vendor(),
            Vendor::Custom
        );
    }
    #[test]
    fn provider_exposes_vendor_capabilities() {
        let registry = registry(&Config::default());
        let account = Account::with_email(UserId::new("u"), "me@qq.com");
        let provider = registry.provider_for(&account).unwrap();
        assert_eq!(provider.supported_auth_methods(), &[AuthMethod::Password]);

        let gmail = Account::with_email(UserId::new("u"), "me@gmail.com");
        let folders = registry.provider_for(&gmail).unwrap().special_folders();
        assert_eq!(
            folders.get(&SpecialFolder::Sent).map(String::as_str),
            Some("[Gmail]/Sent Mail")
        );
    }
}
