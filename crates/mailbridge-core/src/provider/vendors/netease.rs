//! NetEase 163 / 126 / yeah.net.

use std::collections::HashMap;

use crate::account::{AuthMethod, Security, Vendor};
use crate::provider::{ErrorRule, ProviderErrorKind, ServerDefaults, SpecialFolder, VendorRules};

const ERRORS: &[ErrorRule] = &[
    ErrorRule::text(
        "unsafe login",
        ProviderErrorKind::Auth,
        "NetEase blocked the login because the client did not identify itself",
    ),
    ErrorRule::text(
        "user has no permission",
        ProviderErrorKind::Auth,
        "IMAP/SMTP is disabled; enable it in the NetEase mailbox settings",
    ),
    ErrorRule::code(
        535,
        ProviderErrorKind::Auth,
        "NetEase rejected the login; use the client authorization code",
    ),
    ErrorRule::text(
        "dt:spm",
        ProviderErrorKind::Policy,
        "NetEase rejected the message as suspected spam",
    ),
    ErrorRule::text(
        "mi:sfq",
        ProviderErrorKind::Transient,
        "NetEase is rate limiting this account",
    ),
];

/// NetEase rules. Servers are named after the email domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetEase;

impl VendorRules for NetEase {
    fn vendor(&self) -> Vendor {
        Vendor::NetEase
    }

    fn domains(&self) -> &'static [&'static str] {
        &["163.com", "126.com", "yeah.net"]
    }

    fn imap_defaults(&self, domain: &str) -> Option<ServerDefaults> {
        Some(ServerDefaults::new(format!("imap.{domain}"), 993, Security::Tls))
    }

    fn smtp_defaults(&self, domain: &str) -> Option<ServerDefaults> {
        Some(ServerDefaults::new(format!("smtp.{domain}"), 465, Security::Tls))
    }

    fn auth_methods(&self) -> &'static [AuthMethod] {
        &[AuthMethod::Password]
    }

    fn error_rules(&self) -> &'static [ErrorRule] {
        ERRORS
    }

    fn announce_client_id(&self) -> bool {
        true
    }

    // Modified UTF-7 names as returned by LIST.
    fn special_folders(&self) -> HashMap<SpecialFolder, String> {
        [
            (SpecialFolder::Inbox, "INBOX"),
            (SpecialFolder::Sent, "&XfJT0ZAB-"),
            (SpecialFolder::Drafts, "&g0l6P3ux-"),
            (SpecialFolder::Trash, "&XfJSIJZk-"),
            (SpecialFolder::Junk, "&V4NXPpCuTvY-"),
            (SpecialFolder::Archive, "Archive"),
        ]
        .into_iter()
        .map(|(f, n)| (f, n.to_string()))
        .collect()
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

    #[test]
    fn servers_follow_domain() {
        assert_eq!(NetEase.imap_defaults("126.com").unwrap().host, "imap.126.com");
        assert_eq!(NetEase.smtp_defaults("yeah.net").unwrap().host, "smtp.yeah.net");
        assert!(NetEase.announce_client_id());
    }
}
