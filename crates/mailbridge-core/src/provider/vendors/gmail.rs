//! Google Gmail.

use std::collections::HashMap;

use crate::account::{AuthMethod, Security, Vendor};
use crate::provider::{ErrorRule, ProviderErrorKind, ServerDefaults, SpecialFolder, VendorRules};
use crate::sync::Label;

const ERRORS: &[ErrorRule] = &[
    ErrorRule::code_text(
        534,
        "5.7.9",
        ProviderErrorKind::Auth,
        "Gmail requires an app password or Google sign-in for this account",
    ),
    ErrorRule::code_text(
        535,
        "5.7.8",
        ProviderErrorKind::Auth,
        "Gmail did not accept the username and password",
    ),
    ErrorRule::text(
        "web login required",
        ProviderErrorKind::Auth,
        "Gmail requires signing in through the browser first",
    ),
    ErrorRule::code_text(
        550,
        "5.4.5",
        ProviderErrorKind::Policy,
        "Gmail daily sending limit reached",
    ),
    ErrorRule::code_text(
        552,
        "5.7.0",
        ProviderErrorKind::Policy,
        "Gmail blocked the message because of its content or attachments",
    ),
    ErrorRule::code_text(
        421,
        "4.7.0",
        ProviderErrorKind::Transient,
        "Gmail is temporarily limiting connections",
    ),
];

/// Gmail rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gmail;

impl VendorRules for Gmail {
    fn vendor(&self) -> Vendor {
        Vendor::Gmail
    }

    fn domains(&self) -> &'static [&'static str] {
        &["gmail.com", "googlemail.com"]
    }

    fn imap_defaults(&self, _domain: &str) -> Option<ServerDefaults> {
        Some(ServerDefaults::new("imap.gmail.com", 993, Security::Tls))
    }

    fn smtp_defaults(&self, _domain: &str) -> Option<ServerDefaults> {
        Some(ServerDefaults::new("smtp.gmail.com", 465, Security::Tls))
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
            (SpecialFolder::Sent, "[Gmail]/Sent Mail"),
            (SpecialFolder::Drafts, "[Gmail]/Drafts"),
            (SpecialFolder::Trash, "[Gmail]/Trash"),
            (SpecialFolder::Junk, "[Gmail]/Spam"),
            (SpecialFolder::Archive, "[Gmail]/All Mail"),
        ]
        .into_iter()
        .map(|(f, n)| (f, n.to_string()))
        .collect()
    }

    fn map_flag(&self, flag: &str) -> Option<Label> {
        flag.eq_ignore_ascii_case("\\Important")
            .then_some(Label::Important)
    }
}
