//! Email address parsing and formatting (RFC 5322 mailboxes).

use crate::content_type::unquote;
use crate::encoding::{decode_rfc2047, encode_rfc2047, is_header_safe};
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Characters that require a display name to be quoted.
const NAME_SPECIALS: &str = "()<>[]:;@\\,.\"";

/// A single mailbox: an optional display name and an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address {
    /// Display name, decoded.
    pub name: Option<String>,
    /// The `local@domain` address.
    pub email: String,
}

impl Address {
    /// Creates an address after validating the `local@domain` form.
    ///
    /// # Errors
    ///
    /// Returns an error if `email` is not a plausible address.
    pub fn new(name: Option<String>, email: impl Into<String>) -> Result<Self> {
        let email = email.into();
        validate_email(&email)?;
        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        Ok(Self { name, email })
    }

    /// Parses a mailbox like `Jane Doe <jane@example.com>` or `jane@example.com`.
    ///
    /// Encoded-word display names are decoded.
    ///
    /// # Errors
    ///
    /// Returns an error if the input does not contain a valid address.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        if let Some(open) = input.rfind('<') {
            let close = input[open..]
                .find('>')
                .map(|i| open + i)
                .ok_or_else(|| Error::InvalidAddress(format!("Unclosed angle bracket: {input}")))?;
            let email = input[open + 1..close].trim();
            let raw_name = input[..open].trim();
            let name = if raw_name.is_empty() {
                None
            } else {
                Some(decode_rfc2047(&unquote(raw_name))?)
            };
            return Self::new(name, email);
        }

        Self::new(None, input)
    }

    /// Parses a comma-separated address list.
    ///
    /// Commas inside quoted names or angle brackets do not split entries.
    /// Empty entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if any entry is invalid.
    pub fn parse_list(input: &str) -> Result<Vec<Self>> {
        split_list(input)
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Returns the domain part, lowercased.
    #[must_use]
    pub fn domain(&self) -> String {
        self.email
            .rsplit_once('@')
            .map(|(_, d)| d.to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Returns the local part.
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.email.rsplit_once('@').map_or("", |(l, _)| l)
    }
}

/// Checks that an address has a non-empty local part and a dotted domain.
fn validate_email(email: &str) -> Result<()> {
    let invalid = || Error::InvalidAddress(email.to_string());

    if email.is_empty() || email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid());
    }
    if email.contains(['<', '>', ',', ';']) {
        return Err(invalid());
    }
    let (local, domain) = email.rsplit_once('@').ok_or_else(invalid)?;
    if local.is_empty() || local.len() > 64 || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty() || l.starts_with('-') || l.ends_with('-')) {
        return Err(invalid());
    }
    Ok(())
}

fn split_list(input: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for ch in input.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                entries.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    entries.push(current);
    entries
}

/// Formats a display name for a header, encoding or quoting as needed.
fn format_name(name: &str) -> String {
    if !is_header_safe(name) {
        return encode_rfc2047(name, "utf-8").unwrap_or_else(|_| name.to_string());
    }
    if name.contains(|c: char| NAME_SPECIALS.contains(c)) {
        let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
        return format!("\"{escaped}\"");
    }
    name.to_string()
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", format_name(name), self.email),
            None => f.write_str(&self.email),
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Joins addresses into a header value.
#[must_use]
pub fn format_list(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare() {
        let addr = Address::parse(" alice@example.com ").unwrap();
        assert_eq!(addr.email, "alice@example.com");
        assert!(addr.name.is_none());
        assert_eq!(addr.to_string(), "alice@example.com");
    }

    #[test]
    fn test_parse_named() {
        let addr = Address::parse("Alice Smith <alice@example.com>").unwrap();
        assert_eq!(addr.name.as_deref(), Some("Alice Smith"));
        assert_eq!(addr.email, "alice@example.com");
        assert_eq!(addr.domain(), "example.com");
        assert_eq!(addr.local_part(), "alice");
    }

    #[test]
    fn test_parse_quoted_name_with_comma() {
        let addr = Address::parse("\"Smith, Alice\" <alice@example.com>").unwrap();
        assert_eq!(addr.name.as_deref(), Some("Smith, Alice"));
        assert_eq!(addr.to_string(), "\"Smith, Alice\" <alice@example.com>");
    }

    #[test]
    fn test_parse_encoded_name() {
        let addr = Address::parse("=?utf-8?B?5byg5LiJ?= <zhang@163.com>").unwrap();
        assert_eq!(addr.name.as_deref(), Some("张三"));
    }

    #[test]
    fn test_display_encodes_non_ascii_name() {
        let addr = Address::new(Some("张三".to_string()), "zhang@163.com").unwrap();
        let text = addr.to_string();
        assert!(text.starts_with("=?utf-8?B?"));
        assert!(text.ends_with(" <zhang@163.com>"));
        assert_eq!(Address::parse(&text).unwrap(), addr);
    }

    #[test]
    fn test_parse_list() {
        let list =
            Address::parse_list("\"Doe, J\" <j@example.com>, bob@example.org,, carol@example.net")
                .unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].email, "j@example.com");
        assert_eq!(list[2].email, "carol@example.net");
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in [
            "",
            "plainaddress",
            "@example.com",
            "user@",
            "user@localhost",
            "user@exa mple.com",
            "user@-bad.com",
            "a@b@c.com",
            "Name <user@example.com",
        ] {
            assert!(Address::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_format_list() {
        let list = vec![
            Address::parse("a@example.com").unwrap(),
            Address::parse("B <b@example.com>").unwrap(),
        ];
        assert_eq!(format_list(&list), "a@example.com, B <b@example.com>");
    }
}
