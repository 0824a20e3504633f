//! Incremental mail retrieval.
//!
//! A sync fetches everything above a per-folder UID watermark, normalizes
//! vendor flags into [`Label`]s and returns the new watermark. The engine
//! keeps no state between calls; callers persist the watermark.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use mailbridge_mime::{Address, Message, Priority};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::account::{AccountId, AccountStore, UserId};
use crate::provider::{FetchedMessage, Provider, ProviderRegistry, Service, VendorRules};
use crate::retry::Connector;
use crate::send::{EventPublisher, MailEvent};
use crate::{Error, Result};

/// Canonical message label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    /// Seen.
    Read,
    /// Starred.
    Flagged,
    /// Replied to.
    Answered,
    /// Forwarded.
    Forwarded,
    /// Draft.
    Draft,
    /// Marked for deletion.
    Deleted,
    /// Spam.
    Junk,
    /// Explicitly not spam.
    NotJunk,
    /// Marked important by the vendor.
    Important,
}

impl Label {
    /// Maps a standard IMAP system flag or common keyword.
    #[must_use]
    pub fn from_flag(flag: &str) -> Option<Self> {
        let flag = flag.trim();
        let label = match flag.to_ascii_lowercase().as_str() {
            "\\seen" => Self::Read,
            "\\flagged" => Self::Flagged,
            "\\answered" => Self::Answered,
            "$forwarded" | "forwarded" => Self::Forwarded,
            "\\draft" => Self::Draft,
            "\\deleted" => Self::Deleted,
            "$junk" | "junk" => Self::Junk,
            "$notjunk" | "notjunk" | "nonjunk" => Self::NotJunk,
            "$important" => Self::Important,
            _ => return None,
        };
        Some(label)
    }
}

/// A message found by a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    /// Per-folder UID.
    pub uid: u32,
    /// Physical folder name.
    pub folder: String,
    /// `Message-ID` without angle brackets.
    pub message_id: Option<String>,
    /// Decoded subject.
    pub subject: Option<String>,
    /// Sender.
    pub from: Option<Address>,
    /// Primary recipients.
    pub to: Vec<Address>,
    /// `Date` header.
    pub date: Option<DateTime<FixedOffset>>,
    /// Size of the fetched bytes.
    pub size: usize,
    /// True if any part is an attachment.
    pub has_attachments: bool,
    /// Flags as reported by the server.
    pub flags: Vec<String>,
    /// Normalized labels.
    pub labels: BTreeSet<Label>,
    /// Derived importance.
    pub priority: Priority,
}

impl RemoteMessage {
    /// Builds a message from fetched bytes. Unparseable messages keep their
    /// UID, flags and size with empty header fields.
    #[must_use]
    pub fn from_fetched(folder: &str, fetched: &FetchedMessage, rules: &dyn VendorRules) -> Self {
        let labels: BTreeSet<Label> = fetched
            .flags
            .iter()
            .filter_map(|f| rules.map_flag(f).or_else(|| Label::from_flag(f)))
            .collect();

        let parsed = match Message::parse(&fetched.raw) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(uid = fetched.uid, error = %e, "Unparseable message");
                None
            }
        };

        let header_priority = parsed.as_ref().and_then(priority_from_headers);
        let priority = if labels.contains(&Label::Important) {
            Priority::High
        } else {
            header_priority.unwrap_or_default()
        };

        Self {
            uid: fetched.uid,
            folder: folder.to_string(),
            message_id: parsed.as_ref().and_then(Message::message_id),
            subject: parsed.as_ref().and_then(Message::subject),
            from: parsed.as_ref().and_then(Message::from),
            to: parsed.as_ref().map(Message::to).unwrap_or_default(),
            date: parsed.as_ref().and_then(Message::date),
            size: fetched.raw.len(),
            has_attachments: parsed.as_ref().is_some_and(|m| !m.attachments().is_empty()),
            flags: fetched.flags.clone(),
            labels,
            priority,
        }
    }

    /// Returns true if the message carries `label`.
    #[must_use]
    pub fn has_label(&self, label: Label) -> bool {
        self.labels.contains(&label)
    }
}

/// Reads `X-Priority` (1-2 high, 4-5 low), then `Importance`.
fn priority_from_headers(message: &Message) -> Option<Priority> {
    let headers = message.headers();
    if let Some(value) = headers.get("x-priority")
        && let Some(digit) = value.trim().chars().next().and_then(|c| c.to_digit(10))
    {
        return match digit {
            1 | 2 => Some(Priority::High),
            4 | 5 => Some(Priority::Low),
            _ => Some(Priority::Normal),
        };
    }
    headers
        .get("importance")
        .map(|v| match v.trim().to_ascii_lowercase().as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Normal,
        })
}

/// Outcome of one folder sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// New messages, ascending by UID.
    pub messages: Vec<RemoteMessage>,
    /// Highest UID seen, or the previous watermark when nothing was new.
    pub watermark: u32,
}

/// Fetches new mail for accounts.
#[derive(Clone)]
pub struct SyncEngine {
    accounts: Arc<dyn AccountStore>,
    registry: Arc<ProviderRegistry>,
    connector: Connector,
    events: Arc<dyn EventPublisher>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("connector", &self.connector)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        registry: Arc<ProviderRegistry>,
        connector: Connector,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            accounts,
            registry,
            connector,
            events,
        }
    }

    /// Fetches messages above `watermark` in `folder`, which may be a
    /// logical special-folder name such as `sent`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown or foreign accounts, the
    /// translated provider error, or [`Error::Cancelled`].
    pub async fn sync(
        &self,
        user: &UserId,
        account_id: AccountId,
        folder: &str,
        watermark: u32,
        cancel: &CancellationToken,
    ) -> Result<SyncResult> {
        let mut account = self
            .accounts
            .get_account(account_id)
            .await?
            .filter(|a| &a.user_id == user)
            .ok_or_else(|| Error::not_found(format!("Account {account_id}")))?;
        let vendor = self.registry.resolve_vendor(&account)?;
        let mut provider = self.registry.adapter(&account)?;

        let fetched = async {
            self.connector
                .connect(
                    &mut provider,
                    &mut account,
                    vendor,
                    Service::Retrieval,
                    cancel,
                )
                .await?;
            provider
                .sync_emails(&account, folder, watermark, cancel)
                .await
        }
        .await;

        if let Err(e) = provider.disconnect().await {
            warn!(%account_id, error = %e, "Disconnect failed");
        }

        let mut messages: Vec<RemoteMessage> = fetched?
            .into_iter()
            .filter(|m| m.uid > watermark)
            .collect();
        messages.sort_by_key(|m| m.uid);
        let new_watermark = messages.last().map_or(watermark, |m| m.uid);

        if messages.is_empty() {
            debug!(%account_id, folder, watermark, "No new messages");
        } else {
            info!(%account_id, folder, count = messages.len(), watermark = new_watermark, "New messages");
            let event = MailEvent::NewMail {
                account_id,
                folder: folder.to_string(),
                count: messages.len(),
                watermark: new_watermark,
            };
            if let Err(e) = self.events.publish_to_user(user, event).await {
                warn!(%account_id, error = %e, "Failed to publish event");
            }
        }

        Ok(SyncResult {
            messages,
            watermark: new_watermark,
        })
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
    use crate::account::Vendor;
    use crate::provider::vendors::rules_for;

    fn fetched(uid: u32, flags: &[&str], raw: &str) -> FetchedMessage {
        FetchedMessage {
            uid,
            flags: flags.iter().map(|f| (*f).to_string()).collect(),
            raw: raw.as_bytes().to_vec(),
        }
    }

    const RAW: &str = "From: Ann <ann@x.com>\r\n\
        To: me@gmail.com\r\n\
        Subject: Report\r\n\
        Message-ID: <r1@x.com>\r\n\
        Date: Mon, 5 Oct 2026 10:00:00 +0000\r\n\
        X-Priority: 5 (Lowest)\r\n\
        \r\n\
        body\r\n";

    #[test]
    fn parses_headers_and_flags() {
        let rules = rules_for(Vendor::Custom);
        let message = RemoteMessage::from_fetched(
            "INBOX",
            &fetched(7, &["\\Seen", "\\Flagged", "$Forwarded", "custom"], RAW),
            rules.as_ref(),
        );
        assert_eq!(message.uid, 7);
        assert_eq!(message.subject.as_deref(), Some("Report"));
        assert_eq!(message.message_id.as_deref(), Some("r1@x.com"));
        assert_eq!(message.from.unwrap().email, "ann@x.com");
        assert_eq!(message.to.len(), 1);
        assert!(message.date.is_some());
        assert!(!message.has_attachments);
        assert_eq!(
            message.labels,
            BTreeSet::from([Label::Read, Label::Flagged, Label::Forwarded])
        );
        assert_eq!(message.flags.len(), 4);
        assert_eq!(message.priority, Priority::Low);
    }

    #[test]
    fn vendor_importance_wins() {
        let rules = rules_for(Vendor::Gmail);
        let message =
            RemoteMessage::from_fetched("INBOX", &fetched(1, &["\\Important"], RAW), rules.as_ref());
        assert!(message.has_label(Label::Important));
        assert_eq!(message.priority, Priority::High);
    }

    #[test]
    fn importance_header_fallback() {
        let rules = rules_for(Vendor::Custom);
        let raw = "Subject: x\r\nImportance: High\r\n\r\nbody\r\n";
        let message = RemoteMessage::from_fetched("INBOX", &fetched(1, &[], raw), rules.as_ref());
        assert_eq!(message.priority, Priority::High);
    }

    #[test]
    fn junk_keywords() {
        assert_eq!(Label::from_flag("$Junk"), Some(Label::Junk));
        assert_eq!(Label::from_flag("NonJunk"), Some(Label::NotJunk));
        assert_eq!(Label::from_flag("\\Deleted"), Some(Label::Deleted));
        assert_eq!(Label::from_flag("\\Draft"), Some(Label::Draft));
        assert_eq!(Label::from_flag("\\Recent"), None);
    }
}
