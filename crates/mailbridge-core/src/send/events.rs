//! Lifecycle events pushed to users.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::status::SendId;
use crate::Result;
use crate::account::{AccountId, UserId};
use crate::compose::EmailId;
use crate::error::ErrorKind;

/// An event delivered to a user's clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MailEvent {
    /// A send began connecting.
    #[serde(rename = "send.started")]
    SendStarted {
        /// Send ID.
        send_id: SendId,
        /// Sending account.
        account_id: AccountId,
    },
    /// A send was accepted by the server.
    #[serde(rename = "send.completed")]
    SendCompleted {
        /// Send ID.
        send_id: SendId,
        /// Sending account.
        account_id: AccountId,
        /// Composed email.
        email_id: EmailId,
        /// `Message-ID` of the sent message.
        message_id: String,
    },
    /// A send gave up.
    #[serde(rename = "send.failed")]
    SendFailed {
        /// Send ID.
        send_id: SendId,
        /// Sending account.
        account_id: AccountId,
        /// User-facing message.
        error: String,
        /// Error classification.
        error_kind: ErrorKind,
    },
    /// New messages were found by a sync.
    #[serde(rename = "mail.new")]
    NewMail {
        /// Synced account.
        account_id: AccountId,
        /// Folder as requested.
        folder: String,
        /// Number of new messages.
        count: usize,
        /// Highest UID seen.
        watermark: u32,
    },
}

impl MailEvent {
    /// The event's type tag.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::SendStarted { .. } => "send.started",
            Self::SendCompleted { .. } => "send.completed",
            Self::SendFailed { .. } => "send.failed",
            Self::NewMail { .. } => "mail.new",
        }
    }
}

/// Delivers events to a user.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes an event to every client of `user`.
    async fn publish_to_user(&self, user: &UserId, event: MailEvent) -> Result<()>;
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish_to_user(&self, _user: &UserId, _event: MailEvent) -> Result<()> {
        Ok(())
    }
}

/// Fans events out over a tokio broadcast channel.
///
/// Subscribers filter by user themselves. Publishing with no subscribers is
/// not an error; slow subscribers lose the oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<(UserId, MailEvent)>,
}

impl BroadcastPublisher {
    /// Creates a channel holding up to `capacity` undelivered events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<(UserId, MailEvent)> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish_to_user(&self, user: &UserId, event: MailEvent) -> Result<()> {
        // Err only means nobody is listening.
        let _ = self.sender.send((user.clone(), event));
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

    #[test]
    fn serializes_with_type_tag() {
        let event = MailEvent::NewMail {
            account_id: AccountId::new(2),
            folder: "inbox".into(),
            count: 3,
            watermark: 41,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "mail.new");
        assert_eq!(json["count"], 3);
        assert_eq!(event.event_type(), "mail.new");
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscribers() {
        let publisher = BroadcastPublisher::new(8);
        publisher
            .publish_to_user(
                &UserId::new("nobody-listening"),
                MailEvent::SendStarted {
                    send_id: SendId::new(),
                    account_id: AccountId::new(1),
                },
            )
            .await
            .unwrap();

        let mut rx = publisher.subscribe();
        let event = MailEvent::SendStarted {
            send_id: SendId::new(),
            account_id: AccountId::new(1),
        };
        publisher
            .publish_to_user(&UserId::new("u"), event.clone())
            .await
            .unwrap();
        let (user, received) = rx.recv().await.unwrap();
        assert_eq!(user, UserId::new("u"));
        assert_eq!(received, event);
    }
}
