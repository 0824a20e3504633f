//! Send lifecycle records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;
use crate::account::{AccountId, UserId};
use crate::compose::EmailId;
use crate::error::ErrorKind;

/// Unique identifier of one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SendId(pub Uuid);

impl SendId {
    /// Generates a random ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SendId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SendId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Send state. Moves forward only: `Pending → Sending → Sent | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendState {
    /// Accepted, not yet connecting.
    Pending,
    /// Connecting or transmitting.
    Sending,
    /// Accepted by the server.
    Sent,
    /// Gave up.
    Failed,
}

impl SendState {
    /// Returns the persisted name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Parses a persisted name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(Self::Pending),
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns true for `Sent` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    /// Returns true if `next` is a legal successor.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Sending | Self::Failed) | (Self::Sending, Self::Sent | Self::Failed)
        )
    }

    /// Progress fraction shown to clients.
    #[must_use]
    pub const fn progress(self) -> f32 {
        match self {
            Self::Pending => 0.0,
            Self::Sending => 0.5,
            Self::Sent | Self::Failed => 1.0,
        }
    }
}

impl std::fmt::Display for SendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full status record of a send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendStatus {
    /// Send ID.
    pub send_id: SendId,
    /// Composed email, once composition succeeded.
    pub email_id: Option<EmailId>,
    /// Sending account.
    pub account_id: AccountId,
    /// Owning user.
    pub user_id: UserId,
    /// Current state.
    pub state: SendState,
    /// Envelope recipients.
    pub recipients: Vec<String>,
    /// Recipients accepted by the server.
    pub sent_count: usize,
    /// Recipients not delivered.
    pub failed_count: usize,
    /// 0.0, 0.5 or 1.0.
    pub progress: f32,
    /// Failed attempts recorded against this send.
    pub retry_count: u32,
    /// Last error, user-facing.
    pub error: Option<String>,
    /// Classification of the last error.
    pub error_kind: Option<ErrorKind>,
    /// When the send was accepted.
    pub created_at: DateTime<Utc>,
    /// When connecting began.
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal state was reached.
    pub completed_at: Option<DateTime<Utc>>,
}

impl SendStatus {
    /// A freshly accepted send.
    #[must_use]
    pub fn pending(send_id: SendId, user_id: UserId, account_id: AccountId) -> Self {
        Self {
            send_id,
            email_id: None,
            account_id,
            user_id,
            state: SendState::Pending,
            recipients: Vec::new(),
            sent_count: 0,
            failed_count: 0,
            progress: SendState::Pending.progress(),
            retry_count: 0,
            error: None,
            error_kind: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn advance(&mut self, next: SendState) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }
        self.state = next;
        self.progress = next.progress();
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        } else {
            self.started_at = Some(Utc::now());
        }
        true
    }

    /// Enters `Sending` for a composed email. Returns false if not pending.
    pub fn mark_sending(&mut self, email_id: EmailId, recipients: Vec<String>) -> bool {
        if !self.advance(SendState::Sending) {
            return false;
        }
        self.email_id = Some(email_id);
        self.recipients = recipients;
        true
    }

    /// Enters `Sent`. Returns false if not sending.
    pub fn mark_sent(&mut self) -> bool {
        if !self.advance(SendState::Sent) {
            return false;
        }
        self.sent_count = self.recipients.len();
        self.failed_count = 0;
        self.error = None;
        self.error_kind = None;
        true
    }

    /// Enters `Failed` with the error's user message and kind. Returns
    /// false if already terminal.
    pub fn mark_failed(&mut self, error: &Error) -> bool {
        if !self.advance(SendState::Failed) {
            return false;
        }
        self.sent_count = 0;
        self.failed_count = self.recipients.len();
        self.retry_count += 1;
        self.error = Some(error.user_message());
        self.error_kind = Some(error.kind());
        true
    }

    /// Summary for callers.
    #[must_use]
    pub fn result(&self) -> SendResult {
        SendResult {
            send_id: self.send_id,
            email_id: self.email_id,
            state: self.state,
            sent_count: self.sent_count,
            failed_count: self.failed_count,
            error: self.error.clone(),
            error_kind: self.error_kind,
        }
    }
}

/// Outcome of one send, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    /// Send ID.
    pub send_id: SendId,
    /// Composed email, if composition succeeded.
    pub email_id: Option<EmailId>,
    /// State at the time of reporting.
    pub state: SendState,
    /// Recipients accepted.
    pub sent_count: usize,
    /// Recipients not delivered.
    pub failed_count: usize,
    /// User-facing error.
    pub error: Option<String>,
    /// Error classification.
    pub error_kind: Option<ErrorKind>,
}

impl SendResult {
    /// Returns true if the message was sent.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.state, SendState::Sent)
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

    fn status() -> SendStatus {
        SendStatus::pending(SendId::new(), UserId::new("u"), AccountId::new(1))
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn happy_path() {
        let mut s = status();
        assert_eq!(s.progress, 0.0);
        assert!(s.mark_sending(EmailId::new(), vec!["a@x.com".into(), "b@x.com".into()]));
        assert_eq!(s.progress, 0.5);
        assert!(s.started_at.is_some());
        assert!(s.mark_sent());
        assert_eq!(s.state, SendState::Sent);
        assert_eq!(s.sent_count, 2);
        assert_eq!(s.progress, 1.0);
        assert!(s.completed_at.is_some());
        assert!(s.result().is_success());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut s = status();
        s.mark_sending(EmailId::new(), vec!["a@x.com".into()]);
        s.mark_sent();
        let snapshot = s.clone();

        assert!(!s.mark_failed(&Error::Cancelled));
        assert!(!s.mark_sending(EmailId::new(), vec![]));
        assert!(!s.mark_sent());
        assert_eq!(s, snapshot);

        let mut f = status();
        assert!(f.mark_failed(&Error::Authentication("bad password".into())));
        assert_eq!(f.retry_count, 1);
        assert_eq!(f.error_kind, Some(ErrorKind::Authentication));
        assert!(f.error.as_deref().unwrap().contains("bad password"));
        assert!(!f.mark_sending(EmailId::new(), vec![]));
        assert!(!f.mark_sent());
        assert_eq!(f.state, SendState::Failed);
    }

    #[test]
    fn pending_cannot_skip_to_sent() {
        let mut s = status();
        assert!(!s.mark_sent());
        assert_eq!(s.state, SendState::Pending);
    }

    #[test]
    fn state_names() {
        for state in [
            SendState::Pending,
            SendState::Sending,
            SendState::Sent,
            SendState::Failed,
        ] {
            assert_eq!(SendState::from_name(state.as_str()), Some(state));
        }
        assert_eq!(SendState::from_name("queued"), None);
    }
}
