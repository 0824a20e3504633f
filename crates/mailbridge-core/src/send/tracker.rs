//! In-memory send status with write-through to history.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::history::SendHistoryStore;
use super::status::{SendId, SendStatus};
use crate::compose::ComposeRequest;
use crate::{Error, Result};

/// Tracks live sends.
///
/// The map lock is held only to read or replace one entry, never across
/// history I/O. A send leaves memory once its terminal state is in
/// history.
pub struct StatusTracker {
    live: RwLock<HashMap<SendId, SendStatus>>,
    history: Arc<dyn SendHistoryStore>,
}

impl std::fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTracker").finish_non_exhaustive()
    }
}

impl StatusTracker {
    /// Creates a tracker over a history store.
    #[must_use]
    pub fn new(history: Arc<dyn SendHistoryStore>) -> Self {
        Self {
            live: RwLock::new(HashMap::new()),
            history,
        }
    }

    /// The underlying history store.
    #[must_use]
    pub fn history(&self) -> &Arc<dyn SendHistoryStore> {
        &self.history
    }

    /// Registers a new pending send.
    ///
    /// A history failure is logged; the send still proceeds from memory.
    pub async fn begin(&self, status: SendStatus, request: &ComposeRequest) {
        let send_id = status.send_id;
        self.live.write().await.insert(send_id, status.clone());
        if let Err(e) = self.history.record(&status, request).await {
            warn!(%send_id, error = %e, "Failed to record send history");
        }
    }

    /// Applies a transition to a send.
    ///
    /// `apply` returns false to reject the transition; the stored status is
    /// then left untouched. Returns the status after the call. A send that
    /// already finished keeps its recorded outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the send is neither live nor finished
    /// in history.
    pub async fn transition<F>(&self, send_id: SendId, apply: F) -> Result<SendStatus>
    where
        F: FnOnce(&mut SendStatus) -> bool,
    {
        let outcome = {
            let mut live = self.live.write().await;
            live.get_mut(&send_id).map(|entry| {
                let mut next = entry.clone();
                let changed = apply(&mut next);
                if changed {
                    *entry = next.clone();
                }
                (if changed { next } else { entry.clone() }, changed)
            })
        };
        let Some((status, changed)) = outcome else {
            return self.finished(send_id).await;
        };

        if !changed {
            debug!(%send_id, state = %status.state, "Ignored out-of-order transition");
            return Ok(status);
        }

        debug!(%send_id, state = %status.state, "Send status changed");
        match self.history.update(&status).await {
            Ok(()) if status.state.is_terminal() => {
                self.live.write().await.remove(&send_id);
            }
            Ok(()) => {}
            // Kept in memory: history cannot answer for it.
            Err(e) => warn!(%send_id, error = %e, "Failed to update send history"),
        }
        Ok(status)
    }

    /// Recorded outcome of a send no longer held in memory.
    async fn finished(&self, send_id: SendId) -> Result<SendStatus> {
        match self.history.get(send_id).await? {
            Some(status) if status.state.is_terminal() => {
                debug!(%send_id, state = %status.state, "Ignored transition of finished send");
                Ok(status)
            }
            _ => Err(Error::not_found(format!("Send {send_id}"))),
        }
    }

    /// Current status: memory first, then history.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if neither knows the send, or a history
    /// error.
    pub async fn get(&self, send_id: SendId) -> Result<SendStatus> {
        if let Some(status) = self.live.read().await.get(&send_id) {
            return Ok(status.clone());
        }
        self.history
            .get(send_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Send {send_id}")))
    }

    /// Number of sends held in memory.
    pub async fn live_count(&self) -> usize {
        self.live.read().await.len()
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
    use crate::account::{AccountId, UserId};
    use crate::compose::EmailId;
    use crate::send::{SendState, SqliteSendHistory};

    async fn tracker() -> StatusTracker {
        StatusTracker::new(Arc::new(SqliteSendHistory::in_memory().await.unwrap()))
    }

    fn pending() -> SendStatus {
        SendStatus::pending(SendId::new(), UserId::new("u"), AccountId::new(1))
    }

    #[tokio::test]
    async fn writes_through_and_falls_back_to_history() {
        let tracker = tracker().await;
        let status = pending();
        let id = status.send_id;
        tracker.begin(status, &ComposeRequest::default()).await;

        tracker
            .transition(id, |s| s.mark_sending(EmailId::new(), vec!["b@y.com".into()]))
            .await
            .unwrap();
        assert_eq!(tracker.live_count().await, 1);
        tracker.transition(id, SendStatus::mark_sent).await.unwrap();

        assert_eq!(tracker.live_count().await, 0);
        let from_history = tracker.get(id).await.unwrap();
        assert_eq!(from_history.state, SendState::Sent);
        assert_eq!(from_history.sent_count, 1);
    }

    #[tokio::test]
    async fn rejected_transition_keeps_terminal_state() {
        let tracker = tracker().await;
        let status = pending();
        let id = status.send_id;
        tracker.begin(status, &ComposeRequest::default()).await;

        tracker
            .transition(id, |s| s.mark_failed(&Error::Cancelled))
            .await
            .unwrap();
        let after = tracker
            .transition(id, |s| s.mark_sending(EmailId::new(), vec![]))
            .await
            .unwrap();
        assert_eq!(after.state, SendState::Failed);
        assert_eq!(tracker.get(id).await.unwrap().state, SendState::Failed);
    }

    #[tokio::test]
    async fn out_of_order_transition_on_live_send_is_ignored() {
        let tracker = tracker().await;
        let status = pending();
        let id = status.send_id;
        tracker.begin(status, &ComposeRequest::default()).await;

        let after = tracker.transition(id, SendStatus::mark_sent).await.unwrap();
        assert_eq!(after.state, SendState::Pending);
        assert_eq!(tracker.live_count().await, 1);
    }

    struct Unavailable;

    #[async_trait::async_trait]
    impl SendHistoryStore for Unavailable {
        async fn record(&self, _status: &SendStatus, _request: &ComposeRequest) -> Result<()> {
            Err(Error::Database(sqlx::Error::PoolClosed))
        }
        async fn update(&self, _status: &SendStatus) -> Result<()> {
            Err(Error::Database(sqlx::Error::PoolClosed))
        }
        async fn get(&self, _send_id: SendId) -> Result<Option<SendStatus>> {
            Ok(None)
        }
        async fn load_request(&self, _send_id: SendId) -> Result<Option<ComposeRequest>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn finished_send_stays_in_memory_without_history() {
        let tracker = StatusTracker::new(Arc::new(Unavailable));
        let status = pending();
        let id = status.send_id;
        tracker.begin(status, &ComposeRequest::default()).await;
        tracker
            .transition(id, |s| s.mark_failed(&Error::Cancelled))
            .await
            .unwrap();

        assert_eq!(tracker.live_count().await, 1);
        assert_eq!(tracker.get(id).await.unwrap().state, SendState::Failed);
    }

    #[tokio::test]
    async fn unknown_send_is_not_found() {
        let tracker = tracker().await;
        assert!(matches!(
            tracker.get(SendId::new()).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            tracker.transition(SendId::new(), |_| true).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
