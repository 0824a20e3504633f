//! Compose, connect, transmit, record.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{EventPublisher, MailEvent};
use super::status::{SendId, SendResult, SendState, SendStatus};
use super::tracker::StatusTracker;
use crate::account::{Account, AccountId, AccountStore, UserId};
use crate::compose::{ComposeRequest, ComposedEmail, Composer};
use crate::config::DeliveryConfig;
use crate::provider::{Provider, ProviderRegistry, Service};
use crate::retry::Connector;
use crate::{Error, Result};

/// One message of a bulk send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
    /// Sending account.
    pub account_id: AccountId,
    /// Message to send.
    pub request: ComposeRequest,
}

/// A send running in the background.
#[derive(Debug)]
pub struct SendHandle {
    send_id: SendId,
    cancel: CancellationToken,
    task: JoinHandle<SendResult>,
}

impl SendHandle {
    /// ID for status queries.
    #[must_use]
    pub const fn send_id(&self) -> SendId {
        self.send_id
    }

    /// Requests cancellation. The send ends as failed with kind `cancelled`
    /// unless it already finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the send to finish.
    ///
    /// # Errors
    ///
    /// Returns the join error if the task panicked or was aborted.
    pub async fn join(self) -> std::result::Result<SendResult, JoinError> {
        self.task.await
    }
}

/// Runs sends end to end.
#[derive(Clone)]
pub struct SendOrchestrator {
    accounts: Arc<dyn AccountStore>,
    composer: Arc<Composer>,
    registry: Arc<ProviderRegistry>,
    connector: Connector,
    tracker: Arc<StatusTracker>,
    events: Arc<dyn EventPublisher>,
    workers: Arc<Semaphore>,
    bulk_concurrency: usize,
}

impl std::fmt::Debug for SendOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendOrchestrator")
            .field("workers", &self.workers.available_permits())
            .field("bulk_concurrency", &self.bulk_concurrency)
            .finish_non_exhaustive()
    }
}

impl SendOrchestrator {
    /// Wires the orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        composer: Arc<Composer>,
        registry: Arc<ProviderRegistry>,
        connector: Connector,
        tracker: Arc<StatusTracker>,
        events: Arc<dyn EventPublisher>,
        delivery: &DeliveryConfig,
    ) -> Self {
        Self {
            accounts,
            composer,
            registry,
            connector,
            tracker,
            events,
            workers: Arc::new(Semaphore::new(delivery.worker_pool_size.max(1))),
            bulk_concurrency: delivery.bulk_concurrency.max(1),
        }
    }

    /// Sends one message and waits for the outcome.
    ///
    /// Failures are reported in the returned [`SendResult`], not as `Err`.
    pub async fn send(
        &self,
        user: &UserId,
        account_id: AccountId,
        request: ComposeRequest,
        cancel: &CancellationToken,
    ) -> SendResult {
        let send_id = self.accept(user, account_id, &request).await;
        self.deliver(send_id, user, account_id, &request, cancel).await
    }

    /// Accepts a send and runs it on the worker pool. The returned handle
    /// carries the send ID immediately.
    pub async fn submit(
        &self,
        user: &UserId,
        account_id: AccountId,
        request: ComposeRequest,
    ) -> SendHandle {
        let send_id = self.accept(user, account_id, &request).await;
        let cancel = CancellationToken::new();

        let this = self.clone();
        let user = user.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            // The semaphore is never closed.
            let _permit = Arc::clone(&this.workers).acquire_owned().await.ok();
            this.deliver(send_id, &user, account_id, &request, &token).await
        });

        SendHandle {
            send_id,
            cancel,
            task,
        }
    }

    /// Sends many messages with at most the configured number in flight.
    /// Returns one result per item, in input order; a failing item does not
    /// affect the others.
    pub async fn send_bulk(
        &self,
        user: &UserId,
        items: Vec<BulkItem>,
        cancel: &CancellationToken,
    ) -> Vec<SendResult> {
        let batch = Arc::new(Semaphore::new(self.bulk_concurrency));
        let mut ids = Vec::with_capacity(items.len());
        let mut tasks = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let send_id = self.accept(user, item.account_id, &item.request).await;
            ids.push(send_id);

            let this = self.clone();
            let user = user.clone();
            let cancel = cancel.clone();
            let batch = Arc::clone(&batch);
            tasks.spawn(async move {
                let _permit = batch.acquire_owned().await.ok();
                let result = this
                    .deliver(send_id, &user, item.account_id, &item.request, &cancel)
                    .await;
                (index, result)
            });
        }

        let mut results: Vec<Option<SendResult>> = vec![None; ids.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => warn!(error = %e, "Bulk send task ended abnormally"),
            }
        }

        let mut out = Vec::with_capacity(ids.len());
        for (send_id, result) in ids.into_iter().zip(results) {
            let result = match result {
                Some(result) => result,
                None => self.abandon(send_id).await,
            };
            out.push(result);
        }
        info!(
            total = out.len(),
            sent = out.iter().filter(|r| r.is_success()).count(),
            "Bulk send finished"
        );
        out
    }

    /// Current status of a send.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the send is unknown.
    pub async fn status(&self, send_id: SendId) -> Result<SendStatus> {
        self.tracker.get(send_id).await
    }

    /// Sends a recorded message again under a new send ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the send is unknown, belongs to another
    /// user, or its request was not recorded.
    pub async fn resend(
        &self,
        user: &UserId,
        send_id: SendId,
        cancel: &CancellationToken,
    ) -> Result<SendResult> {
        let original = self.tracker.get(send_id).await?;
        if &original.user_id != user {
            return Err(Error::not_found(format!("Send {send_id}")));
        }
        let request = self
            .tracker
            .history()
            .load_request(send_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Request of send {send_id}")))?;

        info!(%send_id, account_id = %original.account_id, "Resending");
        Ok(self
            .send(&original.user_id, original.account_id, request, cancel)
            .await)
    }

    async fn accept(&self, user: &UserId, account_id: AccountId, request: &ComposeRequest) -> SendId {
        let send_id = SendId::new();
        self.tracker
            .begin(SendStatus::pending(send_id, user.clone(), account_id), request)
            .await;
        info!(%send_id, %account_id, recipients = request.recipient_count(), "Send accepted");
        send_id
    }

    async fn deliver(
        &self,
        send_id: SendId,
        user: &UserId,
        account_id: AccountId,
        request: &ComposeRequest,
        cancel: &CancellationToken,
    ) -> SendResult {
        match self.transmit(send_id, user, account_id, request, cancel).await {
            Ok(email) => self.finish_sent(send_id, user, account_id, &email).await,
            Err(e) => self.finish_failed(send_id, user, account_id, &e).await,
        }
    }

    async fn transmit(
        &self,
        send_id: SendId,
        user: &UserId,
        account_id: AccountId,
        request: &ComposeRequest,
        cancel: &CancellationToken,
    ) -> Result<ComposedEmail> {
        let mut account = self.owned_account(user, account_id).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let email = self.composer.compose(user, request).await?;
        let vendor = self.registry.resolve_vendor(&account)?;
        let mut provider = self.registry.adapter(&account)?;

        self.tracker
            .transition(send_id, |s| {
                s.mark_sending(email.id(), email.envelope_recipients())
            })
            .await?;
        self.publish(
            user,
            MailEvent::SendStarted {
                send_id,
                account_id,
            },
        )
        .await;

        let outcome = async {
            self.connector
                .connect(
                    &mut provider,
                    &mut account,
                    vendor,
                    Service::Submission,
                    cancel,
                )
                .await?;
            debug!(%send_id, size = email.size(), "Transmitting");
            provider
                .send_email(&account, &email.to_outgoing(), cancel)
                .await
        }
        .await;

        if let Err(e) = provider.disconnect().await {
            warn!(%send_id, error = %e, "Disconnect failed");
        }
        outcome.map(|()| email)
    }

    async fn owned_account(&self, user: &UserId, account_id: AccountId) -> Result<Account> {
        self.accounts
            .get_account(account_id)
            .await?
            .filter(|a| &a.user_id == user)
            .ok_or_else(|| Error::not_found(format!("Account {account_id}")))
    }

    async fn finish_sent(
        &self,
        send_id: SendId,
        user: &UserId,
        account_id: AccountId,
        email: &ComposedEmail,
    ) -> SendResult {
        let status = match self.tracker.transition(send_id, SendStatus::mark_sent).await {
            Ok(status) => status,
            Err(e) => return untracked(send_id, &e),
        };
        info!(%send_id, %account_id, message_id = email.message_id(), "Send completed");
        self.publish(
            user,
            MailEvent::SendCompleted {
                send_id,
                account_id,
                email_id: email.id(),
                message_id: email.message_id().to_string(),
            },
        )
        .await;
        status.result()
    }

    async fn finish_failed(
        &self,
        send_id: SendId,
        user: &UserId,
        account_id: AccountId,
        failure: &Error,
    ) -> SendResult {
        let status = match self
            .tracker
            .transition(send_id, |s| s.mark_failed(failure))
            .await
        {
            Ok(status) => status,
            Err(e) => return untracked(send_id, &e),
        };
        error!(
            %send_id,
            %account_id,
            kind = %failure.kind(),
            error = %failure,
            "Send failed"
        );
        self.publish(
            user,
            MailEvent::SendFailed {
                send_id,
                account_id,
                error: failure.user_message(),
                error_kind: failure.kind(),
            },
        )
        .await;
        status.result()
    }

    /// Result for a send whose task died without reporting.
    async fn abandon(&self, send_id: SendId) -> SendResult {
        let lost = Error::not_found(format!("Outcome of send {send_id}"));
        match self
            .tracker
            .transition(send_id, |s| s.mark_failed(&lost))
            .await
        {
            Ok(status) => status.result(),
            Err(e) => untracked(send_id, &e),
        }
    }

    async fn publish(&self, user: &UserId, event: MailEvent) {
        let kind = event.event_type();
        if let Err(e) = self.events.publish_to_user(user, event).await {
            warn!(event = kind, error = %e, "Failed to publish event");
        }
    }
}

fn untracked(send_id: SendId, failure: &Error) -> SendResult {
    warn!(%send_id, error = %failure, "Send status missing from tracker");
    SendResult {
        send_id,
        email_id: None,
        state: SendState::Failed,
        sent_count: 0,
        failed_count: 0,
        error: Some(failure.user_message()),
        error_kind: Some(failure.kind()),
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
    use crate::account::{AuthMethod, SqliteAccountRepository, Vendor};
    use crate::attachment::{LocalAttachmentStore, SqliteAttachmentIndex};
    use crate::config::{Config, StorageConfig};
    use crate::error::ErrorKind;
    use crate::provider::{
        Credentials, Endpoint, FetchedMessage, ImapSession, MailTransport, SmtpSession,
        TransportError, TransportErrorKind, TransportResult,
    };
    use crate::send::{BroadcastPublisher, SqliteSendHistory};
    use crate::token::{TokenManager, TokenRefresher};
    use async_trait::async_trait;
    use mailbridge_oauth::Token;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<Vec<String>>>,
        reject_auth: bool,
    }

    struct Session(Arc<Recording>);

    #[async_trait]
    impl SmtpSession for Session {
        async fn send(&mut self, _from: &str, recipients: &[String], _data: &[u8]) -> TransportResult<()> {
            self.0.sent.lock().unwrap().push(recipients.to_vec());
            Ok(())
        }
        async fn quit(&mut self) -> TransportResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl MailTransport for Arc<Recording> {
        async fn open_smtp(
            &self,
            _endpoint: &Endpoint,
            _credentials: &Credentials,
        ) -> TransportResult<Box<dyn SmtpSession>> {
            if self.reject_auth {
                return Err(TransportError::reply(535, "5.7.8 Authentication credentials invalid"));
            }
            Ok(Box::new(Session(Arc::clone(self))))
        }
        async fn open_imap(
            &self,
            _endpoint: &Endpoint,
            _credentials: &Credentials,
        ) -> TransportResult<Box<dyn ImapSession>> {
            Err(TransportError::new(TransportErrorKind::Network, "no imap"))
        }
    }

    struct NoRefresh;

    #[async_trait]
    impl TokenRefresher for NoRefresh {
        async fn refresh(&self, _vendor: Vendor, _tokens: &crate::account::OAuthTokens) -> Result<Token> {
            Err(Error::Authentication("no refresh in tests".into()))
        }
    }

    struct Fixture {
        orchestrator: SendOrchestrator,
        events: BroadcastPublisher,
        recording: Arc<Recording>,
        account: AccountId,
        _dir: TempDir,
    }

    async fn fixture(reject_auth: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let recording = Arc::new(Recording {
            reject_auth,
            ..Recording::default()
        });
        let repo = Arc::new(SqliteAccountRepository::in_memory().await.unwrap());
        let mut account = Account::with_email(UserId::new("u"), "me@gmail.com");
        account.auth_method = AuthMethod::Password;
        account.password = "app-password".into();
        let account = repo.create(&mut account).await.unwrap();

        let config = Config::default();
        let store = LocalAttachmentStore::new(StorageConfig {
            root: dir.path().to_path_buf(),
            ..StorageConfig::default()
        });
        let composer = Composer::new(
            config.compose.clone(),
            Arc::new(store),
            Arc::new(SqliteAttachmentIndex::in_memory().await.unwrap()),
        );
        let tokens = Arc::new(TokenManager::new(repo.clone(), Arc::new(NoRefresh)));
        let events = BroadcastPublisher::new(32);
        let orchestrator = SendOrchestrator::new(
            repo,
            Arc::new(composer),
            Arc::new(ProviderRegistry::new(Arc::new(Arc::clone(&recording)), &config)),
            Connector::new(tokens, config.delivery.retry_policy()),
            Arc::new(StatusTracker::new(Arc::new(
                SqliteSendHistory::in_memory().await.unwrap(),
            ))),
            Arc::new(events.clone()),
            &config.delivery,
        );
        Fixture {
            orchestrator,
            events,
            recording,
            account,
            _dir: dir,
        }
    }

    fn request() -> ComposeRequest {
        ComposeRequest {
            from: "me@gmail.com".into(),
            to: vec!["b@y.com".into()],
            bcc: vec!["c@z.com".into()],
            subject: "Hi".into(),
            text_body: Some("hello".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn successful_send() {
        let f = fixture(false).await;
        let mut rx = f.events.subscribe();
        let user = UserId::new("u");

        let result = f
            .orchestrator
            .send(&user, f.account, request(), &CancellationToken::new())
            .await;
        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.sent_count, 2);
        assert_eq!(
            f.recording.sent.lock().unwrap().as_slice(),
            &[vec!["b@y.com".to_string(), "c@z.com".to_string()]]
        );

        assert_eq!(rx.recv().await.unwrap().1.event_type(), "send.started");
        assert_eq!(rx.recv().await.unwrap().1.event_type(), "send.completed");

        assert_eq!(f.orchestrator.tracker.live_count().await, 0);
        let status = f.orchestrator.status(result.send_id).await.unwrap();
        assert_eq!(status.state, SendState::Sent);
        assert_eq!(status.progress.to_bits(), 1.0_f32.to_bits());
    }

    #[tokio::test]
    async fn finished_bulk_sends_leave_memory() {
        let f = fixture(false).await;
        let user = UserId::new("u");
        let items = (0..4)
            .map(|_| BulkItem {
                account_id: f.account,
                request: request(),
            })
            .collect();

        let results = f
            .orchestrator
            .send_bulk(&user, items, &CancellationToken::new())
            .await;
        assert_eq!(f.orchestrator.tracker.live_count().await, 0);
        for result in results {
            let status = f.orchestrator.status(result.send_id).await.unwrap();
            assert_eq!(status.state, SendState::Sent);
        }
    }

    #[tokio::test]
    async fn auth_rejection_fails_without_retry() {
        let f = fixture(true).await;
        let mut rx = f.events.subscribe();
        let result = f
            .orchestrator
            .send(&UserId::new("u"), f.account, request(), &CancellationToken::new())
            .await;
        assert_eq!(result.state, SendState::Failed);
        assert_eq!(result.error_kind, Some(ErrorKind::Authentication));

        assert_eq!(rx.recv().await.unwrap().1.event_type(), "send.started");
        match rx.recv().await.unwrap().1 {
            MailEvent::SendFailed { error_kind, .. } => {
                assert_eq!(error_kind, ErrorKind::Authentication);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn foreign_account_is_not_found() {
        let f = fixture(false).await;
        let result = f
            .orchestrator
            .send(&UserId::new("intruder"), f.account, request(), &CancellationToken::new())
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
        assert!(f.recording.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_request_fails_before_connecting() {
        let f = fixture(false).await;
        let mut bad = request();
        bad.subject = String::new();
        let result = f
            .orchestrator
            .send(&UserId::new("u"), f.account, bad, &CancellationToken::new())
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
        assert!(result.email_id.is_none());
        assert!(f.recording.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_submit_records_cancellation() {
        let f = fixture(false).await;
        let handle = f
            .orchestrator
            .submit(&UserId::new("u"), f.account, request())
            .await;
        let send_id = handle.send_id();
        handle.cancel();
        let result = handle.join().await.unwrap();

        assert_eq!(result.send_id, send_id);
        assert_eq!(result.state, SendState::Failed);
        assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn resend_uses_recorded_request() {
        let f = fixture(false).await;
        let user = UserId::new("u");
        let first = f
            .orchestrator
            .send(&user, f.account, request(), &CancellationToken::new())
            .await;
        let second = f
            .orchestrator
            .resend(&user, first.send_id, &CancellationToken::new())
            .await
            .unwrap();

        assert!(second.is_success());
        assert_ne!(second.send_id, first.send_id);
        assert_eq!(f.recording.sent.lock().unwrap().len(), 2);
        assert!(matches!(
            f.orchestrator
                .resend(&UserId::new("other"), first.send_id, &CancellationToken::new())
                .await
                .unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
