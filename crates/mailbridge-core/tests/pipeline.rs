//! End-to-end tests for sending and syncing.
//!
//! These tests drive the full pipeline against a scripted in-memory
//! transport instead of real SMTP/IMAP servers.

#![allow(clippy::unwrap_used, clippy::too_many_lines)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mailbridge_core::provider::{
    Credentials, Endpoint, FetchedMessage, ImapSession, SmtpSession, TransportError,
    TransportErrorKind, TransportResult,
};
use mailbridge_core::{
    Account, AccountId, AccountStore, AuthMethod, BroadcastPublisher, BulkItem, ComposeRequest,
    Composer, Config, Connector, ErrorKind, LocalAttachmentStore, MailEvent, MailTransport,
    OAuthTokens, ProviderRegistry, SendOrchestrator, SendState, SqliteAccountRepository,
    SqliteAttachmentIndex, SqliteSendHistory, StatusTracker, StorageConfig, SyncEngine,
    TokenManager, TokenRefresher, UserId, Vendor,
};
use mailbridge_oauth::Token;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Transport whose behavior is scripted per test.
#[derive(Default)]
struct Scripted {
    /// Errors returned by successive connection attempts; empty means accept.
    refusals: Mutex<VecDeque<TransportError>>,
    /// Recipient that the server rejects at submission.
    bounce: Option<String>,
    /// Time each submission takes.
    latency: Duration,
    /// Messages in every folder.
    mailbox: Vec<FetchedMessage>,

    connects: AtomicU32,
    tokens_seen: Mutex<Vec<String>>,
    folders_seen: Mutex<Vec<String>>,
    delivered: Mutex<Vec<Vec<String>>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Scripted {
    fn open(&self, credentials: &Credentials) -> TransportResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Credentials::OAuth2 { access_token, .. } = credentials {
            self.tokens_seen.lock().unwrap().push(access_token.clone());
        }
        match self.refusals.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct Handle(Arc<Scripted>);

#[async_trait]
impl MailTransport for Handle {
    async fn open_smtp(
        &self,
        _endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> TransportResult<Box<dyn SmtpSession>> {
        self.0.open(credentials)?;
        Ok(Box::new(Smtp(Arc::clone(&self.0))))
    }

    async fn open_imap(
        &self,
        _endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> TransportResult<Box<dyn ImapSession>> {
        self.0.open(credentials)?;
        Ok(Box::new(Imap(Arc::clone(&self.0))))
    }
}

struct Smtp(Arc<Scripted>);

#[async_trait]
impl SmtpSession for Smtp {
    async fn send(&mut self, _from: &str, recipients: &[String], _data: &[u8]) -> TransportResult<()> {
        let now = self.0.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.0.latency).await;
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(bounce) = &self.0.bounce
            && recipients.iter().any(|r| r == bounce)
        {
            return Err(TransportError::reply(550, "5.1.1 Mailbox unavailable"));
        }
        self.0.delivered.lock().unwrap().push(recipients.to_vec());
        Ok(())
    }

    async fn quit(&mut self) -> TransportResult<()> {
        Ok(())
    }
}

struct Imap(Arc<Scripted>);

#[async_trait]
impl ImapSession for Imap {
    async fn fetch_since(&mut self, folder: &str, _uid: u32) -> TransportResult<Vec<FetchedMessage>> {
        self.0.folders_seen.lock().unwrap().push(folder.to_string());
        // Servers answer `UID n:*` with the last message even when nothing
        // is newer, so everything is returned here.
        Ok(self.0.mailbox.clone())
    }

    async fn logout(&mut self) -> TransportResult<()> {
        Ok(())
    }
}

/// Hands out `fresh-1`, `fresh-2`, ... as access tokens.
#[derive(Default)]
struct CountingRefresher {
    calls: AtomicU32,
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh(&self, _vendor: Vendor, _tokens: &OAuthTokens) -> mailbridge_core::Result<Token> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Token::bearer(format!("fresh-{n}")))
    }
}

struct Harness {
    orchestrator: SendOrchestrator,
    sync: SyncEngine,
    accounts: Arc<SqliteAccountRepository>,
    transport: Arc<Scripted>,
    refresher: Arc<CountingRefresher>,
    events: BroadcastPublisher,
    gmail: AccountId,
    outlook: AccountId,
    _dir: TempDir,
}

fn user() -> UserId {
    UserId::new("user-1")
}

async fn harness(transport: Scripted, tune: impl FnOnce(&mut Config)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.delivery.base_delay_ms = 5;
    tune(&mut config);

    let accounts = Arc::new(SqliteAccountRepository::in_memory().await.unwrap());
    let mut gmail = Account::with_email(user(), "me@gmail.com");
    gmail.auth_method = AuthMethod::Password;
    gmail.password = "app-password".into();
    let gmail = accounts.create(&mut gmail).await.unwrap();

    let mut outlook = Account::with_email(user(), "me@outlook.com");
    outlook.auth_method = AuthMethod::OAuth2;
    outlook.oauth = Some(OAuthTokens {
        access_token: "stale".into(),
        refresh_token: Some("refresh".into()),
        client_id: "client".into(),
        ..OAuthTokens::default()
    });
    let outlook = accounts.create(&mut outlook).await.unwrap();

    let transport = Arc::new(transport);
    let registry = Arc::new(ProviderRegistry::new(
        Arc::new(Handle(Arc::clone(&transport))),
        &config,
    ));
    let refresher = Arc::new(CountingRefresher::default());
    let tokens = Arc::new(TokenManager::new(accounts.clone(), refresher.clone()));
    let connector = Connector::new(tokens, config.delivery.retry_policy());
    let events = BroadcastPublisher::new(256);

    let composer = Composer::new(
        config.compose.clone(),
        Arc::new(LocalAttachmentStore::new(StorageConfig {
            root: dir.path().to_path_buf(),
            ..config.storage.clone()
        })),
        Arc::new(SqliteAttachmentIndex::in_memory().await.unwrap()),
    );
    let tracker = Arc::new(StatusTracker::new(Arc::new(
        SqliteSendHistory::in_memory().await.unwrap(),
    )));

    let orchestrator = SendOrchestrator::new(
        accounts.clone(),
        Arc::new(composer),
        Arc::clone(&registry),
        connector.clone(),
        tracker,
        Arc::new(events.clone()),
        &config.delivery,
    );
    let sync = SyncEngine::new(
        accounts.clone(),
        registry,
        connector,
        Arc::new(events.clone()),
    );

    Harness {
        orchestrator,
        sync,
        accounts,
        transport,
        refresher,
        events,
        gmail,
        outlook,
        _dir: dir,
    }
}

fn request(to: &str) -> ComposeRequest {
    ComposeRequest {
        from: "me@gmail.com".into(),
        to: vec![to.into()],
        subject: "Hi".into(),
        text_body: Some("hello".into()),
        ..Default::default()
    }
}

fn transient() -> TransportError {
    TransportError::reply(421, "4.7.0 Try again later")
}

#[tokio::test]
async fn bulk_send_respects_concurrency_cap() {
    let h = harness(
        Scripted {
            latency: Duration::from_millis(20),
            ..Scripted::default()
        },
        |c| c.delivery.bulk_concurrency = 3,
    )
    .await;

    let items: Vec<BulkItem> = (0..10)
        .map(|i| BulkItem {
            account_id: h.gmail,
            request: request(&format!("r{i}@y.com")),
        })
        .collect();
    let results = h
        .orchestrator
        .send_bulk(&user(), items, &CancellationToken::new())
        .await;

    assert_eq!(results.len(), 10);
    assert!(results.iter().all(mailbridge_core::SendResult::is_success));
    assert_eq!(h.transport.delivered.lock().unwrap().len(), 10);
    let peak = h.transport.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak in-flight was {peak}");
    assert!(peak >= 1);
}

#[tokio::test]
async fn bulk_failure_is_isolated() {
    let h = harness(
        Scripted {
            bounce: Some("bounce@y.com".into()),
            ..Scripted::default()
        },
        |_| {},
    )
    .await;

    let items = vec![
        BulkItem {
            account_id: h.gmail,
            request: request("a@y.com"),
        },
        BulkItem {
            account_id: h.gmail,
            request: request("bounce@y.com"),
        },
        BulkItem {
            account_id: h.gmail,
            request: request("c@y.com"),
        },
    ];
    let results = h
        .orchestrator
        .send_bulk(&user(), items, &CancellationToken::new())
        .await;

    let states: Vec<SendState> = results.iter().map(|r| r.state).collect();
    assert_eq!(states, [SendState::Sent, SendState::Failed, SendState::Sent]);
    assert_eq!(results[1].error_kind, Some(ErrorKind::Policy));
    assert_eq!(h.transport.delivered.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let h = harness(
        Scripted {
            refusals: Mutex::new(VecDeque::from([transient(), transient()])),
            ..Scripted::default()
        },
        |_| {},
    )
    .await;

    let result = h
        .orchestrator
        .send(&user(), h.gmail, request("b@y.com"), &CancellationToken::new())
        .await;
    assert!(result.is_success(), "{result:?}");
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retries_stop_at_max_attempts() {
    let h = harness(
        Scripted {
            refusals: Mutex::new(VecDeque::from([transient(), transient(), transient(), transient()])),
            ..Scripted::default()
        },
        |_| {},
    )
    .await;

    let result = h
        .orchestrator
        .send(&user(), h.gmail, request("b@y.com"), &CancellationToken::new())
        .await;
    assert_eq!(result.state, SendState::Failed);
    assert_eq!(result.error_kind, Some(ErrorKind::Transient));
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn authentication_failure_is_not_retried() {
    let h = harness(
        Scripted {
            refusals: Mutex::new(VecDeque::from([TransportError::reply(
                535,
                "5.7.8 Username and Password not accepted",
            )])),
            ..Scripted::default()
        },
        |_| {},
    )
    .await;

    let result = h
        .orchestrator
        .send(&user(), h.gmail, request("b@y.com"), &CancellationToken::new())
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::Authentication));
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn oauth_token_refreshed_before_every_attempt() {
    let h = harness(
        Scripted {
            refusals: Mutex::new(VecDeque::from([TransportError::new(
                TransportErrorKind::Timeout,
                "connect timed out",
            )])),
            ..Scripted::default()
        },
        |_| {},
    )
    .await;

    let mut outlook_request = request("b@y.com");
    outlook_request.from = "me@outlook.com".into();
    let result = h
        .orchestrator
        .send(&user(), h.outlook, outlook_request, &CancellationToken::new())
        .await;

    assert!(result.is_success(), "{result:?}");
    assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        h.transport.tokens_seen.lock().unwrap().as_slice(),
        ["fresh-1", "fresh-2"]
    );
    let stored = h.accounts.get_account(h.outlook).await.unwrap().unwrap();
    assert_eq!(stored.oauth.unwrap().access_token, "fresh-2");
}

#[tokio::test]
async fn status_never_leaves_terminal_state() {
    let h = harness(Scripted::default(), |_| {}).await;
    let handle = h
        .orchestrator
        .submit(&user(), h.gmail, request("b@y.com"))
        .await;
    let send_id = handle.send_id();

    let early = h.orchestrator.status(send_id).await.unwrap();
    assert!(matches!(early.state, SendState::Pending | SendState::Sending | SendState::Sent));

    let result = handle.join().await.unwrap();
    assert!(result.is_success());

    let mut last = h.orchestrator.status(send_id).await.unwrap();
    assert_eq!(last.state, SendState::Sent);
    for _ in 0..3 {
        tokio::task::yield_now().await;
        let now = h.orchestrator.status(send_id).await.unwrap();
        assert_eq!(now.state, SendState::Sent);
        assert_eq!(now.completed_at, last.completed_at);
        last = now;
    }
}

#[tokio::test]
async fn sync_advances_watermark() {
    let message = |uid: u32, subject: &str| FetchedMessage {
        uid,
        flags: vec!["\\Seen".into()],
        raw: format!("Subject: {subject}\r\nFrom: a@x.com\r\n\r\nbody\r\n").into_bytes(),
    };
    let h = harness(
        Scripted {
            mailbox: vec![message(9, "nine"), message(3, "three"), message(5, "five")],
            ..Scripted::default()
        },
        |_| {},
    )
    .await;
    let mut rx = h.events.subscribe();
    let cancel = CancellationToken::new();

    let first = h.sync.sync(&user(), h.gmail, "inbox", 4, &cancel).await.unwrap();
    let uids: Vec<u32> = first.messages.iter().map(|m| m.uid).collect();
    assert_eq!(uids, [5, 9]);
    assert_eq!(first.watermark, 9);
    assert_eq!(first.messages[0].subject.as_deref(), Some("five"));

    let second = h
        .sync
        .sync(&user(), h.gmail, "inbox", first.watermark, &cancel)
        .await
        .unwrap();
    assert!(second.messages.is_empty());
    assert_eq!(second.watermark, 9);

    let (_, event) = rx.recv().await.unwrap();
    assert!(matches!(event, MailEvent::NewMail { count: 2, watermark: 9, .. }));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn sync_resolves_logical_folders() {
    let h = harness(Scripted::default(), |_| {}).await;
    let cancel = CancellationToken::new();
    h.sync.sync(&user(), h.gmail, "sent", 0, &cancel).await.unwrap();
    h.sync.sync(&user(), h.gmail, "Work", 0, &cancel).await.unwrap();
    assert_eq!(
        h.transport.folders_seen.lock().unwrap().as_slice(),
        ["[Gmail]/Sent Mail", "Work"]
    );
}

#[tokio::test]
async fn cancelled_sync_reports_cancellation() {
    let h = harness(Scripted::default(), |_| {}).await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h
        .sync
        .sync(&user(), h.gmail, "inbox", 0, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 0);
}
