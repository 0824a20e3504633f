//! Generic adapter driving a transport with vendor rules.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::classify;
use super::rules::{ServerDefaults, VendorRules};
use super::transport::{
    Credentials, Endpoint, ImapSession, MailTransport, SmtpSession, TransportError,
    TransportErrorKind, TransportResult,
};
use super::{OutgoingMessage, Provider, ProviderError, ProviderErrorKind, Service, SpecialFolder};
use crate::account::{Account, AuthMethod, ImapConfig, SmtpConfig};
use crate::sync::RemoteMessage;
use crate::{Error, Result};

/// A [`Provider`] for any vendor, parameterized by its [`VendorRules`].
pub struct MailAdapter {
    rules: Arc<dyn VendorRules>,
    transport: Arc<dyn MailTransport>,
    connect_timeout: Duration,
    smtp: Option<Box<dyn SmtpSession>>,
    imap: Option<Box<dyn ImapSession>>,
}

impl std::fmt::Debug for MailAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailAdapter")
            .field("vendor", &self.rules.vendor())
            .field("smtp_connected", &self.smtp.is_some())
            .field("imap_connected", &self.imap.is_some())
            .finish_non_exhaustive()
    }
}

impl MailAdapter {
    /// Creates a disconnected adapter.
    #[must_use]
    pub fn new(
        rules: Arc<dyn VendorRules>,
        transport: Arc<dyn MailTransport>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            rules,
            transport,
            connect_timeout,
            smtp: None,
            imap: None,
        }
    }

    /// The vendor rules in use.
    #[must_use]
    pub fn rules(&self) -> &dyn VendorRules {
        self.rules.as_ref()
    }

    /// Resolves the server for a service, filling omitted settings from the
    /// vendor defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no host is configured and the vendor
    /// has no default.
    pub fn endpoint(&self, account: &Account, service: Service) -> Result<Endpoint> {
        let domain = account
            .domain()
            .ok_or_else(|| Error::Config(format!("invalid account email {}", account.email)))?;

        let (host, port, security, defaults) = match service {
            Service::Submission => (
                &account.smtp.host,
                account.smtp.port,
                account.smtp.security,
                self.rules.smtp_defaults(&domain),
            ),
            Service::Retrieval => (
                &account.imap.host,
                account.imap.port,
                account.imap.security,
                self.rules.imap_defaults(&domain),
            ),
        };

        let resolved = if host.trim().is_empty() {
            let ServerDefaults {
                host,
                port: default_port,
                security,
            } = defaults.ok_or_else(|| {
                Error::Config(format!("no {service} server configured for {}", account.email))
            })?;
            ServerDefaults {
                host,
                port: if port == 0 { default_port } else { port },
                security,
            }
        } else {
            let port = match (port, service) {
                (0, Service::Submission) => SmtpConfig::default_port(security),
                (0, Service::Retrieval) => ImapConfig::default_port(security),
                (p, _) => p,
            };
            ServerDefaults::new(host.trim(), port, security)
        };

        Ok(Endpoint {
            host: resolved.host,
            port: resolved.port,
            security: resolved.security,
            announce_client_id: service == Service::Retrieval && self.rules.announce_client_id(),
        })
    }

    /// Builds transport credentials for a service.
    ///
    /// # Errors
    ///
    /// Returns an authentication error if the account holds no usable secret.
    pub fn credentials(account: &Account, service: Service) -> Result<Credentials> {
        let configured = match service {
            Service::Submission => account.smtp.username.trim(),
            Service::Retrieval => account.imap.username.trim(),
        };
        let username = if configured.is_empty() {
            account.email.clone()
        } else {
            configured.to_string()
        };

        match account.auth_method {
            AuthMethod::Password if account.password.is_empty() => Err(Error::Authentication(
                format!("no password stored for {}", account.email),
            )),
            AuthMethod::Password => Ok(Credentials::Password {
                username,
                password: account.password.clone(),
            }),
            AuthMethod::OAuth2 => match &account.oauth {
                Some(tokens) if !tokens.access_token.is_empty() => Ok(Credentials::OAuth2 {
                    username,
                    access_token: tokens.access_token.clone(),
                }),
                _ => Err(Error::Authentication(format!(
                    "{} must be authorized again",
                    account.email
                ))),
            },
        }
    }

    fn resolve_folder(&self, folder: &str) -> String {
        SpecialFolder::from_name(folder)
            .and_then(|f| self.rules.special_folders().remove(&f))
            .unwrap_or_else(|| folder.to_string())
    }
}

/// Runs a transport call, honouring cancellation and an optional timeout.
async fn guard<T>(
    rules: &dyn VendorRules,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    op: impl Future<Output = TransportResult<T>> + Send,
) -> Result<T> {
    let bounded = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, op).await.unwrap_or_else(|_| {
                Err(TransportError::new(
                    TransportErrorKind::Timeout,
                    format!("no response within {}s", limit.as_secs()),
                ))
            }),
            None => op.await,
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = bounded => result.map_err(|e| Error::Provider(classify(rules.error_rules(), &e))),
    }
}

fn not_connected(service: Service) -> Error {
    Error::Provider(ProviderError::new(
        ProviderErrorKind::Unknown,
        "Not connected to the mail server",
        format!("{service} session is not open"),
    ))
}

#[async_trait]
impl Provider for MailAdapter {
    async fn connect(
        &mut self,
        account: &Account,
        service: Service,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.rules.validate(account)?;
        let endpoint = self.endpoint(account, service)?;
        let credentials = Self::credentials(account, service)?;

        debug!(
            vendor = %self.rules.vendor(),
            %service,
            host = %endpoint.host,
            port = endpoint.port,
            mechanism = %credentials.mechanism(),
            "Connecting"
        );

        let rules = self.rules.as_ref();
        let timeout = Some(self.connect_timeout);
        match service {
            Service::Submission => {
                let session = guard(
                    rules,
                    cancel,
                    timeout,
                    self.transport.open_smtp(&endpoint, &credentials),
                )
                .await?;
                if let Some(mut old) = self.smtp.replace(session)
                    && let Err(e) = old.quit().await
                {
                    debug!(error = %e, "SMTP quit of replaced session failed");
                }
            }
            Service::Retrieval => {
                let session = guard(
                    rules,
                    cancel,
                    timeout,
                    self.transport.open_imap(&endpoint, &credentials),
                )
                .await?;
                if let Some(mut old) = self.imap.replace(session)
                    && let Err(e) = old.logout().await
                {
                    debug!(error = %e, "IMAP logout of replaced session failed");
                }
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut session) = self.smtp.take()
            && let Err(e) = session.quit().await
        {
            debug!(error = %e, "SMTP quit failed");
        }
        if let Some(mut session) = self.imap.take()
            && let Err(e) = session.logout().await
        {
            debug!(error = %e, "IMAP logout failed");
        }
        Ok(())
    }

    async fn test_connection(
        &mut self,
        account: &Account,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut result = self.connect(account, Service::Submission, cancel).await;
        if result.is_ok() {
            result = self.connect(account, Service::Retrieval, cancel).await;
        }
        self.disconnect().await?;
        result
    }

    async fn send_email(
        &mut self,
        _account: &Account,
        message: &OutgoingMessage,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let rules = self.rules.as_ref();
        let session = self
            .smtp
            .as_mut()
            .ok_or_else(|| not_connected(Service::Submission))?;
        guard(
            rules,
            cancel,
            None,
            session.send(&message.from, &message.recipients, &message.data),
        )
        .await
    }

    async fn sync_emails(
        &mut self,
        _account: &Account,
        folder: &str,
        watermark: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteMessage>> {
        let physical = self.resolve_folder(folder);
        let rules = self.rules.as_ref();
        let session = self
            .imap
            .as_mut()
            .ok_or_else(|| not_connected(Service::Retrieval))?;
        let fetched = guard(
            rules,
            cancel,
            None,
            session.fetch_since(&physical, watermark),
        )
        .await?;

        debug!(folder = %physical, count = fetched.len(), "Fetched messages");
        Ok(fetched
            .iter()
            .map(|m| RemoteMessage::from_fetched(&physical, m, rules))
            .collect())
    }

    fn supported_auth_methods(&self) -> &'static [AuthMethod] {
        self.rules.auth_methods()
    }

    fn special_folders(&self) -> HashMap<SpecialFolder, String> {
        self.rules.special_folders()
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
    use crate::account::{Security, UserId, Vendor};
    use crate::provider::vendors::rules_for;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Unreachable;

    #[async_trait]
    impl MailTransport for Unreachable {
        async fn open_smtp(
            &self,
            _endpoint: &Endpoint,
            _credentials: &Credentials,
        ) -> TransportResult<Box<dyn SmtpSession>> {
            std::future::pending().await
        }

        async fn open_imap(
            &self,
            _endpoint: &Endpoint,
            _credentials: &Credentials,
        ) -> TransportResult<Box<dyn ImapSession>> {
            Err(TransportError::new(
                TransportErrorKind::Network,
                "connection refused",
            ))
        }
    }

    fn adapter(vendor: Vendor) -> MailAdapter {
        MailAdapter::new(
            rules_for(vendor),
            Arc::new(Unreachable),
            Duration::from_secs(30),
        )
    }

    fn gmail_account() -> Account {
        let mut account = Account::with_email(UserId::new("u"), "me@gmail.com");
        account.password = "app-password".into();
        account
    }

    #[test]
    fn endpoint_uses_vendor_defaults() {
        let account = gmail_account();
        let smtp = adapter(Vendor::Gmail)
            .endpoint(&account, Service::Submission)
            .unwrap();
        assert_eq!(smtp.host, "smtp.gmail.com");
        assert_eq!(smtp.port, 465);
        assert!(!smtp.announce_client_id);
    }

    #[test]
    fn endpoint_keeps_configured_host() {
        let mut account = Account::with_email(UserId::new("u"), "me@example.org");
        account.smtp.host = "mail.example.org".into();
        account.smtp.security = Security::StartTls;
        let endpoint = adapter(Vendor::Custom)
            .endpoint(&account, Service::Submission)
            .unwrap();
        assert_eq!(endpoint.port, 587);

        assert!(matches!(
            adapter(Vendor::Custom).endpoint(&account, Service::Retrieval),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn netease_announces_id_on_imap() {
        let account = Account::with_email(UserId::new("u"), "me@163.com");
        let endpoint = adapter(Vendor::NetEase)
            .endpoint(&account, Service::Retrieval)
            .unwrap();
        assert_eq!(endpoint.host, "imap.163.com");
        assert!(endpoint.announce_client_id);
    }

    #[test]
    fn credentials_default_to_email() {
        let account = gmail_account();
        let creds = MailAdapter::credentials(&account, Service::Retrieval).unwrap();
        assert_eq!(creds.username(), "me@gmail.com");

        let mut oauth = account.clone();
        oauth.auth_method = AuthMethod::OAuth2;
        assert!(matches!(
            MailAdapter::credentials(&oauth, Service::Submission),
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_times_out_as_transient() {
        let mut adapter = adapter(Vendor::Gmail);
        let err = adapter
            .connect(&gmail_account(), Service::Submission, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }

    #[tokio::test]
    async fn connect_honours_cancellation() {
        let mut adapter = adapter(Vendor::Gmail);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = adapter
            .connect(&gmail_account(), Service::Submission, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        let mut adapter = adapter(Vendor::Gmail);
        let err = adapter
            .connect(&gmail_account(), Service::Retrieval, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        adapter.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_reports_first_failure() {
        let mut adapter = adapter(Vendor::Gmail);
        let err = adapter
            .test_connection(&gmail_account(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(adapter.smtp.is_none() && adapter.imap.is_none());
    }

    #[derive(Default)]
    struct StaleSessions {
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    struct Stale(Arc<AtomicUsize>);

    #[async_trait]
    impl SmtpSession for Stale {
        async fn send(&mut self, _from: &str, _to: &[String], _data: &[u8]) -> TransportResult<()> {
            Ok(())
        }
        async fn quit(&mut self) -> TransportResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::new(TransportErrorKind::Network, "connection reset"))
        }
    }

    #[async_trait]
    impl MailTransport for StaleSessions {
        async fn open_smtp(
            &self,
            _endpoint: &Endpoint,
            _credentials: &Credentials,
        ) -> TransportResult<Box<dyn SmtpSession>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Stale(Arc::clone(&self.closed))))
        }

        async fn open_imap(
            &self,
            _endpoint: &Endpoint,
            _credentials: &Credentials,
        ) -> TransportResult<Box<dyn ImapSession>> {
            Err(TransportError::new(TransportErrorKind::Network, "no imap"))
        }
    }

    #[tokio::test]
    async fn reconnect_survives_failed_quit() {
        let transport = Arc::new(StaleSessions::default());
        let mut adapter = MailAdapter::new(
            rules_for(Vendor::Gmail),
            Arc::clone(&transport) as Arc<dyn MailTransport>,
            Duration::from_secs(30),
        );
        let cancel = CancellationToken::new();
        let account = gmail_account();

        adapter.connect(&account, Service::Submission, &cancel).await.unwrap();
        adapter.connect(&account, Service::Submission, &cancel).await.unwrap();
        assert_eq!(transport.opened.load(Ordering::SeqCst), 2);
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
        assert!(adapter.smtp.is_some());

        adapter.disconnect().await.unwrap();
        assert_eq!(transport.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let mut adapter = adapter(Vendor::Gmail);
        let message = OutgoingMessage {
            from: "me@gmail.com".into(),
            recipients: vec!["you@example.com".into()],
            data: b"x".to_vec(),
        };
        let err = adapter
            .send_email(&gmail_account(), &message, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
