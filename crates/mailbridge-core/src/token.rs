//! `OAuth2` access token refresh before connecting.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mailbridge_oauth::{OAuthClient, Token};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::account::{Account, AccountStore, AuthMethod, OAuthTokens, Vendor};
use crate::{Error, Result};

/// Exchanges a stored refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Refreshes the tokens of an account served by `vendor`.
    async fn refresh(&self, vendor: Vendor, tokens: &OAuthTokens) -> Result<Token>;
}

/// Refreshes tokens against the vendor's token endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    providers: HashMap<Vendor, mailbridge_oauth::Provider>,
}

impl HttpTokenRefresher {
    /// Creates a refresher with the Google and Microsoft endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in endpoint URL is invalid.
    pub fn new() -> Result<Self> {
        let providers = HashMap::from([
            (Vendor::Gmail, mailbridge_oauth::Provider::google()?),
            (Vendor::Outlook, mailbridge_oauth::Provider::microsoft()?),
        ]);
        Ok(Self { providers })
    }

    /// Sets or replaces the token endpoint for a vendor.
    #[must_use]
    pub fn with_provider(mut self, vendor: Vendor, provider: mailbridge_oauth::Provider) -> Self {
        self.providers.insert(vendor, provider);
        self
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, vendor: Vendor, tokens: &OAuthTokens) -> Result<Token> {
        let provider = self.providers.get(&vendor).cloned().ok_or_else(|| {
            Error::Config(format!(
                "no OAuth2 token endpoint for {}",
                vendor.display_name()
            ))
        })?;

        let mut client = OAuthClient::new(tokens.client_id.clone(), provider)?;
        if let Some(secret) = tokens.client_secret.as_deref().filter(|s| !s.is_empty()) {
            client = client.with_client_secret(secret);
        }
        Ok(client.refresh_token(&tokens.to_token()).await?)
    }
}

/// Keeps the stored token bundle of `OAuth2` accounts fresh.
pub struct TokenManager {
    store: Arc<dyn AccountStore>,
    refresher: Arc<dyn TokenRefresher>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager").finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Creates a token manager.
    #[must_use]
    pub fn new(store: Arc<dyn AccountStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { store, refresher }
    }

    /// Refreshes the access token of an `OAuth2` account and persists the
    /// result. Password accounts are left untouched.
    ///
    /// The refresh happens on every call; the stored expiry is not trusted.
    ///
    /// # Errors
    ///
    /// Returns an authentication error if the account holds no refresh
    /// token or the endpoint rejects it, [`Error::Cancelled`] on
    /// cancellation, or a storage error if persisting fails.
    pub async fn ensure_fresh(
        &self,
        account: &mut Account,
        vendor: Vendor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if account.auth_method != AuthMethod::OAuth2 {
            return Ok(());
        }

        let tokens = account.oauth.as_ref().ok_or_else(|| {
            Error::Authentication(format!("{} has not been authorized", account.email))
        })?;
        if tokens.refresh_token.as_deref().is_none_or(str::is_empty) {
            return Err(Error::Authentication(format!(
                "{} must be authorized again",
                account.email
            )));
        }

        let refreshed = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.refresher.refresh(vendor, tokens) => result,
        };
        let token = match refreshed {
            Ok(token) => token,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e @ (Error::OAuth(_) | Error::Authentication(_))) => {
                warn!(account_id = ?account.id, error = %e, "Token refresh rejected");
                return Err(e);
            }
            Err(e) => {
                warn!(account_id = ?account.id, error = %e, "Token refresh failed");
                return Err(Error::Authentication(format!("token refresh failed: {e}")));
            }
        };

        if let Some(tokens) = account.oauth.as_mut() {
            tokens.apply(token);
        }
        self.store.save_account(account).await?;
        info!(account_id = ?account.id, "Refreshed access token");
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
    use crate::account::{SqliteAccountRepository, UserId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticRefresher {
        calls: AtomicUsize,
        rotate: bool,
    }

    #[async_trait]
    impl TokenRefresher for StaticRefresher {
        async fn refresh(&self, _vendor: Vendor, _tokens: &OAuthTokens) -> Result<Token> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let token = Token::bearer(format!("access-{n}"));
            Ok(if self.rotate {
                token.with_refresh_token(format!("refresh-{n}"))
            } else {
                token
            })
        }
    }

    struct RejectingRefresher;

    #[async_trait]
    impl TokenRefresher for RejectingRefresher {
        async fn refresh(&self, _vendor: Vendor, _tokens: &OAuthTokens) -> Result<Token> {
            Err(Error::OAuth(mailbridge_oauth::Error::oauth_error(
                "invalid_grant",
                "revoked",
            )))
        }
    }

    async fn oauth_account(repo: &SqliteAccountRepository) -> Account {
        let mut account = Account::with_email(UserId::new("u"), "me@gmail.com");
        account.auth_method = AuthMethod::OAuth2;
        account.oauth = Some(OAuthTokens {
            access_token: "old".into(),
            refresh_token: Some("r0".into()),
            client_id: "client".into(),
            ..Default::default()
        });
        repo.create(&mut account).await.unwrap();
        account
    }

    #[tokio::test]
    async fn refreshes_every_call_and_persists() {
        let repo = Arc::new(SqliteAccountRepository::in_memory().await.unwrap());
        let mut account = oauth_account(&repo).await;
        let refresher = Arc::new(StaticRefresher {
            calls: AtomicUsize::new(0),
            rotate: false,
        });
        let manager = TokenManager::new(repo.clone(), refresher.clone());
        let cancel = CancellationToken::new();

        manager
            .ensure_fresh(&mut account, Vendor::Gmail, &cancel)
            .await
            .unwrap();
        manager
            .ensure_fresh(&mut account, Vendor::Gmail, &cancel)
            .await
            .unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);

        let stored = repo
            .get_account(account.id.unwrap())
            .await
            .unwrap()
            .unwrap();
        let tokens = stored.oauth.unwrap();
        assert_eq!(tokens.access_token, "access-1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("r0"));
    }

    #[tokio::test]
    async fn rotated_refresh_token_is_stored() {
        let repo = Arc::new(SqliteAccountRepository::in_memory().await.unwrap());
        let mut account = oauth_account(&repo).await;
        let manager = TokenManager::new(
            repo.clone(),
            Arc::new(StaticRefresher {
                calls: AtomicUsize::new(0),
                rotate: true,
            }),
        );
        manager
            .ensure_fresh(&mut account, Vendor::Gmail, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            account.oauth.unwrap().refresh_token.as_deref(),
            Some("refresh-0")
        );
    }

    #[tokio::test]
    async fn missing_refresh_token_requires_reauthorization() {
        let repo = Arc::new(SqliteAccountRepository::in_memory().await.unwrap());
        let mut account = oauth_account(&repo).await;
        if let Some(tokens) = account.oauth.as_mut() {
            tokens.refresh_token = None;
        }
        let manager = TokenManager::new(repo, Arc::new(RejectingRefresher));
        let err = manager
            .ensure_fresh(&mut account, Vendor::Gmail, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn rejected_refresh_is_not_retryable() {
        let repo = Arc::new(SqliteAccountRepository::in_memory().await.unwrap());
        let mut account = oauth_account(&repo).await;
        let manager = TokenManager::new(repo, Arc::new(RejectingRefresher));
        let err = manager
            .ensure_fresh(&mut account, Vendor::Gmail, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Authentication);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn password_accounts_are_untouched() {
        let repo = Arc::new(SqliteAccountRepository::in_memory().await.unwrap());
        let manager = TokenManager::new(repo, Arc::new(RejectingRefresher));
        let mut account = Account::with_email(UserId::new("u"), "me@gmail.com");
        manager
            .ensure_fresh(&mut account, Vendor::Gmail, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[test]
    fn http_refresher_knows_oauth_vendors() {
        let refresher = HttpTokenRefresher::new().unwrap();
        assert!(refresher.providers.contains_key(&Vendor::Gmail));
        assert!(refresher.providers.contains_key(&Vendor::Outlook));
        assert!(!refresher.providers.contains_key(&Vendor::Qq));
    }
}
