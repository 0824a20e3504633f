//! Bounded exponential backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::account::{Account, Vendor};
use crate::provider::{Provider, Service};
use crate::token::TokenManager;
use crate::{Error, Result};

/// Retry schedule: `max_attempts` tries, waiting `base * 2^i` after failed
/// attempt `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// Creates a policy. At least one attempt is always made.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            base_delay,
        }
    }

    /// Total attempts allowed.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after failed attempt `attempt` (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Sleeps for the backoff after `attempt`, returning early on
    /// cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the token fires first.
    pub async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            () = tokio::time::sleep(self.delay_for(attempt)) => Ok(()),
        }
    }

    /// Runs `op` until it succeeds, fails non-retryably, or attempts run out.
    ///
    /// `op` receives the 0-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, the last error on exhaustion,
    /// or [`Error::Cancelled`].
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(Error::Cancelled),
                result = op(attempt) => result,
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt = self.after_failure(attempt, e, cancel).await?;
                }
            }
        }
    }

    /// Decides what follows a failed attempt: returns the next attempt
    /// number after backing off, or the error to give up with.
    async fn after_failure(&self, attempt: u32, error: Error, cancel: &CancellationToken) -> Result<u32> {
        if !error.is_retryable() || attempt + 1 >= self.max_attempts {
            return Err(error);
        }
        warn!(
            attempt = attempt + 1,
            max_attempts = self.max_attempts,
            delay_ms = u64::try_from(self.delay_for(attempt).as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Retrying after transient failure"
        );
        self.backoff(attempt, cancel).await?;
        Ok(attempt + 1)
    }
}

/// Connects providers with token refresh and retry.
#[derive(Clone)]
pub struct Connector {
    tokens: Arc<TokenManager>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Creates a connector.
    #[must_use]
    pub const fn new(tokens: Arc<TokenManager>, policy: RetryPolicy) -> Self {
        Self { tokens, policy }
    }

    /// The retry policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Connects `provider` to `service`, refreshing `OAuth2` tokens before
    /// every attempt and retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the translated provider error, an authentication error from
    /// token refresh, or [`Error::Cancelled`].
    pub async fn connect(
        &self,
        provider: &mut dyn Provider,
        account: &mut Account,
        vendor: Vendor,
        service: Service,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            debug!(account_id = ?account.id, %service, attempt = attempt + 1, "Connection attempt");

            let result = match self.tokens.ensure_fresh(account, vendor, cancel).await {
                Ok(()) => provider.connect(account, service, cancel).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt = self.policy.after_failure(attempt, e, cancel).await?;
                }
            }
        }
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
    use crate::provider::{ProviderError, ProviderErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn transient() -> Error {
        Error::Provider(ProviderError::new(
            ProviderErrorKind::Transient,
            "busy",
            "421",
        ))
    }

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let value = policy
            .run(&CancellationToken::new(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(transient())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::default()
            .run(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Error::Authentication("bad".into())) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::default()
            .run(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(transient()) }
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = RetryPolicy::default()
            .run(&cancel, |_| async { Err::<(), _>(transient()) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
