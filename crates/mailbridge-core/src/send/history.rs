//! Durable send history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use uuid::Uuid;

use super::status::{SendId, SendState, SendStatus};
use crate::account::{AccountId, UserId};
use crate::compose::{ComposeRequest, EmailId};
use crate::error::ErrorKind;
use crate::Result;

/// Persistent record of sends and the requests that produced them.
#[async_trait]
pub trait SendHistoryStore: Send + Sync {
    /// Records a new send together with its request.
    async fn record(&self, status: &SendStatus, request: &ComposeRequest) -> Result<()>;

    /// Stores the latest status of a recorded send.
    async fn update(&self, status: &SendStatus) -> Result<()>;

    /// Loads a status.
    async fn get(&self, send_id: SendId) -> Result<Option<SendStatus>>;

    /// Loads the original request of a send.
    async fn load_request(&self, send_id: SendId) -> Result<Option<ComposeRequest>>;
}

/// `SQLite`-backed send history.
#[derive(Debug, Clone)]
pub struct SqliteSendHistory {
    pool: SqlitePool,
}

impl SqliteSendHistory {
    /// Opens (and creates if needed) the history database at `database_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        Self::with_pool(pool).await
    }

    /// Create an in-memory history for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    /// Creates the history over an existing pool.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS send_history (
                send_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                account_id INTEGER NOT NULL,
                email_id TEXT,
                state TEXT NOT NULL,
                recipients TEXT NOT NULL,
                sent_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                error_kind TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                request TEXT NOT NULL
            )
            ",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_send_history_user ON send_history(user_id)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Lists a user's sends, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_for_user(&self, user: &UserId, limit: u32) -> Result<Vec<SendStatus>> {
        let rows = sqlx::query(
            r"
            SELECT send_id, user_id, account_id, email_id, state, recipients, sent_count,
                   failed_count, retry_count, error, error_kind, created_at, started_at,
                   completed_at
            FROM send_history
            WHERE user_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            ",
        )
        .bind(user.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(row_to_status).collect())
    }
}

#[async_trait]
impl SendHistoryStore for SqliteSendHistory {
    #[allow(clippy::cast_possible_wrap)]
    async fn record(&self, status: &SendStatus, request: &ComposeRequest) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO send_history (
                send_id, user_id, account_id, email_id, state, recipients, sent_count,
                failed_count, retry_count, error, error_kind, created_at, started_at,
                completed_at, request
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(status.send_id.to_string())
        .bind(status.user_id.as_str())
        .bind(status.account_id.0)
        .bind(status.email_id.map(|e| e.to_string()))
        .bind(status.state.as_str())
        .bind(serde_json::to_string(&status.recipients)?)
        .bind(status.sent_count as i64)
        .bind(status.failed_count as i64)
        .bind(i64::from(status.retry_count))
        .bind(status.error.as_deref())
        .bind(status.error_kind.map(ErrorKind::as_str))
        .bind(status.created_at.to_rfc3339())
        .bind(status.started_at.map(|t| t.to_rfc3339()))
        .bind(status.completed_at.map(|t| t.to_rfc3339()))
        .bind(serde_json::to_string(request)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[allow(clippy::cast_possible_wrap)]
    async fn update(&self, status: &SendStatus) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE send_history SET
                email_id = ?, state = ?, recipients = ?, sent_count = ?, failed_count = ?,
                retry_count = ?, error = ?, error_kind = ?, started_at = ?, completed_at = ?
            WHERE send_id = ?
            ",
        )
        .bind(status.email_id.map(|e| e.to_string()))
        .bind(status.state.as_str())
        .bind(serde_json::to_string(&status.recipients)?)
        .bind(status.sent_count as i64)
        .bind(status.failed_count as i64)
        .bind(i64::from(status.retry_count))
        .bind(status.error.as_deref())
        .bind(status.error_kind.map(ErrorKind::as_str))
        .bind(status.started_at.map(|t| t.to_rfc3339()))
        .bind(status.completed_at.map(|t| t.to_rfc3339()))
        .bind(status.send_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(crate::Error::not_found(format!("Send {}", status.send_id)));
        }
        Ok(())
    }

    async fn get(&self, send_id: SendId) -> Result<Option<SendStatus>> {
        let row = sqlx::query(
            r"
            SELECT send_id, user_id, account_id, email_id, state, recipients, sent_count,
                   failed_count, retry_count, error, error_kind, created_at, started_at,
                   completed_at
            FROM send_history
            WHERE send_id = ?
            ",
        )
        .bind(send_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(row_to_status))
    }

    async fn load_request(&self, send_id: SendId) -> Result<Option<ComposeRequest>> {
        let row = sqlx::query("SELECT request FROM send_history WHERE send_id = ?")
            .bind(send_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(row.get("request"))?)),
            None => Ok(None),
        }
    }
}

fn parse_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Convert a database row to a SendStatus. Rows with malformed IDs or
/// states are skipped.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn row_to_status(row: &SqliteRow) -> Option<SendStatus> {
    let send_id = SendId(Uuid::parse_str(row.get("send_id")).ok()?);
    let email_id = match row.get::<Option<String>, _>("email_id") {
        Some(s) => Some(EmailId(Uuid::parse_str(&s).ok()?)),
        None => None,
    };
    let state = SendState::from_name(row.get("state"))?;
    let recipients = serde_json::from_str(row.get("recipients")).unwrap_or_default();

    Some(SendStatus {
        send_id,
        email_id,
        account_id: AccountId::new(row.get("account_id")),
        user_id: UserId::new(row.get::<String, _>("user_id")),
        state,
        recipients,
        sent_count: row.get::<i64, _>("sent_count") as usize,
        failed_count: row.get::<i64, _>("failed_count") as usize,
        progress: state.progress(),
        retry_count: row.get::<i64, _>("retry_count") as u32,
        error: row.get("error"),
        error_kind: row
            .get::<Option<String>, _>("error_kind")
            .map(|k| ErrorKind::from_name(&k)),
        created_at: parse_time(Some(row.get("created_at"))).unwrap_or_else(Utc::now),
        started_at: parse_time(row.get("started_at")),
        completed_at: parse_time(row.get("completed_at")),
    })
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
    use crate::Error;

    fn request() -> ComposeRequest {
        ComposeRequest {
            from: "a@x.com".into(),
            to: vec!["b@y.com".into()],
            subject: "Hi".into(),
            text_body: Some("hello".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn record_update_get() {
        let history = SqliteSendHistory::in_memory().await.unwrap();
        let mut status = SendStatus::pending(SendId::new(), UserId::new("u"), AccountId::new(7));
        history.record(&status, &request()).await.unwrap();

        let loaded = history.get(status.send_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, SendState::Pending);
        assert_eq!(loaded.account_id, AccountId::new(7));

        status.mark_sending(EmailId::new(), vec!["b@y.com".into()]);
        status.mark_failed(&Error::Cancelled);
        history.update(&status).await.unwrap();

        let loaded = history.get(status.send_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, SendState::Failed);
        assert_eq!(loaded.email_id, status.email_id);
        assert_eq!(loaded.recipients, vec!["b@y.com".to_string()]);
        assert_eq!(loaded.failed_count, 1);
        assert_eq!(loaded.retry_count, 1);
        assert_eq!(loaded.error_kind, Some(ErrorKind::Cancelled));
        assert!(loaded.completed_at.is_some());

        assert_eq!(
            history.load_request(status.send_id).await.unwrap(),
            Some(request())
        );
        assert_eq!(
            history.list_for_user(&UserId::new("u"), 10).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_send() {
        let history = SqliteSendHistory::in_memory().await.unwrap();
        let status = SendStatus::pending(SendId::new(), UserId::new("u"), AccountId::new(1));
        assert!(history.get(status.send_id).await.unwrap().is_none());
        assert!(history.load_request(status.send_id).await.unwrap().is_none());
        assert!(matches!(
            history.update(&status).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
