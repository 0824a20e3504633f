//! Attachment metadata index.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use uuid::Uuid;

use super::model::{Attachment, AttachmentId};
use crate::Result;
use crate::account::{AccountId, UserId};
use crate::compose::EmailId;

/// Lookup of attachment metadata by ID.
#[async_trait]
pub trait AttachmentIndex: Send + Sync {
    /// Loads metadata by ID.
    async fn get(&self, id: AttachmentId) -> Result<Option<Attachment>>;

    /// Inserts or replaces metadata.
    async fn put(&self, attachment: &Attachment) -> Result<()>;

    /// Removes metadata.
    async fn remove(&self, id: AttachmentId) -> Result<()>;
}

/// `SQLite`-backed attachment index.
#[derive(Debug, Clone)]
pub struct SqliteAttachmentIndex {
    pool: SqlitePool,
}

impl SqliteAttachmentIndex {
    /// Opens (and creates if needed) the index at `database_path`.
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

    /// Create an in-memory index for testing.
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

    /// Creates the index over an existing pool.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS attachments (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                account_id INTEGER,
                email_id TEXT,
                filename TEXT NOT NULL,
                content_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                storage_path TEXT,
                checksum TEXT,
                downloaded INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_attachments_email ON attachments(email_id)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl AttachmentIndex for SqliteAttachmentIndex {
    async fn get(&self, id: AttachmentId) -> Result<Option<Attachment>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, account_id, email_id, filename, content_type, size,
                   storage_path, checksum, downloaded, created_at
            FROM attachments
            WHERE id = ?
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(row_to_attachment))
    }

    #[allow(clippy::cast_possible_wrap)]
    async fn put(&self, attachment: &Attachment) -> Result<()> {
        sqlx::query(
            r"
            INSERT OR REPLACE INTO attachments (
                id, user_id, account_id, email_id, filename, content_type, size,
                storage_path, checksum, downloaded, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(attachment.id.to_string())
        .bind(attachment.user_id.as_str())
        .bind(attachment.account_id.map(|a| a.0))
        .bind(attachment.email_id.map(|e| e.to_string()))
        .bind(&attachment.filename)
        .bind(&attachment.content_type)
        .bind(attachment.size as i64)
        .bind(attachment.storage_path.as_deref())
        .bind(attachment.checksum.as_deref())
        .bind(attachment.downloaded)
        .bind(attachment.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, id: AttachmentId) -> Result<()> {
        sqlx::query("DELETE FROM attachments WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Convert a database row to an Attachment. Rows with malformed IDs are skipped.
#[allow(clippy::cast_sign_loss)]
fn row_to_attachment(row: &SqliteRow) -> Option<Attachment> {
    let id = Uuid::parse_str(row.get("id")).ok()?;
    let email_id = match row.get::<Option<String>, _>("email_id") {
        Some(s) => Some(EmailId(Uuid::parse_str(&s).ok()?)),
        None => None,
    };
    let created_at = DateTime::parse_from_rfc3339(row.get("created_at"))
        .map_or_else(|_| Utc::now(), |t| t.with_timezone(&Utc));

    Some(Attachment {
        id: AttachmentId(id),
        user_id: UserId::new(row.get::<String, _>("user_id")),
        account_id: row.get::<Option<i64>, _>("account_id").map(AccountId::new),
        email_id,
        filename: row.get("filename"),
        content_type: row.get("content_type"),
        size: row.get::<i64, _>("size") as u64,
        storage_path: row.get("storage_path"),
        checksum: row.get("checksum"),
        downloaded: row.get::<i64, _>("downloaded") != 0,
        created_at,
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

    #[tokio::test]
    async fn put_get_remove() {
        let index = SqliteAttachmentIndex::in_memory().await.unwrap();
        let mut attachment = Attachment::new(UserId::new("u"), "a.png", "image/png", 42)
            .with_account(AccountId::new(3))
            .with_email(EmailId::new());
        attachment.storage_path = Some("accounts/3/x".into());
        attachment.checksum = Some("abc".into());

        index.put(&attachment).await.unwrap();
        let loaded = index.get(attachment.id).await.unwrap().unwrap();
        assert_eq!(loaded.filename, "a.png");
        assert_eq!(loaded.email_id, attachment.email_id);
        assert_eq!(loaded.checksum.as_deref(), Some("abc"));
        assert_eq!(loaded.size, 42);

        index.remove(attachment.id).await.unwrap();
        assert!(index.get(attachment.id).await.unwrap().is_none());
    }
}
