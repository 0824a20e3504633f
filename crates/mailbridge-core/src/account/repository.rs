//! Account storage repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::debug;

use super::model::{
    Account, AccountId, AuthMethod, ImapConfig, OAuthTokens, Security, SmtpConfig, UserId, Vendor,
};
use super::validation::validate_account;
use crate::{Error, Result};

/// Account lookup and persistence used by the pipeline.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Loads an account by ID.
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>>;

    /// Persists an existing account, including its token bundle, atomically.
    async fn save_account(&self, account: &Account) -> Result<()>;
}

/// `SQLite`-backed account repository.
#[derive(Debug, Clone)]
pub struct SqliteAccountRepository {
    pool: SqlitePool,
}

const SELECT_COLUMNS: &str = r"
    SELECT id, user_id, name, email, vendor, auth_method,
           imap_host, imap_port, imap_security, imap_username,
           smtp_host, smtp_port, smtp_security, smtp_username,
           password,
           oauth_access_token, oauth_refresh_token, oauth_expires_at,
           oauth_client_id, oauth_client_secret, oauth_scope,
           is_default
    FROM accounts
";

impl SqliteAccountRepository {
    /// Create a new repository with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
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

    /// Create an in-memory repository for testing.
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

    /// Create a repository over an existing pool, creating the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                vendor TEXT,
                auth_method TEXT NOT NULL,
                imap_host TEXT NOT NULL,
                imap_port INTEGER NOT NULL,
                imap_security TEXT NOT NULL,
                imap_username TEXT NOT NULL,
                smtp_host TEXT NOT NULL,
                smtp_port INTEGER NOT NULL,
                smtp_security TEXT NOT NULL,
                smtp_username TEXT NOT NULL,
                password TEXT NOT NULL,
                oauth_access_token TEXT,
                oauth_refresh_token TEXT,
                oauth_expires_at TEXT,
                oauth_client_id TEXT,
                oauth_client_secret TEXT,
                oauth_scope TEXT,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (user_id, email)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts a new account and assigns its ID.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the account is invalid, or a
    /// database error if the insert fails.
    pub async fn create(&self, account: &mut Account) -> Result<AccountId> {
        if let Err(errors) = validate_account(account) {
            let messages: Vec<&str> = errors.iter().map(super::ValidationError::message).collect();
            return Err(Error::Config(messages.join("; ")));
        }

        let mut tx = self.pool.begin().await?;
        let oauth = account.oauth.clone().unwrap_or_default();
        let result = sqlx::query(
            r"
            INSERT INTO accounts (
                user_id, name, email, vendor, auth_method,
                imap_host, imap_port, imap_security, imap_username,
                smtp_host, smtp_port, smtp_security, smtp_username,
                password,
                oauth_access_token, oauth_refresh_token, oauth_expires_at,
                oauth_client_id, oauth_client_secret, oauth_scope,
                is_default
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(account.user_id.as_str())
        .bind(&account.name)
        .bind(&account.email)
        .bind(account.vendor.map(Vendor::as_str))
        .bind(account.auth_method.as_str())
        .bind(&account.imap.host)
        .bind(i64::from(account.imap.port))
        .bind(account.imap.security.as_str())
        .bind(&account.imap.username)
        .bind(&account.smtp.host)
        .bind(i64::from(account.smtp.port))
        .bind(account.smtp.security.as_str())
        .bind(&account.smtp.username)
        .bind(&account.password)
        .bind(account.oauth.as_ref().map(|_| oauth.access_token.as_str()))
        .bind(oauth.refresh_token.as_deref())
        .bind(oauth.expires_at.map(|t| t.to_rfc3339()))
        .bind(account.oauth.as_ref().map(|_| oauth.client_id.as_str()))
        .bind(oauth.client_secret.as_deref())
        .bind(oauth.scope.as_deref())
        .bind(account.is_default)
        .execute(&mut *tx)
        .await?;

        let id = AccountId::new(result.last_insert_rowid());
        if account.is_default {
            unset_other_defaults(&mut tx, &account.user_id, id).await?;
        }
        tx.commit().await?;

        account.id = Some(id);
        debug!(account_id = %id, email = %account.email, "Created account");
        Ok(id)
    }

    /// Lists a user's accounts, default first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE user_id = ? ORDER BY is_default DESC, name ASC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_account).collect())
    }

    /// Delete an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete(&self, id: AccountId) -> Result<()> {
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for SqliteAccountRepository {
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(row_to_account))
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        let id = account.require_id()?;
        let oauth = account.oauth.as_ref();

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r"
            UPDATE accounts SET
                name = ?, email = ?, vendor = ?, auth_method = ?,
                imap_host = ?, imap_port = ?, imap_security = ?, imap_username = ?,
                smtp_host = ?, smtp_port = ?, smtp_security = ?, smtp_username = ?,
                password = ?,
                oauth_access_token = ?, oauth_refresh_token = ?, oauth_expires_at = ?,
                oauth_client_id = ?, oauth_client_secret = ?, oauth_scope = ?,
                is_default = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            ",
        )
        .bind(&account.name)
        .bind(&account.email)
        .bind(account.vendor.map(Vendor::as_str))
        .bind(account.auth_method.as_str())
        .bind(&account.imap.host)
        .bind(i64::from(account.imap.port))
        .bind(account.imap.security.as_str())
        .bind(&account.imap.username)
        .bind(&account.smtp.host)
        .bind(i64::from(account.smtp.port))
        .bind(account.smtp.security.as_str())
        .bind(&account.smtp.username)
        .bind(&account.password)
        .bind(oauth.map(|t| t.access_token.as_str()))
        .bind(oauth.and_then(|t| t.refresh_token.as_deref()))
        .bind(oauth.and_then(|t| t.expires_at).map(|t| t.to_rfc3339()))
        .bind(oauth.map(|t| t.client_id.as_str()))
        .bind(oauth.and_then(|t| t.client_secret.as_deref()))
        .bind(oauth.and_then(|t| t.scope.as_deref()))
        .bind(account.is_default)
        .bind(id.0)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("Account {id}")));
        }
        if account.is_default {
            unset_other_defaults(&mut tx, &account.user_id, id).await?;
        }
        tx.commit().await?;

        debug!(account_id = %id, "Saved account");
        Ok(())
    }
}

async fn unset_other_defaults(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: &UserId,
    keep: AccountId,
) -> Result<()> {
    sqlx::query("UPDATE accounts SET is_default = 0 WHERE user_id = ? AND id != ?")
        .bind(user_id.as_str())
        .bind(keep.0)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Convert a database row to an Account.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn row_to_account(row: &SqliteRow) -> Account {
    let oauth = row
        .get::<Option<String>, _>("oauth_access_token")
        .map(|access_token| OAuthTokens {
            access_token,
            refresh_token: row.get("oauth_refresh_token"),
            expires_at: row
                .get::<Option<String>, _>("oauth_expires_at")
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|t| t.with_timezone(&Utc)),
            client_id: row
                .get::<Option<String>, _>("oauth_client_id")
                .unwrap_or_default(),
            client_secret: row.get("oauth_client_secret"),
            scope: row.get("oauth_scope"),
        });

    Account {
        id: Some(AccountId::new(row.get("id"))),
        user_id: UserId::new(row.get::<String, _>("user_id")),
        name: row.get("name"),
        email: row.get("email"),
        vendor: row
            .get::<Option<String>, _>("vendor")
            .and_then(|v| Vendor::from_name(&v)),
        auth_method: AuthMethod::from_name(row.get("auth_method")),
        imap: ImapConfig {
            host: row.get("imap_host"),
            port: row.get::<i64, _>("imap_port") as u16,
            security: Security::from_name(row.get("imap_security")),
            username: row.get("imap_username"),
        },
        smtp: SmtpConfig {
            host: row.get("smtp_host"),
            port: row.get::<i64, _>("smtp_port") as u16,
            security: Security::from_name(row.get("smtp_security")),
            username: row.get("smtp_username"),
        },
        password: row.get("password"),
        oauth,
        is_default: row.get::<i64, _>("is_default") != 0,
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

    fn password_account(email: &str) -> Account {
        let mut account = Account::with_email(UserId::new("user-1"), email);
        account.password = "secret".to_string();
        account
    }

    #[tokio::test]
    async fn test_create_and_retrieve_account() {
        let repo = SqliteAccountRepository::in_memory().await.unwrap();

        let mut account = password_account("test@example.com");
        account.vendor = Some(Vendor::Custom);
        account.smtp.host = "smtp.example.com".into();
        account.smtp.port = 2525;
        account.smtp.security = Security::StartTls;

        let id = repo.create(&mut account).await.unwrap();
        assert_eq!(account.id, Some(id));

        let retrieved = repo.get_account(id).await.unwrap().unwrap();
        assert_eq!(retrieved, account);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid() {
        let repo = SqliteAccountRepository::in_memory().await.unwrap();
        let mut account = Account::with_email(UserId::new("user-1"), "bad");
        assert!(matches!(
            repo.create(&mut account).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_save_account_persists_tokens() {
        let repo = SqliteAccountRepository::in_memory().await.unwrap();

        let mut account = Account::with_email(UserId::new("user-1"), "me@outlook.com");
        account.auth_method = AuthMethod::OAuth2;
        account.oauth = Some(OAuthTokens {
            access_token: "a1".into(),
            refresh_token: Some("r1".into()),
            client_id: "client".into(),
            ..Default::default()
        });
        let id = repo.create(&mut account).await.unwrap();

        let expires = Utc::now() + chrono::Duration::hours(1);
        if let Some(tokens) = account.oauth.as_mut() {
            tokens.access_token = "a2".into();
            tokens.expires_at = Some(expires);
        }
        repo.save_account(&account).await.unwrap();

        let stored = repo.get_account(id).await.unwrap().unwrap();
        let tokens = stored.oauth.unwrap();
        assert_eq!(tokens.access_token, "a2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("r1"));
        assert_eq!(
            tokens.expires_at.map(|t| t.timestamp()),
            Some(expires.timestamp())
        );
    }

    #[tokio::test]
    async fn test_save_unknown_account_is_not_found() {
        let repo = SqliteAccountRepository::in_memory().await.unwrap();
        let mut account = password_account("a@example.com");
        account.id = Some(AccountId::new(99));
        assert!(matches!(
            repo.save_account(&account).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_single_default_per_user() {
        let repo = SqliteAccountRepository::in_memory().await.unwrap();

        let mut first = password_account("one@example.com");
        first.is_default = true;
        repo.create(&mut first).await.unwrap();

        let mut second = password_account("two@example.com");
        second.is_default = true;
        repo.create(&mut second).await.unwrap();

        let accounts = repo.list_for_user(&UserId::new("user-1")).await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].email, "two@example.com");
        assert!(!accounts[1].is_default);
    }
}
