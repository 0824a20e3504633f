//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use mailbridge_core::provider::{
    Credentials, Endpoint, ImapSession, SmtpSession, TransportError, TransportErrorKind,
    TransportResult,
};
use mailbridge_core::{
    AttachmentStore, ComposeRequest, Composer, Config, LocalAttachmentStore, MailTransport,
    ProviderRegistry, SqliteAttachmentIndex, UserId,
};
use tracing::info;

/// Stands in for a network transport where no connection is made.
struct Offline;

#[async_trait]
impl MailTransport for Offline {
    async fn open_smtp(
        &self,
        endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> TransportResult<Box<dyn SmtpSession>> {
        Err(offline(endpoint))
    }

    async fn open_imap(
        &self,
        endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> TransportResult<Box<dyn ImapSession>> {
        Err(offline(endpoint))
    }
}

fn offline(endpoint: &Endpoint) -> TransportError {
    TransportError::new(
        TransportErrorKind::Network,
        format!("no transport available for {}", endpoint.host),
    )
}

/// Composes a request file and writes the wire bytes.
pub async fn compose(config: &Config, request: &Path, output: Option<&Path>, user: &str) -> Result<()> {
    let text = tokio::fs::read_to_string(request)
        .await
        .with_context(|| format!("reading {}", request.display()))?;
    let request: ComposeRequest = serde_json::from_str(&text).context("parsing compose request")?;

    let index_path = config.storage.root.join("index.db");
    if let Some(parent) = index_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let index = SqliteAttachmentIndex::new(&index_path.to_string_lossy()).await?;
    let store = LocalAttachmentStore::new(config.storage.clone());
    let composer = Composer::new(config.compose.clone(), Arc::new(store), Arc::new(index));

    let email = composer
        .compose(&UserId::new(user), &request)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    match output {
        Some(path) => {
            tokio::fs::write(path, email.mime_bytes())
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!(
                message_id = email.message_id(),
                size = email.size(),
                path = %path.display(),
                "Wrote message"
            );
        }
        None => {
            use tokio::io::AsyncWriteExt;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(email.mime_bytes()).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

/// Prints vendor and server defaults for an address.
pub fn detect(config: &Config, email: &str) -> Result<()> {
    let registry = ProviderRegistry::new(Arc::new(Offline), config);
    let vendor = registry.vendor_for_email(email)?;
    let rules = registry.rules(vendor);
    let domain = email
        .rsplit_once('@')
        .map(|(_, d)| d.trim().to_ascii_lowercase())
        .unwrap_or_default();

    println!("vendor: {} ({vendor})", vendor.display_name());
    for (label, defaults) in [
        ("imap", rules.imap_defaults(&domain)),
        ("smtp", rules.smtp_defaults(&domain)),
    ] {
        match defaults {
            Some(d) => println!("{label}: {}:{} ({})", d.host, d.port, d.security.as_str()),
            None => println!("{label}: not known, configure manually"),
        }
    }
    let methods: Vec<&str> = rules.auth_methods().iter().map(|m| m.as_str()).collect();
    println!("auth: {}", methods.join(", "));
    Ok(())
}

/// Deletes temporary uploads past their retention.
pub async fn purge_temp(config: &Config, older_than_hours: Option<u64>) -> Result<()> {
    let retention = older_than_hours.map_or_else(
        || config.storage.temp_retention(),
        |h| Duration::from_secs(h * 3600),
    );
    let store = LocalAttachmentStore::new(config.storage.clone());
    let removed = store.purge_temp(retention).await?;
    info!(removed, retention_hours = retention.as_secs() / 3600, "Purged temporary uploads");
    println!("removed {removed} file(s)");
    Ok(())
}
