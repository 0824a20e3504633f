//! Local filesystem attachment store.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::error::{StorageError, StorageResult};
use super::model::{Attachment, StorageInfo};
use super::sanitize::{sanitize_component, sanitize_filename};
use crate::config::StorageConfig;

const CHUNK_SIZE: usize = 64 * 1024;
const TEMP_DIR: &str = "temp";
const ORPHANED_DIR: &str = "orphaned";

/// Readable attachment payload.
pub type AttachmentReader = Box<dyn AsyncRead + Unpin + Send>;

/// Persistence for attachment payloads.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Streams `reader` into storage and records the path and checksum on
    /// `attachment`. Nothing is left behind on failure.
    async fn store(
        &self,
        attachment: &mut Attachment,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StorageResult<()>;

    /// Opens the stored payload.
    async fn retrieve(&self, attachment: &Attachment) -> StorageResult<AttachmentReader>;

    /// Removes the stored payload. Missing files are not an error.
    async fn delete(&self, attachment: &Attachment) -> StorageResult<()>;

    /// Returns true if the payload file exists.
    async fn exists(&self, attachment: &Attachment) -> bool;

    /// Absolute path of the payload.
    fn storage_path(&self, attachment: &Attachment) -> PathBuf;

    /// Reads size, modification time and checksum from disk.
    async fn storage_info(&self, attachment: &Attachment) -> StorageResult<StorageInfo>;

    /// Fails if the stored content no longer matches its checksum.
    async fn verify(&self, attachment: &Attachment) -> StorageResult<()>;

    /// Reads the whole payload, verifying its checksum.
    async fn read_verified(&self, attachment: &Attachment) -> StorageResult<Vec<u8>>;

    /// Removes temporary uploads older than `older_than`, returning how many
    /// files were removed.
    async fn purge_temp(&self, older_than: Duration) -> StorageResult<usize>;
}

/// Stores payloads under a root directory.
#[derive(Debug, Clone)]
pub struct LocalAttachmentStore {
    root: PathBuf,
    config: StorageConfig,
}

impl LocalAttachmentStore {
    /// Creates a store rooted at `config.root`.
    #[must_use]
    pub fn new(config: StorageConfig) -> Self {
        Self {
            root: config.root.clone(),
            config,
        }
    }

    /// Store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic path of an attachment relative to the root.
    #[must_use]
    pub fn relative_path(attachment: &Attachment) -> String {
        let file = format!("{}_{}", attachment.id, sanitize_filename(&attachment.filename));
        match (attachment.account_id, attachment.email_id) {
            (Some(account), Some(email)) => format!("accounts/{account}/emails/{email}/{file}"),
            (Some(_), None) => format!(
                "{TEMP_DIR}/{}/{file}",
                sanitize_component(attachment.user_id.as_str())
            ),
            (None, _) => format!("{ORPHANED_DIR}/{file}"),
        }
    }

    fn resolve(&self, attachment: &Attachment) -> StorageResult<PathBuf> {
        match attachment.storage_path.as_deref() {
            Some(stored) => {
                let relative = Path::new(stored);
                if relative
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
                {
                    return Err(StorageError::InvalidPath(stored.to_string()));
                }
                Ok(self.root.join(relative))
            }
            None => Ok(self.root.join(Self::relative_path(attachment))),
        }
    }

    async fn write_temp(
        &self,
        tmp: &Path,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StorageResult<(u64, String)> {
        let mut file = File::create(tmp).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0_u8; CHUNK_SIZE];
        let mut written: u64 = 0;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if written > self.config.max_file_size {
                return Err(StorageError::TooLarge {
                    size: written,
                    max: self.config.max_file_size,
                });
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok((written, hex::encode(hasher.finalize())))
    }

    /// Removes empty directories from `dir` up to (not including) the root.
    async fn prune_empty_parents(&self, mut dir: Option<&Path>) {
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    async fn purge_dir(&self, dir: PathBuf, cutoff: SystemTime) -> StorageResult<usize> {
        let mut removed = 0;
        let mut pending = vec![dir];
        let mut visited = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push(entry.path());
                } else if meta.modified()? <= cutoff {
                    fs::remove_file(entry.path()).await?;
                    removed += 1;
                }
            }
            visited.push(dir);
        }

        for dir in visited.iter().rev() {
            self.prune_empty_parents(Some(dir)).await;
        }
        Ok(removed)
    }
}

async fn hash_file(path: &Path) -> StorageResult<String> {
    let mut file = open_existing(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

async fn open_existing(path: &Path) -> StorageResult<File> {
    File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::Missing(path.display().to_string())
        } else {
            e.into()
        }
    })
}

fn expected_checksum(attachment: &Attachment) -> StorageResult<&str> {
    attachment
        .checksum
        .as_deref()
        .ok_or(StorageError::NotStored(attachment.id))
}

#[async_trait]
impl AttachmentStore for LocalAttachmentStore {
    async fn store(
        &self,
        attachment: &mut Attachment,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StorageResult<()> {
        let max = self.config.max_file_size;
        if attachment.size > max {
            return Err(StorageError::TooLarge {
                size: attachment.size,
                max,
            });
        }

        let relative = Self::relative_path(attachment);
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let outcome = match self.write_temp(&tmp, reader).await {
            Ok((written, checksum)) => {
                let tolerance = self.config.size_tolerance(attachment.size);
                if written.abs_diff(attachment.size) > tolerance {
                    Err(StorageError::SizeMismatch {
                        declared: attachment.size,
                        actual: written,
                    })
                } else {
                    fs::rename(&tmp, &path)
                        .await
                        .map(|()| checksum)
                        .map_err(StorageError::from)
                }
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(checksum) => {
                debug!(attachment_id = %attachment.id, path = %relative, "Stored attachment");
                attachment.storage_path = Some(relative);
                attachment.checksum = Some(checksum);
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&tmp).await
                    && cleanup.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temp file");
                }
                self.prune_empty_parents(path.parent()).await;
                Err(e)
            }
        }
    }

    async fn retrieve(&self, attachment: &Attachment) -> StorageResult<AttachmentReader> {
        let path = self.resolve(attachment)?;
        Ok(Box::new(open_existing(&path).await?))
    }

    async fn delete(&self, attachment: &Attachment) -> StorageResult<()> {
        let path = self.resolve(attachment)?;
        match fs::remove_file(&path).await {
            Ok(()) => debug!(attachment_id = %attachment.id, "Deleted attachment"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.prune_empty_parents(path.parent()).await;
        Ok(())
    }

    async fn exists(&self, attachment: &Attachment) -> bool {
        match self.resolve(attachment) {
            Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    fn storage_path(&self, attachment: &Attachment) -> PathBuf {
        self.resolve(attachment)
            .unwrap_or_else(|_| self.root.join(Self::relative_path(attachment)))
    }

    async fn storage_info(&self, attachment: &Attachment) -> StorageResult<StorageInfo> {
        let path = self.resolve(attachment)?;
        let meta = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::Missing(path.display().to_string())
            } else {
                e.into()
            }
        })?;
        let checksum = hash_file(&path).await?;
        Ok(StorageInfo {
            size: meta.len(),
            modified: DateTime::<Utc>::from(meta.modified()?),
            checksum,
            path,
        })
    }

    async fn verify(&self, attachment: &Attachment) -> StorageResult<()> {
        let expected = expected_checksum(attachment)?;
        let actual = hash_file(&self.resolve(attachment)?).await?;
        if actual == expected {
            Ok(())
        } else {
            Err(StorageError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            })
        }
    }

    async fn read_verified(&self, attachment: &Attachment) -> StorageResult<Vec<u8>> {
        let expected = expected_checksum(attachment)?;
        let mut file = open_existing(&self.resolve(attachment)?).await?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).await?;

        let actual = hex::encode(Sha256::digest(&data));
        if actual != expected {
            return Err(StorageError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(data)
    }

    async fn purge_temp(&self, older_than: Duration) -> StorageResult<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(older_than)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        for dir in [TEMP_DIR, ORPHANED_DIR] {
            removed += self.purge_dir(self.root.join(dir), cutoff).await?;
        }
        debug!(removed, "Purged temporary uploads");
        Ok(removed)
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
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> LocalAttachmentStore {
        LocalAttachmentStore::new(StorageConfig {
            root: dir.path().to_path_buf(),
            max_file_size: 64 * 1024,
            ..StorageConfig::default()
        })
    }

    fn upload(size: u64) -> Attachment {
        Attachment::new(UserId::new("user-1"), "report.pdf", "application/pdf", size)
            .with_account(AccountId::new(7))
    }

    #[test]
    fn deterministic_paths() {
        let temp = upload(1);
        assert_eq!(
            LocalAttachmentStore::relative_path(&temp),
            format!("temp/user-1/{}_report.pdf", temp.id)
        );

        let email = EmailId::new();
        let bound = temp.clone().with_email(email);
        assert_eq!(
            LocalAttachmentStore::relative_path(&bound),
            format!("accounts/7/emails/{email}/{}_report.pdf", temp.id)
        );

        let orphan = Attachment::new(UserId::new("u"), "a/b.txt", "text/plain", 1);
        assert_eq!(
            LocalAttachmentStore::relative_path(&orphan),
            format!("orphaned/{}_a_b.txt", orphan.id)
        );
    }

    #[tokio::test]
    async fn store_and_retrieve() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let data = b"%PDF-1.4 hello".to_vec();
        let mut attachment = upload(data.len() as u64);

        store
            .store(&mut attachment, &mut data.as_slice())
            .await
            .unwrap();
        assert!(store.exists(&attachment).await);
        assert!(attachment.storage_path.is_some());

        let mut read = Vec::new();
        store
            .retrieve(&attachment)
            .await
            .unwrap()
            .read_to_end(&mut read)
            .await
            .unwrap();
        assert_eq!(read, data);

        let info = store.storage_info(&attachment).await.unwrap();
        assert_eq!(info.size, data.len() as u64);
        assert_eq!(Some(info.checksum), attachment.checksum);

        store.verify(&attachment).await.unwrap();
        assert_eq!(store.read_verified(&attachment).await.unwrap(), data);
    }

    #[tokio::test]
    async fn declared_size_over_limit_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut attachment = upload(65 * 1024);
        let err = store
            .store(&mut attachment, &mut b"tiny".as_slice())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TooLarge { .. }));
        assert!(!dir.path().join("temp").exists());
        assert!(attachment.storage_path.is_none());
    }

    #[tokio::test]
    async fn oversized_stream_is_rejected_and_cleaned() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let data = vec![7_u8; 70 * 1024];
        let mut attachment = upload(10);
        let err = store
            .store(&mut attachment, &mut data.as_slice())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TooLarge { .. }));
        assert!(!store.exists(&attachment).await);
        assert!(!dir.path().join("temp").exists());
    }

    #[tokio::test]
    async fn size_mismatch_beyond_tolerance() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let within = vec![1_u8; 1000];
        let mut ok = upload(3000);
        store.store(&mut ok, &mut within.as_slice()).await.unwrap();

        let data = vec![1_u8; 40_000];
        let mut bad = upload(20_000);
        let err = store
            .store(&mut bad, &mut data.as_slice())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::SizeMismatch {
                declared: 20_000,
                actual: 40_000
            }
        ));
        assert!(!store.exists(&bad).await);
    }

    #[tokio::test]
    async fn tampering_is_detected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut attachment = upload(5);
        store
            .store(&mut attachment, &mut b"hello".as_slice())
            .await
            .unwrap();

        std::fs::write(store.storage_path(&attachment), b"HELLO").unwrap();
        assert!(matches!(
            store.verify(&attachment).await,
            Err(StorageError::ChecksumMismatch { .. })
        ));
        assert!(store.read_verified(&attachment).await.is_err());
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_prunes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut attachment = upload(3);
        store
            .store(&mut attachment, &mut b"abc".as_slice())
            .await
            .unwrap();

        store.delete(&attachment).await.unwrap();
        store.delete(&attachment).await.unwrap();
        assert!(!store.exists(&attachment).await);
        assert!(!dir.path().join("temp").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut attachment = upload(1);
        attachment.storage_path = Some("../outside".into());
        assert!(matches!(
            store.retrieve(&attachment).await,
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn purge_removes_old_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut temp = upload(3);
        store.store(&mut temp, &mut b"abc".as_slice()).await.unwrap();
        let mut kept = upload(3).with_email(EmailId::new());
        store.store(&mut kept, &mut b"xyz".as_slice()).await.unwrap();

        assert_eq!(store.purge_temp(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(store.purge_temp(Duration::ZERO).await.unwrap(), 1);
        assert!(!store.exists(&temp).await);
        assert!(store.exists(&kept).await);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn stored_bytes_round_trip(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async {
                let dir = TempDir::new().unwrap();
                let store = store(&dir);
                let mut attachment = upload(data.len() as u64);
                store.store(&mut attachment, &mut data.as_slice()).await.unwrap();
                let read = store.read_verified(&attachment).await.unwrap();
                assert_eq!(read, data);
                assert_eq!(
                    attachment.checksum.as_deref(),
                    Some(hex::encode(Sha256::digest(&data)).as_str())
                );
            });
        }
    }
}
