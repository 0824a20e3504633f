//! Pipeline configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::account::Vendor;
use crate::retry::RetryPolicy;
use crate::{Error, Result};

const MIB: u64 = 1024 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Composition limits.
    pub compose: ComposeConfig,
    /// Attachment storage.
    pub storage: StorageConfig,
    /// Delivery, retry and concurrency settings.
    pub delivery: DeliveryConfig,
    /// Extra email-domain to vendor mappings.
    pub domains: Vec<DomainOverride>,
}

/// Limits enforced by the composer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    /// Maximum number of to + cc + bcc recipients.
    pub max_recipients: usize,
    /// Maximum number of attachments per message.
    pub max_attachments: usize,
    /// Maximum size of one attachment in bytes.
    pub max_attachment_size: u64,
    /// Allowed lowercase file extensions. Empty allows everything.
    pub allowed_extensions: Vec<String>,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            max_recipients: 100,
            max_attachments: 20,
            max_attachment_size: 25 * MIB,
            allowed_extensions: default_extensions(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    [
        "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "rtf", "txt",
        "csv", "md", "html", "htm", "xml", "json", "ics", "vcf", "eml", "jpg", "jpeg", "png",
        "gif", "bmp", "webp", "svg", "tif", "tiff", "heic", "mp3", "wav", "m4a", "ogg", "mp4",
        "mov", "avi", "mkv", "webm", "zip", "gz", "tar", "7z", "rar",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl ComposeConfig {
    /// Returns true if a filename's extension is allowed.
    ///
    /// Files without an extension are only accepted when the allow list
    /// is empty.
    #[must_use]
    pub fn extension_allowed(&self, filename: &str) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.allowed_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }
}

/// Attachment store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the store.
    pub root: PathBuf,
    /// Maximum stored file size in bytes.
    pub max_file_size: u64,
    /// Age after which temporary uploads are purged.
    pub temp_retention_hours: u64,
    /// Allowed relative difference between declared and written size.
    pub size_tolerance_ratio: f64,
    /// Minimum allowed absolute difference in bytes.
    pub size_tolerance_min_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("attachments"),
            max_file_size: 25 * MIB,
            temp_retention_hours: 24,
            size_tolerance_ratio: 0.10,
            size_tolerance_min_bytes: 5 * 1024,
        }
    }
}

impl StorageConfig {
    /// Retention window for temporary uploads.
    #[must_use]
    pub const fn temp_retention(&self) -> Duration {
        Duration::from_secs(self.temp_retention_hours * 3600)
    }

    /// Largest accepted difference between declared and written size.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn size_tolerance(&self, declared: u64) -> u64 {
        let relative = (declared as f64 * self.size_tolerance_ratio).ceil() as u64;
        relative.max(self.size_tolerance_min_bytes)
    }
}

/// Delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Connection attempts before giving up.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, doubled each time.
    pub base_delay_ms: u64,
    /// Timeout for one connection attempt.
    pub connect_timeout_secs: u64,
    /// In-flight sends per bulk batch.
    pub bulk_concurrency: usize,
    /// Concurrent background sends.
    pub worker_pool_size: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            connect_timeout_secs: 30,
            bulk_concurrency: 10,
            worker_pool_size: 32,
        }
    }
}

impl DeliveryConfig {
    /// Base backoff delay.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Per-attempt connection timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Retry policy for connection attempts.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay())
    }
}

/// Maps an email domain to a vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainOverride {
    /// Lowercase email domain.
    pub domain: String,
    /// Vendor serving that domain.
    pub vendor: Vendor,
}

impl Config {
    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the text is not valid TOML or fails
    /// validation.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks values that would make the pipeline unusable.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.delivery.max_attempts == 0 {
            return Err(Error::Config("delivery.max_attempts must be at least 1".into()));
        }
        if self.delivery.bulk_concurrency == 0 || self.delivery.worker_pool_size == 0 {
            return Err(Error::Config(
                "delivery concurrency limits must be at least 1".into(),
            ));
        }
        if self.compose.max_recipients == 0 {
            return Err(Error::Config("compose.max_recipients must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.storage.size_tolerance_ratio) {
            return Err(Error::Config(
                "storage.size_tolerance_ratio must be between 0 and 1".into(),
            ));
        }
        if let Some(bad) = self.domains.iter().find(|d| !d.domain.contains('.')) {
            return Err(Error::Config(format!("invalid domain override: {}", bad.domain)));
        }
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

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.compose.max_recipients, 100);
        assert_eq!(config.storage.max_file_size, 26_214_400);
        assert_eq!(config.delivery.base_delay(), Duration::from_secs(2));
        assert_eq!(config.delivery.connect_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn partial_sections_and_domains() {
        let config = Config::from_toml_str(
            r#"
            [delivery]
            max_attempts = 5

            [[domains]]
            domain = "corp.example"
            vendor = "outlook"
            "#,
        )
        .unwrap();
        assert_eq!(config.delivery.max_attempts, 5);
        assert_eq!(config.delivery.bulk_concurrency, 10);
        assert_eq!(config.domains[0].vendor, Vendor::Outlook);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            Config::from_toml_str("[delivery]\nmax_attempts = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[compose\n"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn extension_policy() {
        let mut compose = ComposeConfig::default();
        assert!(compose.extension_allowed("report.PDF"));
        assert!(!compose.extension_allowed("setup.exe"));
        assert!(!compose.extension_allowed("README"));

        compose.allowed_extensions.clear();
        assert!(compose.extension_allowed("setup.exe"));
        assert!(compose.extension_allowed("README"));
    }

    #[test]
    fn size_tolerance_uses_larger_bound() {
        let storage = StorageConfig::default();
        assert_eq!(storage.size_tolerance(1000), 5120);
        assert_eq!(storage.size_tolerance(1_000_000), 100_000);
    }
}
