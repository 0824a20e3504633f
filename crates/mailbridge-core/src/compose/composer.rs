//! Request validation, attachment resolution and encoding.

use std::sync::Arc;

use mailbridge_mime::{Address, Attachment as MimeAttachment, ContentType};
use tokio::io::AsyncRead;
use tracing::{debug, warn};

use super::email::{ComposedEmail, Draft};
use super::error::ComposeError;
use super::request::{AttachmentSource, ComposeRequest};
use super::template::TemplateSource;
use crate::account::{AccountId, UserId};
use crate::attachment::{Attachment, AttachmentIndex, AttachmentStore, StorageError};
use crate::config::ComposeConfig;
use crate::{Error, Result};

/// Guesses a MIME type from a filename.
#[must_use]
pub fn guess_content_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Turns compose requests into encoded messages.
pub struct Composer {
    limits: ComposeConfig,
    store: Arc<dyn AttachmentStore>,
    index: Arc<dyn AttachmentIndex>,
    templates: Option<Arc<dyn TemplateSource>>,
}

impl std::fmt::Debug for Composer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composer")
            .field("limits", &self.limits)
            .field("templates", &self.templates.is_some())
            .finish_non_exhaustive()
    }
}

impl Composer {
    /// Creates a composer.
    #[must_use]
    pub fn new(
        limits: ComposeConfig,
        store: Arc<dyn AttachmentStore>,
        index: Arc<dyn AttachmentIndex>,
    ) -> Self {
        Self {
            limits,
            store,
            index,
            templates: None,
        }
    }

    /// Enables template references.
    #[must_use]
    pub fn with_templates(mut self, templates: Arc<dyn TemplateSource>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Limits in force.
    #[must_use]
    pub const fn limits(&self) -> &ComposeConfig {
        &self.limits
    }

    /// Validates `request` and encodes it for `user`.
    ///
    /// Every check runs before any MIME bytes are produced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for invalid requests, or a storage error
    /// if a stored attachment cannot be read intact.
    pub async fn compose(&self, user: &UserId, request: &ComposeRequest) -> Result<ComposedEmail> {
        let from = check_sender(request)?;
        self.check_counts(request)?;
        let to = parse_addresses("to", &request.to)?;
        let cc = parse_addresses("cc", &request.cc)?;
        let bcc = parse_addresses("bcc", &request.bcc)?;
        let reply_to = parse_addresses("reply-to", &request.reply_to)?;
        check_headers(&request.headers)?;

        let (subject, text_body, html_body) = self.resolve_content(request).await?;
        if subject.trim().is_empty() {
            return Err(ComposeError::EmptySubject.into());
        }
        if text_body.is_none() && html_body.is_none() {
            return Err(ComposeError::EmptyBody.into());
        }

        let mut attachments = Vec::with_capacity(request.attachments.len());
        for source in &request.attachments {
            attachments.push(self.resolve_attachment(user, source).await?);
        }

        let email = ComposedEmail::encode(Draft {
            from,
            to,
            cc,
            bcc,
            reply_to,
            subject,
            text_body,
            html_body,
            attachments,
            priority: request.priority,
            headers: request.headers.clone(),
        })?;

        debug!(
            email_id = %email.id(),
            size = email.size(),
            recipients = request.recipient_count(),
            "Composed message"
        );
        Ok(email)
    }

    /// Validates an upload, then streams it into temporary storage and
    /// registers it in the index.
    ///
    /// # Errors
    ///
    /// Returns a validation error for oversized or disallowed files (nothing
    /// is persisted in that case), or a storage/database error.
    pub async fn add_attachment(
        &self,
        user: &UserId,
        account: Option<AccountId>,
        filename: &str,
        content_type: Option<&str>,
        declared_size: u64,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<Attachment> {
        self.check_attachment(filename, declared_size)?;

        let content_type = content_type
            .filter(|ct| !ct.trim().is_empty())
            .map_or_else(|| guess_content_type(filename), str::to_string);
        let mut attachment = Attachment::new(user.clone(), filename, content_type, declared_size);
        if let Some(account) = account {
            attachment = attachment.with_account(account);
        }

        self.store.store(&mut attachment, reader).await?;
        if let Err(e) = self.index.put(&attachment).await {
            if let Err(cleanup) = self.store.delete(&attachment).await {
                warn!(attachment_id = %attachment.id, error = %cleanup, "Failed to remove unindexed upload");
            }
            return Err(e);
        }

        debug!(attachment_id = %attachment.id, size = declared_size, "Registered upload");
        Ok(attachment)
    }

    fn check_counts(&self, request: &ComposeRequest) -> Result<()> {
        let count = request.recipient_count();
        if count == 0 {
            return Err(ComposeError::NoRecipients.into());
        }
        if count > self.limits.max_recipients {
            return Err(ComposeError::TooManyRecipients {
                count,
                max: self.limits.max_recipients,
            }
            .into());
        }
        if request.attachments.len() > self.limits.max_attachments {
            return Err(ComposeError::TooManyAttachments {
                count: request.attachments.len(),
                max: self.limits.max_attachments,
            }
            .into());
        }
        Ok(())
    }

    fn check_attachment(&self, filename: &str, size: u64) -> Result<()> {
        if size > self.limits.max_attachment_size {
            return Err(ComposeError::AttachmentTooLarge {
                filename: filename.to_string(),
                size,
                max: self.limits.max_attachment_size,
            }
            .into());
        }
        if !self.limits.extension_allowed(filename) {
            return Err(ComposeError::ExtensionNotAllowed {
                filename: filename.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Subject and bodies after applying the template; explicit request
    /// fields win over template output.
    async fn resolve_content(
        &self,
        request: &ComposeRequest,
    ) -> Result<(String, Option<String>, Option<String>)> {
        let rendered = match &request.template {
            Some(reference) => {
                let source = self
                    .templates
                    .as_ref()
                    .ok_or_else(|| ComposeError::TemplateNotFound(reference.name.clone()))?;
                let template = source
                    .load(&reference.name)
                    .await?
                    .ok_or_else(|| ComposeError::TemplateNotFound(reference.name.clone()))?;
                Some(template.render(&reference.variables))
            }
            None => None,
        };

        let non_empty = |s: &Option<String>| s.clone().filter(|s| !s.trim().is_empty());
        let subject = if request.subject.trim().is_empty() {
            rendered.as_ref().map(|t| t.subject.clone()).unwrap_or_default()
        } else {
            request.subject.clone()
        };
        let text = non_empty(&request.text_body)
            .or_else(|| rendered.as_ref().and_then(|t| non_empty(&t.text)));
        let html = non_empty(&request.html_body)
            .or_else(|| rendered.as_ref().and_then(|t| non_empty(&t.html)));
        Ok((subject, text, html))
    }

    async fn resolve_attachment(
        &self,
        user: &UserId,
        source: &AttachmentSource,
    ) -> Result<MimeAttachment> {
        let (attachment, content_id) = match source {
            AttachmentSource::Data {
                filename,
                content_type,
                data,
                content_id,
            } => {
                self.check_attachment(filename, data.len() as u64)?;
                check_attachment_headers(content_type.as_deref(), content_id.as_deref())?;
                let content_type = content_type
                    .clone()
                    .unwrap_or_else(|| guess_content_type(filename));
                (
                    MimeAttachment::new(filename.clone(), parse_content_type(&content_type), data.clone()),
                    content_id,
                )
            }
            AttachmentSource::Stored { id, content_id } => {
                check_attachment_headers(None, content_id.as_deref())?;
                let stored = self
                    .index
                    .get(*id)
                    .await?
                    .filter(|a| &a.user_id == user)
                    .ok_or(ComposeError::AttachmentNotFound(*id))?;
                self.check_attachment(&stored.filename, stored.size)?;
                let data = match self.store.read_verified(&stored).await {
                    Ok(data) => data,
                    // Purged upload: the index row outlived its file.
                    Err(StorageError::Missing(path)) => {
                        debug!(attachment_id = %id, %path, "Dropping index entry of purged upload");
                        if let Err(e) = self.index.remove(*id).await {
                            warn!(attachment_id = %id, error = %e, "Failed to drop stale index entry");
                        }
                        return Err(ComposeError::AttachmentNotFound(*id).into());
                    }
                    Err(e) => return Err(e.into()),
                };
                (
                    MimeAttachment::new(
                        stored.filename,
                        parse_content_type(&stored.content_type),
                        data,
                    ),
                    content_id,
                )
            }
        };

        Ok(match content_id.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(cid) => attachment.inline(cid),
            None => attachment,
        })
    }
}

fn check_sender(request: &ComposeRequest) -> Result<Address> {
    if request.from.trim().is_empty() {
        return Err(ComposeError::MissingSender.into());
    }
    parse_address("from", &request.from)
}

fn parse_content_type(value: &str) -> ContentType {
    ContentType::parse(value).unwrap_or_else(|_| ContentType::octet_stream())
}

fn parse_address(field: &'static str, input: &str) -> Result<Address> {
    let address = Address::parse(input).map_err(|_| ComposeError::InvalidAddress {
        field,
        address: input.to_string(),
    })?;
    Ok(address)
}

fn parse_addresses(field: &'static str, inputs: &[String]) -> Result<Vec<Address>> {
    inputs.iter().map(|a| parse_address(field, a)).collect()
}

fn check_headers(headers: &[(String, String)]) -> Result<()> {
    for (name, value) in headers {
        if !mailbridge_mime::is_valid_field_name(name) || value.contains(['\r', '\n']) {
            return Err(Error::Validation(ComposeError::InvalidHeader { name: name.clone() }));
        }
        if mailbridge_mime::is_reserved_header(name) {
            return Err(Error::Validation(ComposeError::ReservedHeader { name: name.clone() }));
        }
    }
    Ok(())
}

/// Content-ID and content type end up in part headers. A Content-ID may
/// carry its surrounding angle brackets and nothing else of the kind.
fn check_attachment_headers(content_type: Option<&str>, content_id: Option<&str>) -> Result<()> {
    if let Some(value) = content_type
        && value.contains(['\r', '\n'])
    {
        return Err(Error::Validation(ComposeError::InvalidHeader {
            name: "Content-Type".into(),
        }));
    }
    if let Some(cid) = content_id {
        let inner = cid.trim().trim_start_matches('<').trim_end_matches('>');
        if inner.contains(['\r', '\n', '<', '>']) {
            return Err(Error::Validation(ComposeError::InvalidHeader {
                name: "Content-ID".into(),
            }));
        }
    }
    Ok(())
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
    use crate::attachment::{LocalAttachmentStore, SqliteAttachmentIndex};
    use crate::compose::{Template, TemplateRef};
    use crate::compose::InMemoryTemplates;
    use crate::config::StorageConfig;
    use mailbridge_mime::{Message, Priority};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    async fn composer(dir: &TempDir) -> Composer {
        let store = LocalAttachmentStore::new(StorageConfig {
            root: dir.path().to_path_buf(),
            ..StorageConfig::default()
        });
        let index = SqliteAttachmentIndex::in_memory().await.unwrap();
        Composer::new(ComposeConfig::default(), Arc::new(store), Arc::new(index))
    }

    fn simple() -> ComposeRequest {
        ComposeRequest {
            from: "a@x.com".into(),
            to: vec!["b@y.com".into()],
            subject: "Hi".into(),
            text_body: Some("hello".into()),
            ..Default::default()
        }
    }

    fn user() -> UserId {
        UserId::new("user-1")
    }

    fn validation(err: Error) -> ComposeError {
        match err {
            Error::Validation(e) => e,
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[tokio::test]
    async fn text_only_message() {
        let dir = TempDir::new().unwrap();
        let email = composer(&dir).await.compose(&user(), &simple()).await.unwrap();
        let wire = String::from_utf8(email.mime_bytes().to_vec()).unwrap();

        assert!(wire.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(wire.contains("Subject: Hi\r\n"));
        assert!(wire.contains("Content-Transfer-Encoding: quoted-printable\r\n"));
        assert!(!wire.contains("X-Priority"));
        assert_eq!(email.size(), email.mime_bytes().len());

        let parsed = Message::parse(email.mime_bytes()).unwrap();
        assert_eq!(parsed.text_body().as_deref(), Some("hello"));
        assert_eq!(parsed.message_id().as_deref(), Some(email.message_id()));
    }

    #[tokio::test]
    async fn bcc_is_envelope_only() {
        let dir = TempDir::new().unwrap();
        let mut request = simple();
        request.bcc = vec!["secret@z.com".into()];
        request.cc = vec!["B@y.com".into()];
        let email = composer(&dir).await.compose(&user(), &request).await.unwrap();

        let wire = String::from_utf8_lossy(email.mime_bytes()).to_string();
        assert!(!wire.contains("secret@z.com"));
        assert!(!wire.to_ascii_lowercase().contains("\r\nbcc:"));
        assert_eq!(email.envelope_recipients(), vec!["b@y.com", "secret@z.com"]);
        assert_eq!(email.to_outgoing().from, "a@x.com");
    }

    #[tokio::test]
    async fn validation_order_and_errors() {
        let dir = TempDir::new().unwrap();
        let composer = composer(&dir).await;

        let mut request = simple();
        request.from = String::new();
        assert_eq!(
            validation(composer.compose(&user(), &request).await.unwrap_err()),
            ComposeError::MissingSender
        );

        let mut request = simple();
        request.to.clear();
        assert_eq!(
            validation(composer.compose(&user(), &request).await.unwrap_err()),
            ComposeError::NoRecipients
        );

        let mut request = simple();
        request.to = (0..101).map(|i| format!("r{i}@y.com")).collect();
        assert_eq!(
            validation(composer.compose(&user(), &request).await.unwrap_err()),
            ComposeError::TooManyRecipients { count: 101, max: 100 }
        );

        let mut request = simple();
        request.cc = vec!["not an address".into()];
        assert!(matches!(
            validation(composer.compose(&user(), &request).await.unwrap_err()),
            ComposeError::InvalidAddress { field: "cc", .. }
        ));

        let mut request = simple();
        request.subject = "  ".into();
        assert_eq!(
            validation(composer.compose(&user(), &request).await.unwrap_err()),
            ComposeError::EmptySubject
        );

        let mut request = simple();
        request.text_body = None;
        assert_eq!(
            validation(composer.compose(&user(), &request).await.unwrap_err()),
            ComposeError::EmptyBody
        );
    }

    #[tokio::test]
    async fn header_rules() {
        let dir = TempDir::new().unwrap();
        let composer = composer(&dir).await;

        let mut request = simple();
        request.headers = vec![("X-Campaign".into(), "spring".into())];
        let email = composer.compose(&user(), &request).await.unwrap();
        assert!(String::from_utf8_lossy(email.mime_bytes()).contains("X-Campaign: spring\r\n"));

        request.headers = vec![("X-Evil".into(), "a\r\nBcc: x@y.com".into())];
        assert!(matches!(
            validation(composer.compose(&user(), &request).await.unwrap_err()),
            ComposeError::InvalidHeader { .. }
        ));

        request.headers = vec![("Content-Type".into(), "text/html".into())];
        assert!(matches!(
            validation(composer.compose(&user(), &request).await.unwrap_err()),
            ComposeError::ReservedHeader { .. }
        ));
    }

    #[tokio::test]
    async fn attachment_rules() {
        let dir = TempDir::new().unwrap();
        let composer = composer(&dir).await;

        let mut request = simple();
        request.attachments = vec![AttachmentSource::Data {
            filename: "run.exe".into(),
            content_type: None,
            data: vec![1, 2, 3],
            content_id: None,
        }];
        assert!(matches!(
            validation(composer.compose(&user(), &request).await.unwrap_err()),
            ComposeError::ExtensionNotAllowed { .. }
        ));

        request.attachments = (0..21)
            .map(|i| AttachmentSource::Data {
                filename: format!("{i}.txt"),
                content_type: None,
                data: vec![],
                content_id: None,
            })
            .collect();
        assert!(matches!(
            validation(composer.compose(&user(), &request).await.unwrap_err()),
            ComposeError::TooManyAttachments { count: 21, max: 20 }
        ));
    }

    #[tokio::test]
    async fn attachment_headers_reject_injection() {
        let dir = TempDir::new().unwrap();
        let composer = composer(&dir).await;
        let inline = |content_type: Option<&str>, cid: &str| AttachmentSource::Data {
            filename: "logo.png".into(),
            content_type: content_type.map(String::from),
            data: vec![0x89, 0x50],
            content_id: Some(cid.into()),
        };

        let mut request = simple();
        request.html_body = Some("<img src=\"cid:logo\">".into());
        for source in [
            inline(None, "logo\r\nX-Injected: yes"),
            inline(None, "logo>\nX-Injected: <yes"),
            inline(Some("image/png\r\nX-Injected: yes"), "logo"),
        ] {
            request.attachments = vec![source];
            let err = composer.compose(&user(), &request).await.unwrap_err();
            assert!(
                matches!(validation(err), ComposeError::InvalidHeader { .. }),
                "{:?}",
                request.attachments
            );
        }

        request.attachments = vec![inline(Some("image/png"), "<logo>")];
        let email = composer.compose(&user(), &request).await.unwrap();
        let wire = String::from_utf8_lossy(email.mime_bytes()).to_string();
        assert!(wire.contains("Content-ID: <logo>\r\n"));
        assert!(!wire.contains("X-Injected"));
    }

    #[tokio::test]
    async fn priority_headers() {
        let dir = TempDir::new().unwrap();
        let mut request = simple();
        request.priority = Priority::High;
        let email = composer(&dir).await.compose(&user(), &request).await.unwrap();
        let wire = String::from_utf8_lossy(email.mime_bytes()).to_string();
        assert!(wire.contains("X-Priority: 1 (Highest)\r\n"));
        assert!(wire.contains("Importance: High\r\n"));
    }

    #[tokio::test]
    async fn upload_then_reference() {
        let dir = TempDir::new().unwrap();
        let composer = composer(&dir).await;
        let data = b"col1,col2\r\n1,2\r\n".to_vec();
        let upload = composer
            .add_attachment(
                &user(),
                Some(AccountId::new(1)),
                "data.csv",
                None,
                data.len() as u64,
                &mut data.as_slice(),
            )
            .await
            .unwrap();
        assert_eq!(upload.content_type, "text/csv");

        let mut request = simple();
        request.attachments = vec![AttachmentSource::Stored {
            id: upload.id,
            content_id: None,
        }];
        let email = composer.compose(&user(), &request).await.unwrap();
        assert_eq!(email.attachments().len(), 1);
        assert_eq!(email.attachments()[0].data, data);

        let other = UserId::new("someone-else");
        assert_eq!(
            validation(composer.compose(&other, &request).await.unwrap_err()),
            ComposeError::AttachmentNotFound(upload.id)
        );
    }

    #[tokio::test]
    async fn purged_upload_is_not_found() {
        let dir = TempDir::new().unwrap();
        let composer = composer(&dir).await;
        let data = b"%PDF-1.4".to_vec();
        let upload = composer
            .add_attachment(
                &user(),
                None,
                "report.pdf",
                None,
                data.len() as u64,
                &mut data.as_slice(),
            )
            .await
            .unwrap();
        composer.store.delete(&upload).await.unwrap();

        let mut request = simple();
        request.attachments = vec![AttachmentSource::Stored {
            id: upload.id,
            content_id: None,
        }];
        assert_eq!(
            validation(composer.compose(&user(), &request).await.unwrap_err()),
            ComposeError::AttachmentNotFound(upload.id)
        );
        assert!(composer.index.get(upload.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_upload_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let composer = composer(&dir).await;
        let err = composer
            .add_attachment(
                &user(),
                Some(AccountId::new(1)),
                "big.pdf",
                None,
                26 * 1024 * 1024,
                &mut b"tiny".as_slice(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            validation(err),
            ComposeError::AttachmentTooLarge { .. }
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn template_fills_missing_fields() {
        let dir = TempDir::new().unwrap();
        let templates = InMemoryTemplates::new().with(
            "welcome",
            Template {
                subject: "Welcome {{name}}".into(),
                text: Some("Hello {{name}}".into()),
                html: None,
            },
        );
        let composer = composer(&dir).await.with_templates(Arc::new(templates));

        let mut request = simple();
        request.subject = String::new();
        request.text_body = None;
        request.template = Some(TemplateRef {
            name: "welcome".into(),
            variables: BTreeMap::from([("name".into(), "Ann".into())]),
        });
        let email = composer.compose(&user(), &request).await.unwrap();
        assert_eq!(email.subject(), "Welcome Ann");
        assert_eq!(email.text_body(), Some("Hello Ann"));

        request.subject = "Explicit".into();
        let email = composer.compose(&user(), &request).await.unwrap();
        assert_eq!(email.subject(), "Explicit");

        request.template = Some(TemplateRef {
            name: "missing".into(),
            variables: BTreeMap::new(),
        });
        assert!(matches!(
            validation(composer.compose(&user(), &request).await.unwrap_err()),
            ComposeError::TemplateNotFound(_)
        ));
    }

    #[tokio::test]
    async fn inline_images_in_related() {
        let dir = TempDir::new().unwrap();
        let mut request = simple();
        request.html_body = Some("<img src=\"cid:logo\">".into());
        request.attachments = vec![
            AttachmentSource::Data {
                filename: "logo.png".into(),
                content_type: None,
                data: vec![0x89, b'P', b'N', b'G'],
                content_id: Some("logo".into()),
            },
            AttachmentSource::Data {
                filename: "notes.txt".into(),
                content_type: None,
                data: b"notes".to_vec(),
                content_id: None,
            },
        ];
        let email = composer(&dir).await.compose(&user(), &request).await.unwrap();
        assert_eq!(email.inline_attachments().len(), 1);
        assert_eq!(email.attachments().len(), 1);

        let wire = String::from_utf8_lossy(email.mime_bytes()).to_string();
        assert!(wire.contains("multipart/mixed"));
        assert!(wire.contains("multipart/related"));
        assert!(wire.contains("Content-ID: <logo>"));
        assert!(wire.contains("Content-Type: image/png"));
    }
}
