//! The resolved, encoded result of composition.

use mailbridge_mime::{Address, Attachment, MessageBuilder, Priority, generate_message_id};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;
use crate::provider::OutgoingMessage;

/// Unique identifier for a composed email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailId(pub Uuid);

impl EmailId {
    /// Generates a random ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EmailId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EmailId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Validated message content, before encoding.
#[derive(Debug, Clone)]
pub(crate) struct Draft {
    pub from: Address,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub subject: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub attachments: Vec<Attachment>,
    pub priority: Priority,
    pub headers: Vec<(String, String)>,
}

/// A fully encoded message. The MIME bytes are produced once, on
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedEmail {
    id: EmailId,
    message_id: String,
    from: Address,
    to: Vec<Address>,
    cc: Vec<Address>,
    bcc: Vec<Address>,
    reply_to: Vec<Address>,
    subject: String,
    text_body: Option<String>,
    html_body: Option<String>,
    attachments: Vec<Attachment>,
    inline_attachments: Vec<Attachment>,
    mime: Vec<u8>,
}

impl ComposedEmail {
    pub(crate) fn encode(draft: Draft) -> Result<Self> {
        let message_id = generate_message_id(&draft.from.domain());

        let mut builder = MessageBuilder::new()
            .from(draft.from.clone())
            .subject(draft.subject.clone())
            .message_id(message_id.clone())
            .priority(draft.priority);
        for address in &draft.to {
            builder = builder.to(address.clone());
        }
        for address in &draft.cc {
            builder = builder.cc(address.clone());
        }
        for address in &draft.reply_to {
            builder = builder.reply_to(address.clone());
        }
        if let Some(text) = &draft.text_body {
            builder = builder.text_body(text.clone());
        }
        if let Some(html) = &draft.html_body {
            builder = builder.html_body(html.clone());
        }
        for attachment in &draft.attachments {
            builder = builder.attach(attachment.clone());
        }
        for (name, value) in &draft.headers {
            builder = builder.header(name.clone(), value.clone());
        }

        let mime = builder.build()?.to_bytes()?;

        // Inline parts only stay inline next to an HTML body.
        let has_html = draft.html_body.is_some();
        let (inline_attachments, attachments) = draft
            .attachments
            .into_iter()
            .partition(|a| a.is_inline() && has_html);

        Ok(Self {
            id: EmailId::new(),
            message_id,
            from: draft.from,
            to: draft.to,
            cc: draft.cc,
            bcc: draft.bcc,
            reply_to: draft.reply_to,
            subject: draft.subject,
            text_body: draft.text_body,
            html_body: draft.html_body,
            attachments,
            inline_attachments,
            mime,
        })
    }

    /// Internal ID.
    #[must_use]
    pub const fn id(&self) -> EmailId {
        self.id
    }

    /// `Message-ID` without angle brackets.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Sender.
    #[must_use]
    pub const fn from(&self) -> &Address {
        &self.from
    }

    /// Primary recipients.
    #[must_use]
    pub fn to(&self) -> &[Address] {
        &self.to
    }

    /// Carbon-copy recipients.
    #[must_use]
    pub fn cc(&self) -> &[Address] {
        &self.cc
    }

    /// Blind carbon-copy recipients.
    #[must_use]
    pub fn bcc(&self) -> &[Address] {
        &self.bcc
    }

    /// Reply-To addresses.
    #[must_use]
    pub fn reply_to(&self) -> &[Address] {
        &self.reply_to
    }

    /// Subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Plain-text body.
    #[must_use]
    pub fn text_body(&self) -> Option<&str> {
        self.text_body.as_deref()
    }

    /// HTML body.
    #[must_use]
    pub fn html_body(&self) -> Option<&str> {
        self.html_body.as_deref()
    }

    /// Regular attachments.
    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Inline attachments referenced from the HTML body.
    #[must_use]
    pub fn inline_attachments(&self) -> &[Attachment] {
        &self.inline_attachments
    }

    /// Wire bytes.
    #[must_use]
    pub fn mime_bytes(&self) -> &[u8] {
        &self.mime
    }

    /// Length of the wire bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.mime.len()
    }

    /// Envelope recipients (to, cc and bcc), without duplicates.
    #[must_use]
    pub fn envelope_recipients(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .filter(|a| seen.insert(a.email.to_ascii_lowercase()))
            .map(|a| a.email.clone())
            .collect()
    }

    /// Builds the submission payload.
    #[must_use]
    pub fn to_outgoing(&self) -> OutgoingMessage {
        OutgoingMessage {
            from: self.from.email.clone(),
            recipients: self.envelope_recipients(),
            data: self.mime.clone(),
        }
    }
}
