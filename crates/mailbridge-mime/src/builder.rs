//! MIME message builder.
//!
//! Produces the standard structure clients expect:
//!
//! ```text
//! multipart/mixed                 (only with regular attachments)
//! └─ multipart/alternative        (only with both text and HTML)
//!    ├─ text/plain
//!    └─ multipart/related         (only with inline attachments)
//!       ├─ text/html
//!       └─ inline parts (Content-ID)
//! ```

use crate::address::{Address, format_list};
use crate::content_type::ContentType;
use crate::encoding::{
    encode_base64_wrapped, encode_quoted_printable, encode_quoted_printable_bytes, encode_rfc2047,
    is_header_safe,
};
use crate::error::{Error, Result};
use crate::header::{Headers, is_valid_field_name};
use crate::message::{Message, Part, TransferEncoding};
use chrono::{DateTime, FixedOffset, Utc};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// RFC 5322 date format used for the Date header.
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Headers the builder writes itself; custom headers may not override them.
const RESERVED_HEADERS: &[&str] = &[
    "from",
    "to",
    "cc",
    "bcc",
    "reply-to",
    "subject",
    "date",
    "message-id",
    "mime-version",
    "content-type",
    "content-transfer-encoding",
];

/// Returns true if `name` is a header the builder writes itself.
#[must_use]
pub fn is_reserved_header(name: &str) -> bool {
    RESERVED_HEADERS.iter().any(|r| r.eq_ignore_ascii_case(name.trim()))
}

static BOUNDARY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Message importance, written as `X-Priority` and `Importance` headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Priority {
    /// Low importance.
    Low,
    /// No priority headers are written.
    #[default]
    Normal,
    /// High importance.
    High,
}

impl Priority {
    fn headers(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Low => &[
                ("X-Priority", "5 (Lowest)"),
                ("X-MSMail-Priority", "Low"),
                ("Importance", "Low"),
            ],
            Self::Normal => &[],
            Self::High => &[
                ("X-Priority", "1 (Highest)"),
                ("X-MSMail-Priority", "High"),
                ("Importance", "High"),
            ],
        }
    }
}

/// A file to attach to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name shown to the recipient.
    pub filename: String,
    /// MIME type of the content.
    pub content_type: ContentType,
    /// Raw (unencoded) content.
    pub data: Vec<u8>,
    /// Content-ID for inline parts referenced from HTML as `cid:...`.
    pub content_id: Option<String>,
}

impl Attachment {
    /// Creates a regular attachment.
    #[must_use]
    pub fn new(filename: impl Into<String>, content_type: ContentType, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            data,
            content_id: None,
        }
    }

    /// Marks the attachment as inline with the given Content-ID.
    #[must_use]
    pub fn inline(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    /// Returns true if this attachment is referenced inline.
    #[must_use]
    pub const fn is_inline(&self) -> bool {
        self.content_id.is_some()
    }

    fn to_part(&self) -> Result<Part> {
        let mut headers = Headers::new();
        let name = header_filename(&self.filename);
        let content_type = self.content_type.clone().with_parameter("name", name.clone());
        let content_type = content_type.to_string();
        reject_line_breaks("Content-Type", &content_type)?;
        let encoding = if self.content_type.is_text() {
            TransferEncoding::QuotedPrintable
        } else {
            TransferEncoding::Base64
        };

        headers.add("Content-Type", content_type);
        headers.add("Content-Transfer-Encoding", encoding.to_string());
        match &self.content_id {
            Some(cid) => {
                reject_line_breaks("Content-ID", cid)?;
                headers.add(
                    "Content-Disposition",
                    format!("inline; filename=\"{name}\""),
                );
                headers.add("Content-ID", format!("<{}>", cid.trim_matches(['<', '>'])));
            }
            None => headers.add(
                "Content-Disposition",
                format!("attachment; filename=\"{name}\""),
            ),
        }

        let body = match encoding {
            TransferEncoding::QuotedPrintable => encode_quoted_printable_bytes(&self.data),
            _ => encode_base64_wrapped(&self.data),
        };
        Ok(Part::new(headers, body.into_bytes()))
    }
}

/// Encodes a file name for use inside a quoted parameter.
fn header_filename(filename: &str) -> String {
    let cleaned = filename.replace(['"', '\\', '\r', '\n'], "_");
    encode_rfc2047(&cleaned, "utf-8").unwrap_or(cleaned)
}

/// Builder for outgoing MIME messages.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<Address>,
    to: Vec<Address>,
    cc: Vec<Address>,
    reply_to: Vec<Address>,
    subject: Option<String>,
    date: Option<DateTime<FixedOffset>>,
    message_id: Option<String>,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
    priority: Priority,
    headers: Vec<(String, String)>,
}

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sender.
    #[must_use]
    pub fn from(mut self, address: Address) -> Self {
        self.from = Some(address);
        self
    }

    /// Adds a To recipient.
    #[must_use]
    pub fn to(mut self, address: Address) -> Self {
        self.to.push(address);
        self
    }

    /// Adds a Cc recipient.
    #[must_use]
    pub fn cc(mut self, address: Address) -> Self {
        self.cc.push(address);
        self
    }

    /// Adds a Reply-To address.
    #[must_use]
    pub fn reply_to(mut self, address: Address) -> Self {
        self.reply_to.push(address);
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Overrides the Date header (defaults to now).
    #[must_use]
    pub fn date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = Some(date);
        self
    }

    /// Overrides the Message-ID (without angle brackets).
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the plain text body.
    #[must_use]
    pub fn text_body(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Sets the HTML body.
    #[must_use]
    pub fn html_body(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Adds an attachment.
    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a custom header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Builds the message.
    ///
    /// # Errors
    ///
    /// Returns an error if no sender was set, or a header name or value is
    /// invalid (including CR/LF injection).
    pub fn build(self) -> Result<Message> {
        let from = self.from.as_ref().ok_or(Error::Incomplete("from"))?;

        let mut headers = Headers::new();
        headers.add("From", from.to_string());
        if !self.to.is_empty() {
            headers.add("To", format_list(&self.to));
        }
        if !self.cc.is_empty() {
            headers.add("Cc", format_list(&self.cc));
        }
        if !self.reply_to.is_empty() {
            headers.add("Reply-To", format_list(&self.reply_to));
        }
        if let Some(subject) = &self.subject {
            reject_line_breaks("Subject", subject)?;
            headers.add("Subject", encode_rfc2047(subject, "utf-8")?);
        }

        let date = self
            .date
            .unwrap_or_else(|| Utc::now().fixed_offset());
        headers.add("Date", date.format(DATE_FORMAT).to_string());

        let message_id = self
            .message_id
            .clone()
            .unwrap_or_else(|| generate_message_id(&from.domain()));
        headers.add(
            "Message-ID",
            format!("<{}>", message_id.trim_matches(['<', '>'])),
        );

        for (name, value) in self.priority.headers() {
            headers.add(*name, *value);
        }

        for (name, value) in &self.headers {
            if !is_valid_field_name(name) {
                return Err(Error::InvalidHeader(format!("Invalid header name: {name:?}")));
            }
            if is_reserved_header(name) {
                return Err(Error::InvalidHeader(format!(
                    "Header {name} is managed by the builder"
                )));
            }
            reject_line_breaks(name, value)?;
            let value = if is_header_safe(value) {
                value.clone()
            } else {
                encode_rfc2047(value, "utf-8")?
            };
            headers.add(name.clone(), value);
        }

        headers.add("MIME-Version", "1.0");

        let body = self.body_part()?;
        for (name, value) in body.headers.iter() {
            headers.add(name, value);
        }

        Ok(Message::from_part(Part {
            headers,
            body: body.body,
        }))
    }

    fn body_part(&self) -> Result<Part> {
        let (inline, regular): (Vec<&Attachment>, Vec<&Attachment>) = self
            .attachments
            .iter()
            .partition(|a| a.is_inline() && self.html.is_some());

        let html = match self.html.as_deref() {
            Some(html) => {
                let part = text_part(ContentType::text_html(), html);
                Some(if inline.is_empty() {
                    part
                } else {
                    let mut children = vec![part];
                    for attachment in &inline {
                        children.push(attachment.to_part()?);
                    }
                    multipart("related", children)?
                })
            }
            None => None,
        };

        let text = self
            .text
            .as_deref()
            .map(|text| text_part(ContentType::text_plain(), text));

        let content = match (text, html) {
            (Some(text), Some(html)) => multipart("alternative", vec![text, html])?,
            (Some(text), None) => text,
            (None, Some(html)) => html,
            (None, None) => text_part(ContentType::text_plain(), ""),
        };

        if regular.is_empty() {
            return Ok(content);
        }

        let mut children = vec![content];
        for attachment in &regular {
            children.push(attachment.to_part()?);
        }
        multipart("mixed", children)
    }
}

fn reject_line_breaks(name: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(Error::InvalidHeader(format!(
            "Line break in {name} header value"
        )));
    }
    Ok(())
}

fn text_part(content_type: ContentType, text: &str) -> Part {
    let mut headers = Headers::new();
    headers.add("Content-Type", content_type.to_string());
    headers.add(
        "Content-Transfer-Encoding",
        TransferEncoding::QuotedPrintable.to_string(),
    );
    Part::new(headers, encode_quoted_printable(text).into_bytes())
}

/// Wraps children in a multipart part with a boundary none of them contain.
fn multipart(sub_type: &str, children: Vec<Part>) -> Result<Part> {
    let encoded = children
        .iter()
        .map(Part::to_bytes)
        .collect::<Result<Vec<_>>>()?;

    let boundary = loop {
        let candidate = generate_boundary();
        let needle = candidate.as_bytes();
        let collides = encoded
            .iter()
            .any(|bytes| bytes.windows(needle.len()).any(|w| w == needle));
        if !collides {
            break candidate;
        }
    };

    let mut headers = Headers::new();
    headers.add(
        "Content-Type",
        ContentType::new("multipart", sub_type)
            .with_parameter("boundary", boundary)
            .to_string(),
    );
    Ok(Part::multipart(headers, children))
}

/// Generates a multipart boundary.
#[must_use]
pub fn generate_boundary() -> String {
    let count = BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed);
    let random: u64 = rand::thread_rng().r#gen();
    format!("----=_Part_{count}_{random:016x}")
}

/// Generates a unique Message-ID (without angle brackets) for a domain.
#[must_use]
pub fn generate_message_id(domain: &str) -> String {
    let random: u64 = rand::thread_rng().r#gen();
    let domain = if domain.is_empty() { "localhost" } else { domain };
    format!(
        "{}.{random:016x}@{domain}",
        Utc::now().timestamp_millis()
    )
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
    use crate::message::Body;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn base() -> MessageBuilder {
        MessageBuilder::new()
            .from(addr("Sender <sender@example.com>"))
            .to(addr("rcpt@example.org"))
            .subject("Hello")
    }

    fn wire(message: &Message) -> String {
        String::from_utf8(message.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn test_requires_sender() {
        let result = MessageBuilder::new().to(addr("a@example.com")).build();
        assert!(matches!(result, Err(Error::Incomplete("from"))));
    }

    #[test]
    fn test_text_only_is_single_part() {
        let message = base().text_body("Plain body").build().unwrap();
        assert!(matches!(message.root().body, Body::Single(_)));
        assert!(message.root().content_type().is("text", "plain"));
        assert_eq!(message.text_body().as_deref(), Some("Plain body"));
    }

    #[test]
    fn test_header_order() {
        let message = base()
            .cc(addr("cc@example.org"))
            .reply_to(addr("reply@example.com"))
            .priority(Priority::High)
            .header("X-Campaign", "spring")
            .text_body("x")
            .build()
            .unwrap();

        let names: Vec<&str> = message.headers().iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                "From",
                "To",
                "Cc",
                "Reply-To",
                "Subject",
                "Date",
                "Message-ID",
                "X-Priority",
                "X-MSMail-Priority",
                "Importance",
                "X-Campaign",
                "MIME-Version",
                "Content-Type",
                "Content-Transfer-Encoding",
            ]
        );
    }

    #[test]
    fn test_alternative_with_mixed_attachments() {
        let message = base()
            .text_body("plain")
            .html_body("<b>html</b>")
            .attach(Attachment::new(
                "report.pdf",
                ContentType::new("application", "pdf"),
                b"%PDF-1.4".to_vec(),
            ))
            .build()
            .unwrap();

        let root = message.root();
        assert!(root.content_type().is("multipart", "mixed"));
        assert!(root.children()[0].content_type().is("multipart", "alternative"));
        assert_eq!(root.children().len(), 2);

        let reparsed = Message::parse(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(reparsed.text_body().as_deref(), Some("plain"));
        assert_eq!(reparsed.html_body().as_deref(), Some("<b>html</b>"));
        let attachments = reparsed.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].decode_body().unwrap(), b"%PDF-1.4");
    }

    #[test]
    fn test_inline_attachment_goes_into_related() {
        let message = base()
            .html_body("<img src=\"cid:logo\">")
            .attach(
                Attachment::new("logo.png", ContentType::new("image", "png"), vec![0x89, 0x50])
                    .inline("logo"),
            )
            .build()
            .unwrap();

        let root = message.root();
        assert!(root.content_type().is("multipart", "related"));
        assert_eq!(root.children()[1].content_id().as_deref(), Some("logo"));
    }

    #[test]
    fn test_inline_without_html_becomes_regular() {
        let message = base()
            .text_body("t")
            .attach(
                Attachment::new("logo.png", ContentType::new("image", "png"), vec![1]).inline("c"),
            )
            .build()
            .unwrap();
        assert!(message.root().content_type().is("multipart", "mixed"));
    }

    #[test]
    fn test_attachment_metadata_rejects_line_breaks() {
        let injected_cid = base()
            .html_body("<img src=\"cid:logo\">")
            .attach(
                Attachment::new("logo.png", ContentType::new("image", "png"), vec![1])
                    .inline("logo\r\nX-Injected: yes"),
            )
            .build();
        assert!(matches!(injected_cid, Err(Error::InvalidHeader(_))));

        let injected_type = base()
            .text_body("t")
            .attach(Attachment::new(
                "a.txt",
                ContentType::text_plain().with_parameter("format", "flowed\nX-Injected: yes"),
                vec![1],
            ))
            .build();
        assert!(matches!(injected_type, Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_text_attachment_preserves_bytes() {
        let data = b"line one\r\nline two\n\tend ".to_vec();
        let message = base()
            .text_body("t")
            .attach(Attachment::new("notes.txt", ContentType::text_plain(), data.clone()))
            .build()
            .unwrap();
        let reparsed = Message::parse(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(reparsed.attachments()[0].decode_body().unwrap(), data);
    }

    #[test]
    fn test_crlf_and_line_lengths() {
        let long_text = "word ".repeat(200);
        let message = base()
            .text_body(long_text)
            .attach(Attachment::new(
                "blob.bin",
                ContentType::octet_stream(),
                vec![0xAB; 4096],
            ))
            .build()
            .unwrap();
        let bytes = message.to_bytes().unwrap();

        for (i, &b) in bytes.iter().enumerate() {
            if b == b'\n' {
                assert_eq!(bytes[i - 1], b'\r', "bare LF at {i}");
            }
        }
        let text = String::from_utf8(bytes).unwrap();
        let body = text.split_once("\r\n\r\n").unwrap().1;
        assert!(body.split("\r\n").all(|line| line.len() <= 78));
    }

    #[test]
    fn test_non_ascii_subject_is_encoded() {
        let message = base().subject("季度报告").text_body("x").build().unwrap();
        assert!(message.headers().get("Subject").unwrap().starts_with("=?utf-8?B?"));
        assert_eq!(message.subject().as_deref(), Some("季度报告"));
    }

    #[test]
    fn test_header_injection_rejected() {
        assert!(base().subject("a\r\nBcc: x@evil.com").build().is_err());
        assert!(base().header("X-Test", "a\nb").build().is_err());
        assert!(base().header("Bad Name", "v").build().is_err());
        assert!(base().header("Content-Type", "text/html").build().is_err());
    }

    #[test]
    fn test_fixed_date_and_message_id() {
        let date = DateTime::parse_from_rfc2822("Tue, 1 Jul 2025 10:52:37 +0200").unwrap();
        let message = base()
            .date(date)
            .message_id("<fixed@example.com>")
            .build()
            .unwrap();
        assert_eq!(
            message.headers().get("Date"),
            Some("Tue, 01 Jul 2025 10:52:37 +0200")
        );
        assert_eq!(message.message_id().as_deref(), Some("fixed@example.com"));
        assert!(wire(&message).contains("Message-ID: <fixed@example.com>\r\n"));
    }

    #[test]
    fn test_boundaries_unique() {
        assert_ne!(generate_boundary(), generate_boundary());
        assert!(generate_message_id("example.com").ends_with("@example.com"));
    }
}
