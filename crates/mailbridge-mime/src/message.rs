//! MIME message structure, parsing and serialization.
//!
//! A [`Message`] is a tree of [`Part`]s. Leaf bodies are kept in their
//! transfer-encoded wire form and decoded on demand, so a parsed message
//! serializes back to equivalent bytes.

use crate::address::Address;
use crate::content_type::{ContentType, header_parameter, split_parameters};
use crate::encoding::{decode_base64, decode_quoted_printable_bytes, decode_rfc2047};
use crate::error::{Error, Result};
use crate::header::Headers;
use chrono::{DateTime, FixedOffset};
use std::fmt;

/// Nesting limit for multipart bodies.
const MAX_DEPTH: usize = 32;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
            Self::Binary => "binary",
        })
    }
}

/// Body of a MIME part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Leaf content, still transfer-encoded.
    Single(Vec<u8>),
    /// Child parts of a multipart entity.
    Multipart(Vec<Part>),
}

/// MIME message part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body.
    pub body: Body,
}

impl Part {
    /// Creates a leaf part from already-encoded body bytes.
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            body: Body::Single(body),
        }
    }

    /// Creates a multipart part.
    #[must_use]
    pub const fn multipart(headers: Headers, children: Vec<Self>) -> Self {
        Self {
            headers,
            body: Body::Multipart(children),
        }
    }

    /// Parses a part from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if headers are malformed or a multipart body has
    /// no boundary.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        Self::parse_at_depth(raw, 0)
    }

    fn parse_at_depth(raw: &[u8], depth: usize) -> Result<Self> {
        let (head, body) = split_head_body(raw);
        let headers = Headers::parse(&String::from_utf8_lossy(head))?;

        let content_type = headers
            .get("content-type")
            .and_then(|v| ContentType::parse(v).ok());

        match content_type {
            Some(ct) if ct.is_multipart() && depth < MAX_DEPTH => {
                let boundary = ct.boundary().ok_or(Error::MissingBoundary)?;
                let children = split_multipart(body, boundary)
                    .into_iter()
                    .map(|chunk| Self::parse_at_depth(chunk, depth + 1))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::multipart(headers, children))
            }
            _ => Ok(Self::new(headers, body.to_vec())),
        }
    }

    /// Gets the content type, defaulting to `text/plain`.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get("content-type")
            .and_then(|v| ContentType::parse(v).ok())
            .unwrap_or_else(|| ContentType::new("text", "plain"))
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Returns the child parts, empty for a leaf.
    #[must_use]
    pub fn children(&self) -> &[Self] {
        match &self.body {
            Body::Multipart(children) => children,
            Body::Single(_) => &[],
        }
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if this is a multipart part or decoding fails.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        let Body::Single(body) = &self.body else {
            return Err(Error::InvalidMultipart(
                "Multipart parts have no single body".to_string(),
            ));
        };
        match self.transfer_encoding() {
            TransferEncoding::Base64 => decode_base64(&String::from_utf8_lossy(body)),
            TransferEncoding::QuotedPrintable => {
                decode_quoted_printable_bytes(&String::from_utf8_lossy(body))
            }
            _ => Ok(body.clone()),
        }
    }

    /// Gets the decoded body as text.
    ///
    /// Invalid UTF-8 sequences are replaced rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if transfer decoding fails.
    pub fn body_text(&self) -> Result<String> {
        let decoded = self.decode_body()?;
        Ok(String::from_utf8(decoded)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
    }

    /// Returns the disposition type (`inline`, `attachment`) if present.
    #[must_use]
    pub fn disposition(&self) -> Option<String> {
        self.headers.get("content-disposition").and_then(|v| {
            split_parameters(v)
                .first()
                .map(|d| d.trim().to_ascii_lowercase())
        })
    }

    /// Returns the attachment file name from the disposition or content type.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        self.headers
            .get("content-disposition")
            .and_then(|v| header_parameter(v, "filename"))
            .or_else(|| self.content_type().parameter("name").map(ToString::to_string))
            .map(|name| decode_rfc2047(&name).unwrap_or(name))
    }

    /// Returns the Content-ID without angle brackets.
    #[must_use]
    pub fn content_id(&self) -> Option<String> {
        self.headers.get("content-id").map(|id| {
            id.trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    }

    /// Returns true if this leaf should be presented as an attachment.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        if matches!(self.body, Body::Multipart(_)) {
            return false;
        }
        match self.disposition().as_deref() {
            Some("attachment") => true,
            Some("inline") => self.filename().is_some() && !self.content_type().is_text(),
            _ => self.filename().is_some() || !self.content_type().is_text(),
        }
    }

    /// Returns all leaf parts in document order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Self>) {
        match &self.body {
            Body::Single(_) => out.push(self),
            Body::Multipart(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    /// Writes the part in wire format (CRLF line endings).
    ///
    /// # Errors
    ///
    /// Returns an error if a multipart part lacks a boundary.
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(self.headers.to_string().as_bytes());
        out.extend_from_slice(b"\r\n");

        match &self.body {
            Body::Single(body) => out.extend_from_slice(body),
            Body::Multipart(children) => {
                let content_type = self.content_type();
                let boundary = content_type.boundary().ok_or(Error::MissingBoundary)?;
                for child in children {
                    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                    child.write_to(out)?;
                    out.extend_from_slice(b"\r\n");
                }
                out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
            }
        }
        Ok(())
    }

    /// Serializes the part to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if a multipart part lacks a boundary.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }
}

/// A complete MIME message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    root: Part,
}

impl Message {
    /// Wraps a root part as a message.
    #[must_use]
    pub const fn from_part(root: Part) -> Self {
        Self { root }
    }

    /// Parses a message from raw RFC 5322 bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if headers or multipart structure are malformed.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        Part::parse(raw).map(Self::from_part)
    }

    /// Returns the top-level headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.root.headers
    }

    /// Returns the root part.
    #[must_use]
    pub const fn root(&self) -> &Part {
        &self.root
    }

    /// Gets the decoded Subject header.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.decoded_header("subject")
    }

    /// Gets a header value with encoded words decoded.
    #[must_use]
    pub fn decoded_header(&self, name: &str) -> Option<String> {
        self.headers()
            .get(name)
            .map(|v| decode_rfc2047(v).unwrap_or_else(|_| v.to_string()))
    }

    /// Gets the first From address, if it parses.
    #[must_use]
    pub fn from(&self) -> Option<Address> {
        self.addresses("from").into_iter().next()
    }

    /// Gets the To addresses that parse.
    #[must_use]
    pub fn to(&self) -> Vec<Address> {
        self.addresses("to")
    }

    /// Gets the Cc addresses that parse.
    #[must_use]
    pub fn cc(&self) -> Vec<Address> {
        self.addresses("cc")
    }

    fn addresses(&self, name: &str) -> Vec<Address> {
        self.headers()
            .get_all(name)
            .into_iter()
            .filter_map(|v| Address::parse_list(v).ok())
            .flatten()
            .collect()
    }

    /// Gets the Message-ID header without angle brackets.
    #[must_use]
    pub fn message_id(&self) -> Option<String> {
        self.headers().get("message-id").map(|id| {
            id.trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    }

    /// Gets the parsed Date header.
    #[must_use]
    pub fn date(&self) -> Option<DateTime<FixedOffset>> {
        self.headers()
            .get("date")
            .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
    }

    /// Returns the first text/plain body that is not an attachment.
    #[must_use]
    pub fn text_body(&self) -> Option<String> {
        self.first_body("plain")
    }

    /// Returns the first text/html body that is not an attachment.
    #[must_use]
    pub fn html_body(&self) -> Option<String> {
        self.first_body("html")
    }

    fn first_body(&self, sub_type: &str) -> Option<String> {
        self.root
            .leaves()
            .into_iter()
            .filter(|p| p.content_type().is("text", sub_type))
            .find(|p| p.disposition().as_deref() != Some("attachment") && p.filename().is_none())
            .and_then(|p| p.body_text().ok())
    }

    /// Returns all attachment leaves.
    #[must_use]
    pub fn attachments(&self) -> Vec<&Part> {
        self.root
            .leaves()
            .into_iter()
            .filter(|p| p.is_attachment())
            .collect()
    }

    /// Serializes the message to wire bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if a multipart part lacks a boundary.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.root.to_bytes()
    }
}

/// Splits raw bytes at the first blank line.
fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    if raw.starts_with(b"\r\n") {
        return (&[], &raw[2..]);
    }
    if raw.starts_with(b"\n") {
        return (&[], &raw[1..]);
    }
    for i in 0..raw.len() {
        if raw[i..].starts_with(b"\r\n\r\n") {
            return (&raw[..i], &raw[i + 4..]);
        }
        if raw[i..].starts_with(b"\n\n") {
            return (&raw[..i], &raw[i + 2..]);
        }
    }
    (raw, &[])
}

/// Splits a multipart body into the raw bytes of each child.
///
/// The line break before each delimiter belongs to the delimiter. The
/// preamble and epilogue are discarded. A missing close delimiter is
/// tolerated.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut start: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| pos + i);
        let next = (line_end + 1).min(body.len());
        let line = trim_line_end(&body[pos..line_end]);

        if let Some(rest) = line.strip_prefix(delimiter)
            && (rest.is_empty() || rest == b"--")
        {
            if let Some(s) = start {
                parts.push(&body[s..strip_preceding_newline(body, s, pos)]);
            }
            if rest == b"--" {
                return parts;
            }
            start = Some(next);
        }
        pos = next;
    }

    if let Some(s) = start
        && s < body.len()
    {
        parts.push(&body[s..]);
    }
    parts
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !matches!(b, b'\r' | b' ' | b'\t'))
        .map_or(0, |i| i + 1);
    &line[..end]
}

fn strip_preceding_newline(body: &[u8], start: usize, end: usize) -> usize {
    let mut end = end;
    if end > start && body[end - 1] == b'\n' {
        end -= 1;
        if end > start && body[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end
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

    const MULTIPART: &str = concat!(
        "From: =?utf-8?B?5byg5LiJ?= <zhang@163.com>\r\n",
        "To: a@example.com, \"B, Bee\" <b@example.com>\r\n",
        "Subject: =?utf-8?Q?caf=C3=A9?=\r\n",
        "Date: Tue, 1 Jul 2025 10:52:37 +0200\r\n",
        "Message-ID: <abc@163.com>\r\n",
        "MIME-Version: 1.0\r\n",
        "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
        "\r\n",
        "This is a preamble.\r\n",
        "--outer\r\n",
        "Content-Type: multipart/alternative; boundary=inner\r\n",
        "\r\n",
        "--inner\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "Content-Transfer-Encoding: quoted-printable\r\n",
        "\r\n",
        "Hello caf=C3=A9\r\n",
        "--inner\r\n",
        "Content-Type: text/html; charset=utf-8\r\n",
        "\r\n",
        "<p>Hello</p>\r\n",
        "--inner--\r\n",
        "--outer\r\n",
        "Content-Type: application/pdf; name=\"report.pdf\"\r\n",
        "Content-Disposition: attachment; filename=\"report.pdf\"\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "JVBERi0xLjQ=\r\n",
        "--outer--\r\n",
        "epilogue\r\n"
    );

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse("BASE64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
    }

    #[test]
    fn test_parse_single_part() {
        let raw = b"From: sender@example.com\r\nSubject: Test\r\n\r\nHello, World!";
        let message = Message::parse(raw).unwrap();
        assert_eq!(message.from().unwrap().email, "sender@example.com");
        assert_eq!(message.subject().as_deref(), Some("Test"));
        assert_eq!(message.text_body().as_deref(), Some("Hello, World!"));
        assert!(message.attachments().is_empty());
    }

    #[test]
    fn test_parse_bare_lf() {
        let raw = b"Subject: LF\nContent-Type: text/plain\n\nbody line\n";
        let message = Message::parse(raw).unwrap();
        assert_eq!(message.subject().as_deref(), Some("LF"));
        assert_eq!(message.text_body().as_deref(), Some("body line\n"));
    }

    #[test]
    fn test_parse_nested_multipart() {
        let message = Message::parse(MULTIPART.as_bytes()).unwrap();

        assert_eq!(message.subject().as_deref(), Some("café"));
        assert_eq!(message.from().unwrap().name.as_deref(), Some("张三"));
        let to = message.to();
        assert_eq!(to.len(), 2);
        assert_eq!(to[1].name.as_deref(), Some("B, Bee"));
        assert_eq!(message.message_id().as_deref(), Some("abc@163.com"));
        assert!(message.date().is_some());

        assert_eq!(message.text_body().as_deref(), Some("Hello café"));
        assert_eq!(message.html_body().as_deref(), Some("<p>Hello</p>"));

        let attachments = message.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename().as_deref(), Some("report.pdf"));
        assert_eq!(attachments[0].decode_body().unwrap(), b"%PDF-1.4");
    }

    #[test]
    fn test_multipart_without_boundary_is_error() {
        let raw = b"Content-Type: multipart/mixed\r\n\r\nbody";
        assert!(matches!(
            Message::parse(raw),
            Err(Error::MissingBoundary)
        ));
    }

    #[test]
    fn test_serialize_reparse() {
        let message = Message::parse(MULTIPART.as_bytes()).unwrap();
        let bytes = message.to_bytes().unwrap();
        let reparsed = Message::parse(&bytes).unwrap();
        assert_eq!(reparsed.text_body(), message.text_body());
        assert_eq!(reparsed.attachments().len(), 1);
    }

    #[test]
    fn test_inline_image_is_attachment() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "image/png");
        headers.add("Content-Disposition", "inline; filename=logo.png");
        headers.add("Content-ID", "<logo@x>");
        let part = Part::new(headers, Vec::new());
        assert!(part.is_attachment());
        assert_eq!(part.content_id().as_deref(), Some("logo@x"));
    }
}
