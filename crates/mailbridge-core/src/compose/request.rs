//! Structured compose input.

use std::collections::BTreeMap;

use mailbridge_mime::Priority;
use serde::{Deserialize, Serialize};

use crate::attachment::AttachmentId;

/// A message to compose, as submitted by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeRequest {
    /// Sender address, optionally with a display name.
    pub from: String,
    /// Primary recipients.
    pub to: Vec<String>,
    /// Carbon-copy recipients.
    pub cc: Vec<String>,
    /// Blind carbon-copy recipients; never written to headers.
    pub bcc: Vec<String>,
    /// Reply-To addresses.
    pub reply_to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub text_body: Option<String>,
    /// HTML body.
    pub html_body: Option<String>,
    /// Attachments.
    pub attachments: Vec<AttachmentSource>,
    /// Importance.
    pub priority: Priority,
    /// Extra headers, in order.
    pub headers: Vec<(String, String)>,
    /// Template to fill subject and bodies from.
    pub template: Option<TemplateRef>,
}

impl ComposeRequest {
    /// Total number of to, cc and bcc recipients.
    #[must_use]
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }
}

/// Where an attachment's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum AttachmentSource {
    /// Bytes supplied with the request.
    Data {
        /// File name.
        filename: String,
        /// MIME type; guessed from the extension when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
        /// Raw content, base64 in serialized form.
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
        /// Makes the attachment inline.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_id: Option<String>,
    },
    /// A previously uploaded attachment.
    Stored {
        /// Upload ID.
        id: AttachmentId,
        /// Makes the attachment inline.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_id: Option<String>,
    },
}

/// Reference to a named template and its variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    /// Template name.
    pub name: String,
    /// Placeholder values.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
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
    fn deserializes_minimal_json() {
        let request: ComposeRequest = serde_json::from_str(
            r#"{
                "from": "a@x.com",
                "to": ["b@y.com"],
                "subject": "Hi",
                "text_body": "hello",
                "priority": "high",
                "attachments": [
                    {"source": "data", "filename": "a.txt", "data": "aGVsbG8="}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(request.priority, Priority::High);
        assert_eq!(request.recipient_count(), 1);
        assert_eq!(
            request.attachments[0],
            AttachmentSource::Data {
                filename: "a.txt".into(),
                content_type: None,
                data: b"hello".to_vec(),
                content_id: None,
            }
        );
    }

    #[test]
    fn serialized_form_is_stable() {
        let request = ComposeRequest {
            from: "a@x.com".into(),
            to: vec!["b@y.com".into()],
            attachments: vec![AttachmentSource::Data {
                filename: "x.bin".into(),
                content_type: None,
                data: vec![0, 255],
                content_id: Some("logo".into()),
            }],
            template: Some(TemplateRef {
                name: "welcome".into(),
                variables: BTreeMap::from([("name".into(), "Ann".into())]),
            }),
            ..Default::default()
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"data\":\"AP8=\""));
        let back: ComposeRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }
}
