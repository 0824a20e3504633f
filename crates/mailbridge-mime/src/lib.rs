//! # mailbridge-mime
//!
//! MIME message composition and parsing for mailbridge.
//!
//! ## Features
//!
//! - **Message building**: multipart/mixed, alternative and related trees with
//!   CRLF output ready for SMTP submission
//! - **Message parsing**: recursive multipart parsing of fetched messages
//! - **Encoding/Decoding**: Base64, Quoted-Printable, RFC 2047 header encoding
//! - **Addresses**: RFC 5322 mailbox parsing with encoded display names
//!
//! ## Building a message
//!
//! ```ignore
//! use mailbridge_mime::{Address, Attachment, ContentType, MessageBuilder};
//!
//! let message = MessageBuilder::new()
//!     .from(Address::parse("Sender <sender@example.com>")?)
//!     .to(Address::parse("recipient@example.com")?)
//!     .subject("Quarterly report")
//!     .text_body("See attached.")
//!     .html_body("<p>See attached.</p>")
//!     .attach(Attachment::new("report.pdf", ContentType::new("application", "pdf"), bytes))
//!     .build()?;
//!
//! let wire: Vec<u8> = message.to_bytes()?;
//! ```
//!
//! ## Parsing a message
//!
//! ```ignore
//! use mailbridge_mime::Message;
//!
//! let message = Message::parse(raw_bytes)?;
//! println!("Subject: {}", message.subject().unwrap_or_default());
//! for part in message.attachments() {
//!     println!("{:?}", part.filename());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod builder;
mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use address::{Address, format_list};
pub use builder::{
    Attachment, DATE_FORMAT, MessageBuilder, Priority, generate_message_id, is_reserved_header,
};
pub use content_type::{ContentType, header_parameter};
pub use error::{Error, Result};
pub use header::{Headers, is_valid_field_name};
pub use message::{Body, Message, Part, TransferEncoding};
