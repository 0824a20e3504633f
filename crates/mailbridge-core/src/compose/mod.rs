//! Message composition.
//!
//! A [`ComposeRequest`] is validated, its attachments resolved (inline
//! bytes or stored uploads) and encoded once into a [`ComposedEmail`].

mod composer;
mod email;
mod error;
mod request;
mod template;

pub use composer::{Composer, guess_content_type};
pub use email::{ComposedEmail, EmailId};
pub use error::ComposeError;
pub use request::{AttachmentSource, ComposeRequest, TemplateRef};
pub use template::{InMemoryTemplates, Template, TemplateSource, render};
