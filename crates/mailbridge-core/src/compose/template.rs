//! Message templates with `{{variable}}` placeholders.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A stored template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Subject template.
    pub subject: String,
    /// Plain-text body template.
    pub text: Option<String>,
    /// HTML body template.
    pub html: Option<String>,
}

impl Template {
    /// Substitutes variables into every field.
    #[must_use]
    pub fn render(&self, variables: &BTreeMap<String, String>) -> Self {
        Self {
            subject: render(&self.subject, variables),
            text: self.text.as_deref().map(|t| render(t, variables)),
            html: self.html.as_deref().map(|t| render(t, variables)),
        }
    }
}

/// Resolves template names.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// Loads a template by name.
    async fn load(&self, name: &str) -> Result<Option<Template>>;
}

/// Templates held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTemplates {
    templates: HashMap<String, Template>,
}

impl InMemoryTemplates {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a template.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, template: Template) -> Self {
        self.templates.insert(name.into(), template);
        self
    }
}

#[async_trait]
impl TemplateSource for InMemoryTemplates {
    async fn load(&self, name: &str) -> Result<Option<Template>> {
        Ok(self.templates.get(name).cloned())
    }
}

/// Replaces `{{ name }}` placeholders. Unknown placeholders are removed;
/// an unterminated `{{` is kept as text.
#[must_use]
pub fn render(template: &str, variables: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        if let Some(value) = variables.get(after[..end].trim()) {
            out.push_str(value);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
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

    fn vars() -> BTreeMap<String, String> {
        BTreeMap::from([("name".to_string(), "Ann".to_string())])
    }

    #[test]
    fn substitutes_known_and_drops_unknown() {
        assert_eq!(render("Hi {{name}}!", &vars()), "Hi Ann!");
        assert_eq!(render("Hi {{ name }}{{missing}}.", &vars()), "Hi Ann.");
        assert_eq!(render("no placeholders", &vars()), "no placeholders");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(render("a {{name", &vars()), "a {{name");
    }

    #[tokio::test]
    async fn in_memory_source() {
        let source = InMemoryTemplates::new().with(
            "welcome",
            Template {
                subject: "Welcome {{name}}".into(),
                text: Some("Hello {{name}}".into()),
                html: None,
            },
        );
        let template = source.load("welcome").await.unwrap().unwrap();
        assert_eq!(template.render(&vars()).subject, "Welcome Ann");
        assert!(source.load("other").await.unwrap().is_none());
    }
}
