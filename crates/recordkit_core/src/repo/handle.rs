//! Human-readable handle generation helpers.

use crate::query::Conditions;
use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_*[^a-zA-Z0-9\-_:]+_*").expect("valid regex"));
static COLON_JOINER: Lazy<Regex> = Lazy::new(|| Regex::new(r":[-_]").expect("valid regex"));
static LEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-_]+").expect("valid regex"));
static TRAILING: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_]+$").expect("valid regex"));

/// Options for `StorageRecordRepository::unique_handle`.
#[derive(Debug, Clone)]
pub struct HandleOptions {
    /// Field to check for collisions; defaults to the type's handle field.
    pub handle_field: Option<String>,
    /// Extra conditions scoping the uniqueness check.
    pub domain_constraints: Conditions,
    /// Suffix even the first candidate.
    pub always_suffix: bool,
    /// Separator between the slug and its incarnation number.
    pub separator: String,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            handle_field: None,
            domain_constraints: Conditions::new(),
            always_suffix: false,
            separator: ":".to_string(),
        }
    }
}

impl HandleOptions {
    pub fn handle_field(mut self, field: impl Into<String>) -> Self {
        self.handle_field = Some(field.into());
        self
    }

    pub fn domain_constraints(mut self, conditions: Conditions) -> Self {
        self.domain_constraints = conditions;
        self
    }

    pub fn always_suffix(mut self) -> Self {
        self.always_suffix = true;
        self
    }

    pub(crate) fn candidate(&self, slug: &str, incarnation: u32) -> String {
        if self.always_suffix || incarnation > 1 {
            format!("{slug}{}{incarnation}", self.separator)
        } else {
            slug.to_string()
        }
    }
}

/// Reduces free text to handle characters: letters, digits, `-`, `_`
/// and `:`.
pub(crate) fn slugify(text: &str) -> String {
    let text = WHITESPACE.replace_all(text.trim(), "_");
    let text = DISALLOWED.replace_all(&text, "-");
    let text = COLON_JOINER.replace_all(&text, ":");
    let text = LEADING.replace_all(&text, "");
    let text = TRAILING.replace_all(&text, "");
    text.trim_matches(|ch| ch == '-' || ch == '_').to_string()
}

#[cfg(test)]
mod tests {
    use super::{slugify, HandleOptions};

    #[test]
    fn slugify_replaces_spaces_and_punctuation() {
        assert_eq!(slugify("  Hello World  "), "Hello_World");
        assert_eq!(slugify("Rock & Roll!"), "Rock-Roll");
        assert_eq!(slugify("news: today"), "news:today");
        assert_eq!(slugify("--edge--"), "edge");
    }

    #[test]
    fn candidate_suffixes_after_first_incarnation() {
        let options = HandleOptions::default();
        assert_eq!(options.candidate("post", 1), "post");
        assert_eq!(options.candidate("post", 2), "post:2");
        assert_eq!(HandleOptions::default().always_suffix().candidate("post", 1), "post:1");
    }
}
