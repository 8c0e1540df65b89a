//! Declarative validators and the record validation pipeline.
//!
//! # Responsibility
//! - Describe field-scoped validation rules.
//! - Run them in declaration order and recurse into loaded relationships.
//! - Build the structured error map surfaced to callers.
//!
//! # Invariants
//! - Rule failures never become `Err`; they only fill the error map.
//! - Overall validity is the AND of the local result and every recursed
//!   related-record result.

use crate::model::Value;
use crate::record::{Record, Related};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("valid regex")
});
static HANDLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_:\-]*$").expect("valid regex"));

/// Caller check returning an error message on failure.
pub type CustomRule = Arc<dyn Fn(&Record) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub enum Rule {
    /// Text length bounds, in characters.
    String {
        min: Option<usize>,
        max: Option<usize>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
    Email,
    /// Starts with a letter; letters, digits, `_`, `:` and `-` only.
    Handle,
    Pattern(Regex),
    Selection(Vec<String>),
    Custom(CustomRule),
}

impl Debug for Rule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String { min, max } => f
                .debug_struct("String")
                .field("min", min)
                .field("max", max)
                .finish(),
            Self::Number { min, max } => f
                .debug_struct("Number")
                .field("min", min)
                .field("max", max)
                .finish(),
            Self::Email => f.write_str("Email"),
            Self::Handle => f.write_str("Handle"),
            Self::Pattern(pattern) => f.debug_tuple("Pattern").field(&pattern.as_str()).finish(),
            Self::Selection(choices) => f.debug_tuple("Selection").field(choices).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One declared check against one field.
#[derive(Debug, Clone)]
pub struct Validator {
    pub field: String,
    pub rule: Rule,
    /// Blank values fail when set; otherwise blank values skip the rule.
    pub required: bool,
    pub message: Option<String>,
}

impl Validator {
    pub fn new(field: impl Into<String>, rule: Rule) -> Self {
        Self {
            field: field.into(),
            rule,
            required: true,
            message: None,
        }
    }

    pub fn string(field: impl Into<String>) -> Self {
        Self::new(field, Rule::String { min: None, max: None })
    }

    pub fn string_length(field: impl Into<String>, min: Option<usize>, max: Option<usize>) -> Self {
        Self::new(field, Rule::String { min, max })
    }

    pub fn number(field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self::new(field, Rule::Number { min, max })
    }

    pub fn email(field: impl Into<String>) -> Self {
        Self::new(field, Rule::Email)
    }

    pub fn handle(field: impl Into<String>) -> Self {
        Self::new(field, Rule::Handle)
    }

    pub fn pattern(field: impl Into<String>, pattern: Regex) -> Self {
        Self::new(field, Rule::Pattern(pattern))
    }

    pub fn selection<I, S>(field: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            field,
            Rule::Selection(choices.into_iter().map(Into::into).collect()),
        )
    }

    pub fn custom<F>(field: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Record) -> Option<String> + Send + Sync + 'static,
    {
        Self::new(field, Rule::Custom(Arc::new(check)))
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Runs the check, returning the failure message if any.
    pub fn check(&self, record: &Record) -> Option<String> {
        if let Rule::Custom(check) = &self.rule {
            return check(record).map(|default| self.message.clone().unwrap_or(default));
        }

        let value = record.get(&self.field);
        if value.is_blank() {
            return self
                .required
                .then(|| self.failure(format!("{} is required", self.field)));
        }

        let passed = match &self.rule {
            Rule::String { min, max } => {
                let length = value.to_text().chars().count();
                min.map_or(true, |min| length >= min) && max.map_or(true, |max| length <= max)
            }
            Rule::Number { min, max } => match number_of(&value) {
                Some(number) => {
                    min.map_or(true, |min| number >= min) && max.map_or(true, |max| number <= max)
                }
                None => false,
            },
            Rule::Email => EMAIL_PATTERN.is_match(&value.to_text()),
            Rule::Handle => HANDLE_PATTERN.is_match(&value.to_text()),
            Rule::Pattern(pattern) => pattern.is_match(&value.to_text()),
            Rule::Selection(choices) => {
                let text = value.to_text();
                choices.iter().any(|choice| *choice == text)
            }
            Rule::Custom(_) => true,
        };

        (!passed).then(|| self.failure(self.default_message()))
    }

    fn failure(&self, default: String) -> String {
        self.message.clone().unwrap_or(default)
    }

    fn default_message(&self) -> String {
        let field = &self.field;
        match &self.rule {
            Rule::String { min: Some(min), max: Some(max) } => {
                format!("{field} must be between {min} and {max} characters")
            }
            Rule::String { min: Some(min), .. } => {
                format!("{field} must be at least {min} characters")
            }
            Rule::String { max: Some(max), .. } => {
                format!("{field} must be at most {max} characters")
            }
            Rule::Number { .. } => format!("{field} must be a number in range"),
            Rule::Email => format!("{field} must be a valid email address"),
            Rule::Handle => format!("{field} must be a valid handle"),
            Rule::Selection(_) => format!("{field} must be one of the allowed choices"),
            _ => format!("{field} is invalid"),
        }
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(_) => None,
        other => other.as_f64(),
    }
}

/// One error-map entry: a message or a nested map for related records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ValidationEntry {
    Message(String),
    Nested(ValidationErrors),
}

/// Field-keyed validation error map.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    entries: BTreeMap<String, ValidationEntry>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Records a message; the first message for a field wins.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.entries
            .entry(field.into())
            .or_insert_with(|| ValidationEntry::Message(message.into()));
    }

    pub fn insert_nested(&mut self, key: impl Into<String>, nested: ValidationErrors) {
        self.entries.insert(key.into(), ValidationEntry::Nested(nested));
    }

    pub fn get(&self, key: &str) -> Option<&ValidationEntry> {
        self.entries.get(key)
    }

    /// Dotted-path lookup, e.g. `Contacts.0.Email`.
    pub fn lookup(&self, path: &str) -> Option<&ValidationEntry> {
        let mut segments = path.split('.');
        let mut current = self.entries.get(segments.next()?)?;
        for segment in segments {
            match current {
                ValidationEntry::Nested(nested) => current = nested.entries.get(segment)?,
                ValidationEntry::Message(_) => return None,
            }
        }
        Some(current)
    }

    /// Message at `path`, when the entry there is a message.
    pub fn message(&self, path: &str) -> Option<&str> {
        match self.lookup(path)? {
            ValidationEntry::Message(message) => Some(message.as_str()),
            ValidationEntry::Nested(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValidationEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Resets and recomputes `record`'s validity and error map.
///
/// With `deep`, dirty loaded relationship records are validated too and
/// their errors merged under the relationship name (`name.<index>` for
/// one-to-many).
pub(crate) fn validate_record(record: &mut Record, deep: bool) -> bool {
    let mut errors = ValidationErrors::new();
    {
        let entity = record.entity();
        for validator in entity.validators() {
            if let Some(message) = validator.check(record) {
                errors.add(validator.field.clone(), message);
            }
        }
    }
    let mut valid = errors.is_empty();

    if deep {
        for (name, related) in record.related_mut() {
            match related {
                Related::OneToOne(child) => {
                    if child.is_dirty() {
                        valid &= child.validate(true);
                        errors.insert_nested(name.clone(), child.validation_errors().clone());
                    }
                }
                Related::OneToMany(children) => {
                    let mut nested = ValidationErrors::new();
                    let mut touched = false;
                    for (index, child) in children.iter_mut().enumerate() {
                        if child.is_dirty() {
                            touched = true;
                            valid &= child.validate(true);
                            nested.insert_nested(index.to_string(), child.validation_errors().clone());
                        }
                    }
                    if touched {
                        errors.insert_nested(name.clone(), nested);
                    }
                }
            }
        }
    }

    record.finish_validation(valid, errors);
    valid
}

#[cfg(test)]
mod tests {
    use super::{ValidationEntry, ValidationErrors, Validator};
    use crate::config::EngineConfig;
    use crate::model::{EntityDefinition, EntityRegistry, FieldSpec, FieldType};
    use crate::record::Record;

    fn person(registry: &EntityRegistry) -> Record {
        registry
            .register(
                EntityDefinition::with_standard_fields("Person")
                    .field(FieldSpec::named("Name"))
                    .field(FieldSpec::named("Email").nullable())
                    .field(FieldSpec::typed("Age", FieldType::Integer).nullable()),
            )
            .expect("register person");
        Record::new(registry.describe("Person").expect("describe person"))
    }

    #[test]
    fn required_string_rejects_blank() {
        let registry = EntityRegistry::new(EngineConfig::default());
        let record = person(&registry);
        let message = Validator::string("Name").check(&record);
        assert_eq!(message.as_deref(), Some("Name is required"));
    }

    #[test]
    fn optional_rule_skips_blank_values() {
        let registry = EntityRegistry::new(EngineConfig::default());
        let record = person(&registry);
        assert!(Validator::email("Email").optional().check(&record).is_none());
    }

    #[test]
    fn rules_check_current_values() {
        let registry = EntityRegistry::new(EngineConfig::default());
        let mut record = person(&registry);
        record.set("Email", "not-an-email");
        record.set("Age", 150);
        record.set("Name", "Al");

        assert!(Validator::email("Email").check(&record).is_some());
        assert!(Validator::number("Age", Some(0.0), Some(120.0))
            .check(&record)
            .is_some());
        assert_eq!(
            Validator::string_length("Name", Some(3), None)
                .message("too short")
                .check(&record)
                .as_deref(),
            Some("too short")
        );
        assert!(Validator::selection("Name", ["Al", "Bo"]).check(&record).is_none());
    }

    #[test]
    fn custom_rule_sees_whole_record() {
        let registry = EntityRegistry::new(EngineConfig::default());
        let mut record = person(&registry);
        record.set("Name", "root");
        let validator = Validator::custom("Name", |record| {
            (record.get("Name").as_str() == Some("root")).then(|| "reserved".to_string())
        });
        assert_eq!(validator.check(&record).as_deref(), Some("reserved"));
    }

    #[test]
    fn lookup_walks_nested_paths() {
        let mut inner = ValidationErrors::new();
        inner.add("Email", "bad email");
        let mut list = ValidationErrors::new();
        list.insert_nested("0", inner);
        let mut errors = ValidationErrors::new();
        errors.add("Name", "required");
        errors.add("Name", "ignored second message");
        errors.insert_nested("Contacts", list);

        assert_eq!(errors.message("Name"), Some("required"));
        assert_eq!(errors.message("Contacts.0.Email"), Some("bad email"));
        assert!(matches!(
            errors.lookup("Contacts.0"),
            Some(ValidationEntry::Nested(_))
        ));
        assert!(errors.lookup("Name.deeper").is_none());
    }

    #[test]
    fn error_map_serializes_as_plain_object() {
        let mut errors = ValidationErrors::new();
        errors.add("Name", "required");
        let json = serde_json::to_value(&errors).expect("serialize errors");
        assert_eq!(json, serde_json::json!({"Name": "required"}));
    }
}
