//! Record instances and their mutation state machine.
//!
//! # Responsibility
//! - Hold raw stored values keyed by column, plus the typed-value cache.
//! - Track phantom/dirty/original-value state across `set` calls.
//! - Produce the write projections the repository persists.
//!
//! # Invariants
//! - `raw` only ever holds coerced `StoredValue`s.
//! - A phantom record is always dirty.
//! - `original` records a field's previous value on first divergence only.
//! - Autoincrement and versioning fields are never settable.

pub mod coerce;

use crate::db::{Row, StoredValue, CURRENT_TIMESTAMP};
use crate::model::{EntityType, FieldDescriptor, FieldId, Value};
use crate::validate::{self, ValidationEntry, ValidationErrors};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Outcome of a single field write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Changed,
    Unchanged,
    /// Unknown, autoincrement or versioning field; nothing happened.
    NotSettable,
}

/// Loaded relationship objects attached to an owning record.
#[derive(Debug, Clone)]
pub enum Related {
    OneToOne(Box<Record>),
    OneToMany(Vec<Record>),
}

impl Related {
    pub fn as_one(&self) -> Option<&Record> {
        match self {
            Self::OneToOne(record) => Some(record),
            Self::OneToMany(_) => None,
        }
    }

    pub fn as_many(&self) -> Option<&[Record]> {
        match self {
            Self::OneToMany(records) => Some(records),
            Self::OneToOne(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Record {
    entity: Arc<EntityType>,
    raw: Row,
    converted: RefCell<HashMap<FieldId, Value>>,
    original: BTreeMap<String, StoredValue>,
    phantom: bool,
    was_phantom: bool,
    is_new: bool,
    is_updated: bool,
    destroyed: bool,
    dirty: bool,
    valid: bool,
    errors: ValidationErrors,
    related: BTreeMap<String, Related>,
}

impl Record {
    /// Empty phantom record with its discriminator preset.
    pub fn new(entity: Arc<EntityType>) -> Self {
        let mut raw = Row::new();
        if let Some(discriminator) = entity.discriminator() {
            raw.insert(
                discriminator.column.clone(),
                StoredValue::text(entity.name()),
            );
        }
        Self::from_row_with_state(entity, raw, true)
    }

    /// Clean record over a row loaded from storage.
    pub fn from_row(entity: Arc<EntityType>, row: Row) -> Self {
        Self::from_row_with_state(entity, row, false)
    }

    pub fn from_row_with_state(entity: Arc<EntityType>, row: Row, phantom: bool) -> Self {
        Self {
            entity,
            raw: row,
            converted: RefCell::new(HashMap::new()),
            original: BTreeMap::new(),
            phantom,
            was_phantom: false,
            is_new: false,
            is_updated: false,
            destroyed: false,
            dirty: phantom,
            valid: true,
            errors: ValidationErrors::new(),
            related: BTreeMap::new(),
        }
    }

    pub fn entity(&self) -> &Arc<EntityType> {
        &self.entity
    }

    pub fn raw(&self) -> &Row {
        &self.raw
    }

    /// Stored value of a column, including extra query columns.
    pub fn raw_value(&self, column: &str) -> Option<&StoredValue> {
        self.raw.get(column)
    }

    /// Typed value of `name`.
    ///
    /// Unknown names yield `Null`, except the configured handle alias,
    /// which falls back to the primary key.
    pub fn get(&self, name: &str) -> Value {
        match self.entity.field_id(name) {
            Some(id) => self.get_field(id),
            None if name == self.entity.handle_field() => {
                self.get_field(self.entity.primary_key_id())
            }
            None => Value::Null,
        }
    }

    /// Typed value behind `id`; ids issued by another entity read as null.
    pub fn get_field(&self, id: FieldId) -> Value {
        let Some(field) = self.entity.field_by_id(id) else {
            return Value::Null;
        };
        if let Some(cached) = self.converted.borrow().get(&id) {
            return cached.clone();
        }

        let Some(stored) = self.raw.get(&field.column) else {
            return default_of(field);
        };
        let (value, cacheable) = coerce::to_typed(field, stored);
        if cacheable {
            self.converted.borrow_mut().insert(id, value.clone());
        }
        value
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> SetOutcome {
        match self.entity.field_id(name) {
            Some(id) => self.set_field(id, value),
            None => SetOutcome::NotSettable,
        }
    }

    pub fn set_field(&mut self, id: FieldId, value: impl Into<Value>) -> SetOutcome {
        if self.destroyed {
            return SetOutcome::NotSettable;
        }
        let Some(field) = self.entity.field_by_id(id) else {
            return SetOutcome::NotSettable;
        };
        if field.autoincrement || field.versioning {
            return SetOutcome::NotSettable;
        }

        let coerced = coerce::to_stored(field, value.into(), self.entity.charset());
        let unchanged = self
            .raw
            .get(&field.column)
            .unwrap_or(&StoredValue::Null)
            .same_as(&coerced.stored);
        if unchanged && !coerced.force_dirty {
            return SetOutcome::Unchanged;
        }

        self.write_stored(id, coerced.stored);
        if let Some(converted) = coerced.converted {
            self.converted.borrow_mut().insert(id, converted);
        }
        SetOutcome::Changed
    }

    /// Applies each entry in order; returns how many fields changed.
    pub fn set_fields<I, K, V>(&mut self, values: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut changed = 0;
        for (name, value) in values {
            if self.set(name.as_ref(), value) == SetOutcome::Changed {
                changed += 1;
            }
        }
        changed
    }

    pub fn is_phantom(&self) -> bool {
        self.phantom
    }

    /// True once an insert has been issued for this record.
    pub fn was_phantom(&self) -> bool {
        self.was_phantom
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_updated(&self) -> bool {
        self.is_updated
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn is_dirty(&self) -> bool {
        self.phantom || self.dirty
    }

    pub fn is_field_dirty(&self, name: &str) -> bool {
        self.phantom || self.original.contains_key(name)
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Value a field held before its first change since load or save.
    pub fn original_value(&self, name: &str) -> Option<&StoredValue> {
        self.original.get(name)
    }

    pub fn original_values(&self) -> &BTreeMap<String, StoredValue> {
        &self.original
    }

    pub fn primary_key_value(&self) -> StoredValue {
        self.raw
            .get(&self.entity.primary_key().column)
            .cloned()
            .unwrap_or(StoredValue::Null)
    }

    pub fn id(&self) -> Option<i64> {
        self.primary_key_value().as_i64()
    }

    /// Typed projection of every field present on the record.
    pub fn data(&self) -> BTreeMap<String, Value> {
        self.entity
            .fields()
            .enumerate()
            .filter(|(_, field)| !field.versioning || self.raw.contains_key(&field.column))
            .map(|(position, field)| {
                (field.name.clone(), self.get_field(self.entity.id_at(position)))
            })
            .collect()
    }

    pub fn validate(&mut self, deep: bool) -> bool {
        validate::validate_record(self, deep)
    }

    pub fn validation_errors(&self) -> &ValidationErrors {
        &self.errors
    }

    /// Error entry at a dotted path such as `Contacts.0.Email`.
    pub fn validation_error(&self, path: &str) -> Option<&ValidationEntry> {
        self.errors.lookup(path)
    }

    /// Records an error outside the validator list and marks the record
    /// invalid.
    pub fn add_validation_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.add(field, message);
        self.valid = false;
    }

    /// Attaches loaded relationship objects; returns false when the
    /// relationship is not declared.
    pub fn set_related(&mut self, name: &str, related: Related) -> bool {
        if self.entity.relationship(name).is_none() {
            return false;
        }
        self.related.insert(name.to_string(), related);
        true
    }

    pub fn related(&self, name: &str) -> Option<&Related> {
        self.related.get(name)
    }

    pub(crate) fn related_mut(&mut self) -> impl Iterator<Item = (&String, &mut Related)> {
        self.related.iter_mut()
    }

    pub(crate) fn finish_validation(&mut self, valid: bool, errors: ValidationErrors) {
        self.valid = valid;
        self.errors = errors;
    }

    /// Assigns the current time to an unset or sentinel creation stamp.
    pub(crate) fn stamp_created(&mut self) {
        let Some(field) = self.entity.created_field() else {
            return;
        };
        let needs_stamp = match self.raw.get(&field.column) {
            None => true,
            Some(stored) => stored.is_blank() || stored.as_str() == Some(CURRENT_TIMESTAMP),
        };
        if !needs_stamp {
            return;
        }
        if let Some(id) = self.entity.field_id(&field.name) {
            self.write_stored(id, StoredValue::Text(coerce::now_timestamp()));
        }
    }

    /// Column/value pairs to write.
    ///
    /// Inserts take every field with a stored or default value; updates
    /// take changed fields only. An unset autoincrement key is left to
    /// storage.
    pub(crate) fn write_projection(&self) -> Vec<(String, StoredValue)> {
        self.entity
            .live_fields()
            .filter(|field| self.phantom || self.original.contains_key(&field.name))
            .filter(|field| !(field.autoincrement && self.field_is_unset(field)))
            .filter_map(|field| self.projected(field).map(|value| (field.column.clone(), value)))
            .collect()
    }

    /// Every live field with a stored or default value; history snapshots
    /// mirror this.
    pub(crate) fn full_projection(&self) -> Vec<(String, StoredValue)> {
        self.entity
            .live_fields()
            .filter_map(|field| self.projected(field).map(|value| (field.column.clone(), value)))
            .collect()
    }

    /// Full projection as stored before the pending changes.
    pub(crate) fn previous_projection(&self) -> Vec<(String, StoredValue)> {
        self.entity
            .live_fields()
            .filter_map(|field| {
                let value = match self.original.get(&field.name) {
                    Some(original) => Some(coerce::to_projection(field, original)),
                    None => self.projected(field),
                };
                value.map(|value| (field.column.clone(), value))
            })
            .collect()
    }

    pub(crate) fn mark_inserted(&mut self, generated_id: Option<i64>) {
        let primary_key = self.entity.primary_key();
        if let Some(id) = generated_id.filter(|_| primary_key.autoincrement) {
            self.raw
                .insert(primary_key.column.clone(), StoredValue::Integer(id));
            self.converted
                .borrow_mut()
                .remove(&self.entity.primary_key_id());
        }
        self.phantom = false;
        self.was_phantom = true;
        self.is_new = true;
        self.mark_clean();
    }

    pub(crate) fn mark_updated(&mut self) {
        self.is_updated = true;
        self.mark_clean();
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }

    fn mark_clean(&mut self) {
        self.dirty = false;
        self.original.clear();
    }

    fn field_is_unset(&self, field: &FieldDescriptor) -> bool {
        self.raw.get(&field.column).map_or(true, StoredValue::is_blank)
    }

    fn projected(&self, field: &FieldDescriptor) -> Option<StoredValue> {
        match self.raw.get(&field.column) {
            Some(stored) => Some(coerce::to_projection(field, stored)),
            None => field.default.clone().map(|default| {
                let coerced = coerce::to_stored(field, default, self.entity.charset());
                coerce::to_projection(field, &coerced.stored)
            }),
        }
    }

    fn write_stored(&mut self, id: FieldId, stored: StoredValue) {
        let Some(field) = self.entity.field_by_id(id) else {
            return;
        };
        let previous = self
            .raw
            .insert(field.column.clone(), stored)
            .unwrap_or(StoredValue::Null);
        self.original
            .entry(field.name.clone())
            .or_insert(previous);
        self.converted.borrow_mut().remove(&id);
        for relationship in &field.invalidates {
            self.related.remove(relationship);
        }
        self.dirty = true;
    }
}

fn default_of(field: &FieldDescriptor) -> Value {
    match (&field.default, field.kind.is_sequence()) {
        (Some(Value::Text(text)), true) => {
            Value::List(coerce::split_list(text, &field.delimiter))
        }
        (Some(default), _) => default.clone(),
        (None, true) => Value::List(Vec::new()),
        (None, false) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::{Record, Related, SetOutcome};
    use crate::config::EngineConfig;
    use crate::db::{Row, StoredValue};
    use crate::model::{
        EntityDefinition, EntityRegistry, FieldSpec, FieldType, RelationshipDescriptor, Value,
    };

    fn registry() -> EntityRegistry {
        let registry = EntityRegistry::new(EngineConfig::default());
        registry
            .register(
                EntityDefinition::with_standard_fields("Person")
                    .table("people")
                    .field(FieldSpec::named("Name"))
                    .field(FieldSpec::typed("Age", FieldType::Integer).nullable())
                    .field(FieldSpec::typed("Tags", FieldType::List).nullable())
                    .field(FieldSpec::typed("AvatarID", FieldType::Integer).nullable())
                    .relationship(RelationshipDescriptor::one_to_one(
                        "Avatar", "Person", "AvatarID",
                    )),
            )
            .expect("register person");
        registry
    }

    fn loaded(registry: &EntityRegistry) -> Record {
        let mut row = Row::new();
        row.insert("ID".to_string(), StoredValue::Integer(7));
        row.insert("Class".to_string(), StoredValue::text("Person"));
        row.insert("Name".to_string(), StoredValue::text("Ada"));
        row.insert("Age".to_string(), StoredValue::Integer(36));
        Record::from_row(registry.describe("Person").expect("describe"), row)
    }

    #[test]
    fn new_record_is_phantom_dirty_with_class_preset() {
        let registry = registry();
        let record = Record::new(registry.describe("Person").expect("describe"));
        assert!(record.is_phantom());
        assert!(record.is_dirty());
        assert!(record.is_field_dirty("Name"));
        assert_eq!(record.get("Class"), Value::text("Person"));
    }

    #[test]
    fn loaded_record_starts_clean() {
        let registry = registry();
        let record = loaded(&registry);
        assert!(!record.is_phantom());
        assert!(!record.is_dirty());
        assert_eq!(record.get("Age"), Value::Int(36));
    }

    #[test]
    fn set_records_original_on_first_divergence_only() {
        let registry = registry();
        let mut record = loaded(&registry);

        assert_eq!(record.set("Name", "Grace"), SetOutcome::Changed);
        assert_eq!(record.set("Name", "Hopper"), SetOutcome::Changed);
        assert_eq!(record.original_value("Name"), Some(&StoredValue::text("Ada")));
        assert!(record.is_dirty());
        assert!(record.is_field_dirty("Name"));
        assert!(!record.is_field_dirty("Age"));
    }

    #[test]
    fn equal_value_is_unchanged() {
        let registry = registry();
        let mut record = loaded(&registry);
        assert_eq!(record.set("Age", "36"), SetOutcome::Unchanged);
        assert!(!record.is_dirty());
    }

    #[test]
    fn list_writes_always_dirty() {
        let registry = registry();
        let mut record = loaded(&registry);
        assert_eq!(record.set("Tags", Value::list(["a"])), SetOutcome::Changed);
        assert_eq!(record.set("Tags", Value::list(["a"])), SetOutcome::Changed);
        assert_eq!(record.get("Tags"), Value::list(["a"]));
    }

    #[test]
    fn autoincrement_versioning_and_unknown_fields_are_not_settable() {
        let registry = registry();
        let mut record = loaded(&registry);
        assert_eq!(record.set("ID", 99), SetOutcome::NotSettable);
        assert_eq!(record.set("Nope", 1), SetOutcome::NotSettable);
        assert_eq!(record.id(), Some(7));
        assert!(!record.is_dirty());
    }

    #[test]
    fn handle_alias_falls_back_to_primary_key() {
        let registry = registry();
        let record = loaded(&registry);
        assert_eq!(record.get("Handle"), Value::Int(7));
        assert_eq!(record.get("Unknown"), Value::Null);
    }

    #[test]
    fn absent_field_returns_default_without_writing_back() {
        let registry = registry();
        let record = Record::new(registry.describe("Person").expect("describe"));
        assert_eq!(record.get("Created"), Value::text("CURRENT_TIMESTAMP"));
        assert_eq!(record.get("Tags"), Value::List(Vec::new()));
        assert!(!record.raw().contains_key("Created"));
    }

    #[test]
    fn changing_cached_link_drops_related_object() {
        let registry = registry();
        let mut record = loaded(&registry);
        let avatar = loaded(&registry);
        assert!(record.set_related("Avatar", Related::OneToOne(Box::new(avatar))));
        assert!(record.related("Avatar").is_some());

        record.set("AvatarID", 3);
        assert!(record.related("Avatar").is_none());
        assert!(!record.set_related("Undeclared", Related::OneToMany(Vec::new())));
    }

    #[test]
    fn update_projection_contains_only_changed_fields() {
        let registry = registry();
        let mut record = loaded(&registry);
        record.set("Name", "Grace");
        assert_eq!(
            record.write_projection(),
            vec![("Name".to_string(), StoredValue::text("Grace"))]
        );
    }

    #[test]
    fn insert_projection_skips_unset_autoincrement_key() {
        let registry = registry();
        let mut record = Record::new(registry.describe("Person").expect("describe"));
        record.set("Name", "Ada");
        let columns: Vec<_> = record
            .write_projection()
            .into_iter()
            .map(|(column, _)| column)
            .collect();
        assert_eq!(columns, ["Class", "Created", "Name"]);
    }

    #[test]
    fn mark_inserted_assigns_generated_key_and_cleans() {
        let registry = registry();
        let mut record = Record::new(registry.describe("Person").expect("describe"));
        record.set("Name", "Ada");
        record.mark_inserted(Some(12));
        assert!(!record.is_phantom());
        assert!(record.is_new());
        assert!(!record.is_dirty());
        assert_eq!(record.id(), Some(12));
    }
}
