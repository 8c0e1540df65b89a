//! Entity definitions and consolidated entity type descriptors.
//!
//! # Responsibility
//! - `EntityDefinition` is what one type declares on its own.
//! - `EntityType` is the immutable, inheritance-merged descriptor the
//!   engine works with.
//!
//! # Invariants
//! - An `EntityType` is never mutated after the registry builds it.
//! - Field lookup by name goes through the descriptor index only.

use crate::config::Charset;
use crate::history::VersioningConfig;
use crate::model::field::{FieldDefaults, FieldDescriptor, FieldId, FieldSpec, FieldType};
use crate::model::registry::RegistryError;
use crate::model::{CREATED_FIELD, DISCRIMINATOR_FIELD};
use crate::record::Record;
use crate::validate::Validator;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Hook run by the persistence executor around a save.
pub type SaveHook = Arc<dyn Fn(&mut Record) + Send + Sync>;

/// Relationship cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    OneToOne,
    OneToMany,
}

/// Link from an owning entity to related records of a target entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    pub name: String,
    pub cardinality: Cardinality,
    pub target: String,
    /// Field on the owning record holding the link value.
    pub local_field: String,
    /// Field on the target records matched against `local_field`.
    pub foreign_field: String,
    /// When set, changing `local_field` drops the loaded relationship.
    pub cached: bool,
}

impl RelationshipDescriptor {
    /// One-to-one link through `local_field` onto the target's `ID`.
    pub fn one_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        local_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::OneToOne,
            target: target.into(),
            local_field: local_field.into(),
            foreign_field: crate::model::DEFAULT_PRIMARY_KEY.to_string(),
            cached: true,
        }
    }

    /// One-to-many link from the owner's `ID` onto the target's `foreign_field`.
    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::OneToMany,
            target: target.into(),
            local_field: crate::model::DEFAULT_PRIMARY_KEY.to_string(),
            foreign_field: foreign_field.into(),
            cached: false,
        }
    }

    pub fn local_field(mut self, field: impl Into<String>) -> Self {
        self.local_field = field.into();
        self
    }

    pub fn foreign_field(mut self, field: impl Into<String>) -> Self {
        self.foreign_field = field.into();
        self
    }

    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FieldEntry {
    Declare(FieldSpec),
    Remove(String),
}

impl FieldEntry {
    pub(crate) fn name(&self) -> &str {
        match self {
            Self::Declare(spec) => spec.name.as_str(),
            Self::Remove(name) => name.as_str(),
        }
    }
}

/// Declarations made by a single entity type, before inheritance merging.
#[derive(Clone)]
pub struct EntityDefinition {
    pub(crate) name: String,
    pub(crate) parent: Option<String>,
    pub(crate) table: Option<String>,
    pub(crate) singular_noun: Option<String>,
    pub(crate) plural_noun: Option<String>,
    pub(crate) field_defaults: Option<FieldDefaults>,
    pub(crate) fields: Vec<FieldEntry>,
    pub(crate) primary_key: Option<String>,
    pub(crate) handle_field: Option<String>,
    pub(crate) sub_types: Vec<String>,
    pub(crate) relationships: Vec<RelationshipDescriptor>,
    pub(crate) validators: Vec<Validator>,
    pub(crate) before_save: Option<SaveHook>,
    pub(crate) after_save: Option<SaveHook>,
    pub(crate) versioning: Option<VersioningConfig>,
}

impl EntityDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            table: None,
            singular_noun: None,
            plural_noun: None,
            field_defaults: None,
            fields: Vec::new(),
            primary_key: None,
            handle_field: None,
            sub_types: Vec::new(),
            relationships: Vec::new(),
            validators: Vec::new(),
            before_save: None,
            after_save: None,
            versioning: None,
        }
    }

    /// Root definition carrying the conventional base fields:
    /// `ID`, `Class`, `Created` and `CreatorID`.
    pub fn with_standard_fields(name: impl Into<String>) -> Self {
        Self::new(name)
            .field(
                FieldSpec::typed(crate::model::DEFAULT_PRIMARY_KEY, FieldType::UnsignedInteger)
                    .unsigned()
                    .autoincrement(),
            )
            .field(FieldSpec::typed(DISCRIMINATOR_FIELD, FieldType::Enum))
            .field(
                FieldSpec::typed(CREATED_FIELD, FieldType::Timestamp)
                    .default_value(crate::db::CURRENT_TIMESTAMP),
            )
            .field(FieldSpec::typed("CreatorID", FieldType::Integer).nullable())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn nouns(mut self, singular: impl Into<String>, plural: impl Into<String>) -> Self {
        self.singular_noun = Some(singular.into());
        self.plural_noun = Some(plural.into());
        self
    }

    pub fn field_defaults(mut self, defaults: FieldDefaults) -> Self {
        self.field_defaults = Some(defaults);
        self
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(FieldEntry::Declare(spec));
        self
    }

    /// Drops an inherited field from this type and its descendants.
    pub fn remove_field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldEntry::Remove(name.into()));
        self
    }

    pub fn primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = Some(field.into());
        self
    }

    pub fn handle_field(mut self, field: impl Into<String>) -> Self {
        self.handle_field = Some(field.into());
        self
    }

    /// Permitted discriminator values for rows of this hierarchy.
    pub fn sub_types<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_types = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn relationship(mut self, relationship: RelationshipDescriptor) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn before_save(mut self, hook: SaveHook) -> Self {
        self.before_save = Some(hook);
        self
    }

    pub fn after_save(mut self, hook: SaveHook) -> Self {
        self.after_save = Some(hook);
        self
    }

    pub fn versioning(mut self, config: VersioningConfig) -> Self {
        self.versioning = Some(config);
        self
    }
}

impl Debug for EntityDefinition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDefinition")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("table", &self.table)
            .field("fields", &self.fields.len())
            .finish()
    }
}

/// Consolidated descriptor for one concrete entity type.
pub struct EntityType {
    pub(crate) name: String,
    pub(crate) root: String,
    pub(crate) lineage: Vec<String>,
    pub(crate) table: String,
    pub(crate) singular_noun: String,
    pub(crate) plural_noun: String,
    pub(crate) primary_key: FieldId,
    pub(crate) handle_field: String,
    pub(crate) fields: Vec<FieldDescriptor>,
    pub(crate) index: HashMap<String, FieldId>,
    pub(crate) relationships: Vec<RelationshipDescriptor>,
    pub(crate) validators: Vec<Validator>,
    pub(crate) before_save: Vec<SaveHook>,
    pub(crate) after_save: Vec<SaveHook>,
    pub(crate) versioning: Option<VersioningConfig>,
    pub(crate) charset: Charset,
    /// Distinguishes this descriptor's `FieldId`s from any other's.
    pub(crate) token: u64,
}

impl EntityType {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Top-level type backing this type's table.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// True when this type is `name` or descends from it.
    pub fn is_a(&self, name: &str) -> bool {
        self.lineage.iter().any(|ancestor| ancestor == name)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn singular_noun(&self) -> &str {
        &self.singular_noun
    }

    pub fn plural_noun(&self) -> &str {
        &self.plural_noun
    }

    pub fn primary_key(&self) -> &FieldDescriptor {
        &self.fields[self.primary_key.position]
    }

    pub fn primary_key_id(&self) -> FieldId {
        self.primary_key
    }

    pub fn handle_field(&self) -> &str {
        &self.handle_field
    }

    /// Every descriptor in declaration order, versioning fields included.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Descriptors that map onto live table columns.
    pub fn live_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|field| !field.versioning)
    }

    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.index.get(name).copied()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.field_id(name).and_then(|id| self.field_by_id(id))
    }

    /// Descriptor behind `id`, or `None` when another entity issued it.
    pub fn field_by_id(&self, id: FieldId) -> Option<&FieldDescriptor> {
        if id.owner != self.token {
            return None;
        }
        self.fields.get(id.position)
    }

    pub(crate) fn id_at(&self, position: usize) -> FieldId {
        FieldId {
            owner: self.token,
            position,
        }
    }

    pub fn field_by_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.column == column)
    }

    /// Declared type of `column`; unknown columns render as plain text.
    pub(crate) fn column_kind(&self, column: &str) -> FieldType {
        self.field_by_column(column)
            .map_or(FieldType::String, |field| field.kind)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Resolves a field that must exist; absence is a programming error.
    pub fn require_field(&self, name: &str) -> Result<&FieldDescriptor, RegistryError> {
        self.field(name).ok_or_else(|| RegistryError::FieldNotFound {
            entity: self.name.clone(),
            field: name.to_string(),
        })
    }

    pub fn column_name(&self, field: &str) -> Result<&str, RegistryError> {
        self.require_field(field).map(|field| field.column.as_str())
    }

    pub fn discriminator(&self) -> Option<&FieldDescriptor> {
        self.field(DISCRIMINATOR_FIELD)
    }

    pub fn created_field(&self) -> Option<&FieldDescriptor> {
        self.field(CREATED_FIELD)
            .filter(|field| field.kind == FieldType::Timestamp)
    }

    pub fn relationships(&self) -> &[RelationshipDescriptor] {
        &self.relationships
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|rel| rel.name == name)
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn before_save_hooks(&self) -> &[SaveHook] {
        &self.before_save
    }

    pub fn after_save_hooks(&self) -> &[SaveHook] {
        &self.after_save
    }

    pub fn versioning(&self) -> Option<&VersioningConfig> {
        self.versioning.as_ref()
    }

    pub fn is_versioned(&self) -> bool {
        self.versioning.is_some()
    }

    pub fn history_table(&self) -> Option<&str> {
        self.versioning
            .as_ref()
            .and_then(|config| config.history_table.as_deref())
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }
}

impl Debug for EntityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("table", &self.table)
            .field(
                "fields",
                &self.fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            )
            .field("versioned", &self.is_versioned())
            .finish()
    }
}
