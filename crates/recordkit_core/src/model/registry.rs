//! Process-wide entity registry and lazy descriptor consolidation.
//!
//! # Responsibility
//! - Hold the per-type definitions registered by callers.
//! - Build each `EntityType` once, merging declarations root-first.
//! - Resolve stored rows to concrete types through the discriminator.
//!
//! # Invariants
//! - `describe` builds a descriptor at most once per type; later calls
//!   return the cached `Arc`.
//! - Construction is serialized by `build_lock`; readers only take the
//!   descriptor read lock.
//! - A name can be registered once.

use crate::config::EngineConfig;
use crate::db::Row;
use crate::history;
use crate::model::entity::{
    EntityDefinition, EntityType, FieldEntry, RelationshipDescriptor, SaveHook,
};
use crate::model::field::{FieldDefaults, FieldId, FieldSpec};
use crate::model::{DEFAULT_PRIMARY_KEY, DISCRIMINATOR_FIELD};
use log::debug;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

const DEFAULT_SINGULAR_NOUN: &str = "record";
const DEFAULT_PLURAL_NOUN: &str = "records";

static NEXT_ENTITY_TOKEN: AtomicU64 = AtomicU64::new(1);

static GLOBAL_REGISTRY: Lazy<EntityRegistry> =
    Lazy::new(|| EntityRegistry::new(EngineConfig::default()));

/// Registry and schema-definition errors. All of them are programming
/// errors rather than user-recoverable conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    UnknownEntity(String),
    DuplicateEntity(String),
    FieldNotFound { entity: String, field: String },
    MissingPrimaryKey { entity: String, field: String },
    InheritanceCycle(String),
    InvalidDefinition(String),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEntity(name) => write!(f, "entity type is not registered: {name}"),
            Self::DuplicateEntity(name) => write!(f, "entity type already registered: {name}"),
            Self::FieldNotFound { entity, field } => {
                write!(f, "field `{field}` is not declared on entity `{entity}`")
            }
            Self::MissingPrimaryKey { entity, field } => write!(
                f,
                "entity `{entity}` declares primary key `{field}` but no such field"
            ),
            Self::InheritanceCycle(name) => {
                write!(f, "entity `{name}` has a cyclic parent chain")
            }
            Self::InvalidDefinition(message) => write!(f, "invalid entity definition: {message}"),
        }
    }
}

impl Error for RegistryError {}

/// Registered definitions plus their lazily built descriptors.
pub struct EntityRegistry {
    config: EngineConfig,
    definitions: RwLock<HashMap<String, Arc<EntityDefinition>>>,
    descriptors: RwLock<HashMap<String, Arc<EntityType>>>,
    build_lock: Mutex<()>,
}

impl EntityRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            definitions: RwLock::new(HashMap::new()),
            descriptors: RwLock::new(HashMap::new()),
            build_lock: Mutex::new(()),
        }
    }

    /// Process-wide registry using the default engine config.
    pub fn global() -> &'static EntityRegistry {
        &GLOBAL_REGISTRY
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn register(&self, definition: EntityDefinition) -> Result<(), RegistryError> {
        let name = definition.name.trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::InvalidDefinition(
                "entity name must not be empty".to_string(),
            ));
        }

        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if definitions.contains_key(&name) {
            return Err(RegistryError::DuplicateEntity(name));
        }
        definitions.insert(name, Arc::new(definition));
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }

    /// Returns the consolidated descriptor, building it on first use.
    pub fn describe(&self, name: &str) -> Result<Arc<EntityType>, RegistryError> {
        if let Some(existing) = self.cached_descriptor(name) {
            return Ok(existing);
        }

        let _guard = self
            .build_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = self.cached_descriptor(name) {
            return Ok(existing);
        }

        let built = Arc::new(self.build(name)?);
        debug!(
            "event=entity_describe module=model status=ok entity={} table={} fields={}",
            built.name,
            built.table,
            built.fields.len()
        );
        self.descriptors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), Arc::clone(&built));
        Ok(built)
    }

    /// True when `child` strictly descends from `ancestor`.
    pub fn is_subtype(&self, child: &str, ancestor: &str) -> Result<bool, RegistryError> {
        if child == ancestor {
            return Ok(false);
        }
        Ok(self.describe(child)?.is_a(ancestor))
    }

    /// Every registered type sharing `root`'s table hierarchy, root included.
    ///
    /// Membership is decided from the declared parent chains, so definitions
    /// outside the hierarchy are never built.
    pub fn subtypes_of(&self, root: &str) -> Result<Vec<Arc<EntityType>>, RegistryError> {
        let mut names: Vec<String> = {
            let definitions = self
                .definitions
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            definitions
                .keys()
                .filter(|name| descends_from(&definitions, name, root))
                .cloned()
                .collect()
        };
        names.sort();

        names.iter().map(|name| self.describe(name)).collect()
    }

    /// Picks the concrete type for a row read through `base`.
    ///
    /// The discriminator value wins only when it names a registered,
    /// permitted subtype of `base`.
    pub fn resolve_row_type(
        &self,
        base: &Arc<EntityType>,
        row: &Row,
    ) -> Result<Arc<EntityType>, RegistryError> {
        let Some(discriminator) = base.discriminator() else {
            return Ok(Arc::clone(base));
        };
        let Some(class_name) = row.get(&discriminator.column).and_then(|v| v.as_str()) else {
            return Ok(Arc::clone(base));
        };

        if class_name == base.name
            || !discriminator.values.iter().any(|allowed| allowed == class_name)
            || !self.is_registered(class_name)
        {
            return Ok(Arc::clone(base));
        }

        if self.is_subtype(class_name, &base.name)? {
            self.describe(class_name)
        } else {
            Ok(Arc::clone(base))
        }
    }

    fn cached_descriptor(&self, name: &str) -> Option<Arc<EntityType>> {
        self.descriptors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Definitions from the root ancestor down to `name`.
    fn lineage(&self, name: &str) -> Result<Vec<Arc<EntityDefinition>>, RegistryError> {
        let definitions = self
            .definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(name.to_string());
        while let Some(type_name) = current {
            if !seen.insert(type_name.clone()) {
                return Err(RegistryError::InheritanceCycle(name.to_string()));
            }
            let definition = definitions
                .get(&type_name)
                .cloned()
                .ok_or(RegistryError::UnknownEntity(type_name))?;
            current = definition.parent.clone();
            chain.push(definition);
        }
        chain.reverse();
        Ok(chain)
    }

    fn build(&self, name: &str) -> Result<EntityType, RegistryError> {
        let chain = self.lineage(name)?;

        let table = nearest(&chain, |d| d.table.clone())
            .unwrap_or_else(|| self.config.default_table.clone());
        let primary_key_name = nearest(&chain, |d| d.primary_key.clone())
            .unwrap_or_else(|| DEFAULT_PRIMARY_KEY.to_string());
        let handle_field = nearest(&chain, |d| d.handle_field.clone())
            .unwrap_or_else(|| self.config.handle_field.clone());
        let singular_noun = nearest(&chain, |d| d.singular_noun.clone())
            .unwrap_or_else(|| DEFAULT_SINGULAR_NOUN.to_string());
        let plural_noun = nearest(&chain, |d| d.plural_noun.clone())
            .unwrap_or_else(|| DEFAULT_PLURAL_NOUN.to_string());
        let defaults: FieldDefaults = nearest(&chain, |d| d.field_defaults).unwrap_or_default();
        let sub_types = chain
            .iter()
            .rev()
            .find(|definition| !definition.sub_types.is_empty())
            .map(|definition| definition.sub_types.clone())
            .unwrap_or_default();

        // Root-first merge; a redeclared name keeps its original position.
        let mut specs: Vec<FieldSpec> = Vec::new();
        for definition in &chain {
            for entry in &definition.fields {
                let position = specs.iter().position(|spec| spec.name == entry.name());
                match (entry, position) {
                    (FieldEntry::Declare(spec), Some(index)) => specs[index] = spec.clone(),
                    (FieldEntry::Declare(spec), None) => specs.push(spec.clone()),
                    (FieldEntry::Remove(_), Some(index)) => {
                        specs.remove(index);
                    }
                    (FieldEntry::Remove(_), None) => {}
                }
            }
        }

        let mut fields: Vec<_> = specs
            .iter()
            .map(|spec| spec.resolve(defaults, &self.config.list_delimiter))
            .collect();

        if let Some(class_field) = fields.iter_mut().find(|f| f.name == DISCRIMINATOR_FIELD) {
            let mut allowed = sub_types;
            if !allowed.iter().any(|value| value == name) {
                allowed.push(name.to_string());
            }
            class_field.values = allowed;
        }

        let versioning =
            nearest(&chain, |d| d.versioning.clone()).map(|config| config.resolved(&table));
        if versioning.is_some() {
            for spec in history::versioning_fields() {
                if fields.iter().any(|field| field.name == spec.name) {
                    return Err(RegistryError::InvalidDefinition(format!(
                        "entity `{name}` declares reserved versioning field `{}`",
                        spec.name
                    )));
                }
                let mut field = spec.resolve(FieldDefaults::default(), &self.config.list_delimiter);
                field.versioning = true;
                fields.push(field);
            }
        }

        let mut relationships: Vec<RelationshipDescriptor> = Vec::new();
        for definition in &chain {
            for relationship in &definition.relationships {
                match relationships
                    .iter()
                    .position(|existing| existing.name == relationship.name)
                {
                    Some(index) => relationships[index] = relationship.clone(),
                    None => relationships.push(relationship.clone()),
                }
            }
        }
        for relationship in &relationships {
            let field = fields
                .iter_mut()
                .find(|field| field.name == relationship.local_field)
                .ok_or_else(|| RegistryError::FieldNotFound {
                    entity: name.to_string(),
                    field: relationship.local_field.clone(),
                })?;
            if relationship.cached {
                field.invalidates.push(relationship.name.clone());
            }
        }

        let token = NEXT_ENTITY_TOKEN.fetch_add(1, Ordering::Relaxed);
        let index: HashMap<String, FieldId> = fields
            .iter()
            .enumerate()
            .map(|(position, field)| {
                (
                    field.name.clone(),
                    FieldId {
                        owner: token,
                        position,
                    },
                )
            })
            .collect();
        let primary_key = index
            .get(&primary_key_name)
            .copied()
            .ok_or_else(|| RegistryError::MissingPrimaryKey {
                entity: name.to_string(),
                field: primary_key_name.clone(),
            })?;

        Ok(EntityType {
            name: name.to_string(),
            root: chain
                .first()
                .map(|definition| definition.name.clone())
                .unwrap_or_else(|| name.to_string()),
            lineage: chain.iter().map(|definition| definition.name.clone()).collect(),
            table,
            singular_noun,
            plural_noun,
            primary_key,
            handle_field,
            fields,
            index,
            relationships,
            validators: chain
                .iter()
                .flat_map(|definition| definition.validators.iter().cloned())
                .collect(),
            before_save: collect_hooks(chain.iter().filter_map(|d| d.before_save.as_ref())),
            after_save: collect_hooks(chain.iter().filter_map(|d| d.after_save.as_ref())),
            versioning,
            charset: self.config.charset,
            token,
        })
    }
}

/// Walks `name`'s declared parents until `root` is reached, a link is
/// missing, or a cycle repeats.
fn descends_from(
    definitions: &HashMap<String, Arc<EntityDefinition>>,
    name: &str,
    root: &str,
) -> bool {
    let mut visited = HashSet::new();
    let mut current = name;
    loop {
        if current == root {
            return true;
        }
        if !visited.insert(current) {
            return false;
        }
        match definitions.get(current).and_then(|definition| definition.parent.as_deref()) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

/// Value declared by the definition closest to the concrete type.
fn nearest<T>(
    chain: &[Arc<EntityDefinition>],
    pick: impl Fn(&EntityDefinition) -> Option<T>,
) -> Option<T> {
    chain
        .iter()
        .rev()
        .find_map(|definition| pick(definition.as_ref()))
}

/// Root-first hook list with repeated hooks kept once.
fn collect_hooks<'a>(hooks: impl Iterator<Item = &'a SaveHook>) -> Vec<SaveHook> {
    let mut collected: Vec<SaveHook> = Vec::new();
    for hook in hooks {
        if !collected.iter().any(|existing| Arc::ptr_eq(existing, hook)) {
            collected.push(Arc::clone(hook));
        }
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::{EntityRegistry, RegistryError};
    use crate::config::EngineConfig;
    use crate::model::{EntityDefinition, FieldSpec, FieldType, RelationshipDescriptor};
    use std::sync::Arc;

    fn registry() -> EntityRegistry {
        EntityRegistry::new(EngineConfig::default())
    }

    #[test]
    fn subclass_declarations_override_root_first() {
        let registry = registry();
        registry
            .register(
                EntityDefinition::with_standard_fields("Content")
                    .table("content")
                    .field(FieldSpec::named("Title"))
                    .field(FieldSpec::typed("Body", FieldType::Clob).nullable()),
            )
            .unwrap();
        registry
            .register(
                EntityDefinition::new("Article")
                    .parent("Content")
                    .field(FieldSpec::typed("Title", FieldType::String).length(80))
                    .field(FieldSpec::typed("Published", FieldType::Boolean)),
            )
            .unwrap();

        let article = registry.describe("Article").unwrap();
        let names: Vec<_> = article.fields().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            ["ID", "Class", "Created", "CreatorID", "Title", "Body", "Published"]
        );
        assert_eq!(article.field("Title").unwrap().length, Some(80));
        assert_eq!(article.table(), "content");
        assert_eq!(article.root(), "Content");
        assert!(article.is_a("Content"));
    }

    #[test]
    fn describe_is_idempotent() {
        let registry = registry();
        registry
            .register(EntityDefinition::with_standard_fields("Tag"))
            .unwrap();

        let first = registry.describe("Tag").unwrap();
        let second = registry.describe("Tag").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn remove_field_drops_inherited_declaration() {
        let registry = registry();
        registry
            .register(EntityDefinition::with_standard_fields("Base"))
            .unwrap();
        registry
            .register(EntityDefinition::new("Slim").parent("Base").remove_field("CreatorID"))
            .unwrap();

        assert!(!registry.describe("Slim").unwrap().has_field("CreatorID"));
    }

    #[test]
    fn discriminator_values_include_declared_sub_types_and_self() {
        let registry = registry();
        registry
            .register(
                EntityDefinition::with_standard_fields("Shape").sub_types(["Circle", "Square"]),
            )
            .unwrap();

        let shape = registry.describe("Shape").unwrap();
        assert_eq!(
            shape.discriminator().unwrap().values,
            ["Circle", "Square", "Shape"]
        );
    }

    #[test]
    fn missing_primary_key_is_rejected() {
        let registry = registry();
        registry
            .register(EntityDefinition::new("Loose").field(FieldSpec::named("Name")))
            .unwrap();

        assert!(matches!(
            registry.describe("Loose"),
            Err(RegistryError::MissingPrimaryKey { .. })
        ));
    }

    #[test]
    fn duplicate_and_cyclic_definitions_are_rejected() {
        let registry = registry();
        registry
            .register(EntityDefinition::new("A").parent("B"))
            .unwrap();
        registry
            .register(EntityDefinition::new("B").parent("A"))
            .unwrap();

        assert_eq!(
            registry.register(EntityDefinition::new("A")),
            Err(RegistryError::DuplicateEntity("A".to_string()))
        );
        assert!(matches!(
            registry.describe("A"),
            Err(RegistryError::InheritanceCycle(_))
        ));
    }

    #[test]
    fn unrelated_broken_definitions_do_not_block_a_family() {
        let registry = registry();
        registry
            .register(EntityDefinition::with_standard_fields("Person").table("people"))
            .unwrap();
        registry
            .register(EntityDefinition::new("Draft").parent("Post"))
            .unwrap();
        registry
            .register(EntityDefinition::new("Loose").field(FieldSpec::named("Name")))
            .unwrap();
        registry
            .register(EntityDefinition::new("A").parent("B"))
            .unwrap();
        registry
            .register(EntityDefinition::new("B").parent("A"))
            .unwrap();

        let family = registry.subtypes_of("Person").unwrap();
        let names: Vec<&str> = family.iter().map(|entity| entity.name()).collect();
        assert_eq!(names, ["Person"]);
    }

    #[test]
    fn foreign_field_ids_resolve_to_nothing() {
        let registry = registry();
        registry
            .register(EntityDefinition::new("Narrow").primary_key("A").field(FieldSpec::named("A")))
            .unwrap();
        registry
            .register(
                EntityDefinition::with_standard_fields("Wide")
                    .field(FieldSpec::named("A"))
                    .field(FieldSpec::named("B")),
            )
            .unwrap();
        let narrow = registry.describe("Narrow").unwrap();
        let wide = registry.describe("Wide").unwrap();

        let foreign = wide.field_id("A").unwrap();
        assert!(narrow.field_by_id(foreign).is_none());
        assert_eq!(wide.field_by_id(foreign).unwrap().name, "A");
        assert_eq!(narrow.field_by_id(narrow.field_id("A").unwrap()).unwrap().name, "A");
    }

    #[test]
    fn cached_relationship_marks_its_local_field() {
        let registry = registry();
        registry
            .register(
                EntityDefinition::with_standard_fields("Person")
                    .field(FieldSpec::typed("AvatarID", FieldType::Integer).nullable())
                    .relationship(RelationshipDescriptor::one_to_one(
                        "Avatar", "Media", "AvatarID",
                    )),
            )
            .unwrap();

        let person = registry.describe("Person").unwrap();
        assert_eq!(person.field("AvatarID").unwrap().invalidates, ["Avatar"]);
    }

    #[test]
    fn unknown_field_is_a_field_not_found_error() {
        let registry = registry();
        registry
            .register(EntityDefinition::with_standard_fields("Thing"))
            .unwrap();

        let thing = registry.describe("Thing").unwrap();
        assert!(matches!(
            thing.column_name("Nope"),
            Err(RegistryError::FieldNotFound { .. })
        ));
    }
}
