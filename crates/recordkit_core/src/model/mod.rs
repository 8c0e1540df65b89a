//! Schema metadata: values, field descriptors, entity types and registry.
//!
//! # Responsibility
//! - Describe entity types declaratively and consolidate them across the
//!   inheritance chain into immutable descriptors.
//!
//! # Invariants
//! - Records only ever see consolidated `EntityType` descriptors.
//! - Descriptors are built lazily and at most once per registry.

pub mod entity;
pub mod field;
pub mod registry;
pub mod value;

pub use entity::{Cardinality, EntityDefinition, EntityType, RelationshipDescriptor, SaveHook};
pub use field::{FieldDefaults, FieldDescriptor, FieldId, FieldSpec, FieldType};
pub use registry::{EntityRegistry, RegistryError};
pub use value::Value;

/// Field naming the concrete subtype of a stored row.
pub const DISCRIMINATOR_FIELD: &str = "Class";

/// Creation timestamp assigned on first save when unset.
pub const CREATED_FIELD: &str = "Created";

/// Primary key field used when a type does not name one.
pub const DEFAULT_PRIMARY_KEY: &str = "ID";
