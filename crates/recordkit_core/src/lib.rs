//! Core record-mapping engine.
//!
//! Maps schema-described records onto rows of a tabular store, tracks
//! per-field mutation state, validates and persists changes, and builds
//! escaped query fragments from declarative specs.

pub mod cache;
pub mod config;
pub mod db;
pub mod history;
pub mod logging;
pub mod model;
pub mod query;
pub mod record;
pub mod repo;
pub mod service;
pub mod validate;

pub use cache::RecordCache;
pub use config::{Charset, EngineConfig};
pub use db::{
    open_db, open_db_in_memory, Row, SqliteStorage, Storage, StorageError, StorageResult,
    StoredValue,
};
pub use history::{SnapshotTiming, VersioningConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig};
pub use model::{
    Cardinality, EntityDefinition, EntityRegistry, EntityType, FieldDefaults, FieldDescriptor,
    FieldId, FieldSpec, FieldType, RegistryError, RelationshipDescriptor, SaveHook, Value,
};
pub use query::{Conditions, Order, QueryError};
pub use record::{Record, Related, SetOutcome};
pub use repo::{
    HandleOptions, ListOptions, RecordList, RecordRepository, RepoError, RepoResult,
    StorageRecordRepository,
};
pub use service::RecordService;
pub use validate::{Rule, ValidationEntry, ValidationErrors, Validator};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
