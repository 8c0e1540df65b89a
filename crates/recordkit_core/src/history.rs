//! Append-only history snapshots for versioned entity types.
//!
//! # Responsibility
//! - Carry the per-type versioning options.
//! - Build the snapshot insert mirroring a record's projection into the
//!   parallel history table.
//!
//! # Invariants
//! - Snapshot statements only ever target the history table.
//! - Versioning fields are never part of a live-table projection.

use crate::db::{quote_ident, Storage, StoredValue, CURRENT_TIMESTAMP};
use crate::model::{EntityType, FieldSpec, FieldType};
use crate::query::render_value;

pub const REVISION_ID_FIELD: &str = "RevisionID";
pub const CHANGED_BY_FIELD: &str = "ChangedBy";
pub const REVISION_CREATED_FIELD: &str = "RevisionCreated";

/// When a save snapshot is taken relative to the live write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotTiming {
    BeforeWrite,
    #[default]
    AfterWrite,
}

/// Versioning capability attached to an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersioningConfig {
    /// `None` until the registry resolves it to `history_<table>`.
    pub history_table: Option<String>,
    pub revision_on_save: bool,
    pub revision_on_destroy: bool,
    pub timing: SnapshotTiming,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl VersioningConfig {
    pub fn new() -> Self {
        Self {
            history_table: None,
            revision_on_save: true,
            revision_on_destroy: true,
            timing: SnapshotTiming::AfterWrite,
        }
    }

    pub fn history_table(mut self, table: impl Into<String>) -> Self {
        self.history_table = Some(table.into());
        self
    }

    pub fn revision_on_save(mut self, enabled: bool) -> Self {
        self.revision_on_save = enabled;
        self
    }

    pub fn revision_on_destroy(mut self, enabled: bool) -> Self {
        self.revision_on_destroy = enabled;
        self
    }

    pub fn timing(mut self, timing: SnapshotTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Fills the history table name from the live table when unset.
    pub(crate) fn resolved(mut self, live_table: &str) -> Self {
        if self.history_table.is_none() {
            self.history_table = Some(format!("history_{live_table}"));
        }
        self
    }
}

/// Fields that exist only in history tables.
pub(crate) fn versioning_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::typed(REVISION_ID_FIELD, FieldType::UnsignedInteger)
            .unsigned()
            .autoincrement(),
        FieldSpec::typed(CHANGED_BY_FIELD, FieldType::Integer).nullable(),
        FieldSpec::typed(REVISION_CREATED_FIELD, FieldType::Timestamp),
    ]
}

/// Builds the insert mirroring `projection` into the history table.
///
/// Returns `None` when the type is not versioned.
pub(crate) fn snapshot_statement(
    entity: &EntityType,
    projection: &[(String, StoredValue)],
    actor: Option<i64>,
    storage: &dyn Storage,
) -> Option<String> {
    let history_table = entity.history_table()?;

    let mut columns: Vec<String> = Vec::with_capacity(projection.len() + 2);
    let mut values: Vec<String> = Vec::with_capacity(projection.len() + 2);
    for (column, value) in projection {
        columns.push(quote_ident(column));
        values.push(render_value(value, entity.column_kind(column), storage));
    }
    columns.push(quote_ident(CHANGED_BY_FIELD));
    values.push(actor.map_or_else(|| "NULL".to_string(), |id| id.to_string()));
    columns.push(quote_ident(REVISION_CREATED_FIELD));
    values.push(CURRENT_TIMESTAMP.to_string());

    Some(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(history_table),
        columns.join(", "),
        values.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::{versioning_fields, SnapshotTiming, VersioningConfig};

    #[test]
    fn resolved_defaults_history_table_from_live_table() {
        let config = VersioningConfig::new().resolved("people");
        assert_eq!(config.history_table.as_deref(), Some("history_people"));

        let named = VersioningConfig::new()
            .history_table("people_log")
            .resolved("people");
        assert_eq!(named.history_table.as_deref(), Some("people_log"));
    }

    #[test]
    fn defaults_snapshot_on_save_and_destroy_after_write() {
        let config = VersioningConfig::default();
        assert!(config.revision_on_save);
        assert!(config.revision_on_destroy);
        assert_eq!(config.timing, SnapshotTiming::AfterWrite);
    }

    #[test]
    fn versioning_fields_are_fixed() {
        let names: Vec<_> = versioning_fields().into_iter().map(|f| f.name).collect();
        assert_eq!(names, ["RevisionID", "ChangedBy", "RevisionCreated"]);
    }
}
