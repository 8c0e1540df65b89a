//! Table synthesis for auto-created schemas.
//!
//! # Invariants
//! - Statements use `IF NOT EXISTS`, so replaying them is harmless.
//! - A shared table holds the union of every family member's columns;
//!   columns not declared on the root are nullable.
//! - History tables never carry the live key or uniqueness constraints.

use super::{quote_ident, CURRENT_TIMESTAMP};
use crate::history::{CHANGED_BY_FIELD, REVISION_CREATED_FIELD, REVISION_ID_FIELD};
use crate::model::{EntityType, FieldDescriptor, FieldType, Value};
use std::collections::HashSet;
use std::sync::Arc;

const DEFAULT_VARCHAR_LENGTH: u32 = 255;

/// `CREATE TABLE` for the live table shared by `family`.
///
/// `family` is the root type plus its registered subtypes; returns `None`
/// when it is empty.
pub fn create_table_sql(family: &[Arc<EntityType>]) -> Option<String> {
    let root = family_root(family)?;
    let columns = union_columns(root, family)
        .into_iter()
        .map(|(field, on_root)| column_definition(field, on_root, false))
        .collect::<Vec<_>>();
    Some(render_create(root.table(), &columns))
}

/// `CREATE TABLE` for the history table parallel to `family`'s live table.
///
/// Returns `None` when the root type is not versioned.
pub fn create_history_table_sql(family: &[Arc<EntityType>]) -> Option<String> {
    let root = family_root(family)?;
    let table = root.history_table()?;

    let mut columns = vec![format!(
        "{} INTEGER PRIMARY KEY AUTOINCREMENT",
        quote_ident(REVISION_ID_FIELD)
    )];
    columns.extend(
        union_columns(root, family)
            .into_iter()
            .map(|(field, on_root)| column_definition(field, on_root, true)),
    );
    columns.push(format!("{} INTEGER", quote_ident(CHANGED_BY_FIELD)));
    columns.push(format!("{} TIMESTAMP", quote_ident(REVISION_CREATED_FIELD)));
    Some(render_create(table, &columns))
}

fn family_root(family: &[Arc<EntityType>]) -> Option<&Arc<EntityType>> {
    let first = family.first()?;
    family
        .iter()
        .find(|entity| entity.name() == first.root())
        .or(Some(first))
}

/// Live columns in root declaration order, then subtype additions.
fn union_columns<'a>(
    root: &'a EntityType,
    family: &'a [Arc<EntityType>],
) -> Vec<(&'a FieldDescriptor, bool)> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for field in root.live_fields() {
        if seen.insert(field.column.as_str()) {
            columns.push((field, true));
        }
    }
    for member in family {
        for field in member.live_fields() {
            if seen.insert(field.column.as_str()) {
                columns.push((field, false));
            }
        }
    }
    columns
}

fn column_definition(field: &FieldDescriptor, on_root: bool, history: bool) -> String {
    let name = quote_ident(&field.column);
    if field.autoincrement && !history {
        return format!("{name} INTEGER PRIMARY KEY AUTOINCREMENT");
    }

    let mut definition = format!("{name} {}", sql_type(field));
    if !history {
        if field.primary {
            definition.push_str(" PRIMARY KEY");
        }
        if field.not_null && on_root {
            definition.push_str(" NOT NULL");
        }
        if field.unique && !field.primary {
            definition.push_str(" UNIQUE");
        }
    }
    if let Some(default) = field
        .default
        .as_ref()
        .and_then(|value| default_literal(field.kind, value))
    {
        definition.push_str(" DEFAULT ");
        definition.push_str(&default);
    }
    definition
}

fn sql_type(field: &FieldDescriptor) -> String {
    match field.kind {
        FieldType::String | FieldType::Enum | FieldType::Password => {
            format!("VARCHAR({})", field.length.unwrap_or(DEFAULT_VARCHAR_LENGTH))
        }
        FieldType::Clob | FieldType::Serialized | FieldType::Set | FieldType::List => {
            "TEXT".to_string()
        }
        FieldType::Boolean => "BOOLEAN".to_string(),
        FieldType::Decimal => "DECIMAL".to_string(),
        FieldType::Integer | FieldType::UnsignedInteger => "INTEGER".to_string(),
        FieldType::Date => "DATE".to_string(),
        FieldType::Timestamp => "TIMESTAMP".to_string(),
    }
}

fn default_literal(kind: FieldType, value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(flag) => Some(i64::from(*flag).to_string()),
        Value::Int(number) => Some(number.to_string()),
        Value::Float(number) if number.is_finite() => Some(number.to_string()),
        Value::Float(_) => None,
        Value::Text(text) if kind == FieldType::Timestamp && text == CURRENT_TIMESTAMP => {
            Some(CURRENT_TIMESTAMP.to_string())
        }
        other => Some(format!("'{}'", other.to_text().replace('\'', "''"))),
    }
}

fn render_create(table: &str, columns: &[String]) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        quote_ident(table),
        columns.join(",\n  ")
    )
}

#[cfg(test)]
mod tests {
    use super::{create_history_table_sql, create_table_sql};
    use crate::config::EngineConfig;
    use crate::history::VersioningConfig;
    use crate::model::{EntityDefinition, EntityRegistry, FieldSpec, FieldType};

    fn registry() -> EntityRegistry {
        let registry = EntityRegistry::new(EngineConfig::default());
        registry
            .register(
                EntityDefinition::with_standard_fields("Shape")
                    .table("shapes")
                    .sub_types(["Shape", "Circle"])
                    .field(FieldSpec::named("Label").unique())
                    .versioning(VersioningConfig::new()),
            )
            .expect("register shape");
        registry
            .register(
                EntityDefinition::new("Circle")
                    .parent("Shape")
                    .field(FieldSpec::typed("Radius", FieldType::Decimal)),
            )
            .expect("register circle");
        registry
    }

    #[test]
    fn live_table_unions_family_columns() {
        let registry = registry();
        let family = registry.subtypes_of("Shape").expect("family");
        let sql = create_table_sql(&family).expect("create sql");
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"shapes\" (\n  \
             \"ID\" INTEGER PRIMARY KEY AUTOINCREMENT,\n  \
             \"Class\" VARCHAR(255) NOT NULL,\n  \
             \"Created\" TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,\n  \
             \"CreatorID\" INTEGER,\n  \
             \"Label\" VARCHAR(255) NOT NULL UNIQUE,\n  \
             \"Radius\" DECIMAL\n)"
        );
    }

    #[test]
    fn history_table_demotes_keys_and_adds_revision_columns() {
        let registry = registry();
        let family = registry.subtypes_of("Shape").expect("family");
        let sql = create_history_table_sql(&family).expect("history sql");
        assert!(sql.starts_with(
            "CREATE TABLE IF NOT EXISTS \"history_shapes\" (\n  \
             \"RevisionID\" INTEGER PRIMARY KEY AUTOINCREMENT,\n  \"ID\" INTEGER,"
        ));
        assert!(sql.contains("\"Label\" VARCHAR(255),"));
        assert!(sql.ends_with("\"ChangedBy\" INTEGER,\n  \"RevisionCreated\" TIMESTAMP\n)"));
    }

    #[test]
    fn timestamp_directive_default_is_quoted_on_text_columns() {
        let registry = EntityRegistry::new(EngineConfig::default());
        registry
            .register(
                EntityDefinition::with_standard_fields("Memo")
                    .table("memos")
                    .field(FieldSpec::named("Body").default_value("CURRENT_TIMESTAMP")),
            )
            .expect("register memo");
        let family = registry.subtypes_of("Memo").expect("family");
        let sql = create_table_sql(&family).expect("create sql");
        assert!(sql.contains("\"Created\" TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,"));
        assert!(sql.contains("\"Body\" VARCHAR(255) NOT NULL DEFAULT 'CURRENT_TIMESTAMP'"));
    }

    #[test]
    fn unversioned_family_has_no_history_table() {
        let registry = EntityRegistry::new(EngineConfig::default());
        registry
            .register(EntityDefinition::with_standard_fields("Note"))
            .expect("register note");
        let family = registry.subtypes_of("Note").expect("family");
        assert!(create_history_table_sql(&family).is_none());
        assert!(create_table_sql(&family)
            .expect("create sql")
            .contains("\"records\""));
    }
}
