//! Condition, order and select builders.
//!
//! # Responsibility
//! - Compile declarative filters and sort specs into SQL fragments.
//! - Render stored values as escaped literals for writes.
//!
//! # Invariants
//! - Every value reaches SQL through `Storage::escape`, never raw.
//! - Field names resolve to columns through the entity descriptor;
//!   unknown names are errors.
//! - Comparison operators come from a fixed whitelist.

use crate::db::{quote_ident, Storage, StoredValue, CURRENT_TIMESTAMP, FOUND_ROWS_HINT};
use crate::model::{EntityType, FieldType, RegistryError, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

const OPERATORS: &[&str] = &["=", "!=", "<>", "<", "<=", ">", ">=", "LIKE", "NOT LIKE"];

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    Field(RegistryError),
    UnsupportedOperator(String),
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Field(err) => write!(f, "{err}"),
            Self::UnsupportedOperator(operator) => {
                write!(f, "unsupported comparison operator `{operator}`")
            }
        }
    }
}

impl Error for QueryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Field(err) => Some(err),
            Self::UnsupportedOperator(_) => None,
        }
    }
}

impl From<RegistryError> for QueryError {
    fn from(value: RegistryError) -> Self {
        Self::Field(value)
    }
}

/// Constraint on one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    Equals(Value),
    Compare { operator: String, value: Value },
    IsNull,
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Field { field: String, criterion: Criterion },
    Raw(String),
}

/// Ordered, AND-joined filter specification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    entries: Vec<Condition>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push(Condition::Field {
            field: field.into(),
            criterion: Criterion::Equals(value.into()),
        });
        self
    }

    pub fn op(
        mut self,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.entries.push(Condition::Field {
            field: field.into(),
            criterion: Criterion::Compare {
                operator: operator.into(),
                value: value.into(),
            },
        });
        self
    }

    pub fn is_null(mut self, field: impl Into<String>) -> Self {
        self.entries.push(Condition::Field {
            field: field.into(),
            criterion: Criterion::IsNull,
        });
        self
    }

    /// Caller-written predicate, emitted verbatim.
    pub fn raw(mut self, predicate: impl Into<String>) -> Self {
        self.entries.push(Condition::Raw(predicate.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extend(mut self, other: Conditions) -> Self {
        self.entries.extend(other.entries);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OrderTerm {
    Field { field: String, descending: bool },
    Raw(String),
}

/// Ordered sort specification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Order {
    terms: Vec<OrderTerm>,
}

impl Order {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyed entry; only a case-insensitive `DESC` sorts descending.
    pub fn by(mut self, field: impl Into<String>, direction: &str) -> Self {
        self.terms.push(OrderTerm::Field {
            field: field.into(),
            descending: direction.trim().eq_ignore_ascii_case("DESC"),
        });
        self
    }

    pub fn asc(self, field: impl Into<String>) -> Self {
        self.by(field, "ASC")
    }

    pub fn desc(self, field: impl Into<String>) -> Self {
        self.by(field, "DESC")
    }

    /// Positional entries: each value is a field name sorted ascending.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            self = self.asc(field);
        }
        self
    }

    pub fn raw(mut self, term: impl Into<String>) -> Self {
        self.terms.push(OrderTerm::Raw(term.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Compiles conditions into predicate fragments, in order.
pub fn build_conditions(
    entity: &EntityType,
    conditions: &Conditions,
    storage: &dyn Storage,
) -> QueryResult<Vec<String>> {
    conditions
        .entries
        .iter()
        .map(|condition| match condition {
            Condition::Raw(predicate) => Ok(predicate.clone()),
            Condition::Field { field, criterion } => {
                let descriptor = entity.require_field(field)?;
                let column = quote_ident(&descriptor.column);
                match criterion {
                    Criterion::IsNull => Ok(format!("{column} IS NULL")),
                    Criterion::Equals(value) if is_null_match(value, descriptor.blank_is_null) => {
                        Ok(format!("{column} IS NULL"))
                    }
                    Criterion::Equals(value) => {
                        Ok(format!("{column} = {}", quote_text(&value.to_text(), storage)))
                    }
                    Criterion::Compare { operator, value } => {
                        let operator = normalize_operator(operator)?;
                        if value.is_null() {
                            return Ok(format!("{column} IS NULL"));
                        }
                        Ok(format!(
                            "{column} {operator} {}",
                            quote_text(&value.to_text(), storage)
                        ))
                    }
                }
            }
        })
        .collect()
}

/// Compiles an order spec into `column ASC|DESC` fragments.
pub fn build_order(entity: &EntityType, order: &Order) -> QueryResult<Vec<String>> {
    order
        .terms
        .iter()
        .map(|term| match term {
            OrderTerm::Raw(term) => Ok(term.clone()),
            OrderTerm::Field { field, descending } => {
                let column = entity.column_name(field)?;
                Ok(format!(
                    "{} {}",
                    quote_ident(column),
                    if *descending { "DESC" } else { "ASC" }
                ))
            }
        })
        .collect()
}

/// Renders a stored value as a SQL literal for `SET`/`VALUES` lists.
///
/// The `CURRENT_TIMESTAMP` directive is emitted bare only for timestamp
/// fields; any other kind quotes it like ordinary text.
pub fn render_value(value: &StoredValue, kind: FieldType, storage: &dyn Storage) -> String {
    match value {
        StoredValue::Null => "NULL".to_string(),
        StoredValue::Integer(number) => number.to_string(),
        StoredValue::Real(number) if number.is_finite() => number.to_string(),
        StoredValue::Real(_) => "NULL".to_string(),
        StoredValue::Text(text) if kind == FieldType::Timestamp && text == CURRENT_TIMESTAMP => {
            CURRENT_TIMESTAMP.to_string()
        }
        StoredValue::Text(text) => quote_text(text, storage),
    }
}

fn quote_text(text: &str, storage: &dyn Storage) -> String {
    format!("'{}'", storage.escape(text))
}

fn is_null_match(value: &Value, blank_is_null: bool) -> bool {
    value.is_null() || (blank_is_null && value.as_str() == Some(""))
}

fn normalize_operator(operator: &str) -> QueryResult<String> {
    let normalized = operator
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase();
    if OPERATORS.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(QueryError::UnsupportedOperator(operator.to_string()))
    }
}

/// List query over an entity's table, aliased by its root type name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub alias: String,
    pub conditions: Vec<String>,
    pub having: Vec<String>,
    pub order: Vec<String>,
    pub extra_columns: Vec<String>,
    pub limit: Option<u64>,
    pub offset: u64,
    pub calc_found_rows: bool,
}

impl SelectQuery {
    pub fn for_entity(entity: &EntityType) -> Self {
        Self {
            table: entity.table().to_string(),
            alias: entity.root().to_string(),
            ..Self::default()
        }
    }

    pub fn to_sql(&self) -> String {
        let alias = quote_ident(&self.alias);
        let mut sql = String::from("SELECT ");
        if self.calc_found_rows {
            sql.push_str(FOUND_ROWS_HINT);
            sql.push(' ');
        }
        sql.push_str(&format!("{alias}.*"));
        for column in &self.extra_columns {
            sql.push_str(", ");
            sql.push_str(column);
        }
        sql.push_str(&format!(" FROM {} AS {alias}", quote_ident(&self.table)));
        sql.push_str(&format!(" WHERE {}", join_predicates(&self.conditions)));
        if !self.having.is_empty() {
            sql.push_str(&format!(" HAVING {}", join_predicates(&self.having)));
        }
        if !self.order.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", self.order.join(", ")));
        }
        match (self.limit, self.offset) {
            (Some(limit), 0) => sql.push_str(&format!(" LIMIT {limit}")),
            (Some(limit), offset) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (None, 0) => {}
            (None, offset) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
        }
        sql
    }
}

/// `(a) AND (b)`, or `1` when empty.
pub fn join_predicates(predicates: &[String]) -> String {
    if predicates.is_empty() {
        return "1".to_string();
    }
    format!("({})", predicates.join(") AND ("))
}

#[cfg(test)]
mod tests {
    use super::{build_conditions, build_order, render_value, Conditions, Order, QueryError, SelectQuery};
    use crate::config::EngineConfig;
    use crate::db::{open_db_in_memory, SqliteStorage, StoredValue};
    use crate::model::{EntityDefinition, EntityRegistry, EntityType, FieldSpec, FieldType};
    use std::sync::Arc;

    fn person() -> Arc<EntityType> {
        let registry = EntityRegistry::new(EngineConfig::default());
        registry
            .register(
                EntityDefinition::with_standard_fields("Person")
                    .table("people")
                    .field(FieldSpec::named("Status"))
                    .field(FieldSpec::typed("Age", FieldType::Integer))
                    .field(FieldSpec::named("Nick").column("nick_name").nullable()),
            )
            .expect("register");
        registry.describe("Person").expect("describe")
    }

    fn storage() -> SqliteStorage {
        SqliteStorage::new(open_db_in_memory().expect("open memory db"))
    }

    #[test]
    fn scalar_and_operator_conditions_compile_in_order() {
        let conditions = Conditions::new()
            .eq("Status", "active")
            .op("Age", ">", 21);
        let fragments = build_conditions(&person(), &conditions, &storage()).expect("build");
        assert_eq!(fragments, ["\"Status\" = 'active'", "\"Age\" > '21'"]);
    }

    #[test]
    fn values_are_escaped() {
        let conditions = Conditions::new().eq("Status", "it's");
        let fragments = build_conditions(&person(), &conditions, &storage()).expect("build");
        assert_eq!(fragments, ["\"Status\" = 'it''s'"]);
    }

    #[test]
    fn null_and_blank_on_blank_is_null_field_compile_to_is_null() {
        let conditions = Conditions::new()
            .eq("Nick", "")
            .eq("Status", "")
            .is_null("Age");
        let fragments = build_conditions(&person(), &conditions, &storage()).expect("build");
        assert_eq!(
            fragments,
            ["\"nick_name\" IS NULL", "\"Status\" = ''", "\"Age\" IS NULL"]
        );
    }

    #[test]
    fn unknown_field_and_operator_are_rejected() {
        let entity = person();
        let storage = storage();
        let unknown = build_conditions(&entity, &Conditions::new().eq("Nope", 1), &storage);
        assert!(matches!(unknown, Err(QueryError::Field(_))));

        let bad_op = build_conditions(
            &entity,
            &Conditions::new().op("Age", "; DROP", 1),
            &storage,
        );
        assert!(matches!(bad_op, Err(QueryError::UnsupportedOperator(_))));

        let like = build_conditions(
            &entity,
            &Conditions::new().op("Status", "not  like", "a%"),
            &storage,
        )
        .expect("like is allowed");
        assert_eq!(like, ["\"Status\" NOT LIKE 'a%'"]);
    }

    #[test]
    fn order_defaults_to_ascending() {
        let order = Order::new()
            .by("Age", "desc")
            .by("Status", "sideways")
            .fields(["Nick"]);
        assert_eq!(
            build_order(&person(), &order).expect("order"),
            ["\"Age\" DESC", "\"Status\" ASC", "\"nick_name\" ASC"]
        );
    }

    #[test]
    fn render_value_handles_sentinel_and_literals() {
        let storage = storage();
        let now = StoredValue::text("CURRENT_TIMESTAMP");
        assert_eq!(render_value(&StoredValue::Null, FieldType::String, &storage), "NULL");
        assert_eq!(render_value(&StoredValue::Integer(3), FieldType::Integer, &storage), "3");
        assert_eq!(render_value(&now, FieldType::Timestamp, &storage), "CURRENT_TIMESTAMP");
        assert_eq!(render_value(&now, FieldType::String, &storage), "'CURRENT_TIMESTAMP'");
        assert_eq!(render_value(&now, FieldType::Clob, &storage), "'CURRENT_TIMESTAMP'");
        assert_eq!(
            render_value(&StoredValue::text("o'k"), FieldType::String, &storage),
            "'o''k'"
        );
    }

    #[test]
    fn select_renders_hint_limit_and_offset() {
        let mut query = SelectQuery::for_entity(&person());
        query.conditions = vec!["\"Age\" > '21'".to_string()];
        query.order = vec!["\"Age\" DESC".to_string()];
        query.limit = Some(10);
        query.offset = 20;
        query.calc_found_rows = true;
        assert_eq!(
            query.to_sql(),
            "SELECT SQL_CALC_FOUND_ROWS \"Person\".* FROM \"people\" AS \"Person\" \
             WHERE (\"Age\" > '21') ORDER BY \"Age\" DESC LIMIT 10 OFFSET 20"
        );
    }
}
