//! Field declarations and resolved field descriptors.
//!
//! # Responsibility
//! - `FieldSpec` is a partial, possibly shorthand declaration.
//! - `FieldDescriptor` is the resolved form after the defaults mask.
//!
//! # Invariants
//! - `autoincrement` implies `primary` on every resolved descriptor.
//! - A nullable descriptor is blank-is-null unless explicitly overridden.

use crate::model::value::Value;

/// Declared storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Clob,
    Boolean,
    Decimal,
    Integer,
    UnsignedInteger,
    Date,
    Timestamp,
    Serialized,
    Enum,
    Set,
    List,
    Password,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Clob => "clob",
            Self::Boolean => "boolean",
            Self::Decimal => "decimal",
            Self::Integer => "integer",
            Self::UnsignedInteger => "uint",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Serialized => "serialized",
            Self::Enum => "enum",
            Self::Set => "set",
            Self::List => "list",
            Self::Password => "password",
        }
    }

    /// Parses a shorthand type name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "string" | "varchar" => Some(Self::String),
            "clob" | "text" => Some(Self::Clob),
            "boolean" | "bool" => Some(Self::Boolean),
            "decimal" => Some(Self::Decimal),
            "int" | "integer" => Some(Self::Integer),
            "uint" | "unsigned" => Some(Self::UnsignedInteger),
            "date" => Some(Self::Date),
            "timestamp" => Some(Self::Timestamp),
            "serialized" => Some(Self::Serialized),
            "enum" => Some(Self::Enum),
            "set" => Some(Self::Set),
            "list" => Some(Self::List),
            "password" => Some(Self::Password),
            _ => None,
        }
    }

    /// Set/list fields surface as ordered sequences.
    pub fn is_sequence(self) -> bool {
        matches!(self, Self::Set | Self::List)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Self::Integer | Self::UnsignedInteger)
    }
}

/// Defaults mask applied to every declaration before its own options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDefaults {
    pub kind: FieldType,
    pub not_null: bool,
}

impl Default for FieldDefaults {
    fn default() -> Self {
        Self {
            kind: FieldType::String,
            not_null: true,
        }
    }
}

/// Partial field declaration. Unset options fall back to `FieldDefaults`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub column: Option<String>,
    pub kind: Option<FieldType>,
    pub not_null: Option<bool>,
    pub blank_is_null: Option<bool>,
    pub unique: bool,
    pub primary: bool,
    pub autoincrement: bool,
    pub unsigned: bool,
    pub length: Option<u32>,
    pub default: Option<Value>,
    pub values: Vec<String>,
    pub delimiter: Option<String>,
}

impl FieldSpec {
    /// Bare field name with implicit defaults.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: None,
            kind: None,
            not_null: None,
            blank_is_null: None,
            unique: false,
            primary: false,
            autoincrement: false,
            unsigned: false,
            length: None,
            default: None,
            values: Vec::new(),
            delimiter: None,
        }
    }

    pub fn typed(name: impl Into<String>, kind: FieldType) -> Self {
        Self::named(name).kind(kind)
    }

    /// Shorthand `name => "type"` declaration; unknown type names are `None`.
    pub fn shorthand(name: impl Into<String>, type_name: &str) -> Option<Self> {
        FieldType::parse(type_name).map(|kind| Self::typed(name, kind))
    }

    pub fn kind(mut self, kind: FieldType) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn nullable(mut self) -> Self {
        self.not_null = Some(false);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = Some(true);
        self
    }

    pub fn blank_is_null(mut self, value: bool) -> Self {
        self.blank_is_null = Some(value);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    /// Applies the defaults mask and produces the resolved descriptor.
    pub(crate) fn resolve(&self, defaults: FieldDefaults, list_delimiter: &str) -> FieldDescriptor {
        let not_null = self.not_null.unwrap_or(defaults.not_null);
        FieldDescriptor {
            name: self.name.clone(),
            column: self.column.clone().unwrap_or_else(|| self.name.clone()),
            kind: self.kind.unwrap_or(defaults.kind),
            not_null,
            blank_is_null: self.blank_is_null.unwrap_or(!not_null),
            unique: self.unique,
            primary: self.primary || self.autoincrement,
            autoincrement: self.autoincrement,
            unsigned: self.unsigned,
            length: self.length,
            default: self.default.clone(),
            values: self.values.clone(),
            delimiter: self
                .delimiter
                .clone()
                .unwrap_or_else(|| list_delimiter.to_string()),
            versioning: false,
            invalidates: Vec::new(),
        }
    }
}

/// Position of a field inside the descriptor table of the entity that
/// issued it. Ids are only honoured by their issuing `EntityType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId {
    pub(crate) owner: u64,
    pub(crate) position: usize,
}

impl FieldId {
    pub fn index(self) -> usize {
        self.position
    }
}

/// Fully resolved field descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub column: String,
    pub kind: FieldType,
    pub not_null: bool,
    pub blank_is_null: bool,
    pub unique: bool,
    pub primary: bool,
    pub autoincrement: bool,
    pub unsigned: bool,
    pub length: Option<u32>,
    pub default: Option<Value>,
    pub values: Vec<String>,
    pub delimiter: String,
    /// History-only field; never settable and never projected live.
    pub versioning: bool,
    /// Cache-flagged relationships dropped when this field changes.
    pub invalidates: Vec<String>,
}

impl FieldDescriptor {
    pub fn nullable(&self) -> bool {
        !self.not_null
    }

    /// True for fields that key the point-lookup cache.
    pub fn is_cache_key(&self) -> bool {
        self.unique || self.primary
    }
}
