use crate::db::StorageError;
use crate::model::RegistryError;
use crate::query::QueryError;
use crate::validate::ValidationErrors;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for record persistence and lookups.
#[derive(Debug)]
pub enum RepoError {
    Registry(RegistryError),
    Query(QueryError),
    /// Validation failed; nothing was written.
    InvalidRecord {
        entity: String,
        errors: ValidationErrors,
    },
    NotFound {
        entity: String,
        key: String,
    },
    /// Table still missing after the auto-create retry, or auto-create is
    /// disabled.
    SchemaMissing {
        table: Option<String>,
    },
    Storage(StorageError),
    Destroyed {
        entity: String,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry(err) => write!(f, "{err}"),
            Self::Query(err) => write!(f, "{err}"),
            Self::InvalidRecord { entity, errors } => write!(
                f,
                "invalid {entity} record: {} field error(s)",
                errors.len()
            ),
            Self::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            Self::SchemaMissing { table: Some(table) } => {
                write!(f, "table `{table}` does not exist")
            }
            Self::SchemaMissing { table: None } => write!(f, "target table does not exist"),
            Self::Storage(err) => write!(f, "{err}"),
            Self::Destroyed { entity } => write!(f, "{entity} record was already destroyed"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Registry(err) => Some(err),
            Self::Query(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::InvalidRecord { .. }
            | Self::NotFound { .. }
            | Self::SchemaMissing { .. }
            | Self::Destroyed { .. } => None,
        }
    }
}

impl From<RegistryError> for RepoError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<QueryError> for RepoError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}

impl From<StorageError> for RepoError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::SchemaMissing { table, .. } => Self::SchemaMissing { table },
            other => Self::Storage(other),
        }
    }
}

impl RepoError {
    pub fn is_invalid_record(&self) -> bool {
        matches!(self, Self::InvalidRecord { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
