//! Record CRUD service.
//!
//! # Responsibility
//! - Provide the create/load/apply/save/destroy entry points a controller
//!   dispatches onto.
//! - Delegate persistence to a `RecordRepository` implementation.
//!
//! # Invariants
//! - Service APIs never bypass repository validation or persistence.
//! - Field application honours an editable-field whitelist when given.

use crate::model::Value;
use crate::query::Conditions;
use crate::record::Record;
use crate::repo::{ListOptions, RecordList, RecordRepository, RepoError, RepoResult};
use crate::validate::ValidationErrors;

/// Use-case service wrapper for record CRUD operations.
pub struct RecordService<R: RecordRepository> {
    repo: R,
}

impl<R: RecordRepository> RecordService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Fresh phantom record of `entity`.
    pub fn create_default(&self, entity: &str) -> RepoResult<Record> {
        Ok(Record::new(self.repo.registry().describe(entity)?))
    }

    pub fn load_by_primary_key(
        &self,
        entity: &str,
        id: impl Into<Value>,
    ) -> RepoResult<Option<Record>> {
        self.repo.get_by_id(entity, id.into())
    }

    pub fn load_by_field(
        &self,
        entity: &str,
        field: &str,
        value: impl Into<Value>,
        cacheable: bool,
    ) -> RepoResult<Option<Record>> {
        self.repo.get_by_field(entity, field, value.into(), cacheable)
    }

    pub fn load_by_handle(&self, entity: &str, handle: &str) -> RepoResult<Option<Record>> {
        self.repo.get_by_handle(entity, handle)
    }

    /// Like `load_by_handle`, but a missing record is `RepoError::NotFound`.
    pub fn require_by_handle(&self, entity: &str, handle: &str) -> RepoResult<Record> {
        self.repo
            .get_by_handle(entity, handle)?
            .ok_or_else(|| RepoError::NotFound {
                entity: entity.to_string(),
                key: handle.to_string(),
            })
    }

    /// Matching records; `found_rows` is filled when requested or implied
    /// by a limit.
    pub fn load_all_by_conditions(
        &self,
        entity: &str,
        conditions: &Conditions,
        options: &ListOptions,
    ) -> RepoResult<RecordList> {
        self.repo.get_all_by_where(entity, conditions, options)
    }

    /// Applies every entry; returns how many fields changed.
    pub fn apply_fields<I, K, V>(&self, record: &mut Record, values: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        record.set_fields(values)
    }

    /// Applies only whitelisted entries; an empty whitelist allows all.
    pub fn apply_delta<I, K, V>(&self, record: &mut Record, delta: I, editable: &[&str]) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        record.set_fields(delta.into_iter().filter(|(name, _)| {
            editable.is_empty() || editable.contains(&name.as_ref())
        }))
    }

    pub fn save(&self, record: &mut Record) -> RepoResult<()> {
        self.repo.save(record)
    }

    pub fn destroy(&self, record: &mut Record) -> RepoResult<bool> {
        self.repo.destroy(record)
    }

    pub fn validation_errors<'r>(&self, record: &'r Record) -> &'r ValidationErrors {
        record.validation_errors()
    }
}
