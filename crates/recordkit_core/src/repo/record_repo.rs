//! Record repository contract and `Storage`-backed implementation.
//!
//! # Responsibility
//! - Persist records (insert/update/delete) and load them back through
//!   field, handle, condition and raw-query lookups.
//! - Recover from a missing table by creating the schema and retrying.
//!
//! # Invariants
//! - `save` validates deeply before any statement is issued.
//! - Save and destroy invalidate the coarse cache key of every
//!   unique/primary field before writing.
//! - Rows are instantiated as the concrete type their discriminator names,
//!   when that type is a permitted subtype.
//! - Destroy records a revision only for a row that still exists.

use crate::cache::RecordCache;
use crate::db::{ddl, quote_ident, Row, Storage, StorageResult, StoredValue};
use crate::history::{self, SnapshotTiming, REVISION_ID_FIELD};
use crate::model::{Cardinality, EntityRegistry, EntityType, RegistryError, Value};
use crate::query::{
    build_conditions, build_order, join_predicates, render_value, Conditions, Order, SelectQuery,
};
use crate::record::{Record, Related};
use crate::repo::handle::slugify;
use crate::repo::{HandleOptions, ListOptions, RecordList, RepoError, RepoResult};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const RANDOM_HANDLE_MAX_LEN: usize = 32;

/// Repository interface for record persistence and primary lookups.
pub trait RecordRepository {
    fn registry(&self) -> &EntityRegistry;
    fn save(&self, record: &mut Record) -> RepoResult<()>;
    /// Returns true when a live row was removed.
    fn destroy(&self, record: &mut Record) -> RepoResult<bool>;
    fn get_by_id(&self, entity: &str, id: Value) -> RepoResult<Option<Record>>;
    fn get_by_field(
        &self,
        entity: &str,
        field: &str,
        value: Value,
        cacheable: bool,
    ) -> RepoResult<Option<Record>>;
    /// Tries the type's handle field first, then the primary key.
    fn get_by_handle(&self, entity: &str, handle: &str) -> RepoResult<Option<Record>>;
    fn get_all_by_where(
        &self,
        entity: &str,
        conditions: &Conditions,
        options: &ListOptions,
    ) -> RepoResult<RecordList>;
}

/// Record repository over a `Storage` collaborator.
pub struct StorageRecordRepository<'a> {
    storage: &'a dyn Storage,
    registry: &'a EntityRegistry,
    cache: &'a RecordCache,
    actor: Option<i64>,
}

impl<'a> StorageRecordRepository<'a> {
    pub fn new(storage: &'a dyn Storage, registry: &'a EntityRegistry, cache: &'a RecordCache) -> Self {
        Self {
            storage,
            registry,
            cache,
            actor: None,
        }
    }

    /// Acting user recorded as `ChangedBy` on history snapshots.
    pub fn with_actor(mut self, actor: i64) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn actor(&self) -> Option<i64> {
        self.actor
    }

    /// Creates the live table shared by `entity`'s hierarchy, plus its
    /// history table when versioned.
    pub fn create_tables(&self, entity: &EntityType) -> RepoResult<()> {
        let family = self.registry.subtypes_of(entity.root())?;
        let statements = [
            ddl::create_table_sql(&family),
            ddl::create_history_table_sql(&family),
        ];
        for sql in statements.into_iter().flatten() {
            self.storage.execute_non_query(&sql, &[])?;
        }
        info!(
            "event=schema_create module=repo status=ok entity={} table={} versioned={}",
            entity.root(),
            entity.table(),
            entity.is_versioned()
        );
        Ok(())
    }

    pub fn get_by_where(
        &self,
        entity: &str,
        conditions: &Conditions,
        order: &Order,
    ) -> RepoResult<Option<Record>> {
        let entity = self.entity(entity)?;
        let predicates = build_conditions(&entity, conditions, self.storage)?;
        let order = build_order(&entity, order)?;
        let mut sql = format!(
            "SELECT * FROM {} WHERE {}",
            quote_ident(entity.table()),
            join_predicates(&predicates)
        );
        if !order.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        sql.push_str(" LIMIT 1");

        let row = self.run(&entity, || self.storage.execute_one(&sql, &[]))?;
        row.map(|row| self.instantiate(&entity, row)).transpose()
    }

    /// First row of a caller-written query, as a record of `entity`.
    pub fn get_by_query(
        &self,
        entity: &str,
        sql: &str,
        params: &[StoredValue],
    ) -> RepoResult<Option<Record>> {
        let entity = self.entity(entity)?;
        let row = self.run(&entity, || self.storage.execute_one(sql, params))?;
        row.map(|row| self.instantiate(&entity, row)).transpose()
    }

    pub fn get_all(&self, entity: &str, options: &ListOptions) -> RepoResult<RecordList> {
        self.get_all_by_where(entity, &Conditions::new(), options)
    }

    pub fn get_all_by_field(
        &self,
        entity: &str,
        field: &str,
        value: impl Into<Value>,
        options: &ListOptions,
    ) -> RepoResult<RecordList> {
        self.get_all_by_where(entity, &Conditions::new().eq(field, value), options)
    }

    pub fn get_all_by_query(
        &self,
        entity: &str,
        sql: &str,
        params: &[StoredValue],
    ) -> RepoResult<Vec<Record>> {
        let entity = self.entity(entity)?;
        let rows = self.run(&entity, || self.storage.execute_all(sql, params))?;
        rows.into_iter()
            .map(|row| self.instantiate(&entity, row))
            .collect()
    }

    /// Loads a declared relationship and attaches it to `record`.
    ///
    /// A null link value leaves the relationship unloaded.
    pub fn load_related(&self, record: &mut Record, relationship: &str) -> RepoResult<()> {
        let entity = Arc::clone(record.entity());
        let descriptor = entity
            .relationship(relationship)
            .ok_or_else(|| RegistryError::FieldNotFound {
                entity: entity.name().to_string(),
                field: relationship.to_string(),
            })?;

        let link = record.get(&descriptor.local_field);
        if link.is_null() {
            return Ok(());
        }

        let related = match descriptor.cardinality {
            Cardinality::OneToOne => {
                match self.get_by_field(&descriptor.target, &descriptor.foreign_field, link, true)? {
                    Some(found) => Related::OneToOne(Box::new(found)),
                    None => return Ok(()),
                }
            }
            Cardinality::OneToMany => Related::OneToMany(
                self.get_all_by_field(
                    &descriptor.target,
                    &descriptor.foreign_field,
                    link,
                    &ListOptions::default(),
                )?
                .into_records(),
            ),
        };
        record.set_related(relationship, related);
        Ok(())
    }

    /// Slugifies `text` and suffixes an incarnation counter until no row
    /// holds the candidate handle.
    pub fn unique_handle(
        &self,
        entity: &str,
        text: &str,
        options: &HandleOptions,
    ) -> RepoResult<String> {
        let descriptor = self.entity(entity)?;
        let field = options
            .handle_field
            .clone()
            .unwrap_or_else(|| descriptor.handle_field().to_string());
        descriptor.require_field(&field)?;

        let slug = slugify(text);
        let mut incarnation = 0;
        loop {
            incarnation += 1;
            let candidate = options.candidate(&slug, incarnation);
            let conditions = options
                .domain_constraints
                .clone()
                .eq(field.as_str(), candidate.as_str());
            if self.get_by_where(entity, &conditions, &Order::new())?.is_none() {
                return Ok(candidate);
            }
        }
    }

    /// Random hex handle of at most 32 characters not held by any row.
    pub fn random_handle(&self, entity: &str, length: usize) -> RepoResult<String> {
        let descriptor = self.entity(entity)?;
        let field = descriptor.require_field(descriptor.handle_field())?.name.clone();
        let length = length.clamp(1, RANDOM_HANDLE_MAX_LEN);
        loop {
            let candidate: String = Uuid::new_v4().simple().to_string().chars().take(length).collect();
            if self
                .get_by_field(entity, &field, Value::text(candidate.as_str()), false)?
                .is_none()
            {
                return Ok(candidate);
            }
        }
    }

    pub fn delete_by_id(&self, entity: &str, id: impl Into<Value>) -> RepoResult<bool> {
        match self.get_by_id(entity, id.into())? {
            Some(mut record) => self.destroy(&mut record),
            None => Ok(false),
        }
    }

    /// History rows for one record, oldest revision first.
    ///
    /// Unversioned types have no revisions.
    pub fn get_revisions(&self, entity: &str, id: impl Into<Value>) -> RepoResult<Vec<Record>> {
        let entity = self.entity(entity)?;
        let Some(history_table) = entity.history_table() else {
            return Ok(Vec::new());
        };
        let predicates = build_conditions(
            &entity,
            &Conditions::new().eq(entity.primary_key().name.as_str(), id),
            self.storage,
        )?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} ORDER BY {} ASC",
            quote_ident(history_table),
            join_predicates(&predicates),
            quote_ident(REVISION_ID_FIELD)
        );
        let rows = self.run(&entity, || self.storage.execute_all(&sql, &[]))?;
        rows.into_iter()
            .map(|row| self.instantiate(&entity, row))
            .collect()
    }

    fn entity(&self, name: &str) -> RepoResult<Arc<EntityType>> {
        Ok(self.registry.describe(name)?)
    }

    fn instantiate(&self, base: &Arc<EntityType>, row: Row) -> RepoResult<Record> {
        let concrete = self.registry.resolve_row_type(base, &row)?;
        Ok(Record::from_row(concrete, row))
    }

    /// Runs `op`, creating the schema and retrying once on a missing table.
    fn run<T>(&self, entity: &EntityType, op: impl Fn() -> StorageResult<T>) -> RepoResult<T> {
        match op() {
            Err(err) if err.is_schema_missing() && self.registry.config().auto_create_tables => {
                warn!(
                    "event=schema_missing module=repo status=retry entity={} table={}",
                    entity.name(),
                    entity.table()
                );
                self.create_tables(entity)?;
                op().map_err(RepoError::from)
            }
            result => result.map_err(RepoError::from),
        }
    }

    fn invalidate_cache(&self, entity: &EntityType) {
        for field in entity.live_fields().filter(|field| field.is_cache_key()) {
            self.cache
                .invalidate(&RecordCache::coarse_key(entity.table(), &field.name));
        }
    }

    fn key_predicate(&self, entity: &EntityType, key: &StoredValue) -> String {
        format!(
            "{} = {}",
            quote_ident(&entity.primary_key().column),
            render_value(key, entity.primary_key().kind, self.storage)
        )
    }

    fn insert(&self, entity: &EntityType, record: &mut Record) -> RepoResult<()> {
        let projection = record.write_projection();
        let table = quote_ident(entity.table());
        let sql = if projection.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let (columns, values): (Vec<String>, Vec<String>) = projection
                .iter()
                .map(|(column, value)| {
                    (
                        quote_ident(column),
                        render_value(value, entity.column_kind(column), self.storage),
                    )
                })
                .unzip();
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                values.join(", ")
            )
        };

        self.run(entity, || self.storage.execute_non_query(&sql, &[]))?;
        record.mark_inserted(Some(self.storage.last_insert_id()));
        Ok(())
    }

    fn update(
        &self,
        entity: &EntityType,
        record: &mut Record,
        projection: &[(String, StoredValue)],
    ) -> RepoResult<()> {
        let assignments = projection
            .iter()
            .map(|(column, value)| {
                format!(
                    "{} = {}",
                    quote_ident(column),
                    render_value(value, entity.column_kind(column), self.storage)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE {}",
            quote_ident(entity.table()),
            self.key_predicate(entity, &record.primary_key_value())
        );

        self.run(entity, || self.storage.execute_non_query(&sql, &[]))?;
        record.mark_updated();
        Ok(())
    }

    fn write_snapshot(
        &self,
        entity: &EntityType,
        projection: &[(String, StoredValue)],
    ) -> RepoResult<()> {
        let Some(sql) = history::snapshot_statement(entity, projection, self.actor, self.storage)
        else {
            return Ok(());
        };
        self.run(entity, || self.storage.execute_non_query(&sql, &[]))?;
        debug!(
            "event=history_snapshot module=repo status=ok entity={} columns={}",
            entity.name(),
            projection.len()
        );
        Ok(())
    }
}

impl RecordRepository for StorageRecordRepository<'_> {
    fn registry(&self) -> &EntityRegistry {
        self.registry
    }

    fn save(&self, record: &mut Record) -> RepoResult<()> {
        let entity = Arc::clone(record.entity());
        if record.is_destroyed() {
            return Err(RepoError::Destroyed {
                entity: entity.name().to_string(),
            });
        }
        let started_at = Instant::now();

        for hook in entity.before_save_hooks() {
            (hook.as_ref())(record);
        }
        record.stamp_created();

        if !record.validate(true) {
            warn!(
                "event=record_save module=repo status=error entity={} reason=invalid errors={}",
                entity.name(),
                record.validation_errors().len()
            );
            return Err(RepoError::InvalidRecord {
                entity: entity.name().to_string(),
                errors: record.validation_errors().clone(),
            });
        }

        self.invalidate_cache(&entity);

        if record.is_dirty() {
            let snapshots = entity
                .versioning()
                .filter(|config| config.revision_on_save)
                .map(|config| config.timing);

            let mode = if record.is_phantom() {
                self.insert(&entity, record)?;
                "insert"
            } else {
                let projection = record.write_projection();
                if projection.is_empty() {
                    "noop"
                } else {
                    if snapshots == Some(SnapshotTiming::BeforeWrite) {
                        self.write_snapshot(&entity, &record.previous_projection())?;
                    }
                    self.update(&entity, record, &projection)?;
                    "update"
                }
            };

            if snapshots == Some(SnapshotTiming::AfterWrite) && mode != "noop" {
                if let Err(err) = self.write_snapshot(&entity, &record.full_projection()) {
                    error!(
                        "event=record_save module=repo status=error entity={} mode={} stage=history error={}",
                        entity.name(),
                        mode,
                        err
                    );
                    return Err(err);
                }
            }
            info!(
                "event=record_save module=repo status=ok entity={} mode={} duration_ms={}",
                entity.name(),
                mode,
                started_at.elapsed().as_millis()
            );
        } else {
            debug!(
                "event=record_save module=repo status=skip entity={} reason=clean",
                entity.name()
            );
        }

        for hook in entity.after_save_hooks() {
            (hook.as_ref())(record);
        }
        Ok(())
    }

    fn destroy(&self, record: &mut Record) -> RepoResult<bool> {
        let entity = Arc::clone(record.entity());
        if record.is_destroyed() {
            return Err(RepoError::Destroyed {
                entity: entity.name().to_string(),
            });
        }
        if record.is_phantom() {
            return Ok(false);
        }

        let key = self.key_predicate(&entity, &record.primary_key_value());
        if entity
            .versioning()
            .is_some_and(|config| config.revision_on_destroy)
        {
            // A row that is already gone gets no revision.
            let exists_sql = format!("SELECT 1 FROM {} WHERE {key}", quote_ident(entity.table()));
            if self
                .run(&entity, || self.storage.execute_one(&exists_sql, &[]))?
                .is_none()
            {
                info!(
                    "event=record_destroy module=repo status=skip entity={} affected=0",
                    entity.name()
                );
                return Ok(false);
            }
            self.write_snapshot(&entity, &record.full_projection())?;
        }

        self.invalidate_cache(&entity);
        let sql = format!("DELETE FROM {} WHERE {key}", quote_ident(entity.table()));
        let affected = self.run(&entity, || self.storage.execute_non_query(&sql, &[]))?;
        if affected > 0 {
            record.mark_destroyed();
        }
        info!(
            "event=record_destroy module=repo status={} entity={} affected={}",
            if affected > 0 { "ok" } else { "skip" },
            entity.name(),
            affected
        );
        Ok(affected > 0)
    }

    fn get_by_id(&self, entity: &str, id: Value) -> RepoResult<Option<Record>> {
        let primary_key = self.entity(entity)?.primary_key().name.clone();
        self.get_by_field(entity, &primary_key, id, true)
    }

    fn get_by_field(
        &self,
        entity: &str,
        field: &str,
        value: Value,
        cacheable: bool,
    ) -> RepoResult<Option<Record>> {
        let entity = self.entity(entity)?;
        let descriptor = entity.require_field(field)?;
        let cache_key = (cacheable
            && descriptor.is_cache_key()
            && self.registry.config().cache_enabled
            && !value.is_null())
        .then(|| RecordCache::point_key(entity.table(), &descriptor.name, &value.to_text()));

        let predicates = build_conditions(&entity, &Conditions::new().eq(field, value), self.storage)?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} LIMIT 1",
            quote_ident(entity.table()),
            join_predicates(&predicates)
        );
        let load = || self.run(&entity, || self.storage.execute_one(&sql, &[]));

        let row = match cache_key {
            Some(key) => self.cache.get_cached(&key, load)?,
            None => load()?,
        };
        row.map(|row| self.instantiate(&entity, row)).transpose()
    }

    fn get_by_handle(&self, entity: &str, handle: &str) -> RepoResult<Option<Record>> {
        let descriptor = self.entity(entity)?;
        let handle_field = descriptor.handle_field();
        if descriptor.has_field(handle_field) {
            if let Some(found) =
                self.get_by_field(entity, handle_field, Value::text(handle), false)?
            {
                return Ok(Some(found));
            }
        }
        self.get_by_id(entity, Value::text(handle))
    }

    fn get_all_by_where(
        &self,
        entity: &str,
        conditions: &Conditions,
        options: &ListOptions,
    ) -> RepoResult<RecordList> {
        let entity = self.entity(entity)?;
        let mut query = SelectQuery::for_entity(&entity);
        query.conditions = build_conditions(&entity, conditions, self.storage)?;
        query.having = build_conditions(&entity, &options.having, self.storage)?;
        query.order = build_order(&entity, &options.order)?;
        query.extra_columns = options.extra_columns.clone();
        query.limit = options.limit;
        query.offset = options.offset;
        query.calc_found_rows = options.wants_found_rows();
        let sql = query.to_sql();

        let (rows, keys) = match &options.index_field {
            Some(field) => {
                let column = entity.column_name(field)?.to_string();
                let indexed =
                    self.run(&entity, || self.storage.execute_indexed(&column, &sql, &[]))?;
                let (keys, rows): (Vec<String>, Vec<Row>) = indexed.into_iter().unzip();
                (rows, Some(keys))
            }
            None => (self.run(&entity, || self.storage.execute_all(&sql, &[]))?, None),
        };
        let found_rows = if query.calc_found_rows {
            self.storage.found_row_count()
        } else {
            None
        };

        let records = rows
            .into_iter()
            .map(|row| self.instantiate(&entity, row))
            .collect::<RepoResult<Vec<_>>>()?;
        debug!(
            "event=record_list module=repo status=ok entity={} count={}",
            entity.name(),
            records.len()
        );
        Ok(RecordList {
            records,
            keys,
            found_rows,
        })
    }
}
