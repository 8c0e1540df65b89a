//! Persistence executor and record loaders.
//!
//! # Responsibility
//! - Define the record persistence contract consumed by services.
//! - Orchestrate save/destroy over the `Storage` seam, including hooks,
//!   validation, cache invalidation, history snapshots and schema
//!   auto-create.
//!
//! # Invariants
//! - Invalid records never reach storage.
//! - A schema-missing failure triggers at most one create-and-retry cycle
//!   per statement.
//! - Cache invalidation happens before the corresponding write is issued.

mod error;
mod handle;
mod list;
pub mod record_repo;

pub use error::{RepoError, RepoResult};
pub use handle::HandleOptions;
pub use list::{ListOptions, RecordList};
pub use record_repo::{RecordRepository, StorageRecordRepository};
