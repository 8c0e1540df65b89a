//! Controller-facing services.
//!
//! # Responsibility
//! - Expose the CRUD surface a dispatch layer drives.
//! - Keep transport, routing and access policy out of the engine.

pub mod record_service;

pub use record_service::RecordService;
