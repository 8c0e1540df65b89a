//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `recordkit_core` linkage.
//! - Exercise one register/save/load/destroy cycle against an in-memory
//!   store and keep output deterministic for quick local sanity checks.

use recordkit_core::{
    init_logging, open_db_in_memory, EngineConfig, EntityDefinition, EntityRegistry, FieldSpec,
    FieldType, LoggingConfig, RecordCache, RecordService, SqliteStorage, StorageRecordRepository,
    Validator,
};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("recordkit smoke failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("recordkit_core ping={}", recordkit_core::ping());
    println!("recordkit_core version={}", recordkit_core::core_version());

    init_logging(&LoggingConfig::default().with_level("warn"))?;

    let registry = EntityRegistry::new(EngineConfig::default());
    registry.register(
        EntityDefinition::with_standard_fields("Person")
            .table("people")
            .field(FieldSpec::named("Handle").unique())
            .field(FieldSpec::named("Name"))
            .field(FieldSpec::typed("Tags", FieldType::List).nullable())
            .validator(Validator::string_length("Name", Some(1), Some(80))),
    )?;

    let storage = SqliteStorage::new(open_db_in_memory()?);
    let cache = RecordCache::new();
    let service = RecordService::new(StorageRecordRepository::new(&storage, &registry, &cache));

    let mut person = service.create_default("Person")?;
    service.apply_fields(
        &mut person,
        [("Handle", "ada"), ("Name", "Ada Lovelace"), ("Tags", "math,engines")],
    );
    service.save(&mut person)?;
    println!("saved id={:?} is_new={}", person.id(), person.is_new());

    let loaded = service.require_by_handle("Person", "ada")?;
    println!(
        "loaded name={} tags={}",
        loaded.get("Name").to_text(),
        loaded.get("Tags").to_text()
    );

    let mut loaded = loaded;
    let removed = service.destroy(&mut loaded)?;
    println!("destroyed={removed}");
    Ok(())
}
