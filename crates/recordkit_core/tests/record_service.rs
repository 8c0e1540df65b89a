use recordkit_core::db::open_db_in_memory;
use recordkit_core::{
    Conditions, EngineConfig, EntityDefinition, EntityRegistry, FieldSpec, FieldType, ListOptions,
    Order, RecordCache, RecordService, RepoError, SqliteStorage, StorageRecordRepository,
    Validator, Value,
};

fn registry() -> EntityRegistry {
    let registry = EntityRegistry::new(EngineConfig::default());
    registry
        .register(
            EntityDefinition::with_standard_fields("Account")
                .table("accounts")
                .field(FieldSpec::named("Handle").unique())
                .field(FieldSpec::named("Email").unique())
                .field(FieldSpec::typed("Role", FieldType::Enum).values(["member", "admin"]))
                .field(FieldSpec::typed("Credits", FieldType::Integer).default_value(0))
                .validator(Validator::handle("Handle"))
                .validator(Validator::email("Email"))
                .validator(Validator::selection("Role", ["member", "admin"])),
        )
        .unwrap();
    registry
}

fn storage() -> SqliteStorage {
    SqliteStorage::new(open_db_in_memory().unwrap())
}

#[test]
fn create_apply_save_and_load_roundtrip() {
    let registry = registry();
    let storage = storage();
    let cache = RecordCache::new();
    let service = RecordService::new(StorageRecordRepository::new(&storage, &registry, &cache));

    let mut account = service.create_default("Account").unwrap();
    assert!(account.is_phantom());
    let changed = service.apply_fields(
        &mut account,
        [("Handle", "ada"), ("Email", "ada@example.com"), ("Role", "admin")],
    );
    assert_eq!(changed, 3);
    service.save(&mut account).unwrap();

    let by_key = service
        .load_by_primary_key("Account", account.id().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(by_key.get("Email"), Value::text("ada@example.com"));
    assert_eq!(by_key.get("Credits"), Value::Int(0));

    let by_field = service
        .load_by_field("Account", "Email", "ada@example.com", true)
        .unwrap()
        .unwrap();
    assert_eq!(by_field.get("Handle"), Value::text("ada"));

    let by_handle = service.load_by_handle("Account", "ada").unwrap().unwrap();
    assert_eq!(by_handle.id(), account.id());
}

#[test]
fn require_by_handle_reports_not_found() {
    let registry = registry();
    let storage = storage();
    let cache = RecordCache::new();
    let service = RecordService::new(StorageRecordRepository::new(&storage, &registry, &cache));

    let err = service.require_by_handle("Account", "ghost").unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(err, RepoError::NotFound { ref key, .. } if key == "ghost"));
}

#[test]
fn apply_delta_honours_editable_whitelist() {
    let registry = registry();
    let storage = storage();
    let cache = RecordCache::new();
    let service = RecordService::new(StorageRecordRepository::new(&storage, &registry, &cache));

    let mut account = service.create_default("Account").unwrap();
    let changed = service.apply_delta(
        &mut account,
        [("Handle", "bea"), ("Email", "bea@example.com"), ("Role", "admin")],
        &["Handle", "Email"],
    );
    assert_eq!(changed, 2);
    assert_eq!(account.get("Role"), Value::Null);

    let everything = service.apply_delta(&mut account, [("Role", "member")], &[]);
    assert_eq!(everything, 1);
    assert_eq!(account.get("Role"), Value::text("member"));
}

#[test]
fn failed_save_exposes_validation_errors() {
    let registry = registry();
    let storage = storage();
    let cache = RecordCache::new();
    let service = RecordService::new(StorageRecordRepository::new(&storage, &registry, &cache));

    let mut account = service.create_default("Account").unwrap();
    service.apply_fields(&mut account, [("Handle", "9lives"), ("Email", "nope")]);

    let err = service.save(&mut account).unwrap_err();
    assert!(err.is_invalid_record());

    let errors = service.validation_errors(&account);
    assert_eq!(errors.message("Handle"), Some("Handle must be a valid handle"));
    assert_eq!(errors.message("Email"), Some("Email must be a valid email address"));
    assert_eq!(errors.message("Role"), Some("Role is required"));

    let json = serde_json::to_value(errors).unwrap();
    assert_eq!(json["Role"], serde_json::json!("Role is required"));
}

#[test]
fn load_all_by_conditions_with_found_rows_and_destroy() {
    let registry = registry();
    let storage = storage();
    let cache = RecordCache::new();
    let service = RecordService::new(StorageRecordRepository::new(&storage, &registry, &cache));

    for (handle, role) in [("a1", "admin"), ("m1", "member"), ("m2", "member"), ("m3", "member")] {
        let mut account = service.create_default("Account").unwrap();
        let email = format!("{handle}@example.com");
        service.apply_fields(
            &mut account,
            [("Handle", handle), ("Email", email.as_str()), ("Role", role)],
        );
        service.save(&mut account).unwrap();
    }

    let members = service
        .load_all_by_conditions(
            "Account",
            &Conditions::new().eq("Role", "member"),
            &ListOptions::new()
                .order(Order::new().desc("Handle"))
                .limit(2),
        )
        .unwrap();
    let handles: Vec<String> = members.iter().map(|a| a.get("Handle").to_text()).collect();
    assert_eq!(handles, ["m3", "m2"]);
    assert_eq!(members.found_rows, Some(3));

    let no_count = service
        .load_all_by_conditions(
            "Account",
            &Conditions::new(),
            &ListOptions::new().limit(1).calc_found_rows(false),
        )
        .unwrap();
    assert_eq!(no_count.len(), 1);
    assert_eq!(no_count.found_rows, None);

    let mut admin = service.require_by_handle("Account", "a1").unwrap();
    assert!(service.destroy(&mut admin).unwrap());
    assert!(service.load_by_handle("Account", "a1").unwrap().is_none());
}
