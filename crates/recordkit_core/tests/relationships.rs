use recordkit_core::db::open_db_in_memory;
use recordkit_core::{
    EngineConfig, EntityDefinition, EntityRegistry, FieldSpec, FieldType, Record, RecordCache,
    RecordRepository, Related, RelationshipDescriptor, RepoError, SqliteStorage,
    StorageRecordRepository, Validator, Value,
};

fn registry() -> EntityRegistry {
    let registry = EntityRegistry::new(EngineConfig::default());
    registry
        .register(
            EntityDefinition::with_standard_fields("Member")
                .table("members")
                .field(FieldSpec::named("Name"))
                .field(FieldSpec::typed("TeamID", FieldType::Integer).nullable())
                .validator(Validator::string("Name")),
        )
        .unwrap();
    registry
        .register(
            EntityDefinition::with_standard_fields("Team")
                .table("teams")
                .field(FieldSpec::named("Name"))
                .field(FieldSpec::typed("LeadID", FieldType::Integer).nullable())
                .relationship(RelationshipDescriptor::one_to_many("Members", "Member", "TeamID"))
                .relationship(RelationshipDescriptor::one_to_one("Lead", "Member", "LeadID")),
        )
        .unwrap();
    registry
}

fn storage() -> SqliteStorage {
    SqliteStorage::new(open_db_in_memory().unwrap())
}

fn save_member(
    repo: &StorageRecordRepository<'_>,
    registry: &EntityRegistry,
    name: &str,
    team_id: i64,
) -> Record {
    let mut member = Record::new(registry.describe("Member").unwrap());
    member.set("Name", name);
    member.set("TeamID", team_id);
    repo.save(&mut member).unwrap();
    member
}

/// Saves a team with two members and the first one as lead.
fn seed(repo: &StorageRecordRepository<'_>, registry: &EntityRegistry) -> i64 {
    let mut team = Record::new(registry.describe("Team").unwrap());
    team.set("Name", "Core");
    repo.save(&mut team).unwrap();
    let team_id = team.id().unwrap();

    let lead = save_member(repo, registry, "Ada", team_id);
    save_member(repo, registry, "Bea", team_id);

    team.set("LeadID", lead.id().unwrap());
    repo.save(&mut team).unwrap();
    team_id
}

#[test]
fn load_related_populates_one_to_many_and_one_to_one() {
    let registry = registry();
    let storage = storage();
    let cache = RecordCache::new();
    let repo = StorageRecordRepository::new(&storage, &registry, &cache);
    let team_id = seed(&repo, &registry);

    let mut team = repo.get_by_id("Team", Value::from(team_id)).unwrap().unwrap();
    repo.load_related(&mut team, "Members").unwrap();
    repo.load_related(&mut team, "Lead").unwrap();

    let members = team.related("Members").and_then(Related::as_many).unwrap();
    let mut names: Vec<String> = members.iter().map(|m| m.get("Name").to_text()).collect();
    names.sort();
    assert_eq!(names, ["Ada", "Bea"]);

    let lead = team.related("Lead").and_then(Related::as_one).unwrap();
    assert_eq!(lead.get("Name"), Value::text("Ada"));
}

#[test]
fn null_link_leaves_relationship_unloaded() {
    let registry = registry();
    let storage = storage();
    let cache = RecordCache::new();
    let repo = StorageRecordRepository::new(&storage, &registry, &cache);

    let mut team = Record::new(registry.describe("Team").unwrap());
    team.set("Name", "Solo");
    repo.save(&mut team).unwrap();

    repo.load_related(&mut team, "Lead").unwrap();
    assert!(team.related("Lead").is_none());

    let err = repo.load_related(&mut team, "Sponsors").unwrap_err();
    assert!(matches!(err, RepoError::Registry(_)));
}

#[test]
fn changing_lead_link_drops_the_loaded_lead() {
    let registry = registry();
    let storage = storage();
    let cache = RecordCache::new();
    let repo = StorageRecordRepository::new(&storage, &registry, &cache);
    let team_id = seed(&repo, &registry);

    let mut team = repo.get_by_id("Team", Value::from(team_id)).unwrap().unwrap();
    repo.load_related(&mut team, "Lead").unwrap();
    assert!(team.related("Lead").is_some());

    team.set("LeadID", Value::Null);
    assert!(team.related("Lead").is_none());
}

#[test]
fn deep_validation_nests_dirty_child_errors() {
    let registry = registry();
    let storage = storage();
    let cache = RecordCache::new();
    let repo = StorageRecordRepository::new(&storage, &registry, &cache);
    let team_id = seed(&repo, &registry);

    let mut team = repo.get_by_id("Team", Value::from(team_id)).unwrap().unwrap();
    repo.load_related(&mut team, "Members").unwrap();
    assert!(team.validate(true));

    let mut members = team
        .related("Members")
        .and_then(Related::as_many)
        .unwrap()
        .to_vec();
    members[1].set("Name", "");
    team.set_related("Members", Related::OneToMany(members));

    let mut newcomer = Record::new(registry.describe("Member").unwrap());
    newcomer.set("TeamID", team_id);
    team.set_related("Lead", Related::OneToOne(Box::new(newcomer)));

    assert!(team.validate(false));
    assert!(team.validation_errors().is_empty());

    assert!(!team.validate(true));
    assert!(!team.is_valid());
    assert_eq!(
        team.validation_errors().message("Members.1.Name"),
        Some("Name is required")
    );
    assert!(team.validation_errors().lookup("Members.0").is_none());
    assert_eq!(
        team.validation_errors().message("Lead.Name"),
        Some("Name is required")
    );

    let err = repo.save(&mut team).unwrap_err();
    assert!(err.is_invalid_record());
}

#[test]
fn clean_children_are_not_revalidated() {
    let registry = registry();
    let storage = storage();
    let cache = RecordCache::new();
    let repo = StorageRecordRepository::new(&storage, &registry, &cache);
    let team_id = seed(&repo, &registry);

    storage
        .connection()
        .execute("UPDATE members SET Name = '' WHERE Name = 'Bea'", [])
        .unwrap();

    let mut team = repo.get_by_id("Team", Value::from(team_id)).unwrap().unwrap();
    repo.load_related(&mut team, "Members").unwrap();
    assert!(team.validate(true));
    assert!(team.validation_errors().is_empty());
}
