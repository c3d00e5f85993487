mod common;

use treeplex::config::Settings;
use treeplex::error::TreeplexError;
use treeplex::lifecycle::LifecycleManager;
use treeplex::tables::LogicalTable;
use treeplex::tenant::{StorageMode, Tenant, TenantId};

fn file_manager(dir: &tempfile::TempDir) -> LifecycleManager {
    let mut settings = Settings::default();
    settings.storage.data_dir = Some(dir.path().to_path_buf());
    LifecycleManager::new(settings).expect("manager")
}

fn count_people(database: &treeplex::lifecycle::TenantDatabase) -> i64 {
    database
        .connection()
        .query_optional("select count(*) from person", [], |row| row.get(0))
        .expect("count")
        .expect("row")
}

#[test]
fn deregistration_keeps_the_database_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = file_manager(&dir);
    let database = manager.create_tenant("Smith Family", Some(StorageMode::Separate)).expect("tenant");
    let id = database.tenant().id().clone();
    assert_eq!(id.as_str(), "smith_family");
    database
        .connection()
        .save(&common::person("I1", "Anna", "Smith"))
        .expect("save");
    let path = manager.storage().database_path(id.as_str()).expect("path");
    assert!(path.exists());

    let tenant = manager.deregister(&id).expect("deregister");
    assert!(path.exists(), "deregistration must not touch storage");
    assert!(manager.storage_exists(&tenant).expect("exists"));
    assert_eq!(manager.orphaned_databases().expect("orphans"), vec!["smith_family".to_string()]);
    assert!(matches!(manager.open_tenant(&id), Err(TreeplexError::TenantNotFound(_))));

    manager.destroy_storage(&tenant).expect("destroy");
    assert!(!path.exists());
    assert!(manager.orphaned_databases().expect("orphans").is_empty());
}

#[test]
fn registered_tenants_cannot_be_destroyed() {
    let manager = common::memory_manager();
    let database = manager.create_tenant("Jones", None).expect("tenant");
    let tenant = database.tenant().clone();
    let result = manager.destroy_storage(&tenant);
    assert!(matches!(result, Err(TreeplexError::TenantStillRegistered(_))));
    assert!(manager.storage_exists(&tenant).expect("exists"));
    assert!(database.connection().table_exists(LogicalTable::Person).expect("catalog"));
}

#[test]
fn identifiers_never_collide_with_leftover_storage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = file_manager(&dir);
    let first = manager.create_tenant("Smith", None).expect("tenant");
    let first_id = first.tenant().id().clone();
    manager.deregister(&first_id).expect("deregister");

    // the old database is still there, so the name must get a new id
    let second = manager.create_tenant("Smith", None).expect("tenant");
    let second_id = second.tenant().id().clone();
    assert_ne!(first_id, second_id);
    assert!(second_id.as_str().starts_with("smith_"));
    assert_eq!(second_id.as_str().len(), "smith_".len() + 8);

    let third = manager.create_tenant("Smith", None).expect("tenant");
    assert_ne!(third.tenant().id(), &second_id);
    assert_eq!(manager.tenants().expect("list").len(), 2);
}

#[test]
fn monolithic_tenants_are_isolated_by_prefix() {
    let manager = common::memory_manager();
    let smith = manager.create_tenant("Smith", Some(StorageMode::Monolithic)).expect("smith");
    let jones = manager.create_tenant("Jones", Some(StorageMode::Monolithic)).expect("jones");
    assert_eq!(smith.tenant().prefix(), Some("smith_"));
    assert_eq!(jones.tenant().prefix(), Some("jones_"));
    assert_eq!(smith.session_id(), jones.session_id());

    smith
        .connection()
        .save(&common::person("I1", "Anna", "Smith"))
        .expect("save");
    smith
        .connection()
        .save(&common::person("I2", "Ben", "Smith"))
        .expect("save");
    jones
        .connection()
        .save(&common::person("I1", "Carl", "Jones"))
        .expect("save");
    assert_eq!(count_people(&smith), 2);
    assert_eq!(count_people(&jones), 1);

    let session = smith.connection().session();
    assert!(session.object_exists("smith_person").expect("catalog"));
    assert!(session.object_exists("jones_person").expect("catalog"));
    assert_eq!(
        manager.rewrite(smith.tenant().id(), "SELECT * FROM person").expect("rewrite"),
        "SELECT * FROM smith_person"
    );

    let tenant = manager.deregister(jones.tenant().id()).expect("deregister");
    manager.destroy_storage(&tenant).expect("destroy");
    assert!(!session.object_exists("jones_person").expect("catalog"));
    assert!(!session.object_exists("jones_parent_link").expect("catalog"));
    assert_eq!(count_people(&smith), 2);
}

#[test]
fn reconnect_renews_the_session_and_keeps_data() {
    let manager = common::memory_manager();
    let database = manager.create_tenant("Brown", None).expect("tenant");
    let id = database.tenant().id().clone();
    database
        .connection()
        .save(&common::person("I1", "Dora", "Brown"))
        .expect("save");
    let old_session = database.session_id();
    assert!(manager.probe().is_cached(old_session).expect("cache"));

    let renewed = manager.reconnect(&id).expect("reconnect");
    assert_ne!(renewed.session_id(), old_session);
    assert!(!manager.probe().is_cached(old_session).expect("cache"));
    assert!(manager.probe().is_cached(renewed.session_id()).expect("cache"));
    assert_eq!(count_people(&renewed), 1);
    assert!(renewed.capabilities().has_vector_capability());
}

#[test]
fn file_reconnect_reprovisions_the_vector_extension() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = file_manager(&dir);
    let database = manager.create_tenant("Green", None).expect("tenant");
    let id = database.tenant().id().clone();
    let vectors = database.capabilities().get_vector_api().expect("vector").clone();
    vectors.store_embedding("I1", "text", &[1.0, 0.0], None).expect("store");

    let renewed = manager.reconnect(&id).expect("reconnect");
    let vectors = renewed.capabilities().get_vector_api().expect("vector");
    let found = vectors.similarity_search(&[1.0, 0.0], "text", 5, 0.5).expect("search");
    assert_eq!(found.len(), 1);
}

#[test]
fn unknown_and_invalid_tenants() {
    let manager = common::memory_manager();
    let id = TenantId::new("nobody").expect("id");
    assert!(matches!(manager.open_tenant(&id), Err(TreeplexError::TenantNotFound(_))));
    assert!(matches!(manager.deregister(&id), Err(TreeplexError::TenantNotFound(_))));
    assert!(matches!(manager.reconnect(&id), Err(TreeplexError::TenantNotFound(_))));
    assert!(matches!(manager.create_tenant("  ", None), Err(TreeplexError::InvalidTenant(_))));
    assert!(TenantId::new("Smith").is_err());
    assert!(TenantId::new("1smith").is_err());
    assert!(Tenant::monolithic(id, "Nobody", "bad prefix").is_err());
}

#[test]
fn slugs_are_valid_identifiers() {
    assert_eq!(TenantId::slug("Smith Family Tree").as_str(), "smith_family_tree");
    assert_eq!(TenantId::slug("  O'Brien -- 1850 ").as_str(), "o_brien_1850");
    assert_eq!(TenantId::slug("1850 census").as_str(), "t_1850_census");
    assert_eq!(TenantId::slug("???").as_str(), "tree");
    let long = TenantId::slug(&"a".repeat(100));
    assert!(TenantId::new(long.as_str()).is_ok());
    assert!(TenantId::new(long.with_suffix("0123abcd").as_str()).is_ok());
}

#[test]
fn open_tenant_reuses_the_open_handle() {
    let manager = common::memory_manager();
    let database = manager.create_tenant("White", None).expect("tenant");
    let again = manager.open_tenant(database.tenant().id()).expect("open");
    assert!(std::sync::Arc::ptr_eq(&database, &again));
}
