mod common;

use treeplex::capability::{CapabilityGroup, CapabilityLevel, Operation, search_level};
use treeplex::error::Degradation;
use treeplex::probe::{FallbackStrategy, SchemaFeature};
use treeplex::schema::FeatureStatus;

const LEVELS: [CapabilityLevel; 5] = [
    CapabilityLevel::None,
    CapabilityLevel::Basic,
    CapabilityLevel::Standard,
    CapabilityLevel::Enhanced,
    CapabilityLevel::Full,
];

#[test]
fn missing_trigram_support_falls_back_to_a_plain_index() {
    let manager = common::manager_without(&["fts5"]);
    let database = manager.create_tenant("Smith", None).expect("tenant");
    let capabilities = database.capabilities();

    assert_eq!(capabilities.level(CapabilityGroup::Search), CapabilityLevel::Basic);
    assert_eq!(
        database.report().status(SchemaFeature::NameSearchIndex),
        Some(FeatureStatus::Downgraded(FallbackStrategy::PlainIndex))
    );
    let session = database.connection().session();
    assert!(session.object_exists("idx_person_surname").expect("catalog"));
    assert!(!session.object_exists("search_index").expect("catalog"));
    assert!(capabilities.report().issues.iter().any(|issue| matches!(
        issue,
        Degradation::ExtensionUnavailable { extension, .. } if extension == "fts5"
    )));

    // exact search still works on the fallback
    let search = capabilities.get_search_api().expect("basic search");
    assert!(!capabilities.supports(Operation::FuzzySearch));
    assert!(capabilities.supports(Operation::ExactSearch));
    database
        .connection()
        .save(&common::person("I1", "Anna", "Smith"))
        .expect("save");
    let hits = search.search("smith", Default::default(), 10).expect("search");
    assert_eq!(hits.len(), 1);

    let report = capabilities.get_all_capabilities();
    let json = serde_json::to_value(&report).expect("json");
    assert_eq!(json["groups"][0]["group"], "search");
    assert_eq!(json["groups"][0]["level"], "basic");
}

#[test]
fn default_session_is_at_least_enhanced() {
    let manager = common::memory_manager();
    let database = manager.create_tenant("Jones", None).expect("tenant");
    let capabilities = database.capabilities();
    assert!(capabilities.get_capability_level() >= CapabilityLevel::Enhanced);
    assert!(capabilities.level(CapabilityGroup::Search) >= CapabilityLevel::Enhanced);
    assert!(capabilities.has_vector_capability());
    assert!(capabilities.has_graph_capability());
    assert!(capabilities.get_vector_api().is_some());
    assert!(capabilities.get_graph_api().is_some());
    assert!(capabilities.supports(Operation::SimilaritySearch));
    assert!(capabilities.supports(Operation::CommonAncestors));
    // vector was created by provisioning, not found pre-installed
    let vector = database
        .report()
        .extensions
        .iter()
        .find(|record| record.name == "vector")
        .expect("vector record");
    assert!(vector.installed);
}

#[test]
fn without_soundex_phonetic_search_is_refused() {
    let manager = common::manager_without(&["soundex"]);
    let database = manager.create_tenant("Brown", None).expect("tenant");
    let capabilities = database.capabilities();
    assert_eq!(capabilities.level(CapabilityGroup::Search), CapabilityLevel::Enhanced);
    assert_eq!(capabilities.get_capability_level(), CapabilityLevel::Enhanced);
    assert!(!capabilities.supports(Operation::PhoneticSearch));
}

#[test]
fn nothing_optional_leaves_basic_search_only() {
    let manager = common::manager_without(&["fts5", "soundex", "vector", "json1"]);
    let database = manager.create_tenant("Bare", None).expect("tenant");
    let capabilities = database.capabilities();
    assert_eq!(capabilities.get_capability_level(), CapabilityLevel::Basic);
    assert!(capabilities.has_search_capability());
    assert!(!capabilities.has_vector_capability());
    assert!(!capabilities.has_graph_capability());
    assert!(capabilities.get_vector_api().is_none());
    assert!(capabilities.get_graph_api().is_none());
    assert_eq!(capabilities.report().issues.len(), 4);
    assert!(
        !database
            .connection()
            .table_exists(treeplex::tables::LogicalTable::Embedding)
            .expect("catalog")
    );
}

#[test]
fn aggregate_tiers() {
    use CapabilityLevel::*;
    assert_eq!(CapabilityLevel::aggregate(&[None, None, None]), None);
    assert_eq!(CapabilityLevel::aggregate(&[Basic, None, None]), Basic);
    assert_eq!(CapabilityLevel::aggregate(&[Full, Full, None]), Standard);
    assert_eq!(CapabilityLevel::aggregate(&[Basic, Full, Full]), Enhanced);
    assert_eq!(CapabilityLevel::aggregate(&[Full, Full, Full]), Full);
}

#[test]
fn raising_any_group_never_lowers_the_aggregate() {
    for a in LEVELS {
        for b in LEVELS {
            for c in LEVELS {
                let base = CapabilityLevel::aggregate(&[a, b, c]);
                for raised in LEVELS.into_iter().filter(|level| *level >= a) {
                    assert!(
                        CapabilityLevel::aggregate(&[raised, b, c]) >= base,
                        "{:?} -> {:?} with {:?} {:?}",
                        a,
                        raised,
                        b,
                        c
                    );
                }
            }
        }
    }
}

#[test]
fn search_tiers_follow_the_features() {
    assert_eq!(search_level(true, true), CapabilityLevel::Full);
    assert_eq!(search_level(true, false), CapabilityLevel::Enhanced);
    assert_eq!(search_level(false, true), CapabilityLevel::Basic);
    assert_eq!(search_level(false, false), CapabilityLevel::Basic);
}
