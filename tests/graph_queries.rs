mod common;

use std::sync::Arc;

use treeplex::graph::{Lineage, NO_RELATIONSHIP, relationship_label};
use treeplex::lifecycle::{LifecycleManager, TenantDatabase};
use treeplex::tenant::StorageMode;

// G1 + G2 -> P1, A1
// P1 + S  -> C
// A1 + B  -> K, K2
// C  + K  -> D
fn family_tree(manager: &LifecycleManager, mode: StorageMode) -> Arc<TenantDatabase> {
    let database = manager.create_tenant("Lineage", Some(mode)).expect("tenant");
    let connection = database.connection();
    for handle in ["G1", "G2", "P1", "A1", "S", "B", "C", "K", "K2", "D"] {
        connection
            .save(&common::person(handle, handle, "Doe"))
            .expect("person");
    }
    for record in [
        common::family("F1", "G1", "G2", &["P1", "A1"]),
        common::family("F2", "P1", "S", &["C"]),
        common::family("F3", "A1", "B", &["K", "K2"]),
        common::family("F4", "C", "K", &["D"]),
    ] {
        connection.save(&record).expect("family");
    }
    database
}

#[test]
fn nearest_relationships() {
    let manager = common::memory_manager();
    let database = family_tree(&manager, StorageMode::Separate);
    let graph = database.capabilities().get_graph_api().expect("graph");
    let label = |a: &str, b: &str| graph.nearest_relationship(a, b).expect("relationship");

    assert_eq!(label("C", "C"), "same person");
    assert_eq!(label("C", "P1"), "parent");
    assert_eq!(label("C", "G1"), "grandparent");
    assert_eq!(label("G1", "D"), "great-grandchild");
    assert_eq!(label("C", "A1"), "aunt/uncle");
    assert_eq!(label("A1", "C"), "niece/nephew");
    assert_eq!(label("K", "K2"), "sibling");
    assert_eq!(label("C", "K2"), "1st cousin");
    assert_eq!(label("D", "K2"), "aunt/uncle");
    assert_eq!(label("P1", "S"), "spouse");
    assert_eq!(label("C", "K"), "spouse");
    assert_eq!(label("S", "B"), NO_RELATIONSHIP);
    assert_eq!(label("C", "nobody"), NO_RELATIONSHIP);
}

#[test]
fn common_ancestors_and_paths() {
    let manager = common::memory_manager();
    let database = family_tree(&manager, StorageMode::Separate);
    let graph = database.capabilities().get_graph_api().expect("graph");

    assert_eq!(graph.common_ancestors(&["C", "K2"], 12).expect("ancestors"), vec!["G1", "G2"]);
    assert_eq!(graph.common_ancestors(&["C", "K2"], 1).expect("ancestors"), Vec::<String>::new());
    assert_eq!(graph.common_ancestors(&["D"], 1).expect("ancestors"), vec!["C", "K"]);

    let paths = graph.relationship_paths("C", "K", 4).expect("paths");
    assert_eq!(
        paths,
        vec![
            vec!["C", "D", "K"],
            vec!["C", "P1", "G1", "A1", "K"],
            vec!["C", "P1", "G2", "A1", "K"],
        ]
    );
    assert_eq!(graph.relationship_paths("C", "K", 2).expect("paths").len(), 1);
    assert_eq!(graph.relationship_paths("C", "C", 4).expect("paths"), vec![vec!["C"]]);
    assert!(graph.relationship_paths("C", "nobody", 4).expect("paths").is_empty());
}

#[test]
fn pedigree_collapse_finds_doubled_ancestors() {
    let manager = common::memory_manager();
    let database = family_tree(&manager, StorageMode::Monolithic);
    let graph = database.capabilities().get_graph_api().expect("graph");

    let collapsed = graph.pedigree_collapse("D", 4).expect("collapse");
    let handles: Vec<&str> = collapsed.iter().map(|a| a.handle.as_str()).collect();
    assert_eq!(handles, vec!["G1", "G2"]);
    assert_eq!(
        collapsed[0].paths,
        vec![vec!["D", "C", "P1", "G1"], vec!["D", "K", "A1", "G1"]]
    );
    // not deep enough to see the shared grandparents twice
    assert!(graph.pedigree_collapse("D", 2).expect("collapse").is_empty());
    assert!(graph.pedigree_collapse("C", 4).expect("collapse").is_empty());
}

#[test]
fn lineage_reflects_later_writes() {
    let manager = common::memory_manager();
    let database = family_tree(&manager, StorageMode::Separate);
    let graph = database.capabilities().get_graph_api().expect("graph");
    assert_eq!(graph.nearest_relationship("S", "B").expect("relationship"), NO_RELATIONSHIP);

    let connection = database.connection();
    connection.save(&common::person("X", "X", "Doe")).expect("person");
    connection
        .save(&common::family("F5", "X", "X2", &["S", "B"]))
        .expect("family");
    assert_eq!(graph.nearest_relationship("S", "B").expect("relationship"), "sibling");
}

#[test]
fn labels() {
    assert_eq!(relationship_label(0, 0), "same person");
    assert_eq!(relationship_label(0, 1), "child");
    assert_eq!(relationship_label(0, 2), "grandchild");
    assert_eq!(relationship_label(0, 4), "great-great-grandchild");
    assert_eq!(relationship_label(3, 0), "great-grandparent");
    assert_eq!(relationship_label(1, 3), "great-niece/nephew");
    assert_eq!(relationship_label(3, 1), "great-aunt/uncle");
    assert_eq!(relationship_label(2, 2), "1st cousin");
    assert_eq!(relationship_label(3, 3), "2nd cousin");
    assert_eq!(relationship_label(2, 3), "1st cousin once removed");
    assert_eq!(relationship_label(4, 2), "1st cousin twice removed");
    assert_eq!(relationship_label(2, 6), "1st cousin 4 times removed");
    assert_eq!(relationship_label(12, 12), "11th cousin");
    assert_eq!(relationship_label(22, 22), "21st cousin");
}

#[test]
fn lineage_without_storage() {
    let mut lineage = Lineage::new();
    lineage.add_parent("child", "mother");
    lineage.add_parent("child", "father");
    lineage.add_parent("child", "mother");
    lineage.add_spouses("mother", "father");
    assert_eq!(lineage.nearest_relationship("mother", "father", 4), "spouse");
    assert_eq!(lineage.nearest_relationship("child", "mother", 4), "parent");
    assert_eq!(lineage.common_ancestors(&["child"], 1), vec!["father", "mother"]);
    assert!(lineage.common_ancestors(&[], 1).is_empty());
    assert_eq!(
        lineage.relationship_paths("mother", "father", 3),
        vec![vec!["mother", "child", "father"]]
    );
}
