//! The capability surface a tenant exposes, derived from what provisioning
//! managed to build.
//!
//! Callers check `has_*_capability()` or match on `get_*_api()`; a handle
//! that is returned never falls back to a weaker mode on its own.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::Settings;
use crate::error::Degradation;
use crate::graph::GraphApi;
use crate::persist::TenantConnection;
use crate::probe::{ExtensionRecord, SchemaFeature};
use crate::schema::ProvisioningReport;
use crate::search::{Embedder, SearchApi};
use crate::vector::VectorApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityLevel {
    None,
    Basic,
    Standard,
    Enhanced,
    Full,
}

impl CapabilityLevel {
    /// Overall level from the per-group levels. `Full` is every group's
    /// richest tier.
    pub fn aggregate(levels: &[CapabilityLevel]) -> CapabilityLevel {
        let available = levels.iter().filter(|level| **level > CapabilityLevel::None).count();
        match available {
            0 => CapabilityLevel::None,
            n if n == levels.len() && levels.iter().all(|level| *level == CapabilityLevel::Full) => {
                CapabilityLevel::Full
            }
            n if n == levels.len() => CapabilityLevel::Enhanced,
            1 => CapabilityLevel::Basic,
            _ => CapabilityLevel::Standard,
        }
    }
}

impl fmt::Display for CapabilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CapabilityLevel::None => "none",
            CapabilityLevel::Basic => "basic",
            CapabilityLevel::Standard => "standard",
            CapabilityLevel::Enhanced => "enhanced",
            CapabilityLevel::Full => "full",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityGroup {
    Search,
    Vector,
    Graph,
}

impl CapabilityGroup {
    pub const ALL: [CapabilityGroup; 3] = [CapabilityGroup::Search, CapabilityGroup::Vector, CapabilityGroup::Graph];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ExactSearch,
    FuzzySearch,
    PhoneticSearch,
    SemanticSearch,
    StoreEmbedding,
    SimilaritySearch,
    RelationshipPaths,
    CommonAncestors,
    NearestRelationship,
    PedigreeCollapse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityDescriptor {
    pub group: CapabilityGroup,
    pub level: CapabilityLevel,
    pub operations: BTreeSet<Operation>,
}

impl CapabilityDescriptor {
    pub fn supports(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityReport {
    pub level: CapabilityLevel,
    pub groups: Vec<CapabilityDescriptor>,
    pub extensions: Vec<ExtensionRecord>,
    pub degradations: Vec<Degradation>,
}

/// Search level from the features that back it.
pub fn search_level(name_index: bool, phonetic: bool) -> CapabilityLevel {
    match (name_index, phonetic) {
        (true, true) => CapabilityLevel::Full,
        (true, false) => CapabilityLevel::Enhanced,
        (false, _) => CapabilityLevel::Basic,
    }
}

#[derive(Clone)]
pub struct CapabilityRegistry {
    report: ProvisioningReport,
    descriptors: Vec<CapabilityDescriptor>,
    search: SearchApi,
    vector: Option<VectorApi>,
    graph: Option<GraphApi>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("descriptors", &self.descriptors)
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new(connection: &TenantConnection, report: &ProvisioningReport, settings: &Settings) -> Self {
        let name_index = report.is_enhanced(SchemaFeature::NameSearchIndex);
        let phonetic = report.is_enhanced(SchemaFeature::PhoneticMatching);
        let search = SearchApi::new(connection.clone(), settings.search.clone())
            .with_fuzzy(name_index)
            .with_phonetic(phonetic);
        let vector = report
            .is_enhanced(SchemaFeature::EmbeddingStore)
            .then(|| VectorApi::new(connection.clone()));
        let graph = report
            .is_enhanced(SchemaFeature::LineageView)
            .then(|| GraphApi::new(connection.clone(), settings.graph.clone()));
        let mut registry = Self {
            report: report.clone(),
            descriptors: Vec::new(),
            search,
            vector,
            graph,
        };
        registry.describe();
        registry
    }

    /// Enables semantic search when the vector capability is present.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        if let Some(vector) = &self.vector {
            self.search = self.search.with_semantic(vector.clone(), embedder);
            self.describe();
        }
        self
    }

    fn describe(&mut self) {
        let name_index = self.report.is_enhanced(SchemaFeature::NameSearchIndex);
        let phonetic = self.report.is_enhanced(SchemaFeature::PhoneticMatching);

        let mut search_ops = BTreeSet::from([Operation::ExactSearch]);
        if name_index {
            search_ops.insert(Operation::FuzzySearch);
        }
        if phonetic {
            search_ops.insert(Operation::PhoneticSearch);
        }
        if self.search.supports(crate::search::SearchMode::Semantic) {
            search_ops.insert(Operation::SemanticSearch);
        }
        let (vector_level, vector_ops) = match self.vector {
            Some(_) => (
                CapabilityLevel::Full,
                BTreeSet::from([Operation::StoreEmbedding, Operation::SimilaritySearch]),
            ),
            None => (CapabilityLevel::None, BTreeSet::new()),
        };
        let (graph_level, graph_ops) = match self.graph {
            Some(_) => (
                CapabilityLevel::Full,
                BTreeSet::from([
                    Operation::RelationshipPaths,
                    Operation::CommonAncestors,
                    Operation::NearestRelationship,
                    Operation::PedigreeCollapse,
                ]),
            ),
            None => (CapabilityLevel::None, BTreeSet::new()),
        };
        self.descriptors = vec![
            CapabilityDescriptor {
                group: CapabilityGroup::Search,
                level: search_level(name_index, phonetic),
                operations: search_ops,
            },
            CapabilityDescriptor {
                group: CapabilityGroup::Vector,
                level: vector_level,
                operations: vector_ops,
            },
            CapabilityDescriptor {
                group: CapabilityGroup::Graph,
                level: graph_level,
                operations: graph_ops,
            },
        ];
    }

    pub fn descriptor(&self, group: CapabilityGroup) -> Option<&CapabilityDescriptor> {
        self.descriptors.iter().find(|d| d.group == group)
    }

    pub fn level(&self, group: CapabilityGroup) -> CapabilityLevel {
        self.descriptor(group).map_or(CapabilityLevel::None, |d| d.level)
    }

    pub fn has_search_capability(&self) -> bool {
        self.level(CapabilityGroup::Search) > CapabilityLevel::None
    }
    pub fn has_vector_capability(&self) -> bool {
        self.vector.is_some()
    }
    pub fn has_graph_capability(&self) -> bool {
        self.graph.is_some()
    }

    pub fn get_search_api(&self) -> Option<&SearchApi> {
        self.has_search_capability().then_some(&self.search)
    }
    pub fn get_vector_api(&self) -> Option<&VectorApi> {
        self.vector.as_ref()
    }
    pub fn get_graph_api(&self) -> Option<&GraphApi> {
        self.graph.as_ref()
    }

    pub fn supports(&self, operation: Operation) -> bool {
        self.descriptors.iter().any(|d| d.supports(operation))
    }

    pub fn get_capability_level(&self) -> CapabilityLevel {
        let levels: Vec<CapabilityLevel> = self.descriptors.iter().map(|d| d.level).collect();
        CapabilityLevel::aggregate(&levels)
    }

    pub fn get_all_capabilities(&self) -> CapabilityReport {
        CapabilityReport {
            level: self.get_capability_level(),
            groups: self.descriptors.clone(),
            extensions: self.report.extensions.clone(),
            degradations: self.report.issues.clone(),
        }
    }

    pub fn report(&self) -> &ProvisioningReport {
        &self.report
    }
}
