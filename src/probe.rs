//! Discovery of the optional database extensions a session actually has.
//!
//! Availability always comes from the catalog; configuration can only switch
//! an extension off. Results are cached per session id.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, warn};

use crate::capability::CapabilityGroup;
use crate::error::{Degradation, Result};
use crate::vector;

/// Why an attempt to create an extension failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionFailure {
    Unsupported(String),
    InsufficientPrivilege(String),
}

impl ExtensionFailure {
    pub fn degradation(&self, extension: &str) -> Degradation {
        match self {
            ExtensionFailure::Unsupported(message) => Degradation::ExtensionUnavailable {
                extension: extension.to_string(),
                message: message.clone(),
            },
            ExtensionFailure::InsufficientPrivilege(message) => Degradation::InsufficientPrivilege {
                extension: extension.to_string(),
                message: message.clone(),
            },
        }
    }
}

/// The database's own record of what it can do.
pub trait ExtensionCatalog {
    /// Identifies the connection; probe results are cached under it.
    fn session_id(&self) -> u64;
    /// The subset of `markers` (module or function names) the catalog lists.
    fn lookup(&self, markers: &[&str]) -> Result<HashSet<String>>;
    /// Whether `create_extension` could succeed for this extension.
    fn can_create(&self, extension: &str) -> bool;
    fn create_extension(&self, extension: &str) -> std::result::Result<(), ExtensionFailure>;
}

/// Schema objects an extension makes possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaFeature {
    NameSearchIndex,
    PhoneticMatching,
    EmbeddingStore,
    LineageView,
}

/// What the schema builder does when a feature's extension is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Plain B-tree indexes on the searched columns.
    PlainIndex,
    /// The feature is not provided at all.
    Omit,
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FallbackStrategy::PlainIndex => write!(f, "plain index"),
            FallbackStrategy::Omit => write!(f, "omitted"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExtensionSpec {
    pub name: &'static str,
    pub marker: &'static str,
    pub group: CapabilityGroup,
    pub feature: SchemaFeature,
    pub fallback: FallbackStrategy,
}

pub const KNOWN_EXTENSIONS: [ExtensionSpec; 4] = [
    ExtensionSpec {
        name: "fts5",
        marker: "fts5",
        group: CapabilityGroup::Search,
        feature: SchemaFeature::NameSearchIndex,
        fallback: FallbackStrategy::PlainIndex,
    },
    ExtensionSpec {
        name: "soundex",
        marker: "soundex",
        group: CapabilityGroup::Search,
        feature: SchemaFeature::PhoneticMatching,
        fallback: FallbackStrategy::Omit,
    },
    ExtensionSpec {
        name: vector::EXTENSION,
        marker: vector::DISTANCE_FUNCTION,
        group: CapabilityGroup::Vector,
        feature: SchemaFeature::EmbeddingStore,
        fallback: FallbackStrategy::Omit,
    },
    ExtensionSpec {
        name: "json1",
        marker: "json_extract",
        group: CapabilityGroup::Graph,
        feature: SchemaFeature::LineageView,
        fallback: FallbackStrategy::Omit,
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionRecord {
    pub name: String,
    pub installed: bool,
    /// Not installed, but the session could create it.
    pub available: bool,
    pub group: CapabilityGroup,
    pub feature: SchemaFeature,
    pub fallback: FallbackStrategy,
}

/// One probe result. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionSet {
    pub session_id: u64,
    pub records: Vec<ExtensionRecord>,
    pub issues: Vec<Degradation>,
}

impl ExtensionSet {
    pub fn get(&self, name: &str) -> Option<&ExtensionRecord> {
        self.records.iter().find(|record| record.name.eq_ignore_ascii_case(name))
    }
    pub fn is_installed(&self, name: &str) -> bool {
        self.get(name).is_some_and(|record| record.installed)
    }
    pub fn enables(&self, feature: SchemaFeature) -> bool {
        self.records
            .iter()
            .any(|record| record.feature == feature && record.installed)
    }
    pub fn creatable(&self) -> impl Iterator<Item = &ExtensionRecord> {
        self.records.iter().filter(|record| !record.installed && record.available)
    }
}

#[derive(Debug, Default)]
pub struct ExtensionProbe {
    disabled: Vec<String>,
    cache: Mutex<HashMap<u64, Arc<ExtensionSet>>>,
}

impl ExtensionProbe {
    pub fn new<I, S>(disabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            disabled: disabled.into_iter().map(Into::into).collect(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn is_disabled(&self, name: &str) -> bool {
        self.disabled.iter().any(|disabled| disabled.eq_ignore_ascii_case(name))
    }

    pub fn probe(&self, catalog: &dyn ExtensionCatalog) -> Result<Arc<ExtensionSet>> {
        let session_id = catalog.session_id();
        if let Some(cached) = self.cache.lock()?.get(&session_id) {
            return Ok(Arc::clone(cached));
        }
        let set = Arc::new(self.discover(catalog));
        // a concurrent probe of the same session may have won; keep the first
        let mut cache = self.cache.lock()?;
        let kept = cache.entry(session_id).or_insert(set);
        Ok(Arc::clone(kept))
    }

    fn discover(&self, catalog: &dyn ExtensionCatalog) -> ExtensionSet {
        let session_id = catalog.session_id();
        let markers: Vec<&str> = KNOWN_EXTENSIONS.iter().map(|spec| spec.marker).collect();
        let mut issues = Vec::new();
        let listed = match catalog.lookup(&markers) {
            Ok(listed) => Some(listed),
            Err(e) => {
                warn!(session = session_id, error = %e, "extension catalog query failed");
                None
            }
        };
        let records = KNOWN_EXTENSIONS
            .iter()
            .map(|spec| {
                let (installed, available) = if self.is_disabled(spec.name) {
                    issues.push(Degradation::ExtensionUnavailable {
                        extension: spec.name.to_string(),
                        message: "disabled by configuration".into(),
                    });
                    (false, false)
                } else if let Some(listed) = &listed {
                    let installed = listed.iter().any(|name| name.eq_ignore_ascii_case(spec.marker));
                    (installed, !installed && catalog.can_create(spec.name))
                } else {
                    issues.push(Degradation::ExtensionUnavailable {
                        extension: spec.name.to_string(),
                        message: "extension catalog could not be queried".into(),
                    });
                    (false, false)
                };
                ExtensionRecord {
                    name: spec.name.to_string(),
                    installed,
                    available,
                    group: spec.group,
                    feature: spec.feature,
                    fallback: spec.fallback,
                }
            })
            .collect::<Vec<_>>();
        debug!(
            session = session_id,
            installed = ?records.iter().filter(|r| r.installed).map(|r| r.name.as_str()).collect::<Vec<_>>(),
            "probed extensions"
        );
        ExtensionSet {
            session_id,
            records,
            issues,
        }
    }

    /// Forgets the cached result for a session. Returns whether one existed.
    pub fn invalidate(&self, session_id: u64) -> Result<bool> {
        Ok(self.cache.lock()?.remove(&session_id).is_some())
    }

    pub fn is_cached(&self, session_id: u64) -> Result<bool> {
        Ok(self.cache.lock()?.contains_key(&session_id))
    }
}
