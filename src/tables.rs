//! Logical table names, object kinds and the tenant scope that maps one onto
//! the other.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Tables that hold one tenant's data and therefore get a tenant prefix in a
/// shared database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalTable {
    Person,
    Family,
    Event,
    Place,
    Repository,
    Source,
    Citation,
    Media,
    Note,
    Tag,
    Metadata,
    Reference,
    GenderStats,
    SearchIndex,
    Embedding,
}

impl LogicalTable {
    pub const ALL: [LogicalTable; 15] = [
        LogicalTable::Person,
        LogicalTable::Family,
        LogicalTable::Event,
        LogicalTable::Place,
        LogicalTable::Repository,
        LogicalTable::Source,
        LogicalTable::Citation,
        LogicalTable::Media,
        LogicalTable::Note,
        LogicalTable::Tag,
        LogicalTable::Metadata,
        LogicalTable::Reference,
        LogicalTable::GenderStats,
        LogicalTable::SearchIndex,
        LogicalTable::Embedding,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LogicalTable::Person => "person",
            LogicalTable::Family => "family",
            LogicalTable::Event => "event",
            LogicalTable::Place => "place",
            LogicalTable::Repository => "repository",
            LogicalTable::Source => "source",
            LogicalTable::Citation => "citation",
            LogicalTable::Media => "media",
            LogicalTable::Note => "note",
            LogicalTable::Tag => "tag",
            LogicalTable::Metadata => "metadata",
            LogicalTable::Reference => "reference",
            LogicalTable::GenderStats => "gender_stats",
            LogicalTable::SearchIndex => "search_index",
            LogicalTable::Embedding => "embedding",
        }
    }

    pub fn from_name(name: &str) -> Option<LogicalTable> {
        LogicalTable::ALL
            .into_iter()
            .find(|table| table.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for LogicalTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tables every tenant in a shared database reads from the same copy of.
pub const SHARED_TABLES: [&str; 2] = ["name_group", "surname"];

pub fn is_shared(name: &str) -> bool {
    SHARED_TABLES.iter().any(|shared| shared.eq_ignore_ascii_case(name))
}

/// The persisted domain object kinds. Each has exactly one home table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Person,
    Family,
    Event,
    Place,
    Source,
    Citation,
    Repository,
    Media,
    Note,
    Tag,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 10] = [
        ObjectKind::Person,
        ObjectKind::Family,
        ObjectKind::Event,
        ObjectKind::Place,
        ObjectKind::Source,
        ObjectKind::Citation,
        ObjectKind::Repository,
        ObjectKind::Media,
        ObjectKind::Note,
        ObjectKind::Tag,
    ];

    pub fn table(&self) -> LogicalTable {
        match self {
            ObjectKind::Person => LogicalTable::Person,
            ObjectKind::Family => LogicalTable::Family,
            ObjectKind::Event => LogicalTable::Event,
            ObjectKind::Place => LogicalTable::Place,
            ObjectKind::Source => LogicalTable::Source,
            ObjectKind::Citation => LogicalTable::Citation,
            ObjectKind::Repository => LogicalTable::Repository,
            ObjectKind::Media => LogicalTable::Media,
            ObjectKind::Note => LogicalTable::Note,
            ObjectKind::Tag => LogicalTable::Tag,
        }
    }

    pub fn name(&self) -> &'static str {
        self.table().name()
    }

    pub fn from_name(name: &str) -> Option<ObjectKind> {
        ObjectKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The set of table names the rewriter treats as tenant-scoped.
///
/// Names are kept lowercase and matched ASCII case-insensitively. Shared
/// tables are filtered out on construction, so no caller can ask for them to
/// be rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSet {
    names: BTreeSet<String>,
}

impl TableSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|name| name.as_ref().to_ascii_lowercase())
            .filter(|name| !name.is_empty() && !is_shared(name))
            .collect();
        Self { names }
    }

    /// Every [`LogicalTable`].
    pub fn logical() -> Self {
        Self::new(LogicalTable::ALL.iter().map(|table| table.name()))
    }

    pub fn contains(&self, name: &str) -> bool {
        // Avoid allocating for the common case of an already lowercase word.
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            self.names.contains(&name.to_ascii_lowercase())
        } else {
            self.names.contains(name)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for TableSet {
    fn default() -> Self {
        Self::logical()
    }
}

/// How a tenant's logical tables are named physically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantScope {
    /// The tenant owns its database; names are used as is.
    Dedicated,
    /// The tenant shares a database; every logical table carries the prefix.
    Prefixed(String),
}

impl TenantScope {
    pub fn prefix(&self) -> &str {
        match self {
            TenantScope::Dedicated => "",
            TenantScope::Prefixed(prefix) => prefix,
        }
    }

    pub fn table_name(&self, table: LogicalTable) -> String {
        self.object_name(table.name())
    }

    /// Physical name of a tenant-owned auxiliary object (index, trigger, view).
    pub fn object_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix(), name)
    }
}
