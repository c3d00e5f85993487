//! Tenants and the directory that registers them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use bimap::BiMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeplexError};
use crate::tables::TenantScope;

pub const MAX_ID_LEN: usize = 63;

lazy_static! {
    static ref TENANT_ID: Regex = Regex::new(r"^[a-z][a-z0-9_]{0,62}$").unwrap();
    static ref PREFIX: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// A stable tenant identifier: lowercase, starting with a letter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<TenantId> {
        let id = id.into();
        if TENANT_ID.is_match(&id) {
            Ok(TenantId(id))
        } else {
            Err(TreeplexError::InvalidTenant(format!(
                "'{}' is not a valid tenant identifier",
                id
            )))
        }
    }

    /// Identifier derived from a display name, e.g. `Smith Family Tree`
    /// becomes `smith_family_tree`.
    pub fn slug(display_name: &str) -> TenantId {
        let mut slug = String::new();
        for c in display_name.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.is_empty() && !slug.ends_with('_') {
                slug.push('_');
            }
        }
        let slug = slug.trim_end_matches('_');
        let mut slug = match slug.chars().next() {
            Some(c) if c.is_ascii_lowercase() => slug.to_string(),
            Some(_) => format!("t_{}", slug),
            None => "tree".to_string(),
        };
        slug.truncate(MAX_ID_LEN);
        TenantId(slug.trim_end_matches('_').to_string())
    }

    /// This identifier with a suffix, shortened so the result stays valid.
    pub fn with_suffix(&self, suffix: &str) -> TenantId {
        let room = MAX_ID_LEN.saturating_sub(suffix.len() + 1);
        let mut base = self.0.clone();
        base.truncate(room);
        TenantId(format!("{}_{}", base.trim_end_matches('_'), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TreeplexError;
    fn try_from(id: String) -> Result<Self> {
        TenantId::new(id)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl FromStr for TenantId {
    type Err = TreeplexError;
    fn from_str(s: &str) -> Result<Self> {
        TenantId::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// The tenant owns a database of its own.
    #[default]
    Separate,
    /// The tenant shares a database and its tables carry a prefix.
    Monolithic,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StorageMode::Separate => write!(f, "separate"),
            StorageMode::Monolithic => write!(f, "monolithic"),
        }
    }
}

impl FromStr for StorageMode {
    type Err = TreeplexError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "separate" => Ok(StorageMode::Separate),
            "monolithic" => Ok(StorageMode::Monolithic),
            other => Err(TreeplexError::InvalidArgument(format!("unknown storage mode '{}'", other))),
        }
    }
}

/// One isolated tree. A prefix exists exactly when the mode is monolithic;
/// the two constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tenant {
    id: TenantId,
    display_name: String,
    mode: StorageMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    prefix: Option<String>,
}

impl Tenant {
    pub fn separate(id: TenantId, display_name: impl Into<String>) -> Tenant {
        Tenant {
            id,
            display_name: display_name.into(),
            mode: StorageMode::Separate,
            prefix: None,
        }
    }

    pub fn monolithic(id: TenantId, display_name: impl Into<String>, prefix: impl Into<String>) -> Result<Tenant> {
        let prefix = prefix.into();
        if !PREFIX.is_match(&prefix) {
            return Err(TreeplexError::InvalidTenant(format!(
                "'{}' is not a valid table prefix",
                prefix
            )));
        }
        Ok(Tenant {
            id,
            display_name: display_name.into(),
            mode: StorageMode::Monolithic,
            prefix: Some(prefix),
        })
    }

    /// The conventional prefix for a monolithic tenant.
    pub fn default_prefix(id: &TenantId) -> String {
        format!("{}_", id)
    }

    pub fn id(&self) -> &TenantId {
        &self.id
    }
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
    pub fn mode(&self) -> StorageMode {
        self.mode
    }
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn scope(&self) -> TenantScope {
        match &self.prefix {
            Some(prefix) => TenantScope::Prefixed(prefix.clone()),
            None => TenantScope::Dedicated,
        }
    }
}

/// Registry of known tenants. Registration is bookkeeping only and never
/// creates or removes storage.
pub trait TenantDirectory: Send + Sync {
    fn get(&self, id: &TenantId) -> Result<Option<Tenant>>;
    /// Fails with `TenantConflict` when the id or prefix is taken.
    fn insert(&self, tenant: Tenant) -> Result<()>;
    fn remove(&self, id: &TenantId) -> Result<Option<Tenant>>;
    fn list(&self) -> Result<Vec<Tenant>>;
    fn prefix_owner(&self, prefix: &str) -> Result<Option<TenantId>>;

    fn contains(&self, id: &TenantId) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    tenants: BTreeMap<TenantId, Tenant>,
    prefixes: BiMap<TenantId, String>,
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TenantDirectory for MemoryDirectory {
    fn get(&self, id: &TenantId) -> Result<Option<Tenant>> {
        Ok(self.state.lock()?.tenants.get(id).cloned())
    }

    fn insert(&self, tenant: Tenant) -> Result<()> {
        let mut state = self.state.lock()?;
        if state.tenants.contains_key(tenant.id()) {
            return Err(TreeplexError::TenantConflict(format!("{} is already registered", tenant.id())));
        }
        if let Some(prefix) = tenant.prefix() {
            if let Err((id, prefix)) = state
                .prefixes
                .insert_no_overwrite(tenant.id().clone(), prefix.to_string())
            {
                let owner = state.prefixes.get_by_right(&prefix).cloned();
                return Err(TreeplexError::TenantConflict(match owner {
                    Some(owner) => format!("prefix {} is already used by {}", prefix, owner),
                    None => format!("{} already has a prefix", id),
                }));
            }
        }
        state.tenants.insert(tenant.id().clone(), tenant);
        Ok(())
    }

    fn remove(&self, id: &TenantId) -> Result<Option<Tenant>> {
        let mut state = self.state.lock()?;
        state.prefixes.remove_by_left(id);
        Ok(state.tenants.remove(id))
    }

    fn list(&self) -> Result<Vec<Tenant>> {
        Ok(self.state.lock()?.tenants.values().cloned().collect())
    }

    fn prefix_owner(&self, prefix: &str) -> Result<Option<TenantId>> {
        Ok(self.state.lock()?.prefixes.get_by_right(prefix).cloned())
    }
}
