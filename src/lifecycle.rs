//! Creating, opening, deregistering and destroying tenants.
//!
//! Deregistration and physical destruction are deliberately separate calls:
//! `deregister` only forgets a tenant, while `destroy_storage` removes its
//! data and refuses to run while the tenant is still registered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{info, instrument, warn};

use crate::capability::CapabilityRegistry;
use crate::config::Settings;
use crate::error::{Result, TreeplexError};
use crate::persist::{Session, SqliteStorage, TenantConnection};
use crate::probe::ExtensionProbe;
use crate::rewrite::RewriteObserver;
use crate::schema::{AdaptiveSchemaBuilder, ProvisioningReport};
use crate::search::Embedder;
use crate::tenant::{MemoryDirectory, StorageMode, Tenant, TenantDirectory, TenantId};

// identifiers tried before giving up on a display name
const MAX_ID_ATTEMPTS: u32 = 16;

/// An open, provisioned tenant.
#[derive(Debug)]
pub struct TenantDatabase {
    tenant: Tenant,
    connection: TenantConnection,
    registry: CapabilityRegistry,
}

impl TenantDatabase {
    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }
    pub fn connection(&self) -> &TenantConnection {
        &self.connection
    }
    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.registry
    }
    pub fn report(&self) -> &ProvisioningReport {
        self.registry.report()
    }
    pub fn session_id(&self) -> u64 {
        self.connection.session().id()
    }
}

pub struct LifecycleManager {
    settings: Settings,
    storage: SqliteStorage,
    directory: Arc<dyn TenantDirectory>,
    probe: ExtensionProbe,
    open: Mutex<HashMap<TenantId, Arc<TenantDatabase>>>,
    observer: Option<RewriteObserver>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl LifecycleManager {
    pub fn new(settings: Settings) -> Result<Self> {
        Self::with_directory(settings, Arc::new(MemoryDirectory::new()))
    }

    pub fn with_directory(settings: Settings, directory: Arc<dyn TenantDirectory>) -> Result<Self> {
        let storage = SqliteStorage::new(
            settings.storage.data_dir.clone(),
            settings.storage.shared_database.clone(),
        )?;
        let probe = ExtensionProbe::new(settings.extensions.disabled.iter().cloned());
        Ok(Self {
            settings,
            storage,
            directory,
            probe,
            open: Mutex::new(HashMap::new()),
            observer: None,
            embedder: None,
        })
    }

    /// Every tenant connection opened from now on reports its rewrite
    /// decisions to `observer`.
    pub fn with_rewrite_observer(mut self, observer: RewriteObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }
    pub fn probe(&self) -> &ExtensionProbe {
        &self.probe
    }

    fn build_tenant(&self, id: TenantId, display_name: &str, mode: StorageMode) -> Result<Tenant> {
        match mode {
            StorageMode::Separate => Ok(Tenant::separate(id, display_name)),
            StorageMode::Monolithic => {
                let prefix = Tenant::default_prefix(&id);
                Tenant::monolithic(id, display_name, prefix)
            }
        }
    }

    fn is_taken(&self, tenant: &Tenant) -> Result<bool> {
        if self.directory.contains(tenant.id())? {
            return Ok(true);
        }
        if let Some(prefix) = tenant.prefix() {
            if self.directory.prefix_owner(prefix)?.is_some() {
                return Ok(true);
            }
        }
        self.storage.exists(tenant)
    }

    // Picks an identifier that is neither registered nor backed by leftover
    // storage. Collisions get a suffix from a blake3 hash of the name.
    fn allocate(&self, display_name: &str, mode: StorageMode) -> Result<Tenant> {
        let slug = TenantId::slug(display_name);
        let candidate = self.build_tenant(slug.clone(), display_name, mode)?;
        if !self.is_taken(&candidate)? {
            return Ok(candidate);
        }
        for attempt in 0..MAX_ID_ATTEMPTS {
            let mut hasher = blake3::Hasher::new();
            hasher.update(display_name.as_bytes());
            hasher.update(&attempt.to_le_bytes());
            let hex = hasher.finalize().to_hex();
            let id = slug.with_suffix(&hex.as_str()[..8]);
            let candidate = self.build_tenant(id, display_name, mode)?;
            if !self.is_taken(&candidate)? {
                return Ok(candidate);
            }
        }
        Err(TreeplexError::TenantConflict(format!(
            "no free identifier for '{}'",
            display_name
        )))
    }

    fn provision(&self, tenant: Tenant, session: Arc<Session>) -> Result<Arc<TenantDatabase>> {
        let mut connection = TenantConnection::new(session, tenant.scope())
            .quoted(self.settings.rewrite.quote_identifiers);
        if let Some(observer) = &self.observer {
            connection = connection.with_observer(Arc::clone(observer));
        }
        let report = AdaptiveSchemaBuilder::new(&self.probe).provision(&connection)?;
        let mut registry = CapabilityRegistry::new(&connection, &report, &self.settings);
        if let Some(embedder) = &self.embedder {
            registry = registry.with_embedder(Arc::clone(embedder));
        }
        Ok(Arc::new(TenantDatabase {
            tenant,
            connection,
            registry,
        }))
    }

    /// Allocates, provisions and registers a new tenant.
    #[instrument(skip(self))]
    pub fn create_tenant(&self, display_name: &str, mode: Option<StorageMode>) -> Result<Arc<TenantDatabase>> {
        if display_name.trim().is_empty() {
            return Err(TreeplexError::InvalidTenant("display name is empty".into()));
        }
        let mode = mode.unwrap_or(self.settings.storage.default_mode);
        let tenant = self.allocate(display_name, mode)?;
        let session = self.storage.session_for(&tenant)?;
        let database = self.provision(tenant.clone(), session)?;
        self.directory.insert(tenant.clone())?;
        self.open.lock()?.insert(tenant.id().clone(), Arc::clone(&database));
        info!(
            tenant = %tenant.id(),
            %mode,
            level = %database.capabilities().get_capability_level(),
            "created tenant"
        );
        Ok(database)
    }

    /// The open handle of a registered tenant, provisioning it on first use.
    pub fn open_tenant(&self, id: &TenantId) -> Result<Arc<TenantDatabase>> {
        if let Some(database) = self.open.lock()?.get(id) {
            return Ok(Arc::clone(database));
        }
        let tenant = self
            .directory
            .get(id)?
            .ok_or_else(|| TreeplexError::TenantNotFound(id.to_string()))?;
        let session = self.storage.session_for(&tenant)?;
        let database = self.provision(tenant, session)?;
        let mut open = self.open.lock()?;
        let kept = open.entry(id.clone()).or_insert(database);
        Ok(Arc::clone(kept))
    }

    /// Replaces the tenant's session and probes its extensions again.
    #[instrument(skip_all, fields(tenant = %id))]
    pub fn reconnect(&self, id: &TenantId) -> Result<Arc<TenantDatabase>> {
        let tenant = self
            .directory
            .get(id)?
            .ok_or_else(|| TreeplexError::TenantNotFound(id.to_string()))?;
        if let Some(previous) = self.open.lock()?.remove(id) {
            self.probe.invalidate(previous.session_id())?;
        }
        let session = self.storage.renew(&tenant)?;
        let database = self.provision(tenant, session)?;
        self.open.lock()?.insert(id.clone(), Arc::clone(&database));
        info!(session = database.session_id(), "reconnected tenant");
        Ok(database)
    }

    /// Forgets a tenant. Its storage stays exactly as it is.
    #[instrument(skip_all, fields(tenant = %id))]
    pub fn deregister(&self, id: &TenantId) -> Result<Tenant> {
        let tenant = self
            .directory
            .remove(id)?
            .ok_or_else(|| TreeplexError::TenantNotFound(id.to_string()))?;
        self.open.lock()?.remove(id);
        info!("deregistered tenant, storage kept");
        Ok(tenant)
    }

    /// Removes a deregistered tenant's data for good.
    #[instrument(skip_all, fields(tenant = %tenant.id()))]
    pub fn destroy_storage(&self, tenant: &Tenant) -> Result<()> {
        if self.directory.contains(tenant.id())? {
            warn!("refusing to destroy storage of a registered tenant");
            return Err(TreeplexError::TenantStillRegistered(tenant.id().to_string()));
        }
        if let Some(session) = self.storage.open_dedicated(tenant)? {
            self.probe.invalidate(session.id())?;
        }
        self.storage.destroy(tenant)
    }

    pub fn storage_exists(&self, tenant: &Tenant) -> Result<bool> {
        self.storage.exists(tenant)
    }

    /// Separate-mode databases in storage that no registered tenant owns.
    pub fn orphaned_databases(&self) -> Result<Vec<String>> {
        let mut orphans = Vec::new();
        for id in self.storage.dedicated_databases()? {
            let registered = match TenantId::new(id.as_str()) {
                Ok(tenant_id) => self.directory.contains(&tenant_id)?,
                Err(_) => false,
            };
            if !registered {
                orphans.push(id);
            }
        }
        Ok(orphans)
    }

    pub fn tenants(&self) -> Result<Vec<Tenant>> {
        self.directory.list()
    }

    /// `sql` as it would run against the tenant's tables.
    pub fn rewrite(&self, id: &TenantId, sql: &str) -> Result<String> {
        Ok(self.open_tenant(id)?.connection().rewrite(sql))
    }
}
