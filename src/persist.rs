// used for persistence
use rusqlite::{Connection, OptionalExtension, Params, Row};

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::probe::{ExtensionCatalog, ExtensionFailure};
use crate::rewrite::{IdentifierRewriter, RewriteObserver};
use crate::sanitize::{Record, sanitize_record};
use crate::tables::{LogicalTable, TableSet, TenantScope};
use crate::tenant::{StorageMode, Tenant};
use crate::vector;

pub const DATABASE_EXTENSION: &str = "sqlite";

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Memory,
    File(PathBuf),
}

/// One open database connection. Its id keys the extension probe cache, so
/// a reopened database always gets a fresh id.
#[derive(Debug)]
pub struct Session {
    id: u64,
    location: Location,
    connection: Arc<Mutex<Connection>>,
}

impl Session {
    pub fn open(location: Location) -> Result<Session> {
        let connection = match &location {
            Location::Memory => Connection::open_in_memory()?,
            Location::File(path) => Connection::open(path)?,
        };
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        let session = Session {
            id: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            location,
            connection: Arc::new(Mutex::new(connection)),
        };
        debug!(session = session.id, location = ?session.location, "opened session");
        Ok(session)
    }

    /// A new session on the same database. File databases get a new
    /// connection; an in-memory database only lives as long as its
    /// connection, so that one is carried over.
    pub fn renew(&self) -> Result<Session> {
        match &self.location {
            Location::File(_) => Session::open(self.location.clone()),
            Location::Memory => Ok(Session {
                id: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
                location: Location::Memory,
                connection: Arc::clone(&self.connection),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Runs `f` while holding the connection lock.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let connection = self.connection.lock()?;
        Ok(f(&connection)?)
    }

    pub fn object_exists(&self, name: &str) -> Result<bool> {
        self.with_connection(|c| {
            c.query_row(
                "select 1 from sqlite_master where name = ?1 collate nocase",
                [name],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
        })
    }
}

impl ExtensionCatalog for Session {
    fn session_id(&self) -> u64 {
        self.id
    }

    fn lookup(&self, markers: &[&str]) -> Result<HashSet<String>> {
        let listed: Vec<String> = self.with_connection(|c| {
            let mut statement = c.prepare(
                "select name from pragma_module_list
                 union
                 select name from pragma_function_list",
            )?;
            let names = statement.query_map([], |row| row.get::<_, String>(0))?;
            names.collect()
        })?;
        Ok(listed
            .into_iter()
            .filter(|name| markers.iter().any(|marker| marker.eq_ignore_ascii_case(name)))
            .collect())
    }

    fn can_create(&self, extension: &str) -> bool {
        extension.eq_ignore_ascii_case(vector::EXTENSION)
    }

    fn create_extension(&self, extension: &str) -> std::result::Result<(), ExtensionFailure> {
        if !self.can_create(extension) {
            return Err(ExtensionFailure::Unsupported(format!(
                "{} cannot be loaded into this session",
                extension
            )));
        }
        let connection = self
            .connection
            .lock()
            .map_err(|e| ExtensionFailure::Unsupported(e.to_string()))?;
        vector::register_functions(&connection).map_err(|e| ExtensionFailure::Unsupported(e.to_string()))
    }
}

/// A session seen through one tenant's scope. Every statement passes
/// through the identifier rewriter and every record through the sanitizer.
#[derive(Debug, Clone)]
pub struct TenantConnection {
    session: Arc<Session>,
    scope: TenantScope,
    rewriter: IdentifierRewriter,
}

impl TenantConnection {
    pub fn new(session: Arc<Session>, scope: TenantScope) -> Self {
        let rewriter = IdentifierRewriter::new(scope.prefix(), TableSet::logical());
        Self {
            session,
            scope,
            rewriter,
        }
    }
    pub fn quoted(mut self, quote: bool) -> Self {
        self.rewriter = self.rewriter.quoted(quote);
        self
    }
    pub fn with_observer(mut self, observer: RewriteObserver) -> Self {
        self.rewriter = self.rewriter.with_observer(observer);
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
    pub fn scope(&self) -> &TenantScope {
        &self.scope
    }
    pub fn rewrite(&self, sql: &str) -> String {
        self.rewriter.rewrite(sql)
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        let sql = self.rewrite(sql);
        self.session.with_connection(|c| c.execute(&sql, params))
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = self.rewrite(sql);
        self.session.with_connection(|c| c.execute_batch(&sql))
    }

    pub fn query<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let sql = self.rewrite(sql);
        self.session.with_connection(|c| {
            let mut statement = c.prepare(&sql)?;
            let rows = statement.query_map(params, f)?;
            rows.collect()
        })
    }

    pub fn query_optional<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let sql = self.rewrite(sql);
        self.session.with_connection(|c| c.query_row(&sql, params, f).optional())
    }

    /// Sanitizes and upserts a record. Nothing is written if any field is
    /// rejected.
    pub fn save(&self, record: &dyn Record) -> Result<usize> {
        let sanitized = sanitize_record(record)?;
        let sql = self.rewrite(&sanitized.upsert_sql());
        let params = sanitized.params();
        self.session.with_connection(|c| c.execute(&sql, &params[..]))
    }

    pub fn table_exists(&self, table: LogicalTable) -> Result<bool> {
        self.session.object_exists(&self.scope.table_name(table))
    }
}

/// Where tenant databases live: one database per separate tenant and one
/// shared database for every monolithic tenant.
#[derive(Debug)]
pub struct SqliteStorage {
    data_dir: Option<PathBuf>,
    shared_name: String,
    shared: Mutex<Option<Arc<Session>>>,
    dedicated: Mutex<HashMap<String, Arc<Session>>>,
}

impl SqliteStorage {
    pub fn new(data_dir: Option<PathBuf>, shared_name: impl Into<String>) -> Result<Self> {
        if let Some(dir) = &data_dir {
            fs::create_dir_all(dir)?;
        }
        Ok(Self {
            data_dir,
            shared_name: shared_name.into(),
            shared: Mutex::new(None),
            dedicated: Mutex::new(HashMap::new()),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            shared_name: String::new(),
            shared: Mutex::new(None),
            dedicated: Mutex::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub fn database_path(&self, tenant_id: &str) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", tenant_id, DATABASE_EXTENSION)))
    }

    fn shared_location(&self) -> Location {
        match &self.data_dir {
            Some(dir) => Location::File(dir.join(&self.shared_name)),
            None => Location::Memory,
        }
    }

    fn dedicated_location(&self, tenant_id: &str) -> Location {
        match self.database_path(tenant_id) {
            Some(path) => Location::File(path),
            None => Location::Memory,
        }
    }

    pub fn shared_session(&self) -> Result<Arc<Session>> {
        let mut shared = self.shared.lock()?;
        if let Some(session) = shared.as_ref() {
            return Ok(Arc::clone(session));
        }
        let session = Arc::new(Session::open(self.shared_location())?);
        *shared = Some(Arc::clone(&session));
        Ok(session)
    }

    pub fn dedicated_session(&self, tenant_id: &str) -> Result<Arc<Session>> {
        let mut dedicated = self.dedicated.lock()?;
        if let Some(session) = dedicated.get(tenant_id) {
            return Ok(Arc::clone(session));
        }
        let session = Arc::new(Session::open(self.dedicated_location(tenant_id))?);
        dedicated.insert(tenant_id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    /// The separate tenant's session if one is open, without opening one.
    pub fn open_dedicated(&self, tenant: &Tenant) -> Result<Option<Arc<Session>>> {
        match tenant.mode() {
            StorageMode::Separate => Ok(self.dedicated.lock()?.get(tenant.id().as_str()).cloned()),
            StorageMode::Monolithic => Ok(None),
        }
    }

    pub fn session_for(&self, tenant: &Tenant) -> Result<Arc<Session>> {
        match tenant.mode() {
            StorageMode::Separate => self.dedicated_session(tenant.id().as_str()),
            StorageMode::Monolithic => self.shared_session(),
        }
    }

    /// Replaces the tenant's session with a renewed one.
    pub fn renew(&self, tenant: &Tenant) -> Result<Arc<Session>> {
        let current = self.session_for(tenant)?;
        let renewed = Arc::new(current.renew()?);
        match tenant.mode() {
            StorageMode::Separate => {
                self.dedicated
                    .lock()?
                    .insert(tenant.id().as_str().to_string(), Arc::clone(&renewed));
            }
            StorageMode::Monolithic => {
                *self.shared.lock()? = Some(Arc::clone(&renewed));
            }
        }
        debug!(tenant = %tenant.id(), old = current.id(), new = renewed.id(), "renewed session");
        Ok(renewed)
    }

    /// Whether the tenant has physical storage, registered or not.
    pub fn exists(&self, tenant: &Tenant) -> Result<bool> {
        match tenant.mode() {
            StorageMode::Separate => match self.database_path(tenant.id().as_str()) {
                Some(path) => Ok(path.exists()),
                None => Ok(self.dedicated.lock()?.contains_key(tenant.id().as_str())),
            },
            StorageMode::Monolithic => {
                let shared = match self.data_dir {
                    Some(_) if !self.shared_path_exists() => return Ok(false),
                    _ => self.shared_session()?,
                };
                shared.object_exists(&tenant.scope().table_name(LogicalTable::Person))
            }
        }
    }

    fn shared_path_exists(&self) -> bool {
        match self.shared_location() {
            Location::File(path) => path.exists(),
            Location::Memory => true,
        }
    }

    /// Physically removes a tenant's data. Separate tenants lose their whole
    /// database, monolithic tenants their prefixed objects.
    #[instrument(skip_all, fields(tenant = %tenant.id()))]
    pub fn destroy(&self, tenant: &Tenant) -> Result<()> {
        match tenant.mode() {
            StorageMode::Separate => {
                let session = self.dedicated.lock()?.remove(tenant.id().as_str());
                drop(session);
                if let Some(path) = self.database_path(tenant.id().as_str()) {
                    for suffix in ["", "-wal", "-shm", "-journal"] {
                        let mut file = path.clone().into_os_string();
                        file.push(suffix);
                        let file = PathBuf::from(file);
                        if file.exists() {
                            fs::remove_file(&file)?;
                        }
                    }
                }
            }
            StorageMode::Monolithic => {
                let scope = tenant.scope();
                let mut statements = vec![format!(
                    "drop view if exists {};",
                    scope.object_name(crate::schema::LINEAGE_VIEW)
                )];
                statements.extend(
                    LogicalTable::ALL
                        .iter()
                        .rev()
                        .map(|table| format!("drop table if exists {};", scope.table_name(*table))),
                );
                let batch = statements.join("\n");
                self.shared_session()?.with_connection(|c| c.execute_batch(&batch))?;
            }
        }
        info!("destroyed tenant storage");
        Ok(())
    }

    /// Identifiers of every separate-mode database present in storage.
    pub fn dedicated_databases(&self) -> Result<Vec<String>> {
        let mut ids = match &self.data_dir {
            Some(dir) => {
                let mut ids = Vec::new();
                for entry in fs::read_dir(dir)? {
                    let path = entry?.path();
                    let is_database = path.extension().is_some_and(|e| e == DATABASE_EXTENSION);
                    let is_shared = path.file_name().is_some_and(|n| n == self.shared_name.as_str());
                    if is_database && !is_shared {
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            ids.push(stem.to_string());
                        }
                    }
                }
                ids
            }
            None => self.dedicated.lock()?.keys().cloned().collect(),
        };
        ids.sort();
        Ok(ids)
    }
}

