//! Schema provisioning driven by the extension probe.
//!
//! Core tables are always created and any failure there is fatal. Each
//! optional feature gets either its enhanced object or its fallback, and
//! which one was chosen is recorded in the [`ProvisioningReport`].

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{Degradation, Result};
use crate::persist::TenantConnection;
use crate::probe::{ExtensionCatalog, ExtensionProbe, ExtensionRecord, ExtensionSet, FallbackStrategy, KNOWN_EXTENSIONS, SchemaFeature};
use crate::sanitize::rules;
use crate::tables::{ObjectKind, TenantScope};

/// Tenant-scoped view of parent/child edges.
pub const LINEAGE_VIEW: &str = "parent_link";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "fallback", rename_all = "snake_case")]
pub enum FeatureStatus {
    Enhanced,
    Downgraded(FallbackStrategy),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureOutcome {
    pub feature: SchemaFeature,
    pub extension: &'static str,
    #[serde(flatten)]
    pub status: FeatureStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningReport {
    pub session_id: u64,
    pub extensions: Vec<ExtensionRecord>,
    pub features: Vec<FeatureOutcome>,
    pub issues: Vec<Degradation>,
}

impl ProvisioningReport {
    pub fn status(&self, feature: SchemaFeature) -> Option<FeatureStatus> {
        self.features
            .iter()
            .find(|outcome| outcome.feature == feature)
            .map(|outcome| outcome.status)
    }
    pub fn is_enhanced(&self, feature: SchemaFeature) -> bool {
        self.status(feature) == Some(FeatureStatus::Enhanced)
    }
}

fn core_schema(scope: &TenantScope) -> String {
    let mut ddl = String::new();
    for kind in ObjectKind::ALL {
        let columns: Vec<String> = rules(kind)
            .iter()
            .map(|rule| match rule.field {
                "handle" => "handle TEXT PRIMARY KEY NOT NULL".to_string(),
                field if rule.nullable => format!("{} {}", field, rule.target.sql_type()),
                field => format!("{} {} NOT NULL", field, rule.target.sql_type()),
            })
            .collect();
        let _ = writeln!(ddl, "create table if not exists {} (\n    {}\n);", kind.table(), columns.join(",\n    "));
    }
    ddl.push_str(
        "
        create table if not exists metadata (
            setting TEXT PRIMARY KEY NOT NULL,
            value TEXT
        );
        create table if not exists reference (
            obj_handle TEXT NOT NULL,
            obj_class TEXT NOT NULL,
            ref_handle TEXT NOT NULL,
            ref_class TEXT NOT NULL,
            PRIMARY KEY (obj_handle, ref_handle)
        );
        create table if not exists gender_stats (
            given_name TEXT PRIMARY KEY NOT NULL,
            female INTEGER NOT NULL DEFAULT 0,
            male INTEGER NOT NULL DEFAULT 0,
            unknown INTEGER NOT NULL DEFAULT 0
        );
        create table if not exists name_group (
            name TEXT PRIMARY KEY NOT NULL,
            grouping TEXT NOT NULL
        );
        create table if not exists surname (
            surname TEXT PRIMARY KEY NOT NULL
        );
        ",
    );
    for kind in ObjectKind::ALL {
        if rules(kind).iter().any(|rule| rule.field == "gramps_id") {
            let _ = writeln!(
                ddl,
                "create index if not exists {} on {} (gramps_id);",
                scope.object_name(&format!("idx_{}_gramps_id", kind)),
                kind.table()
            );
        }
    }
    let _ = writeln!(
        ddl,
        "create index if not exists {} on family (father_handle);\n\
         create index if not exists {} on family (mother_handle);\n\
         create index if not exists {} on reference (ref_handle);",
        scope.object_name("idx_family_father"),
        scope.object_name("idx_family_mother"),
        scope.object_name("idx_reference_ref"),
    );
    ddl
}

fn name_search_index(scope: &TenantScope) -> String {
    let person_content = "trim(coalesce(new.given_name, '') || ' ' || coalesce(new.surname, ''))";
    let place_content = "coalesce(new.name, '')";
    let mut ddl = String::from(
        "create virtual table if not exists search_index using fts5(
            handle UNINDEXED,
            obj_type UNINDEXED,
            content,
            tokenize = 'trigram'
        );\n",
    );
    for (table, content) in [("person", person_content), ("place", place_content)] {
        let _ = write!(
            ddl,
            "
            create trigger if not exists {insert} after insert on {table} begin
                insert into search_index (handle, obj_type, content) values (new.handle, '{table}', {content});
            end;
            create trigger if not exists {update} after update on {table} begin
                delete from search_index where handle = old.handle;
                insert into search_index (handle, obj_type, content) values (new.handle, '{table}', {content});
            end;
            create trigger if not exists {delete} after delete on {table} begin
                delete from search_index where handle = old.handle;
            end;
            insert into search_index (handle, obj_type, content)
                select handle, '{table}', {backfill} from {table}
                 where handle not in (select handle from search_index);
            ",
            insert = scope.object_name(&format!("{}_search_ai", table)),
            update = scope.object_name(&format!("{}_search_au", table)),
            delete = scope.object_name(&format!("{}_search_ad", table)),
            table = table,
            content = content,
            backfill = content.replace("new.", ""),
        );
    }
    ddl
}

fn plain_name_indexes(scope: &TenantScope) -> String {
    format!(
        "create index if not exists {} on person (surname);\n\
         create index if not exists {} on place (name);",
        scope.object_name("idx_person_surname"),
        scope.object_name("idx_place_name"),
    )
}

const EMBEDDING_STORE: &str = "
    create table if not exists embedding (
        handle TEXT NOT NULL,
        embedding_kind TEXT NOT NULL,
        dimension INTEGER NOT NULL,
        vector TEXT NOT NULL,
        metadata TEXT,
        PRIMARY KEY (handle, embedding_kind)
    );
";

fn lineage_view(scope: &TenantScope) -> String {
    format!(
        "create view if not exists {} as
            select json_extract(c.value, '$.ref') as child, f.father_handle as parent, f.handle as family
              from family f, json_each(f.json_data, '$.child_ref_list') c
             where f.father_handle is not null
            union all
            select json_extract(c.value, '$.ref'), f.mother_handle, f.handle
              from family f, json_each(f.json_data, '$.child_ref_list') c
             where f.mother_handle is not null;",
        scope.object_name(LINEAGE_VIEW)
    )
}

fn enhanced_ddl(feature: SchemaFeature, scope: &TenantScope) -> Option<String> {
    match feature {
        SchemaFeature::NameSearchIndex => Some(name_search_index(scope)),
        SchemaFeature::EmbeddingStore => Some(EMBEDDING_STORE.to_string()),
        SchemaFeature::LineageView => Some(lineage_view(scope)),
        // soundex() is used directly by queries
        SchemaFeature::PhoneticMatching => None,
    }
}

fn fallback_ddl(fallback: FallbackStrategy, scope: &TenantScope) -> Option<String> {
    match fallback {
        FallbackStrategy::PlainIndex => Some(plain_name_indexes(scope)),
        FallbackStrategy::Omit => None,
    }
}

pub struct AdaptiveSchemaBuilder<'p> {
    probe: &'p ExtensionProbe,
}

impl<'p> AdaptiveSchemaBuilder<'p> {
    pub fn new(probe: &'p ExtensionProbe) -> Self {
        Self { probe }
    }

    pub fn provision(&self, connection: &TenantConnection) -> Result<ProvisioningReport> {
        self.provision_with(connection, connection.session().as_ref())
    }

    /// Provisions against an explicit catalog instead of the connection's
    /// own session.
    #[instrument(skip_all, fields(session = catalog.session_id(), prefix = connection.scope().prefix()))]
    pub fn provision_with(&self, connection: &TenantConnection, catalog: &dyn ExtensionCatalog) -> Result<ProvisioningReport> {
        let (extensions, mut issues) = self.create_missing(catalog)?;
        issues.extend(extensions.issues.iter().cloned());

        connection.execute_batch(&core_schema(connection.scope()))?;

        let scope = connection.scope();
        let mut features = Vec::new();
        for spec in KNOWN_EXTENSIONS.iter() {
            let mut status = FeatureStatus::Downgraded(spec.fallback);
            if extensions.is_installed(spec.name) {
                match enhanced_ddl(spec.feature, scope) {
                    None => status = FeatureStatus::Enhanced,
                    Some(ddl) => match connection.execute_batch(&ddl) {
                        Ok(()) => status = FeatureStatus::Enhanced,
                        Err(e) => {
                            warn!(extension = spec.name, error = %e, "enhanced schema failed, applying fallback");
                            issues.push(Degradation::ExtensionUnavailable {
                                extension: spec.name.to_string(),
                                message: e.to_string(),
                            });
                        }
                    },
                }
            }
            if let FeatureStatus::Downgraded(fallback) = status {
                if let Some(ddl) = fallback_ddl(fallback, scope) {
                    connection.execute_batch(&ddl)?;
                }
            }
            features.push(FeatureOutcome {
                feature: spec.feature,
                extension: spec.name,
                status,
            });
        }
        info!(
            enhanced = features.iter().filter(|f| f.status == FeatureStatus::Enhanced).count(),
            issues = issues.len(),
            "provisioned schema"
        );
        Ok(ProvisioningReport {
            session_id: extensions.session_id,
            extensions: extensions.records.clone(),
            features,
            issues,
        })
    }

    // Creates every extension that is available but missing. Failures are
    // recorded per extension; any success triggers a fresh probe.
    fn create_missing(&self, catalog: &dyn ExtensionCatalog) -> Result<(Arc<ExtensionSet>, Vec<Degradation>)> {
        let extensions = self.probe.probe(catalog)?;
        let mut issues = Vec::new();
        let mut created = false;
        for record in extensions.creatable() {
            match catalog.create_extension(&record.name) {
                Ok(()) => {
                    info!(extension = %record.name, "created extension");
                    created = true;
                }
                Err(failure) => {
                    warn!(extension = %record.name, ?failure, "could not create extension");
                    issues.push(failure.degradation(&record.name));
                }
            }
        }
        if !created {
            return Ok((extensions, issues));
        }
        self.probe.invalidate(catalog.session_id())?;
        Ok((self.probe.probe(catalog)?, issues))
    }
}
