//! Treeplex – many genealogical trees in one SQLite backend.
//!
//! A tree (a *tenant*) either owns a database of its own or lives inside a
//! shared database where every one of its tables carries a prefix
//! (`smith_person`, `smith_family`, ...). Application code never sees the
//! difference: it writes SQL against the logical table names and every
//! statement is scoped on the way out.
//!
//! ## Modules
//! * [`rewrite`] – The identifier rewriter. Scopes logical table names in
//!   arbitrary SQL text, idempotently, using the token grammar in `sql.pest`.
//! * [`sanitize`] – Lossless coercion of domain values into column values,
//!   with a rule per object kind and field. Nothing is silently defaulted.
//! * [`probe`] – Discovers which optional extensions (`fts5`, `soundex`,
//!   `vector`, `json1`) a session really has.
//! * [`schema`] – Builds each tenant's schema, choosing enhanced objects or
//!   their fallbacks from the probe result.
//! * [`capability`] – The search, vector and graph surface that follows from
//!   what was built, with an overall [`capability::CapabilityLevel`].
//! * [`lifecycle`] – Tenant creation, deregistration and (separately)
//!   destruction of storage.
//! * [`persist`] – Sessions, tenant-scoped connections and storage layout.
//! * [`server`] – A small HTTP surface over the lifecycle manager.
//!
//! ## Degradation
//! Missing extensions never fail a tenant. They lower its capability level
//! and are recorded as [`error::Degradation`] values in the provisioning
//! report. Rejected values, unknown tenants and storage errors are real
//! errors ([`error::TreeplexError`]).
//!
//! ## Quick Start
//! ```
//! use treeplex::rewrite::IdentifierRewriter;
//! use treeplex::tables::TableSet;
//! let rewriter = IdentifierRewriter::new("smith_", TableSet::logical());
//! assert_eq!(
//!     rewriter.rewrite("SELECT value FROM metadata WHERE setting = ?"),
//!     "SELECT value FROM smith_metadata WHERE setting = ?"
//! );
//! ```

pub mod capability;
pub mod config;
pub mod datatype;
pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod persist;
pub mod probe;
pub mod rewrite;
pub mod sanitize;
pub mod schema;
pub mod search;
pub mod server;
pub mod tables;
pub mod tenant;
pub mod vector;
