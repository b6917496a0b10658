//! Teamgrant - team, folder and datasource access reconciliation
//!
//! Given an account name and the external group for each access role,
//! makes sure the dashboard platform has one folder for the account, one
//! team per group, and the team grants merged onto the folder without
//! touching anyone else's grants.
//!
//! ```no_run
//! use std::sync::Arc;
//! use teamgrant::{Config, HttpResourceApi, ReconciliationRequest, Reconciler, TracingSink};
//!
//! # fn main() -> teamgrant::Result<()> {
//! let config = Config::from_env()?;
//! let api = Arc::new(HttpResourceApi::from_config(&config)?);
//! let reconciler = Reconciler::new(api, Arc::new(TracingSink)).with_options(config.reconcile_options());
//! let result = reconciler.reconcile(&ReconciliationRequest::new("acme", "g-ro", "g-rw", "g-admin"))?;
//! println!("folder {}", result.folder_uid);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod audit;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod journal;
pub mod linker;
pub mod memory;
pub mod merger;
pub mod model;
pub mod reconcile;
pub mod resolver;

pub use api::{ApiResult, ResourceApi};
pub use audit::{AuditEvent, AuditLevel, EventSink, Fanout, MemorySink, RequestSink, TracingSink};
pub use client::HttpResourceApi;
pub use config::Config;
pub use constants::{PermissionLevel, Role};
pub use error::{ApiError, Error, Result};
pub use journal::Journal;
pub use linker::{ExternalGroupLinker, LinkOutcome};
pub use memory::MemoryApi;
pub use merger::{MergeOutcome, PermissionMerger};
pub use model::{
    DatasourceSpec, Identity, NamedResource, PermissionGrant, PermissionSet, PermissionUpdates, Principal,
    ReconcileMode, ReconciliationRequest, ReconciliationResult, ResourceKind, RoleTeams,
};
pub use reconcile::{ReconcileOptions, Reconciler};
pub use resolver::{ExistingPolicy, ResolvePolicy, Resolved, ResourceResolver};
