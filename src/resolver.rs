//! Create-or-get resolution of named teams, folders and datasources

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::api::ResourceApi;
use crate::audit::{AuditEvent, EventSink};
use crate::error::{ApiError, Error, Result};
use crate::model::{DatasourceSpec, Identity, NamedResource, ReconcileMode, ResourceKind};

/// What to do when the name is already taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingPolicy {
    /// Report `Error::ResourceConflict` carrying the existing identity
    Conflict,
    /// Return the existing identity as an idempotent no-op
    Reuse,
}

/// Existing-resource policy, chosen per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvePolicy {
    pub team: ExistingPolicy,
    pub folder: ExistingPolicy,
    pub datasource: ExistingPolicy,
}

impl ResolvePolicy {
    /// Teams and folders conflict, datasources are reused
    pub const fn strict() -> Self {
        Self {
            team: ExistingPolicy::Conflict,
            folder: ExistingPolicy::Conflict,
            datasource: ExistingPolicy::Reuse,
        }
    }

    pub const fn reuse_all() -> Self {
        Self {
            team: ExistingPolicy::Reuse,
            folder: ExistingPolicy::Reuse,
            datasource: ExistingPolicy::Reuse,
        }
    }

    pub fn for_kind(&self, kind: ResourceKind) -> ExistingPolicy {
        match kind {
            ResourceKind::Team => self.team,
            ResourceKind::Folder => self.folder,
            ResourceKind::Datasource => self.datasource,
        }
    }

    pub fn with(mut self, kind: ResourceKind, policy: ExistingPolicy) -> Self {
        match kind {
            ResourceKind::Team => self.team = policy,
            ResourceKind::Folder => self.folder = policy,
            ResourceKind::Datasource => self.datasource = policy,
        }
        self
    }
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        Self::strict()
    }
}

impl From<ReconcileMode> for ResolvePolicy {
    fn from(mode: ReconcileMode) -> Self {
        match mode {
            ReconcileMode::Strict => Self::strict(),
            ReconcileMode::Continue => Self::reuse_all(),
        }
    }
}

/// A resolved resource and whether this call created it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub resource: NamedResource,
    pub created: bool,
}

impl Resolved {
    pub fn identity(&self) -> &Identity {
        &self.resource.identity
    }
}

/// Looks a name up and creates it when absent.
///
/// At most one creation call is issued per resolution. A create that fails
/// with an ambiguous outcome (timeout) or an "already exists" answer is
/// never repeated; the name is queried again instead.
pub struct ResourceResolver<A> {
    api: Arc<A>,
    policy: ResolvePolicy,
    events: Arc<dyn EventSink>,
}

impl<A: ResourceApi> ResourceResolver<A> {
    pub fn new(api: Arc<A>, events: Arc<dyn EventSink>) -> Self {
        Self { api, policy: ResolvePolicy::default(), events }
    }

    pub fn with_events(&self, events: Arc<dyn EventSink>) -> Self {
        Self { api: self.api.clone(), policy: self.policy, events }
    }

    pub fn with_policy(mut self, policy: ResolvePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ResolvePolicy {
        self.policy
    }

    /// Resolve a name under the configured policy
    pub fn resolve(&self, kind: ResourceKind, name: &str) -> Result<Resolved> {
        self.resolve_in(self.policy, kind, name, &Map::new())
    }

    /// Resolve a datasource, creating it from the full definition when absent
    pub fn resolve_datasource(&self, spec: &DatasourceSpec) -> Result<Resolved> {
        self.resolve_in(self.policy, ResourceKind::Datasource, &spec.name, &spec.attrs())
    }

    /// Resolve under an explicit policy, with creation attributes
    pub fn resolve_in(
        &self,
        policy: ResolvePolicy,
        kind: ResourceKind,
        name: &str,
        attrs: &Map<String, Value>,
    ) -> Result<Resolved> {
        if name.trim().is_empty() {
            return Err(Error::Validation(format!("{kind} name must not be empty")));
        }

        if let Some(identity) = self.lookup(kind, name)? {
            return self.existing(policy, kind, name, identity);
        }

        debug!(%kind, name, "not found, creating");
        match self.api.create(kind, name, attrs) {
            Ok(identity) => Ok(self.created(kind, name, identity)),
            Err(source) if source.is_already_exists() => {
                // Someone else created it between lookup and create
                warn!(%kind, name, "create raced with another writer");
                match self.lookup(kind, name)? {
                    Some(identity) => self.existing(policy, kind, name, identity),
                    None => Err(self.creation_failed(kind, name, source)),
                }
            }
            Err(source) if source.is_ambiguous() => {
                warn!(%kind, name, error = %source, "create outcome unknown, re-querying");
                match self.lookup(kind, name)? {
                    Some(identity) => Ok(self.created(kind, name, identity)),
                    None => Err(self.creation_failed(kind, name, source)),
                }
            }
            Err(source) => Err(self.creation_failed(kind, name, source)),
        }
    }

    fn lookup(&self, kind: ResourceKind, name: &str) -> Result<Option<Identity>> {
        self.api
            .find_by_name(kind, name)
            .map_err(|source| Error::upstream(format!("lookup of {kind} '{name}'"), source))
    }

    fn existing(&self, policy: ResolvePolicy, kind: ResourceKind, name: &str, identity: Identity) -> Result<Resolved> {
        let message = format!("{} already exists with {} {}", kind.title(), identity.label(), identity);
        match policy.for_kind(kind) {
            ExistingPolicy::Conflict => {
                warn!(%kind, name, %identity, "already exists");
                self.events.emit(AuditEvent::warn(message, kind, name));
                Err(Error::ResourceConflict { kind, name: name.to_string(), identity })
            }
            ExistingPolicy::Reuse => {
                info!(%kind, name, %identity, "reusing existing");
                self.events.emit(AuditEvent::warn(message, kind, name));
                Ok(Resolved { resource: NamedResource::new(kind, name, identity), created: false })
            }
        }
    }

    fn created(&self, kind: ResourceKind, name: &str, identity: Identity) -> Resolved {
        info!(%kind, name, %identity, "created");
        self.events.emit(AuditEvent::info(
            format!("{} created successfully with {} {}", kind.title(), identity.label(), identity),
            kind,
            name,
        ));
        Resolved { resource: NamedResource::new(kind, name, identity), created: true }
    }

    fn creation_failed(&self, kind: ResourceKind, name: &str, source: ApiError) -> Error {
        Error::CreationFailed { kind, name: name.to_string(), source }
    }
}
