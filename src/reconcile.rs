//! End-to-end reconciliation of one account
//!
//! 1. resolve the account folder
//! 2. resolve one team per role, in readonly, readwrite, admin order
//! 3. optionally bind each team to its external group
//! 4. merge role levels onto the folder (and the datasource, if any)
//!
//! Nothing is rolled back on failure. Re-running in `Continue` mode picks up
//! what an earlier attempt already created.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Map;
use tracing::info_span;

use crate::api::ResourceApi;
use crate::audit::{AuditEvent, EventSink, RequestSink};
use crate::constants::Role;
use crate::error::{ApiError, Error, Result};
use crate::linker::{ExternalGroupLinker, LinkOutcome};
use crate::merger::PermissionMerger;
use crate::model::{
    PermissionUpdates, Principal, ReconcileMode, ReconciliationRequest, ReconciliationResult, ResourceKind, RoleTeams,
};
use crate::resolver::{ResolvePolicy, ResourceResolver};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Mode for requests that do not name one
    pub default_mode: ReconcileMode,
    /// Bind each team to the external group it is named after
    pub link_external_groups: bool,
}

/// Role -> level updates for the three teams
pub fn role_updates(teams: &RoleTeams) -> PermissionUpdates {
    Role::ALL.iter().map(|role| (Principal::Team(teams.get(*role)), role.level())).collect()
}

/// 16 hex chars from the OS RNG, falling back to the clock
pub fn new_request_id() -> String {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default();
        bytes = (nanos as u64).to_be_bytes();
    }
    bytes.iter().fold(String::with_capacity(16), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

pub struct Reconciler<A> {
    resolver: ResourceResolver<A>,
    merger: PermissionMerger<A>,
    linker: ExternalGroupLinker<A>,
    events: Arc<dyn EventSink>,
    options: ReconcileOptions,
}

impl<A: ResourceApi> Reconciler<A> {
    pub fn new(api: Arc<A>, events: Arc<dyn EventSink>) -> Self {
        Self {
            resolver: ResourceResolver::new(api.clone(), events.clone()),
            merger: PermissionMerger::new(api.clone(), events.clone()),
            linker: ExternalGroupLinker::new(api, events.clone()),
            events,
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> ReconcileOptions {
        self.options
    }

    pub fn resolver(&self) -> &ResourceResolver<A> {
        &self.resolver
    }

    pub fn merger(&self) -> &PermissionMerger<A> {
        &self.merger
    }

    pub fn linker(&self) -> &ExternalGroupLinker<A> {
        &self.linker
    }

    /// Run one request. Every failure is emitted as an audit event, then returned.
    ///
    /// All events of the request, including those of the resolver, linker and
    /// merger, carry the same request id.
    pub fn reconcile(&self, request: &ReconciliationRequest) -> Result<ReconciliationResult> {
        let request_id = new_request_id();
        let span = info_span!("reconcile", request_id = %request_id, account = %request.account_name);
        let _enter = span.enter();
        let account = request.account_name.as_str();
        let events: Arc<dyn EventSink> = Arc::new(RequestSink::new(self.events.clone(), request_id));

        events.emit(AuditEvent::info("Processing request started", ResourceKind::Folder, account));
        match self.run(request, &events) {
            Ok(result) => {
                events.emit(AuditEvent::info("Processing request completed", ResourceKind::Folder, account));
                Ok(result)
            }
            Err(e) => {
                events.emit(AuditEvent::error(e.to_string(), ResourceKind::Folder, account).with_error(e.kind()));
                Err(e)
            }
        }
    }

    /// Bind an external group to a team outside a reconciliation
    pub fn link_group(&self, team_id: u64, group_id: &str) -> Result<LinkOutcome> {
        let request_id = new_request_id();
        let span = info_span!("link_group", request_id = %request_id, team_id);
        let _enter = span.enter();
        let events: Arc<dyn EventSink> = Arc::new(RequestSink::new(self.events.clone(), request_id));

        let result = self.linker.with_events(events.clone()).link_group(team_id, group_id);
        if let Err(e) = &result {
            events.emit(AuditEvent::error(e.to_string(), ResourceKind::Team, &team_id.to_string()).with_error(e.kind()));
        }
        result
    }

    /// Record a request refused before it reached the core (unreadable body
    /// and the like) and hand the error back
    pub fn reject(&self, error: Error, kind: ResourceKind, value: &str) -> Error {
        self.events.emit(
            AuditEvent::error(error.to_string(), kind, value)
                .with_request_id(&new_request_id())
                .with_error(error.kind()),
        );
        error
    }

    fn run(&self, request: &ReconciliationRequest, events: &Arc<dyn EventSink>) -> Result<ReconciliationResult> {
        request.validate()?;
        let policy = ResolvePolicy::from(request.mode.unwrap_or(self.options.default_mode));
        let no_attrs = Map::new();
        let resolver = self.resolver.with_events(events.clone());
        let merger = self.merger.with_events(events.clone());
        let linker = self.linker.with_events(events.clone());

        let folder = resolver.resolve_in(policy, ResourceKind::Folder, &request.account_name, &no_attrs)?;

        let mut ids = [0u64; 3];
        for (slot, role) in ids.iter_mut().zip(Role::ALL) {
            let group = request.group_name(role);
            let team = resolver.resolve_in(policy, ResourceKind::Team, group, &no_attrs)?;
            let id = team.identity().as_id().ok_or_else(|| {
                Error::upstream(
                    format!("lookup of team '{group}'"),
                    ApiError::InvalidResponse(format!("team identity {} is not numeric", team.identity())),
                )
            })?;
            if self.options.link_external_groups {
                linker.link_group(id, group)?;
            }
            *slot = id;
        }
        let teams = RoleTeams { readonly: ids[0], readwrite: ids[1], admin: ids[2] };
        let updates = role_updates(&teams);

        merger.merge_permissions(&folder.resource, &updates)?;

        let datasource_uid = match &request.datasource {
            Some(spec) => {
                let ds = resolver.resolve_in(policy, ResourceKind::Datasource, &spec.name, &spec.attrs())?;
                merger.merge_permissions(&ds.resource, &updates)?;
                Some(ds.identity().to_string())
            }
            None => None,
        };

        Ok(ReconciliationResult::success(folder.identity().to_string(), teams, datasource_uid))
    }
}
