//! In-process `ResourceApi`
//!
//! Behaves like the remote platform for dry runs and tests: names are unique
//! per kind, permission writes replace the whole list, group links are
//! idempotent only by reporting "already exists". Calls are counted and
//! faults can be queued per operation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde_json::{Map, Value};

use crate::api::{ApiResult, ResourceApi};
use crate::error::ApiError;
use crate::model::{Identity, PermissionGrant, PermissionSet, ResourceKind};

/// Operations that can be counted and faulted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Find,
    Create,
    GetPermissions,
    SetPermissions,
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Connection refused; nothing applied
    Unavailable,
    /// Timeout before the remote saw the call; nothing applied
    TimeoutBefore,
    /// The call is applied, then the response is lost as a timeout
    TimeoutAfter,
    /// Non-ambiguous HTTP 500; nothing applied
    Rejected,
    /// Another writer creates the same name first; reported as already exists
    Race,
}

/// Number of calls seen per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub finds: usize,
    pub creates: usize,
    pub permission_reads: usize,
    pub permission_writes: usize,
    pub links: usize,
}

#[derive(Debug)]
struct PendingFault {
    op: Op,
    skip: usize,
    fault: Fault,
}

#[derive(Debug, Default)]
struct State {
    teams: BTreeMap<String, u64>,
    folders: BTreeMap<String, String>,
    datasources: BTreeMap<String, String>,
    attrs: HashMap<(ResourceKind, String), Map<String, Value>>,
    permissions: HashMap<(ResourceKind, Identity), PermissionSet>,
    links: BTreeSet<(u64, String)>,
    next_id: u64,
    calls: CallCounts,
    faults: Vec<PendingFault>,
}

impl State {
    fn lookup(&self, kind: ResourceKind, name: &str) -> Option<Identity> {
        match kind {
            ResourceKind::Team => self.teams.get(name).map(|id| Identity::Id(*id)),
            ResourceKind::Folder => self.folders.get(name).cloned().map(Identity::Uid),
            ResourceKind::Datasource => self.datasources.get(name).cloned().map(Identity::Uid),
        }
    }

    fn insert(&mut self, kind: ResourceKind, name: &str) -> Identity {
        self.next_id += 1;
        let n = self.next_id;
        let uid = format!("{}-{:04}", &kind.as_str()[..2], n);
        match kind {
            ResourceKind::Team => {
                self.teams.insert(name.to_string(), n);
                return Identity::Id(n);
            }
            ResourceKind::Folder => self.folders.insert(name.to_string(), uid.clone()),
            ResourceKind::Datasource => self.datasources.insert(name.to_string(), uid.clone()),
        };
        Identity::Uid(uid)
    }

    fn exists(&self, kind: ResourceKind, identity: &Identity) -> bool {
        match (kind, identity) {
            (ResourceKind::Team, Identity::Id(id)) => self.teams.values().any(|v| v == id),
            (ResourceKind::Folder, Identity::Uid(uid)) => self.folders.values().any(|v| v == uid),
            (ResourceKind::Datasource, Identity::Uid(uid)) => self.datasources.values().any(|v| v == uid),
            _ => false,
        }
    }

    /// Pops the fault due for this call, if any
    fn take_fault(&mut self, op: Op) -> Option<Fault> {
        let idx = self.faults.iter().position(|f| f.op == op)?;
        if self.faults[idx].skip > 0 {
            self.faults[idx].skip -= 1;
            return None;
        }
        Some(self.faults.remove(idx).fault)
    }
}

fn fault_error(fault: Fault, what: &str) -> ApiError {
    match fault {
        Fault::Unavailable => ApiError::Connection(format!("{what}: connection refused")),
        Fault::TimeoutBefore | Fault::TimeoutAfter => ApiError::Timeout(format!("{what}: timed out")),
        Fault::Rejected => ApiError::Status { status: 500, message: format!("{what}: rejected") },
        Fault::Race => ApiError::AlreadyExists(what.to_string()),
    }
}

#[derive(Debug, Default)]
pub struct MemoryApi {
    state: Mutex<State>,
}

impl MemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Fail the next call of `op`
    pub fn fail_next(&self, op: Op, fault: Fault) {
        self.fail_after(op, 0, fault);
    }

    /// Let `skip` calls of `op` through, then fail the following one
    pub fn fail_after(&self, op: Op, skip: usize, fault: Fault) {
        self.state().faults.push(PendingFault { op, skip, fault });
    }

    /// Create a resource directly, as if made by someone else
    pub fn seed(&self, kind: ResourceKind, name: &str) -> Identity {
        let mut s = self.state();
        match s.lookup(kind, name) {
            Some(identity) => identity,
            None => s.insert(kind, name),
        }
    }

    /// Overwrite a target's permission set without counting a call
    pub fn seed_permissions(&self, kind: ResourceKind, identity: &Identity, grants: Vec<PermissionGrant>) {
        self.state().permissions.insert((kind, identity.clone()), grants.into_iter().collect());
    }

    /// Current permission set of a target
    pub fn permissions(&self, kind: ResourceKind, identity: &Identity) -> PermissionSet {
        self.state().permissions.get(&(kind, identity.clone())).cloned().unwrap_or_default()
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        let s = self.state();
        match kind {
            ResourceKind::Team => s.teams.len(),
            ResourceKind::Folder => s.folders.len(),
            ResourceKind::Datasource => s.datasources.len(),
        }
    }

    pub fn lookup(&self, kind: ResourceKind, name: &str) -> Option<Identity> {
        self.state().lookup(kind, name)
    }

    /// Creation attributes recorded for a resource
    pub fn attrs(&self, kind: ResourceKind, name: &str) -> Option<Map<String, Value>> {
        self.state().attrs.get(&(kind, name.to_string())).cloned()
    }

    pub fn is_linked(&self, team_id: u64, group_id: &str) -> bool {
        self.state().links.contains(&(team_id, group_id.to_string()))
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }
}

impl ResourceApi for MemoryApi {
    fn find_by_name(&self, kind: ResourceKind, name: &str) -> ApiResult<Option<Identity>> {
        let mut s = self.state();
        s.calls.finds += 1;
        if let Some(fault) = s.take_fault(Op::Find) {
            return Err(fault_error(fault, &format!("find {kind} {name}")));
        }
        Ok(s.lookup(kind, name))
    }

    fn create(&self, kind: ResourceKind, name: &str, attrs: &Map<String, Value>) -> ApiResult<Identity> {
        let mut s = self.state();
        s.calls.creates += 1;
        let fault = s.take_fault(Op::Create);
        let what = format!("create {kind} {name}");
        match fault {
            Some(Fault::Race) => {
                if s.lookup(kind, name).is_none() {
                    s.insert(kind, name);
                }
                return Err(fault_error(Fault::Race, &what));
            }
            Some(f) if f != Fault::TimeoutAfter => return Err(fault_error(f, &what)),
            _ => {}
        }
        if s.lookup(kind, name).is_some() {
            return Err(ApiError::AlreadyExists(what));
        }
        let identity = s.insert(kind, name);
        s.attrs.insert((kind, name.to_string()), attrs.clone());
        match fault {
            Some(f) => Err(fault_error(f, &what)),
            None => Ok(identity),
        }
    }

    fn get_permissions(&self, kind: ResourceKind, identity: &Identity) -> ApiResult<Vec<PermissionGrant>> {
        let mut s = self.state();
        s.calls.permission_reads += 1;
        if let Some(fault) = s.take_fault(Op::GetPermissions) {
            return Err(fault_error(fault, &format!("get permissions {kind} {identity}")));
        }
        if !s.exists(kind, identity) {
            return Err(ApiError::NotFound(format!("{kind} {identity}")));
        }
        Ok(s.permissions.get(&(kind, identity.clone())).map(PermissionSet::to_grants).unwrap_or_default())
    }

    fn set_permissions(&self, kind: ResourceKind, identity: &Identity, grants: &[PermissionGrant]) -> ApiResult<()> {
        let mut s = self.state();
        s.calls.permission_writes += 1;
        let fault = s.take_fault(Op::SetPermissions);
        let what = format!("set permissions {kind} {identity}");
        if let Some(f) = fault.filter(|f| *f != Fault::TimeoutAfter) {
            return Err(fault_error(f, &what));
        }
        if !s.exists(kind, identity) {
            return Err(ApiError::NotFound(format!("{kind} {identity}")));
        }
        s.permissions.insert((kind, identity.clone()), grants.iter().cloned().collect());
        match fault {
            Some(f) => Err(fault_error(f, &what)),
            None => Ok(()),
        }
    }

    fn link_external_group(&self, team_id: u64, group_id: &str) -> ApiResult<()> {
        let mut s = self.state();
        s.calls.links += 1;
        let fault = s.take_fault(Op::Link);
        let what = format!("link group {group_id} to team {team_id}");
        if let Some(f) = fault.filter(|f| *f != Fault::TimeoutAfter) {
            return Err(fault_error(f, &what));
        }
        if !s.exists(ResourceKind::Team, &Identity::Id(team_id)) {
            return Err(ApiError::NotFound(format!("team {team_id}")));
        }
        if !s.links.insert((team_id, group_id.to_string())) {
            return Err(ApiError::AlreadyExists(format!("group {group_id} is already added to team {team_id}")));
        }
        match fault {
            Some(f) => Err(fault_error(f, &what)),
            None => Ok(()),
        }
    }
}
