//! Non-destructive permission merges onto a folder or datasource
//!
//! The remote write replaces the whole list, so a merge is read, modify,
//! write. Merges on the same target are serialized within the process; a
//! concurrent writer outside it can still interleave.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::api::ResourceApi;
use crate::audit::{AuditEvent, EventSink};
use crate::error::{Error, Result};
use crate::model::{NamedResource, PermissionSet, PermissionUpdates};

/// Replace the grants of every principal in `updates`, keep all others
pub fn merge(current: &PermissionSet, updates: &PermissionUpdates) -> PermissionSet {
    let mut merged: PermissionSet = current
        .iter()
        .filter(|(p, _)| !updates.contains_key(*p))
        .map(|(p, l)| (p.clone(), l))
        .collect();
    for (principal, level) in updates {
        merged.insert(principal.clone(), *level);
    }
    merged
}

/// SHA-256 over the grants in principal order, hex encoded
pub fn fingerprint(set: &PermissionSet) -> String {
    let mut hasher = Sha256::new();
    for (principal, level) in set.iter() {
        hasher.update(principal.to_string().as_bytes());
        hasher.update([b'=', level.code(), b'\n']);
    }
    hasher.finalize().iter().fold(String::with_capacity(64), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Render updates as `{team:7: 1, team:8: 2}`
pub fn describe(updates: &PermissionUpdates) -> String {
    let parts: Vec<String> = updates.iter().map(|(p, l)| format!("{p}: {}", l.code())).collect();
    format!("{{{}}}", parts.join(", "))
}

/// What a merge did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// `kind:identity` of the target
    pub target: String,
    /// Grants carried over untouched
    pub kept: usize,
    /// Grants whose principal was in the update set
    pub replaced: usize,
    /// New principals
    pub added: usize,
    pub before: String,
    pub after: String,
    /// The write timed out but a re-read showed it had landed
    pub confirmed_by_reread: bool,
}

/// One mutex per target key, dropped once no merge holds or waits on it
#[derive(Debug, Default)]
struct TargetLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TargetLocks {
    fn acquire(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(key.to_string()).or_default().clone()
    }

    /// Give back a handle from `acquire`. Clones are only handed out under
    /// the map lock, so a count of one means nobody else wants the entry.
    fn release(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        drop(lock);
        if map.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            map.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

pub struct PermissionMerger<A> {
    api: Arc<A>,
    events: Arc<dyn EventSink>,
    locks: Arc<TargetLocks>,
}

impl<A: ResourceApi> PermissionMerger<A> {
    pub fn new(api: Arc<A>, events: Arc<dyn EventSink>) -> Self {
        Self { api, events, locks: Arc::default() }
    }

    /// Same API and target locks, different event sink
    pub fn with_events(&self, events: Arc<dyn EventSink>) -> Self {
        Self { api: self.api.clone(), events, locks: self.locks.clone() }
    }

    /// Merge `updates` onto the target's current permission set
    pub fn merge_permissions(&self, target: &NamedResource, updates: &PermissionUpdates) -> Result<MergeOutcome> {
        if !target.kind.is_permission_target() {
            return Err(Error::Validation(format!("{} has no permission set", target.kind)));
        }
        let key = target.key();
        let lock = self.locks.acquire(&key);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());
            self.merge_locked(target, updates, &key)
        };
        self.locks.release(&key, lock);
        result
    }

    fn merge_locked(&self, target: &NamedResource, updates: &PermissionUpdates, key: &str) -> Result<MergeOutcome> {
        let current = self.read(target)?;
        let merged = merge(&current, updates);
        let replaced = updates.keys().filter(|p| current.contains(p)).count();
        debug!(resource = %key, current = current.len(), merged = merged.len(), "writing merged permissions");

        let mut confirmed_by_reread = false;
        if let Err(source) = self.api.set_permissions(target.kind, &target.identity, &merged.to_grants()) {
            if !source.is_ambiguous() {
                return Err(Error::PermissionWriteFailed { target: key.to_string(), ambiguous: false, source });
            }
            // Outcome unknown: only a fresh read can tell
            warn!(resource = %key, error = %source, "permission write outcome unknown, re-reading");
            match self.read(target) {
                Ok(observed) if observed == merged => confirmed_by_reread = true,
                _ => return Err(Error::PermissionWriteFailed { target: key.to_string(), ambiguous: true, source }),
            }
        }

        info!(resource = %key, replaced, added = updates.len() - replaced, "permissions merged");
        self.events.emit(AuditEvent::info(
            format!("Permissions merged successfully: {}", describe(updates)),
            target.kind,
            &target.identity.to_string(),
        ));
        Ok(MergeOutcome {
            target: key.to_string(),
            kept: current.len() - replaced,
            replaced,
            added: updates.len() - replaced,
            before: fingerprint(&current),
            after: fingerprint(&merged),
            confirmed_by_reread,
        })
    }

    fn read(&self, target: &NamedResource) -> Result<PermissionSet> {
        self.api
            .get_permissions(target.kind, &target.identity)
            .map(|grants| grants.into_iter().collect())
            .map_err(|source| Error::upstream(format!("permission read on {}", target.key()), source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use crate::constants::PermissionLevel::{Admin, Read, Write};
    use crate::memory::{Fault, MemoryApi, Op};
    use crate::model::{PermissionGrant, Principal, ResourceKind};

    fn set(grants: &[(Principal, crate::constants::PermissionLevel)]) -> PermissionSet {
        grants.iter().cloned().collect()
    }

    #[test]
    fn merge_keeps_unrelated_grants() {
        let current = set(&[(Principal::Team(1), Read), (Principal::Team(2), Admin)]);
        let updates: PermissionUpdates = [(Principal::Team(2), Write), (Principal::Team(3), Read)].into_iter().collect();
        let merged = merge(&current, &updates);
        assert_eq!(
            merged,
            set(&[(Principal::Team(1), Read), (Principal::Team(2), Write), (Principal::Team(3), Read)])
        );
    }

    #[test]
    fn merge_keeps_users_and_roles() {
        let current = set(&[(Principal::User(1), Admin), (Principal::Role("Viewer".into()), Read)]);
        let updates: PermissionUpdates = [(Principal::Team(1), Write)].into_iter().collect();
        let merged = merge(&current, &updates);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get(&Principal::User(1)), Some(Admin));
        assert_eq!(merged.get(&Principal::Role("Viewer".into())), Some(Read));
    }

    #[test]
    fn merge_is_idempotent() {
        let current = set(&[(Principal::Team(9), Admin)]);
        let updates: PermissionUpdates = [(Principal::Team(1), Read)].into_iter().collect();
        let once = merge(&current, &updates);
        assert_eq!(merge(&once, &updates), once);
    }

    #[test]
    fn empty_updates_change_nothing() {
        let current = set(&[(Principal::Team(1), Read)]);
        assert_eq!(merge(&current, &PermissionUpdates::new()), current);
    }

    #[test]
    fn fingerprint_ignores_insertion_order() {
        let a: PermissionSet = vec![PermissionGrant::team(1, Read), PermissionGrant::team(2, Write)].into_iter().collect();
        let b: PermissionSet = vec![PermissionGrant::team(2, Write), PermissionGrant::team(1, Read)].into_iter().collect();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);
        assert_ne!(fingerprint(&a), fingerprint(&PermissionSet::new()));
    }

    #[test]
    fn describe_lists_codes() {
        let updates: PermissionUpdates = [(Principal::Team(7), Read), (Principal::Team(8), Admin)].into_iter().collect();
        assert_eq!(describe(&updates), "{team:7: 1, team:8: 4}");
    }

    #[test]
    fn target_locks_are_released() {
        let api = Arc::new(MemoryApi::new());
        let merger = PermissionMerger::new(api.clone(), Arc::new(MemorySink::new()));
        let updates: PermissionUpdates = [(Principal::Team(1), Read)].into_iter().collect();

        let mut targets = Vec::new();
        for n in 0..50 {
            let name = format!("account-{n}");
            let identity = api.seed(ResourceKind::Folder, &name);
            targets.push(NamedResource::new(ResourceKind::Folder, name, identity));
        }
        for target in &targets {
            merger.merge_permissions(target, &updates).unwrap();
        }
        assert_eq!(merger.locks.len(), 0);

        api.fail_next(Op::SetPermissions, Fault::Rejected);
        assert!(merger.merge_permissions(&targets[0], &updates).is_err());
        assert_eq!(merger.locks.len(), 0);
    }

    #[test]
    fn scoped_merger_shares_locks() {
        let merger = PermissionMerger::new(Arc::new(MemoryApi::new()), Arc::new(MemorySink::new()));
        let scoped = merger.with_events(Arc::new(MemorySink::new()));
        let held = merger.locks.acquire("folder:fo-0001");
        assert_eq!(scoped.locks.len(), 1);
        merger.locks.release("folder:fo-0001", held);
        assert_eq!(scoped.locks.len(), 0);
    }
}
