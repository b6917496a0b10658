//! External identity-provider group bindings on teams

use std::sync::Arc;

use tracing::{debug, info};

use crate::api::ResourceApi;
use crate::audit::{AuditEvent, EventSink};
use crate::error::{Error, Result};
use crate::model::ResourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    AlreadyLinked,
}

pub struct ExternalGroupLinker<A> {
    api: Arc<A>,
    events: Arc<dyn EventSink>,
}

impl<A: ResourceApi> ExternalGroupLinker<A> {
    pub fn new(api: Arc<A>, events: Arc<dyn EventSink>) -> Self {
        Self { api, events }
    }

    pub fn with_events(&self, events: Arc<dyn EventSink>) -> Self {
        Self { api: self.api.clone(), events }
    }

    /// Bind `group_id` to the team. An existing binding counts as success.
    pub fn link_group(&self, team_id: u64, group_id: &str) -> Result<LinkOutcome> {
        if group_id.trim().is_empty() {
            return Err(Error::Validation("external group id must not be empty".into()));
        }
        let team = team_id.to_string();
        match self.api.link_external_group(team_id, group_id) {
            Ok(()) => {
                info!(team_id, group_id, "external group linked");
                self.events.emit(AuditEvent::info(format!("External group '{group_id}' linked"), ResourceKind::Team, &team));
                Ok(LinkOutcome::Linked)
            }
            Err(e) if e.is_already_exists() => {
                debug!(team_id, group_id, "external group already linked");
                self.events.emit(AuditEvent::info(
                    format!("External group '{group_id}' already linked"),
                    ResourceKind::Team,
                    &team,
                ));
                Ok(LinkOutcome::AlreadyLinked)
            }
            Err(source) => Err(Error::upstream(format!("link of group '{group_id}' to team {team_id}"), source)),
        }
    }
}
