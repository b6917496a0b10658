//! Resources, principals, permission sets and the reconciliation request/result

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{PermissionLevel, Role};
use crate::error::{Error, Result};

/// The three resource kinds this crate manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Team,
    Folder,
    Datasource,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Team => "team",
            Self::Folder => "folder",
            Self::Datasource => "datasource",
        }
    }

    /// Resource tag used in audit events, e.g. `folder_name`
    pub fn name_tag(self) -> &'static str {
        match self {
            Self::Team => "team_name",
            Self::Folder => "folder_name",
            Self::Datasource => "datasource_name",
        }
    }

    /// Capitalized label for messages
    pub(crate) fn title(self) -> &'static str {
        match self {
            Self::Team => "Team",
            Self::Folder => "Folder",
            Self::Datasource => "Datasource",
        }
    }

    /// Whether the kind carries a permission set of its own
    pub fn is_permission_target(self) -> bool {
        !matches!(self, Self::Team)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote identity: numeric id for teams, string uid for folders and datasources
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identity {
    Id(u64),
    Uid(String),
}

impl Identity {
    pub fn as_id(&self) -> Option<u64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Uid(_) => None,
        }
    }

    pub fn as_uid(&self) -> Option<&str> {
        match self {
            Self::Id(_) => None,
            Self::Uid(uid) => Some(uid),
        }
    }

    /// "ID" or "UID", for messages
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Id(_) => "ID",
            Self::Uid(_) => "UID",
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Uid(uid) => f.write_str(uid),
        }
    }
}

impl From<u64> for Identity {
    fn from(id: u64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for Identity {
    fn from(uid: &str) -> Self {
        Self::Uid(uid.to_string())
    }
}

impl From<String> for Identity {
    fn from(uid: String) -> Self {
        Self::Uid(uid)
    }
}

/// A resource known to the remote system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedResource {
    pub kind: ResourceKind,
    pub name: String,
    pub identity: Identity,
}

impl NamedResource {
    pub fn new(kind: ResourceKind, name: impl Into<String>, identity: impl Into<Identity>) -> Self {
        Self { kind, name: name.into(), identity: identity.into() }
    }

    /// `kind:identity`, unique across kinds
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.identity)
    }
}

/// Holder of a grant in a permission set.
///
/// Reconciliation only ever writes team grants, but the remote list can also
/// hold user and basic-role grants which must survive a merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Principal {
    Team(u64),
    User(u64),
    Role(String),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Team(id) => write!(f, "team:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
            Self::Role(name) => write!(f, "role:{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub principal: Principal,
    pub level: PermissionLevel,
}

impl PermissionGrant {
    pub fn new(principal: Principal, level: PermissionLevel) -> Self {
        Self { principal, level }
    }

    pub fn team(id: u64, level: PermissionLevel) -> Self {
        Self::new(Principal::Team(id), level)
    }
}

/// Replacement levels keyed by principal
pub type PermissionUpdates = BTreeMap<Principal, PermissionLevel>;

/// The complete grant list of one folder or datasource. One grant per principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    grants: BTreeMap<Principal, PermissionLevel>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, principal: &Principal) -> Option<PermissionLevel> {
        self.grants.get(principal).copied()
    }

    pub fn contains(&self, principal: &Principal) -> bool {
        self.grants.contains_key(principal)
    }

    /// Insert or replace, returning the previous level
    pub fn insert(&mut self, principal: Principal, level: PermissionLevel) -> Option<PermissionLevel> {
        self.grants.insert(principal, level)
    }

    pub fn remove(&mut self, principal: &Principal) -> Option<PermissionLevel> {
        self.grants.remove(principal)
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Grants in principal order
    pub fn iter(&self) -> impl Iterator<Item = (&Principal, PermissionLevel)> + '_ {
        self.grants.iter().map(|(p, l)| (p, *l))
    }

    /// Grants as the list the remote API takes
    pub fn to_grants(&self) -> Vec<PermissionGrant> {
        self.iter().map(|(p, l)| PermissionGrant::new(p.clone(), l)).collect()
    }
}

// Later grants for the same principal win
impl FromIterator<PermissionGrant> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = PermissionGrant>>(iter: I) -> Self {
        Self { grants: iter.into_iter().map(|g| (g.principal, g.level)).collect() }
    }
}

impl FromIterator<(Principal, PermissionLevel)> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = (Principal, PermissionLevel)>>(iter: I) -> Self {
        Self { grants: iter.into_iter().collect() }
    }
}

/// Datasource definition, as found in provisioning YAML/JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_access")]
    pub access: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub json_data: Map<String, Value>,
}

fn default_access() -> String {
    "proxy".to_string()
}

impl DatasourceSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            access: default_access(),
            url: url.into(),
            is_default: false,
            json_data: Map::new(),
        }
    }

    /// Creation attributes other than the name
    pub fn attrs(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("type".into(), Value::String(self.kind.clone()));
        attrs.insert("access".into(), Value::String(self.access.clone()));
        attrs.insert("url".into(), Value::String(self.url.clone()));
        attrs.insert("isDefault".into(), Value::Bool(self.is_default));
        attrs.insert("jsonData".into(), Value::Object(self.json_data.clone()));
        attrs
    }
}

/// How pre-existing teams and folders are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileMode {
    /// Existing team/folder is a conflict; this system must be the sole creator
    #[default]
    Strict,
    /// Existing resources of every kind are reused, so a retry converges
    Continue,
}

/// Inbound request: one account folder and the external group per role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationRequest {
    pub account_name: String,
    pub readonly: String,
    pub readwrite: String,
    pub admin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ReconcileMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource: Option<DatasourceSpec>,
}

impl ReconciliationRequest {
    pub fn new(
        account_name: impl Into<String>,
        readonly: impl Into<String>,
        readwrite: impl Into<String>,
        admin: impl Into<String>,
    ) -> Self {
        Self {
            account_name: account_name.into(),
            readonly: readonly.into(),
            readwrite: readwrite.into(),
            admin: admin.into(),
            mode: None,
            datasource: None,
        }
    }

    pub fn with_mode(mut self, mode: ReconcileMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_datasource(mut self, datasource: DatasourceSpec) -> Self {
        self.datasource = Some(datasource);
        self
    }

    /// External group name for a role
    pub fn group_name(&self, role: Role) -> &str {
        match role {
            Role::ReadOnly => &self.readonly,
            Role::ReadWrite => &self.readwrite,
            Role::Admin => &self.admin,
        }
    }

    /// All four names are required and non-blank
    pub fn validate(&self) -> Result<()> {
        if self.account_name.trim().is_empty() {
            return Err(Error::Validation("accountName must not be empty".into()));
        }
        for role in Role::ALL {
            if self.group_name(role).trim().is_empty() {
                return Err(Error::Validation(format!("{role} group name must not be empty")));
            }
        }
        if let Some(ds) = &self.datasource {
            if ds.name.trim().is_empty() {
                return Err(Error::Validation("datasource name must not be empty".into()));
            }
        }
        Ok(())
    }
}

/// Team id per role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTeams {
    pub readonly: u64,
    pub readwrite: u64,
    pub admin: u64,
}

impl RoleTeams {
    pub fn get(&self, role: Role) -> u64 {
        match role {
            Role::ReadOnly => self.readonly,
            Role::ReadWrite => self.readwrite,
            Role::Admin => self.admin,
        }
    }
}

/// Outbound result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub status: String,
    pub folder_uid: String,
    pub teams: RoleTeams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource_uid: Option<String>,
}

impl ReconciliationResult {
    pub fn success(folder_uid: impl Into<String>, teams: RoleTeams, datasource_uid: Option<String>) -> Self {
        Self { status: "success".into(), folder_uid: folder_uid.into(), teams, datasource_uid }
    }
}
