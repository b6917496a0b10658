//! Remote resource API boundary
//!
//! Everything the core needs from the dashboard platform. Transport,
//! authentication and serialization live behind this trait.

use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::model::{Identity, PermissionGrant, ResourceKind};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

pub trait ResourceApi: Send + Sync {
    /// Exact-name lookup among resources of one kind
    fn find_by_name(&self, kind: ResourceKind, name: &str) -> ApiResult<Option<Identity>>;

    /// Create a resource. Reports `ApiError::AlreadyExists` when the name is taken.
    fn create(&self, kind: ResourceKind, name: &str, attrs: &Map<String, Value>) -> ApiResult<Identity>;

    /// Full permission list of a folder or datasource
    fn get_permissions(&self, kind: ResourceKind, identity: &Identity) -> ApiResult<Vec<PermissionGrant>>;

    /// Replace the full permission list of a folder or datasource
    fn set_permissions(&self, kind: ResourceKind, identity: &Identity, grants: &[PermissionGrant]) -> ApiResult<()>;

    /// Bind an external identity-provider group to a team.
    /// Reports `ApiError::AlreadyExists` when the binding is already there.
    fn link_external_group(&self, team_id: u64, group_id: &str) -> ApiResult<()>;
}
