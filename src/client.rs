//! HTTP client for the dashboard platform's management API.
//!
//! Blocking reqwest client; every remote call is one request. The base URL
//! and token are fixed at construction.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::api::{ApiResult, ResourceApi};
use crate::config::Config;
use crate::constants::PermissionLevel;
use crate::error::{ApiError, Error, Result};
use crate::model::{Identity, PermissionGrant, Principal, ResourceKind};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeamSearch {
    #[serde(default)]
    teams: Vec<TeamHit>,
}

#[derive(Debug, Deserialize)]
struct TeamHit {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct FolderHit {
    title: String,
    uid: String,
}

#[derive(Debug, Deserialize)]
struct DatasourceHit {
    name: String,
    #[serde(default)]
    uid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeamCreated {
    team_id: u64,
}

#[derive(Debug, Deserialize)]
struct UidCreated {
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    datasource: Option<UidOnly>,
}

#[derive(Debug, Deserialize)]
struct UidOnly {
    uid: String,
}

/// One entry of a permission list, as sent and received
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    team_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    permission: u64,
}

impl PermissionItem {
    fn from_grant(grant: &PermissionGrant) -> Self {
        let mut item = Self { permission: u64::from(grant.level.code()), ..Self::default() };
        match &grant.principal {
            Principal::Team(id) => item.team_id = Some(*id),
            Principal::User(id) => item.user_id = Some(*id),
            Principal::Role(role) => item.role = Some(role.clone()),
        }
        item
    }

    /// `None` for entries addressing nothing (id 0, empty role)
    fn into_grant(self) -> ApiResult<Option<PermissionGrant>> {
        let principal = match (self.team_id, self.user_id, self.role) {
            (Some(id), _, _) if id > 0 => Principal::Team(id),
            (_, Some(id), _) if id > 0 => Principal::User(id),
            (_, _, Some(role)) if !role.is_empty() => Principal::Role(role),
            _ => return Ok(None),
        };
        let level = PermissionLevel::from_code(self.permission).ok_or_else(|| {
            ApiError::InvalidResponse(format!("unknown permission code {} for {principal}", self.permission))
        })?;
        Ok(Some(PermissionGrant::new(principal, level)))
    }
}

/// Permission listings come bare or wrapped, depending on the resource kind
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PermissionListing {
    Bare(Vec<PermissionItem>),
    Permissions { permissions: Vec<PermissionItem> },
    Items { items: Vec<PermissionItem> },
}

impl PermissionListing {
    fn into_items(self) -> Vec<PermissionItem> {
        match self {
            Self::Bare(items) | Self::Permissions { permissions: items } | Self::Items { items } => items,
        }
    }
}

/// `ResourceApi` over the platform's REST API
pub struct HttpResourceApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpResourceApi {
    pub fn new(
        base_url: &str,
        token: &str,
        timeout: Duration,
        connect_timeout: Duration,
        tls_verify: bool,
    ) -> std::result::Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .danger_accept_invalid_certs(!tls_verify)
            .build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), token: token.to_string() })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        if !config.tls_verify {
            warn!("TLS certificate verification is disabled");
        }
        Self::new(&config.api_url, &config.api_token, config.timeout(), config.connect_timeout(), config.tls_verify)
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(auth) = HeaderValue::from_str(&format!("Bearer {}", self.token)) {
            headers.insert(AUTHORIZATION, auth);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn status_to_error(status: reqwest::StatusCode, body: String) -> ApiError {
        match status.as_u16() {
            404 => ApiError::NotFound(body),
            409 => ApiError::AlreadyExists(body),
            400 if is_duplicate_message(&body) => ApiError::AlreadyExists(body),
            code => ApiError::Status { status: code, message: body },
        }
    }

    fn classify(e: reqwest::Error) -> ApiError {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else if e.is_connect() {
            ApiError::Connection(e.to_string())
        } else {
            ApiError::Http(e)
        }
    }

    fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        let resp = request.headers(self.headers()).send().map_err(Self::classify)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            return Err(Self::status_to_error(status, text));
        }
        Ok(resp)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> ApiResult<T> {
        let url = self.url(path);
        debug!("GET {} {:?}", url, query);
        let resp = self.send(self.client.get(&url).query(query))?;
        resp.json().map_err(Self::classify)
    }

    /// POST and decode. Once the remote answered 2xx, a body that cannot be
    /// read is `Unreadable`: the write may well have been applied.
    fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> ApiResult<T> {
        let url = self.url(path);
        debug!("POST {}", url);
        let resp = self.send(self.client.post(&url).json(body))?;
        let text = resp.text().map_err(|e| ApiError::Unreadable(format!("POST {path}: {e}")))?;
        let parsed = if text.trim().is_empty() {
            serde_json::from_value(Value::Object(Map::new()))
        } else {
            serde_json::from_str(&text)
        };
        parsed.map_err(|e| ApiError::Unreadable(format!("POST {path}: {e}")))
    }

    fn permissions_path(kind: ResourceKind, identity: &Identity) -> ApiResult<String> {
        let uid = identity
            .as_uid()
            .ok_or_else(|| ApiError::InvalidResponse(format!("{kind} identity {identity} is not a uid")))?;
        match kind {
            ResourceKind::Folder => Ok(format!("/api/folders/{uid}/permissions")),
            ResourceKind::Datasource => Ok(format!("/api/datasources/uid/{uid}/permissions")),
            ResourceKind::Team => Err(ApiError::InvalidResponse("teams have no permission list".into())),
        }
    }
}

fn is_duplicate_message(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("already added") || lower.contains("already exists")
}

impl ResourceApi for HttpResourceApi {
    fn find_by_name(&self, kind: ResourceKind, name: &str) -> ApiResult<Option<Identity>> {
        match kind {
            ResourceKind::Team => {
                let found: TeamSearch = self.get_json("/api/teams/search", &[("name", name)])?;
                Ok(found.teams.into_iter().find(|t| t.name == name).map(|t| Identity::Id(t.id)))
            }
            ResourceKind::Folder => {
                let hits: Vec<FolderHit> =
                    self.get_json("/api/search", &[("type", "dash-folder"), ("query", name)])?;
                Ok(hits.into_iter().find(|f| f.title == name).map(|f| Identity::Uid(f.uid)))
            }
            ResourceKind::Datasource => {
                let all: Vec<DatasourceHit> = self.get_json("/api/datasources", &[])?;
                Ok(all.into_iter().find(|d| d.name == name && !d.uid.is_empty()).map(|d| Identity::Uid(d.uid)))
            }
        }
    }

    fn create(&self, kind: ResourceKind, name: &str, attrs: &Map<String, Value>) -> ApiResult<Identity> {
        match kind {
            ResourceKind::Team => {
                let created: TeamCreated = self.post_json("/api/teams", &json!({ "name": name }))?;
                Ok(Identity::Id(created.team_id))
            }
            ResourceKind::Folder => {
                let created: UidCreated = self.post_json("/api/folders", &json!({ "title": name }))?;
                created
                    .uid
                    .map(Identity::Uid)
                    .ok_or_else(|| ApiError::Unreadable("folder creation returned no uid".into()))
            }
            ResourceKind::Datasource => {
                let mut body = attrs.clone();
                body.insert("name".into(), Value::String(name.to_string()));
                let created: UidCreated = self.post_json("/api/datasources", &Value::Object(body))?;
                created
                    .uid
                    .or(created.datasource.map(|d| d.uid))
                    .map(Identity::Uid)
                    .ok_or_else(|| ApiError::Unreadable("datasource creation returned no uid".into()))
            }
        }
    }

    fn get_permissions(&self, kind: ResourceKind, identity: &Identity) -> ApiResult<Vec<PermissionGrant>> {
        let path = Self::permissions_path(kind, identity)?;
        let listing: PermissionListing = self.get_json(&path, &[])?;
        let mut grants = Vec::new();
        for item in listing.into_items() {
            if let Some(grant) = item.into_grant()? {
                grants.push(grant);
            }
        }
        Ok(grants)
    }

    fn set_permissions(&self, kind: ResourceKind, identity: &Identity, grants: &[PermissionGrant]) -> ApiResult<()> {
        let path = Self::permissions_path(kind, identity)?;
        let items: Vec<PermissionItem> = grants.iter().map(PermissionItem::from_grant).collect();
        let _: Value = self.post_json(&path, &json!({ "items": items }))?;
        Ok(())
    }

    fn link_external_group(&self, team_id: u64, group_id: &str) -> ApiResult<()> {
        let _: Value = self.post_json(&format!("/api/teams/{team_id}/groups"), &json!({ "groupId": group_id }))?;
        Ok(())
    }
}
