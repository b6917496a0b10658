//! Teamgrant REST API Server
//!
//! Run with: cargo run --features server --bin teamgrant-server -- --config config.json
//!
//! Endpoints:
//!   GET  /health                    - Liveness and version
//!   POST /create-grafana-resources  - Reconcile one account
//!   POST /teams/:id/groups          - Link an external group to a team
//!   GET  /audit?from=&limit=        - Journal entries (when a journal is configured)

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use teamgrant::{
    AuditEvent, Config, Error, EventSink, Fanout, HttpResourceApi, Journal, LinkOutcome, ReconciliationRequest,
    ReconciliationResult, Reconciler, ResourceKind, TracingSink,
};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "teamgrant-server", version, about = "Reconciles account folders and team grants")]
struct Cli {
    /// JSON config file; environment variables fill in when absent
    #[arg(long, env = "TEAMGRANT_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "TEAMGRANT_API_URL")]
    api_url: Option<String>,

    #[arg(long, env = "TEAMGRANT_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    #[arg(long, env = "TEAMGRANT_LISTEN")]
    listen: Option<String>,

    /// Directory of the LMDB audit journal
    #[arg(long, env = "TEAMGRANT_JOURNAL")]
    journal: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> teamgrant::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::read_file(path)?,
            None => {
                let mut c = Config::default();
                c.apply_env(|key| std::env::var(key).ok())?;
                c
            }
        };
        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        if let Some(token) = &self.api_token {
            config.api_token = token.clone();
        }
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(journal) = &self.journal {
            config.journal_path = Some(journal.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    reconciler: Arc<Reconciler<HttpResourceApi>>,
    journal: Option<Journal>,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkGroupReq {
    group_id: String,
}

#[derive(Serialize)]
struct LinkGroupRes {
    status: &'static str,
    team_id: u64,
    group_id: String,
    already_linked: bool,
}

#[derive(Deserialize)]
struct AuditQuery {
    from: Option<u64>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct AuditEntry {
    seq: u64,
    #[serde(flatten)]
    event: AuditEvent,
}

#[derive(Serialize)]
struct HealthRes {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ErrorRes {
    status: &'static str,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    existing: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

struct ApiFailure(Error);

impl From<Error> for ApiFailure {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

fn status_for(e: &Error) -> StatusCode {
    match e {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::ResourceConflict { .. } => StatusCode::CONFLICT,
        Error::PermissionWriteFailed { ambiguous: true, .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::UpstreamUnavailable { .. } | Error::CreationFailed { .. } | Error::PermissionWriteFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        Error::Journal(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = ErrorRes {
            status: "error",
            error: self.0.kind(),
            message: self.0.to_string(),
            existing: self.0.existing_identity().map(ToString::to_string),
        };
        (status, Json(body)).into_response()
    }
}

fn internal(message: impl Into<String>) -> ApiFailure {
    ApiFailure(Error::Config(message.into()))
}

/// Unreadable or ill-typed bodies are validation errors, audited like any other failure
fn rejected(state: &AppState, rejection: JsonRejection, kind: ResourceKind, value: &str) -> ApiFailure {
    let error = Error::Validation(format!("invalid request body: {}", rejection.body_text()));
    ApiFailure(state.reconciler.reject(error, kind, value))
}

// ============================================================================
// Handlers
// ============================================================================

async fn get_health() -> Json<HealthRes> {
    Json(HealthRes { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

async fn post_reconcile(
    State(state): State<AppState>,
    payload: Result<Json<ReconciliationRequest>, JsonRejection>,
) -> Result<Json<ReconciliationResult>, ApiFailure> {
    let Json(req) = payload.map_err(|r| rejected(&state, r, ResourceKind::Folder, "-"))?;
    let reconciler = state.reconciler.clone();
    let result = tokio::task::spawn_blocking(move || reconciler.reconcile(&req))
        .await
        .map_err(|e| internal(format!("reconcile task failed: {e}")))??;
    Ok(Json(result))
}

async fn post_link_group(
    State(state): State<AppState>,
    Path(team_id): Path<u64>,
    payload: Result<Json<LinkGroupReq>, JsonRejection>,
) -> Result<Json<LinkGroupRes>, ApiFailure> {
    let Json(req) = payload.map_err(|r| rejected(&state, r, ResourceKind::Team, &team_id.to_string()))?;
    let reconciler = state.reconciler.clone();
    let group_id = req.group_id.clone();
    let outcome = tokio::task::spawn_blocking(move || reconciler.link_group(team_id, &group_id))
        .await
        .map_err(|e| internal(format!("link task failed: {e}")))??;
    Ok(Json(LinkGroupRes {
        status: "success",
        team_id,
        group_id: req.group_id,
        already_linked: outcome == LinkOutcome::AlreadyLinked,
    }))
}

async fn get_audit(
    State(state): State<AppState>,
    Query(q): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEntry>>, ApiFailure> {
    let journal = state.journal.clone().ok_or_else(|| internal("no audit journal configured"))?;
    let entries = journal.list(q.from.unwrap_or(1), q.limit.unwrap_or(100).min(1000))?;
    Ok(Json(entries.into_iter().map(|(seq, event)| AuditEntry { seq, event }).collect()))
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    // The blocking HTTP client must be built outside the async runtime
    let api = Arc::new(HttpResourceApi::from_config(&config)?);

    let journal = match &config.journal_path {
        Some(path) => {
            info!("Opening audit journal at: {}", path.display());
            Some(Journal::open(path)?)
        }
        None => None,
    };
    let mut sink = Fanout::new().with(Arc::new(TracingSink));
    if let Some(j) = &journal {
        sink = sink.with(Arc::new(j.clone()));
    }
    let events: Arc<dyn EventSink> = Arc::new(sink);

    let reconciler = Reconciler::new(api, events).with_options(config.reconcile_options());
    let state = AppState { reconciler: Arc::new(reconciler), journal };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/health", get(get_health))
        .route("/create-grafana-resources", post(post_reconcile))
        .route("/teams/:id/groups", post(post_link_group))
        .route("/audit", get(get_audit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&config.listen).await?;
        info!("Teamgrant server running at http://{}", config.listen);
        info!("Reconciling against {}", config.api_url);
        if let Err(e) = axum::serve(listener, app).await {
            error!("server error: {e}");
            return Err(e);
        }
        Ok::<(), std::io::Error>(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_errors_are_bad_requests() {
        let resp = ApiFailure(Error::Validation("invalid request body: missing field `readonly`".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn ambiguous_writes_are_unavailable() {
        let e = Error::PermissionWriteFailed {
            target: "folder:fo-0001".into(),
            ambiguous: true,
            source: teamgrant::ApiError::Timeout("timed out".into()),
        };
        assert_eq!(status_for(&e), StatusCode::SERVICE_UNAVAILABLE);
    }
}
