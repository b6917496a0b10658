//! Error types for teamgrant
//!
//! `ApiError` is what a `ResourceApi` reports. `Error` is the taxonomy the
//! resolver, merger, linker and orchestrator surface to callers, so that a
//! retryable transport failure can be told apart from a policy conflict
//! without looking at response bodies.

use thiserror::Error;

use crate::model::{Identity, ResourceKind};

/// Failures of a single remote call
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP 404, or the addressed resource is unknown.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote already has this resource or association.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The call timed out; the remote may or may not have applied it.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Could not reach the remote at all.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Any other non-success HTTP status.
    #[error("remote returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The remote accepted a write (2xx) but its response could not be read,
    /// so what it committed is unknown.
    #[error("unreadable response to accepted call: {0}")]
    Unreadable(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when the remote may have committed the call even though it failed.
    /// The state must be re-read before any retry.
    pub fn is_ambiguous(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Unreadable(_) => true,
            Self::Status { status, .. } => matches!(status, 502 | 504),
            Self::Http(e) => !e.is_connect() && !e.is_builder() && !e.is_decode(),
            Self::NotFound(_)
            | Self::AlreadyExists(_)
            | Self::Connection(_)
            | Self::InvalidResponse(_)
            | Self::Json(_) => false,
        }
    }
}

/// Reconciliation failures
#[derive(Debug, Error)]
pub enum Error {
    /// Transport or remote failure on a read or a non-creating call.
    #[error("upstream unavailable during {operation}: {source}")]
    UpstreamUnavailable {
        operation: String,
        #[source]
        source: ApiError,
    },

    /// Create-or-get found an existing team/folder while this system is
    /// expected to be its sole creator.
    #[error("{kind} '{name}' already exists with identity {identity}")]
    ResourceConflict {
        kind: ResourceKind,
        name: String,
        identity: Identity,
    },

    /// Creation failed after the name was confirmed absent.
    #[error("failed to create {kind} '{name}': {source}")]
    CreationFailed {
        kind: ResourceKind,
        name: String,
        #[source]
        source: ApiError,
    },

    /// Writing a merged permission set failed. When `ambiguous`, the remote
    /// state is unknown and must be re-read before retrying.
    #[error("failed to write permissions on {target}: {source}")]
    PermissionWriteFailed {
        target: String,
        ambiguous: bool,
        #[source]
        source: ApiError,
    },

    /// Malformed inbound request.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Local audit journal failure.
    #[error("audit journal error: {0}")]
    Journal(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn upstream(operation: impl Into<String>, source: ApiError) -> Self {
        Self::UpstreamUnavailable { operation: operation.into(), source }
    }

    /// Stable tag for audit events and HTTP error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::ResourceConflict { .. } => "resource_conflict",
            Self::CreationFailed { .. } => "creation_failed",
            Self::PermissionWriteFailed { .. } => "permission_write_failed",
            Self::Validation(_) => "validation_error",
            Self::Journal(_) => "journal_error",
            Self::Config(_) => "config_error",
        }
    }

    /// Whether a caller may retry without changing its input.
    /// A failed permission write is retryable only after a re-read.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::CreationFailed { .. } | Self::PermissionWriteFailed { .. }
        )
    }

    /// Identity of the pre-existing resource on a conflict
    pub fn existing_identity(&self) -> Option<&Identity> {
        match self {
            Self::ResourceConflict { identity, .. } => Some(identity),
            _ => None,
        }
    }
}

/// Result type alias for teamgrant operations
pub type Result<T> = std::result::Result<T, Error>;

/// Convert a storage error into `Error::Journal`
pub fn err<E: std::error::Error>(e: E) -> Error {
    Error::Journal(e.to_string())
}
