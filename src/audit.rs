//! Audit events
//!
//! Components report what they did through an `EventSink` handed to them at
//! construction. The sink is a side channel: emitting never fails the caller.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::model::ResourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

/// One structured audit record.
///
/// Field names follow the existing JSON log format (`log-level`,
/// `resource_name`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(rename = "log-level")]
    pub level: AuditLevel,
    pub message: String,
    #[serde(rename = "resource_name")]
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Error kind tag for failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix time in milliseconds
    pub executed: u64,
}

impl AuditEvent {
    /// `resource_type` is a tag such as `folder_name`, rendered as `folder_name: acme`
    pub fn new(level: AuditLevel, message: impl Into<String>, resource_type: &str, resource_value: &str) -> Self {
        Self {
            level,
            message: message.into(),
            resource: format!("{resource_type}: {resource_value}"),
            request_id: None,
            error: None,
            executed: now_millis(),
        }
    }

    pub fn info(message: impl Into<String>, kind: ResourceKind, value: &str) -> Self {
        Self::new(AuditLevel::Info, message, kind.name_tag(), value)
    }

    pub fn warn(message: impl Into<String>, kind: ResourceKind, value: &str) -> Self {
        Self::new(AuditLevel::Warn, message, kind.name_tag(), value)
    }

    pub fn error(message: impl Into<String>, kind: ResourceKind, value: &str) -> Self {
        Self::new(AuditLevel::Error, message, kind.name_tag(), value)
    }

    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }

    pub fn with_error(mut self, kind: &str) -> Self {
        self.error = Some(kind.to_string());
        self
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Receiver of audit events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Re-emits events through `tracing` under the `audit` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: AuditEvent) {
        let request_id = event.request_id.as_deref().unwrap_or("-");
        match event.level {
            AuditLevel::Info => {
                tracing::info!(target: "audit", resource = %event.resource, request_id, "{}", event.message)
            }
            AuditLevel::Warn => {
                tracing::warn!(target: "audit", resource = %event.resource, request_id, "{}", event.message)
            }
            AuditLevel::Error => tracing::error!(
                target: "audit",
                resource = %event.resource,
                request_id,
                error = event.error.as_deref().unwrap_or("-"),
                "{}",
                event.message
            ),
        }
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).push(event);
    }
}

/// Delivers every event to each inner sink in order
#[derive(Clone, Default)]
pub struct Fanout {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for Fanout {
    fn emit(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

/// Stamps a request id on every event that does not carry one yet
pub struct RequestSink {
    inner: Arc<dyn EventSink>,
    request_id: String,
}

impl RequestSink {
    pub fn new(inner: Arc<dyn EventSink>, request_id: impl Into<String>) -> Self {
        Self { inner, request_id: request_id.into() }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl EventSink for RequestSink {
    fn emit(&self, mut event: AuditEvent) {
        if event.request_id.is_none() {
            event.request_id = Some(self.request_id.clone());
        }
        self.inner.emit(event);
    }
}
