//! Audit event model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use palisade_auth::RequestContext;
use palisade_core::{ResourceRef, SessionId, TenantId, UserId};

/// What was attempted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Purge,
    Read,
    SequenceNext,
    SequenceReset,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Purge => "purge",
            Self::Read => "read",
            Self::SequenceNext => "sequence_next",
            Self::SequenceReset => "sequence_reset",
        }
    }
}

/// How it ended. A failed operation is itself an auditable fact.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Denied => "denied",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Originating HTTP request, when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
}

/// Immutable audit record. Append-only; never updated or deleted by
/// application code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: AuditAction,
    pub severity: Severity,
    pub description: String,
    pub outcome: AuditOutcome,
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub session_id: Option<SessionId>,
    pub resource: Option<ResourceRef>,
    pub request: Option<RequestInfo>,
    /// Free-form metadata; always carries `correlation_id`.
    pub metadata: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Build an event for an operation performed under `ctx`.
    ///
    /// Severity defaults from the outcome (success → info, everything else →
    /// warning); callers may raise it with [`AuditEvent::with_severity`].
    pub fn for_operation(
        ctx: &RequestContext,
        action: AuditAction,
        resource: Option<ResourceRef>,
        outcome: AuditOutcome,
    ) -> Self {
        let severity = match outcome {
            AuditOutcome::Success => Severity::Info,
            AuditOutcome::Failure | AuditOutcome::Denied => Severity::Warning,
        };
        let description = match &resource {
            Some(r) => format!("{} {}", action.as_str(), r.kind),
            None => action.as_str().to_string(),
        };

        Self {
            id: Uuid::now_v7(),
            action,
            severity,
            description,
            outcome,
            tenant_id: ctx.tenant_id(),
            user_id: ctx.user_id(),
            session_id: ctx.actor().and_then(|a| a.session_id),
            resource,
            request: None,
            metadata: serde_json::json!({
                "correlation_id": ctx.correlation_id().to_string(),
            }),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_request(mut self, request: RequestInfo) -> Self {
        self.request = Some(request);
        self
    }

    /// Attach a metadata entry (e.g. the stable error code on failures).
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if let Some(map) = self.metadata.as_object_mut() {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get("correlation_id").and_then(|v| v.as_str())
    }
}
