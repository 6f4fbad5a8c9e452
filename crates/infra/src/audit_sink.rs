//! Postgres audit sink.
//!
//! Writes run in their own claims-scoped transaction, after (and outside of)
//! the business transaction: a failed business operation must still be
//! recordable, and a sink failure must never roll the business outcome back.
//! The table policies make the log append-only for application roles.

use async_trait::async_trait;
use tracing::instrument;

use palisade_audit::{AuditEvent, AuditSink};
use palisade_auth::RequestContext;
use palisade_core::{CoreError, CoreResult};

use crate::bridge::IsolationBridge;
use crate::error::map_sqlx_error;

#[derive(Debug, Clone)]
pub struct PgAuditSink {
    bridge: IsolationBridge,
}

impl PgAuditSink {
    pub fn new(bridge: IsolationBridge) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    #[instrument(
        skip(self, ctx, event),
        fields(
            tenant_id = %ctx.tenant_id(),
            correlation_id = %ctx.correlation_id()
        ),
        err
    )]
    async fn record(&self, ctx: &RequestContext, event: AuditEvent) -> CoreResult<()> {
        if event.tenant_id != ctx.tenant_id() {
            return Err(CoreError::validation("audit event tenant does not match context"));
        }

        self.bridge
            .with_transaction(ctx, move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO audit_events \
                         (id, tenant_id, action, severity, description, outcome, \
                          user_id, session_id, resource_kind, resource_id, \
                          request_method, request_url, metadata, recorded_at) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
                    )
                    .bind(event.id)
                    .bind(event.tenant_id.as_uuid())
                    .bind(event.action.as_str())
                    .bind(event.severity.as_str())
                    .bind(&event.description)
                    .bind(event.outcome.as_str())
                    .bind(event.user_id.map(|u| *u.as_uuid()))
                    .bind(event.session_id.map(|s| *s.as_uuid()))
                    .bind(event.resource.as_ref().map(|r| r.kind.clone()))
                    .bind(event.resource.as_ref().map(|r| r.id))
                    .bind(event.request.as_ref().map(|r| r.method.clone()))
                    .bind(event.request.as_ref().map(|r| r.url.clone()))
                    .bind(&event.metadata)
                    .bind(event.recorded_at)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| map_sqlx_error("record_audit_event", e))?;
                    Ok(())
                })
            })
            .await
    }
}
