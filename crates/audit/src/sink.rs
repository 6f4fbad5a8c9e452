//! Audit sink abstraction.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use palisade_auth::RequestContext;
use palisade_core::CoreResult;

use crate::event::AuditEvent;

/// Destination for audit events.
///
/// Implementations must treat the log as append-only. The context is passed
/// so storage-backed sinks can publish session claims for their own write.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, ctx: &RequestContext, event: AuditEvent) -> CoreResult<()>;
}

/// In-memory sink for tests and development.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, _ctx: &RequestContext, event: AuditEvent) -> CoreResult<()> {
        self.events.write().unwrap().push(event);
        Ok(())
    }
}

#[async_trait]
impl AuditSink for Arc<InMemoryAuditSink> {
    async fn record(&self, ctx: &RequestContext, event: AuditEvent) -> CoreResult<()> {
        (**self).record(ctx, event).await
    }
}
