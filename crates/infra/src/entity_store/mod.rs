//! Storage seam for audited tenant-scoped entities.
//!
//! Every audited table shares one shape: app-generated id, `tenant_id`, the
//! business body as JSONB, and the `EntityMeta` columns (version, actor
//! stamps, soft delete). The trait below is implemented by the Postgres
//! store (each verb runs through the isolation bridge) and by an in-memory
//! store that mirrors the same semantics for tests.

mod memory;
mod postgres;

pub use memory::InMemoryEntityStore;
pub use postgres::PgEntityStore;

use async_trait::async_trait;
use uuid::Uuid;

use palisade_auth::RequestContext;
use palisade_core::{CoreResult, EntityMeta, Page, TenantId};

/// A stored row in wire form: body still serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub body: serde_json::Value,
    pub meta: EntityMeta,
}

/// Row-level operations beneath the audited mutation core.
///
/// Contract notes:
/// - rows belonging to another tenant are invisible: reads return `None`,
///   writes `NotFound` (existence must not leak);
/// - `fetch`/`list`/`update_body` exclude soft-deleted rows; `purge` does
///   not, so a hard delete can remove an already soft-deleted row;
/// - `update_body` performs the optimistic version check atomically with
///   the write and stamps the updating actor.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn insert(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        record: EntityRecord,
    ) -> CoreResult<EntityRecord>;

    async fn fetch(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        id: Uuid,
    ) -> CoreResult<Option<EntityRecord>>;

    async fn update_body(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        id: Uuid,
        expected_version: i64,
        body: serde_json::Value,
    ) -> CoreResult<EntityRecord>;

    async fn soft_delete(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        id: Uuid,
    ) -> CoreResult<()>;

    async fn purge(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        id: Uuid,
    ) -> CoreResult<()>;

    async fn list(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        page: &Page,
    ) -> CoreResult<Vec<EntityRecord>>;
}

/// Sort keys every audited table supports; validated again here so a bad
/// key can never reach SQL even if a service forgets its own allow-list.
pub(crate) fn sort_column(key: &str) -> CoreResult<&'static str> {
    match key {
        "created_at" => Ok("created_at"),
        "updated_at" => Ok("updated_at"),
        other => Err(palisade_core::CoreError::validation(format!(
            "unsupported sort key '{other}'"
        ))),
    }
}
