//! In-memory entity store for tests and development.
//!
//! Mirrors the Postgres store's semantics, including tenant invisibility:
//! rows of other tenants behave exactly as if they did not exist.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use palisade_auth::RequestContext;
use palisade_core::{CoreError, CoreResult, Page, SortDir};

use super::{sort_column, EntityRecord, EntityStore};

#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    rows: RwLock<HashMap<(&'static str, Uuid), EntityRecord>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of live (non-soft-deleted) rows in a table, across tenants.
    /// Test helper.
    pub fn live_rows(&self, table: &'static str) -> usize {
        self.rows
            .read()
            .unwrap()
            .iter()
            .filter(|((t, _), r)| *t == table && !r.meta.is_deleted())
            .count()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn insert(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        record: EntityRecord,
    ) -> CoreResult<EntityRecord> {
        if record.tenant_id != ctx.tenant_id() {
            return Err(CoreError::validation("record tenant does not match context"));
        }
        let mut rows = self.rows.write().unwrap();
        if rows.contains_key(&(table, record.id)) {
            return Err(CoreError::conflict(format!("duplicate key in {table}")));
        }
        rows.insert((table, record.id), record.clone());
        Ok(record)
    }

    async fn fetch(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        id: Uuid,
    ) -> CoreResult<Option<EntityRecord>> {
        let rows = self.rows.read().unwrap();
        Ok(rows
            .get(&(table, id))
            .filter(|r| r.tenant_id == ctx.tenant_id() && !r.meta.is_deleted())
            .cloned())
    }

    async fn update_body(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        id: Uuid,
        expected_version: i64,
        body: serde_json::Value,
    ) -> CoreResult<EntityRecord> {
        let mut rows = self.rows.write().unwrap();
        let record = rows
            .get_mut(&(table, id))
            .filter(|r| r.tenant_id == ctx.tenant_id() && !r.meta.is_deleted())
            .ok_or(CoreError::NotFound)?;

        record.meta.check_version(expected_version)?;
        record.body = body;
        record.meta.touch(ctx.user_id(), Utc::now());
        Ok(record.clone())
    }

    async fn soft_delete(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        id: Uuid,
    ) -> CoreResult<()> {
        let mut rows = self.rows.write().unwrap();
        let record = rows
            .get_mut(&(table, id))
            .filter(|r| r.tenant_id == ctx.tenant_id() && !r.meta.is_deleted())
            .ok_or(CoreError::NotFound)?;

        record.meta.mark_deleted(ctx.user_id(), Utc::now());
        Ok(())
    }

    async fn purge(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        id: Uuid,
    ) -> CoreResult<()> {
        let mut rows = self.rows.write().unwrap();
        // Deliberately no deleted_at filter: purging a soft-deleted row is
        // the whole point of this verb.
        let exists = rows
            .get(&(table, id))
            .is_some_and(|r| r.tenant_id == ctx.tenant_id());
        if !exists {
            return Err(CoreError::NotFound);
        }
        rows.remove(&(table, id));
        Ok(())
    }

    async fn list(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        page: &Page,
    ) -> CoreResult<Vec<EntityRecord>> {
        let (key, dir) = page
            .sort
            .as_ref()
            .map(|s| (s.key.as_str(), s.dir))
            .unwrap_or(("created_at", SortDir::Desc));
        sort_column(key)?;

        let rows = self.rows.read().unwrap();
        let mut result: Vec<EntityRecord> = rows
            .iter()
            .filter(|((t, _), r)| {
                *t == table && r.tenant_id == ctx.tenant_id() && !r.meta.is_deleted()
            })
            .map(|(_, r)| r.clone())
            .collect();

        result.sort_by_key(|r| match key {
            "updated_at" => r.meta.updated_at,
            _ => r.meta.created_at,
        });
        if dir == SortDir::Desc {
            result.reverse();
        }

        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let result = result
            .into_iter()
            .skip(offset)
            .take(page.limit() as usize)
            .collect();
        Ok(result)
    }
}
