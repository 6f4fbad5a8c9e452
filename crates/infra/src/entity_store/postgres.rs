//! Postgres entity store.
//!
//! Every verb runs through the isolation bridge, so the row-level-security
//! policies apply even to queries that forget their tenant filter. The
//! tenant predicate is still written into each statement as defense in
//! depth.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row};
use tracing::instrument;
use uuid::Uuid;

use palisade_auth::RequestContext;
use palisade_core::{
    CoreError, CoreResult, EntityMeta, Page, SortDir, TenantId, UserId,
};

use crate::bridge::IsolationBridge;
use crate::error::map_sqlx_error;

use super::{sort_column, EntityRecord, EntityStore};

const COLUMNS: &str = "id, tenant_id, body, version, created_at, created_by, \
                       updated_at, updated_by, deleted_at, deleted_by";

#[derive(Debug, Clone)]
pub struct PgEntityStore {
    bridge: IsolationBridge,
}

impl PgEntityStore {
    pub fn new(bridge: IsolationBridge) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    #[instrument(
        skip(self, ctx, record),
        fields(tenant_id = %ctx.tenant_id(), table),
        err
    )]
    async fn insert(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        record: EntityRecord,
    ) -> CoreResult<EntityRecord> {
        if record.tenant_id != ctx.tenant_id() {
            return Err(CoreError::validation("record tenant does not match context"));
        }

        let sql = format!(
            "INSERT INTO {table} \
             (id, tenant_id, body, version, created_at, created_by, \
              updated_at, updated_by, deleted_at, deleted_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        );

        self.bridge
            .with_transaction(ctx, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(&sql)
                        .bind(record.id)
                        .bind(record.tenant_id.as_uuid())
                        .bind(&record.body)
                        .bind(record.meta.version)
                        .bind(record.meta.created_at)
                        .bind(record.meta.created_by.map(|u| *u.as_uuid()))
                        .bind(record.meta.updated_at)
                        .bind(record.meta.updated_by.map(|u| *u.as_uuid()))
                        .bind(record.meta.deleted_at)
                        .bind(record.meta.deleted_by.map(|u| *u.as_uuid()))
                        .fetch_one(&mut *conn)
                        .await
                        .map_err(|e| map_sqlx_error("insert_entity", e))?;

                    EntityRow::from_row(&row)
                        .map(EntityRecord::from)
                        .map_err(|e| CoreError::storage(format!("decode row: {e}")))
                })
            })
            .await
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), table), err)]
    async fn fetch(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        id: Uuid,
    ) -> CoreResult<Option<EntityRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {table} \
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL"
        );
        let tenant_id = *ctx.tenant_id().as_uuid();

        self.bridge
            .with_transaction(ctx, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(&sql)
                        .bind(id)
                        .bind(tenant_id)
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(|e| map_sqlx_error("fetch_entity", e))?;

                    row.map(|row| {
                        EntityRow::from_row(&row)
                            .map(EntityRecord::from)
                            .map_err(|e| CoreError::storage(format!("decode row: {e}")))
                    })
                    .transpose()
                })
            })
            .await
    }

    #[instrument(
        skip(self, ctx, body),
        fields(tenant_id = %ctx.tenant_id(), table, expected_version),
        err
    )]
    async fn update_body(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        id: Uuid,
        expected_version: i64,
        body: serde_json::Value,
    ) -> CoreResult<EntityRecord> {
        let update_sql = format!(
            "UPDATE {table} \
             SET body = $1, version = version + 1, updated_at = $2, updated_by = $3 \
             WHERE id = $4 AND tenant_id = $5 AND version = $6 AND deleted_at IS NULL \
             RETURNING {COLUMNS}"
        );
        let probe_sql = format!(
            "SELECT version FROM {table} \
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL"
        );
        let tenant_id = *ctx.tenant_id().as_uuid();
        let updated_by = ctx.user_id().map(|u| *u.as_uuid());

        self.bridge
            .with_transaction(ctx, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(&update_sql)
                        .bind(&body)
                        .bind(Utc::now())
                        .bind(updated_by)
                        .bind(id)
                        .bind(tenant_id)
                        .bind(expected_version)
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(|e| map_sqlx_error("update_entity", e))?;

                    if let Some(row) = row {
                        return EntityRow::from_row(&row)
                            .map(EntityRecord::from)
                            .map_err(|e| CoreError::storage(format!("decode row: {e}")));
                    }

                    // Nothing matched: distinguish a missing row from a
                    // stale version, inside the same transaction.
                    let probe = sqlx::query(&probe_sql)
                        .bind(id)
                        .bind(tenant_id)
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(|e| map_sqlx_error("probe_entity_version", e))?;

                    match probe {
                        None => Err(CoreError::NotFound),
                        Some(row) => {
                            let actual: i64 = row
                                .try_get("version")
                                .map_err(|e| CoreError::storage(format!("decode version: {e}")))?;
                            Err(CoreError::OptimisticLock { expected: expected_version, actual })
                        }
                    }
                })
            })
            .await
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), table), err)]
    async fn soft_delete(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        id: Uuid,
    ) -> CoreResult<()> {
        let sql = format!(
            "UPDATE {table} SET deleted_at = $1, deleted_by = $2 \
             WHERE id = $3 AND tenant_id = $4 AND deleted_at IS NULL"
        );
        let tenant_id = *ctx.tenant_id().as_uuid();
        let deleted_by = ctx.user_id().map(|u| *u.as_uuid());

        self.bridge
            .with_transaction(ctx, move |conn| {
                Box::pin(async move {
                    let done = sqlx::query(&sql)
                        .bind(Utc::now())
                        .bind(deleted_by)
                        .bind(id)
                        .bind(tenant_id)
                        .execute(&mut *conn)
                        .await
                        .map_err(|e| map_sqlx_error("soft_delete_entity", e))?;

                    if done.rows_affected() == 0 {
                        return Err(CoreError::NotFound);
                    }
                    Ok(())
                })
            })
            .await
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), table), err)]
    async fn purge(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        id: Uuid,
    ) -> CoreResult<()> {
        // No deleted_at predicate: the DELETE policy allows purging rows
        // that were already soft-deleted.
        let sql = format!("DELETE FROM {table} WHERE id = $1 AND tenant_id = $2");
        let tenant_id = *ctx.tenant_id().as_uuid();

        self.bridge
            .with_transaction(ctx, move |conn| {
                Box::pin(async move {
                    let done = sqlx::query(&sql)
                        .bind(id)
                        .bind(tenant_id)
                        .execute(&mut *conn)
                        .await
                        .map_err(|e| map_sqlx_error("purge_entity", e))?;

                    if done.rows_affected() == 0 {
                        return Err(CoreError::NotFound);
                    }
                    Ok(())
                })
            })
            .await
    }

    #[instrument(skip(self, ctx, page), fields(tenant_id = %ctx.tenant_id(), table), err)]
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
        let column = sort_column(key)?;
        let direction = match dir {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        };

        let sql = format!(
            "SELECT {COLUMNS} FROM {table} \
             WHERE tenant_id = $1 AND deleted_at IS NULL \
             ORDER BY {column} {direction} \
             LIMIT $2 OFFSET $3"
        );
        let tenant_id = *ctx.tenant_id().as_uuid();
        let limit = i64::from(page.limit());
        let offset = i64::try_from(page.offset()).unwrap_or(i64::MAX);

        self.bridge
            .with_transaction(ctx, move |conn| {
                Box::pin(async move {
                    let rows = sqlx::query(&sql)
                        .bind(tenant_id)
                        .bind(limit)
                        .bind(offset)
                        .fetch_all(&mut *conn)
                        .await
                        .map_err(|e| map_sqlx_error("list_entities", e))?;

                    let mut records = Vec::with_capacity(rows.len());
                    for row in rows {
                        let record = EntityRow::from_row(&row)
                            .map(EntityRecord::from)
                            .map_err(|e| CoreError::storage(format!("decode row: {e}")))?;
                        records.push(record);
                    }
                    Ok(records)
                })
            })
            .await
    }
}

#[derive(Debug)]
struct EntityRow {
    id: Uuid,
    tenant_id: Uuid,
    body: serde_json::Value,
    version: i64,
    created_at: DateTime<Utc>,
    created_by: Option<Uuid>,
    updated_at: DateTime<Utc>,
    updated_by: Option<Uuid>,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<Uuid>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for EntityRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(EntityRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            body: row.try_get("body")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            created_by: row.try_get("created_by")?,
            updated_at: row.try_get("updated_at")?,
            updated_by: row.try_get("updated_by")?,
            deleted_at: row.try_get("deleted_at")?,
            deleted_by: row.try_get("deleted_by")?,
        })
    }
}

impl From<EntityRow> for EntityRecord {
    fn from(row: EntityRow) -> Self {
        EntityRecord {
            id: row.id,
            tenant_id: TenantId::from_uuid(row.tenant_id),
            body: row.body,
            meta: EntityMeta {
                version: row.version,
                created_at: row.created_at,
                created_by: row.created_by.map(UserId::from_uuid),
                updated_at: row.updated_at,
                updated_by: row.updated_by.map(UserId::from_uuid),
                deleted_at: row.deleted_at,
                deleted_by: row.deleted_by.map(UserId::from_uuid),
            },
        }
    }
}
