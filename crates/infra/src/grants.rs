//! Grant loading and catalog seeding.
//!
//! The loader turns one tenant's stored roles, parent edges and grant rows
//! into a resolved `PolicySet`. Seeding applies the versioned permission
//! catalog to the tenant's grant tables: idempotent upserts, with rows that
//! disappeared from the catalog deactivated by timestamp rather than
//! deleted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{instrument, warn};
use uuid::Uuid;

use palisade_auth::{
    Grant, PermissionCatalog, PermissionCode, PolicySet, RequestContext, RoleCode, RoleGraph,
    RoleRecord,
};
use palisade_core::{CoreResult, ResourceRef, UserId};

use crate::bridge::IsolationBridge;
use crate::error::map_sqlx_error;

#[derive(Debug, Clone)]
pub struct PgGrantLoader {
    bridge: IsolationBridge,
}

impl PgGrantLoader {
    pub fn new(bridge: IsolationBridge) -> Self {
        Self { bridge }
    }

    /// Load the tenant's roles and grants and resolve them into a
    /// `PolicySet`.
    ///
    /// Recompute whenever a grant changes; evaluation itself is pure.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub async fn load_policy(&self, ctx: &RequestContext) -> CoreResult<PolicySet> {
        let tenant_id = ctx.tenant_id();
        let tenant_uuid = *tenant_id.as_uuid();

        let (records, grants) = self
            .bridge
            .with_transaction(ctx, move |conn| {
                Box::pin(async move {
                    let role_rows = sqlx::query(
                        "SELECT id, code, name, is_active, priority \
                         FROM roles WHERE tenant_id = $1",
                    )
                    .bind(tenant_uuid)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| map_sqlx_error("load_roles", e))?;

                    let parent_rows = sqlx::query(
                        "SELECT r.code AS role_code, p.code AS parent_code \
                         FROM role_parents rp \
                         JOIN roles r ON r.id = rp.role_id \
                         JOIN roles p ON p.id = rp.parent_role_id \
                         WHERE rp.tenant_id = $1",
                    )
                    .bind(tenant_uuid)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| map_sqlx_error("load_role_parents", e))?;

                    let grant_rows = sqlx::query(
                        "SELECT r.code AS role_code, rp.permission_code, rp.is_denied, \
                                rp.is_active, rp.resource_kind, rp.resource_id, \
                                rp.effective_from, rp.deactivated_at \
                         FROM role_permissions rp \
                         JOIN roles r ON r.id = rp.role_id \
                         WHERE rp.tenant_id = $1",
                    )
                    .bind(tenant_uuid)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| map_sqlx_error("load_grants", e))?;

                    let mut parents: HashMap<String, Vec<RoleCode>> = HashMap::new();
                    for row in &parent_rows {
                        let role: String = row
                            .try_get("role_code")
                            .map_err(|e| map_sqlx_error("decode_role_parent", e))?;
                        let parent: String = row
                            .try_get("parent_code")
                            .map_err(|e| map_sqlx_error("decode_role_parent", e))?;
                        parents.entry(role).or_default().push(RoleCode::new(parent));
                    }

                    let mut records = Vec::with_capacity(role_rows.len());
                    for row in &role_rows {
                        let code: String = row
                            .try_get("code")
                            .map_err(|e| map_sqlx_error("decode_role", e))?;
                        let mut record = RoleRecord::new(
                            tenant_id,
                            RoleCode::new(code.clone()),
                            row.try_get::<String, _>("name")
                                .map_err(|e| map_sqlx_error("decode_role", e))?,
                        );
                        record.id = row
                            .try_get("id")
                            .map_err(|e| map_sqlx_error("decode_role", e))?;
                        record.is_active = row
                            .try_get("is_active")
                            .map_err(|e| map_sqlx_error("decode_role", e))?;
                        record.priority = row
                            .try_get("priority")
                            .map_err(|e| map_sqlx_error("decode_role", e))?;
                        record.parents = parents.remove(&code).unwrap_or_default();
                        records.push(record);
                    }

                    let mut grants = Vec::with_capacity(grant_rows.len());
                    for row in &grant_rows {
                        let raw_code: String = row
                            .try_get("permission_code")
                            .map_err(|e| map_sqlx_error("decode_grant", e))?;
                        let permission: PermissionCode = match raw_code.parse() {
                            Ok(code) => code,
                            Err(_) => {
                                // Catalog drift: an unknown code grants
                                // nothing (fail-closed).
                                warn!(code = %raw_code, "skipping grant with unknown permission code");
                                continue;
                            }
                        };

                        let role: String = row
                            .try_get("role_code")
                            .map_err(|e| map_sqlx_error("decode_grant", e))?;
                        let resource_kind: Option<String> = row
                            .try_get("resource_kind")
                            .map_err(|e| map_sqlx_error("decode_grant", e))?;
                        let resource_id: Option<Uuid> = row
                            .try_get("resource_id")
                            .map_err(|e| map_sqlx_error("decode_grant", e))?;

                        grants.push(Grant {
                            role: RoleCode::new(role),
                            permission,
                            denied: row
                                .try_get("is_denied")
                                .map_err(|e| map_sqlx_error("decode_grant", e))?,
                            active: row
                                .try_get("is_active")
                                .map_err(|e| map_sqlx_error("decode_grant", e))?,
                            resource: match (resource_kind, resource_id) {
                                (Some(kind), Some(id)) => Some(ResourceRef::new(kind, id)),
                                _ => None,
                            },
                            effective_from: row
                                .try_get("effective_from")
                                .map_err(|e| map_sqlx_error("decode_grant", e))?,
                            deactivated_at: row
                                .try_get("deactivated_at")
                                .map_err(|e| map_sqlx_error("decode_grant", e))?,
                        });
                    }

                    Ok((records, grants))
                })
            })
            .await?;

        let graph = RoleGraph::build(records)?;
        Ok(PolicySet::resolve(&graph, &grants, Utc::now()))
    }

    /// Active role codes assigned to a member, primary first.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub async fn member_roles(
        &self,
        ctx: &RequestContext,
        member_id: UserId,
    ) -> CoreResult<Vec<RoleCode>> {
        let tenant_uuid = *ctx.tenant_id().as_uuid();
        let member_uuid = *member_id.as_uuid();

        self.bridge
            .with_transaction(ctx, move |conn| {
                Box::pin(async move {
                    let rows = sqlx::query(
                        "SELECT r.code \
                         FROM member_roles mr \
                         JOIN roles r ON r.id = mr.role_id \
                         WHERE mr.tenant_id = $1 AND mr.member_id = $2 \
                           AND mr.deactivated_at IS NULL AND mr.effective_from <= NOW() \
                           AND r.is_active \
                         ORDER BY mr.is_primary DESC, r.priority DESC, r.code",
                    )
                    .bind(tenant_uuid)
                    .bind(member_uuid)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| map_sqlx_error("load_member_roles", e))?;

                    let mut roles = Vec::with_capacity(rows.len());
                    for row in rows {
                        let code: String = row
                            .try_get("code")
                            .map_err(|e| map_sqlx_error("decode_member_role", e))?;
                        roles.push(RoleCode::new(code));
                    }
                    Ok(roles)
                })
            })
            .await
    }

    /// Apply the catalog to the tenant's grant tables.
    ///
    /// Runs in one isolated transaction. Unscoped grant rows not present in
    /// the catalog are deactivated; resource-scoped overrides are left
    /// untouched (they are administered per resource, not by the catalog).
    #[instrument(
        skip(self, ctx, catalog),
        fields(tenant_id = %ctx.tenant_id(), catalog_version = catalog.version),
        err
    )]
    pub async fn seed(&self, ctx: &RequestContext, catalog: &PermissionCatalog) -> CoreResult<()> {
        // Reject cyclic or dangling hierarchies before touching the tables.
        RoleGraph::build(catalog.role_records(ctx.tenant_id()))?;

        let tenant_id = ctx.tenant_id();
        let tenant_uuid = *tenant_id.as_uuid();
        let catalog = catalog.clone();

        self.bridge
            .with_transaction(ctx, move |conn| {
                Box::pin(async move {
                    seed_permission_table(conn).await?;

                    let role_ids =
                        upsert_roles(conn, tenant_uuid, &catalog).await?;
                    rebuild_parent_edges(conn, tenant_uuid, &catalog, &role_ids).await?;
                    upsert_grants(conn, tenant_uuid, &catalog, &role_ids).await?;
                    Ok(())
                })
            })
            .await
    }
}

async fn seed_permission_table(conn: &mut sqlx::PgConnection) -> CoreResult<()> {
    for code in PermissionCode::ALL {
        sqlx::query(
            "INSERT INTO permissions (code, category, is_active) \
             VALUES ($1, $2, TRUE) \
             ON CONFLICT (code) DO UPDATE SET is_active = TRUE",
        )
        .bind(code.as_str())
        .bind(code.category())
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("seed_permissions", e))?;
    }
    Ok(())
}

async fn upsert_roles(
    conn: &mut sqlx::PgConnection,
    tenant_uuid: Uuid,
    catalog: &PermissionCatalog,
) -> CoreResult<HashMap<String, Uuid>> {
    let mut role_ids = HashMap::with_capacity(catalog.roles.len());
    for role in &catalog.roles {
        let row = sqlx::query(
            "INSERT INTO roles (id, tenant_id, code, name, is_active, priority) \
             VALUES ($1, $2, $3, $4, TRUE, $5) \
             ON CONFLICT (tenant_id, code) \
             DO UPDATE SET name = EXCLUDED.name, priority = EXCLUDED.priority, \
                           is_active = TRUE \
             RETURNING id",
        )
        .bind(Uuid::now_v7())
        .bind(tenant_uuid)
        .bind(role.code.as_str())
        .bind(&role.name)
        .bind(role.priority)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("upsert_role", e))?;

        let id: Uuid = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("decode_role_id", e))?;
        role_ids.insert(role.code.as_str().to_string(), id);
    }
    Ok(role_ids)
}

async fn rebuild_parent_edges(
    conn: &mut sqlx::PgConnection,
    tenant_uuid: Uuid,
    catalog: &PermissionCatalog,
    role_ids: &HashMap<String, Uuid>,
) -> CoreResult<()> {
    // Edges are structural configuration, not audit history: rebuild.
    sqlx::query("DELETE FROM role_parents WHERE tenant_id = $1")
        .bind(tenant_uuid)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("clear_role_parents", e))?;

    for role in &catalog.roles {
        let Some(role_id) = role_ids.get(role.code.as_str()) else {
            continue;
        };
        for parent in &role.parents {
            let Some(parent_id) = role_ids.get(parent.as_str()) else {
                continue;
            };
            sqlx::query(
                "INSERT INTO role_parents (tenant_id, role_id, parent_role_id) \
                 VALUES ($1, $2, $3)",
            )
            .bind(tenant_uuid)
            .bind(role_id)
            .bind(parent_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("insert_role_parent", e))?;
        }
    }
    Ok(())
}

async fn upsert_grants(
    conn: &mut sqlx::PgConnection,
    tenant_uuid: Uuid,
    catalog: &PermissionCatalog,
    role_ids: &HashMap<String, Uuid>,
) -> CoreResult<()> {
    let now: DateTime<Utc> = Utc::now();

    // Anything the catalog no longer mentions goes inactive (by timestamp,
    // preserving history).
    sqlx::query(
        "UPDATE role_permissions SET deactivated_at = $2 \
         WHERE tenant_id = $1 AND resource_id IS NULL AND deactivated_at IS NULL",
    )
    .bind(tenant_uuid)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("deactivate_grants", e))?;

    for role in &catalog.roles {
        let Some(role_id) = role_ids.get(role.code.as_str()) else {
            continue;
        };
        let rows = role
            .grants
            .iter()
            .map(|p| (*p, false))
            .chain(role.denials.iter().map(|p| (*p, true)));

        for (permission, denied) in rows {
            sqlx::query(
                "INSERT INTO role_permissions \
                 (id, tenant_id, role_id, permission_code, is_denied, is_active, \
                  resource_kind, resource_id, effective_from, deactivated_at) \
                 VALUES ($1, $2, $3, $4, $5, TRUE, NULL, NULL, $6, NULL) \
                 ON CONFLICT (tenant_id, role_id, permission_code) \
                 WHERE resource_id IS NULL \
                 DO UPDATE SET is_denied = EXCLUDED.is_denied, is_active = TRUE, \
                               deactivated_at = NULL",
            )
            .bind(Uuid::now_v7())
            .bind(tenant_uuid)
            .bind(role_id)
            .bind(permission.as_str())
            .bind(denied)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("upsert_grant", e))?;
        }
    }

    Ok(())
}
