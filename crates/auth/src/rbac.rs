//! RBAC evaluation over already-loaded grant data.
//!
//! `PolicySet` is the cached, topologically-resolved view of one tenant's
//! roles and grants. It is rebuilt whenever a grant changes; evaluation
//! itself never touches the database.
//!
//! Precedence, highest first: explicit deny, then allow, then default deny.
//! Inheritance carries only active, non-denied ancestor grants; a denial on
//! the assigned role overrides an inherited allow, and across a context's
//! roles deny always beats allow (fail-closed).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use palisade_core::ResourceRef;

use crate::context::RequestContext;
use crate::grants::Grant;
use crate::graph::RoleGraph;
use crate::permissions::PermissionCode;
use crate::roles::RoleCode;

/// Outcome of an authorization check.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        *self == Decision::Allow
    }
}

/// Something that can decide whether a context may perform an operation.
pub trait Authorizer: Send + Sync {
    fn authorize(
        &self,
        ctx: &RequestContext,
        permission: PermissionCode,
        resource: Option<&ResourceRef>,
    ) -> Decision;
}

/// Cached effective grants per role for one tenant.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    effective: HashMap<RoleCode, Vec<Grant>>,
}

impl PolicySet {
    /// A policy set with no grants: everything denies (except system
    /// contexts).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolve effective grants from the role DAG and the raw grant rows.
    ///
    /// Rows that are not effective at `now` are dropped here, so evaluation
    /// is a pure set lookup. Recompute on any grant change.
    pub fn resolve(graph: &RoleGraph, grants: &[Grant], now: DateTime<Utc>) -> Self {
        let mut by_role: HashMap<&RoleCode, Vec<&Grant>> = HashMap::new();
        for grant in grants.iter().filter(|g| g.is_effective(now)) {
            by_role.entry(&grant.role).or_default().push(grant);
        }

        let mut effective: HashMap<RoleCode, Vec<Grant>> = HashMap::new();
        for record in graph.roles().filter(|r| r.is_active) {
            let mut rows: Vec<Grant> = by_role
                .get(&record.code)
                .map(|rows| rows.iter().map(|g| (*g).clone()).collect())
                .unwrap_or_default();

            // Inherited rows: ancestors contribute allows only.
            for ancestor in graph.ancestors(&record.code) {
                if let Some(inherited) = by_role.get(&ancestor) {
                    rows.extend(
                        inherited
                            .iter()
                            .filter(|g| !g.denied)
                            .map(|g| (*g).clone()),
                    );
                }
            }
            effective.insert(record.code.clone(), rows);
        }

        Self { effective }
    }

    /// Effective rows for one role (direct + inherited), if the role exists
    /// and is active.
    pub fn role_grants(&self, role: &RoleCode) -> Option<&[Grant]> {
        self.effective.get(role).map(Vec::as_slice)
    }

    pub fn evaluate(
        &self,
        ctx: &RequestContext,
        permission: PermissionCode,
        resource: Option<&ResourceRef>,
    ) -> Decision {
        if ctx.is_system() {
            return Decision::Allow;
        }

        let mut allowed = false;
        for role in ctx.roles() {
            let Some(rows) = self.effective.get(role) else {
                continue;
            };
            for grant in rows {
                if grant.permission != permission || !grant.matches_resource(resource) {
                    continue;
                }
                if grant.denied {
                    debug!(
                        tenant_id = %ctx.tenant_id(),
                        permission = %permission,
                        "authorization denied by explicit rule"
                    );
                    return Decision::Deny;
                }
                allowed = true;
            }
        }

        if allowed {
            Decision::Allow
        } else {
            debug!(
                tenant_id = %ctx.tenant_id(),
                permission = %permission,
                "authorization denied by default"
            );
            Decision::Deny
        }
    }
}

impl Authorizer for PolicySet {
    fn authorize(
        &self,
        ctx: &RequestContext,
        permission: PermissionCode,
        resource: Option<&ResourceRef>,
    ) -> Decision {
        self.evaluate(ctx, permission, resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{TenantScope, TenantStatus, VerifiedIdentity};
    use crate::roles::RoleRecord;
    use palisade_core::{TenantId, UserId};
    use uuid::Uuid;

    fn ctx_with_roles(tenant: TenantId, roles: &[&'static str]) -> RequestContext {
        RequestContext::from_identity(VerifiedIdentity {
            user_id: Some(UserId::new()),
            tenant: Some(TenantScope { tenant_id: tenant, status: TenantStatus::Active }),
            roles: roles.iter().map(|r| RoleCode::new(*r)).collect(),
            ..Default::default()
        })
        .unwrap()
    }

    fn graph(tenant: TenantId, records: Vec<RoleRecord>) -> RoleGraph {
        let _ = tenant;
        RoleGraph::build(records).unwrap()
    }

    #[test]
    fn default_deny_with_no_grants() {
        let tenant = TenantId::new();
        let g = graph(tenant, vec![RoleRecord::new(tenant, RoleCode::new("member"), "Member")]);
        let policy = PolicySet::resolve(&g, &[], Utc::now());
        let ctx = ctx_with_roles(tenant, &["member"]);

        assert_eq!(
            policy.evaluate(&ctx, PermissionCode::ProjectRead, None),
            Decision::Deny
        );
    }

    #[test]
    fn direct_allow() {
        let tenant = TenantId::new();
        let g = graph(tenant, vec![RoleRecord::new(tenant, RoleCode::new("member"), "Member")]);
        let grants = [Grant::allow(RoleCode::new("member"), PermissionCode::ProjectRead)];
        let policy = PolicySet::resolve(&g, &grants, Utc::now());
        let ctx = ctx_with_roles(tenant, &["member"]);

        assert_eq!(
            policy.evaluate(&ctx, PermissionCode::ProjectRead, None),
            Decision::Allow
        );
        // A different permission still denies.
        assert_eq!(
            policy.evaluate(&ctx, PermissionCode::ProjectDelete, None),
            Decision::Deny
        );
    }

    #[test]
    fn explicit_deny_overrides_inherited_allow() {
        let tenant = TenantId::new();
        let g = graph(
            tenant,
            vec![
                RoleRecord::new(tenant, RoleCode::new("admin"), "Admin"),
                RoleRecord::new(tenant, RoleCode::new("contractor"), "Contractor")
                    .with_parent(RoleCode::new("admin")),
            ],
        );
        let grants = [
            Grant::allow(RoleCode::new("admin"), PermissionCode::InvoiceDelete),
            Grant::deny(RoleCode::new("contractor"), PermissionCode::InvoiceDelete),
        ];
        let policy = PolicySet::resolve(&g, &grants, Utc::now());
        let ctx = ctx_with_roles(tenant, &["contractor"]);

        assert_eq!(
            policy.evaluate(&ctx, PermissionCode::InvoiceDelete, None),
            Decision::Deny
        );
    }

    #[test]
    fn inheritance_carries_ancestor_allows() {
        let tenant = TenantId::new();
        let g = graph(
            tenant,
            vec![
                RoleRecord::new(tenant, RoleCode::new("owner"), "Owner"),
                RoleRecord::new(tenant, RoleCode::new("admin"), "Admin")
                    .with_parent(RoleCode::new("owner")),
            ],
        );
        let grants = [Grant::allow(RoleCode::new("owner"), PermissionCode::SettingUpdate)];
        let policy = PolicySet::resolve(&g, &grants, Utc::now());
        let ctx = ctx_with_roles(tenant, &["admin"]);

        assert_eq!(
            policy.evaluate(&ctx, PermissionCode::SettingUpdate, None),
            Decision::Allow
        );
    }

    #[test]
    fn ancestor_denials_do_not_flow_down() {
        let tenant = TenantId::new();
        let g = graph(
            tenant,
            vec![
                RoleRecord::new(tenant, RoleCode::new("owner"), "Owner"),
                RoleRecord::new(tenant, RoleCode::new("admin"), "Admin")
                    .with_parent(RoleCode::new("owner")),
            ],
        );
        let grants = [
            Grant::deny(RoleCode::new("owner"), PermissionCode::AuditRead),
            Grant::allow(RoleCode::new("admin"), PermissionCode::AuditRead),
        ];
        let policy = PolicySet::resolve(&g, &grants, Utc::now());

        // The denial is local to "owner"; "admin" keeps its own allow.
        let ctx = ctx_with_roles(tenant, &["admin"]);
        assert_eq!(
            policy.evaluate(&ctx, PermissionCode::AuditRead, None),
            Decision::Allow
        );
        // A context holding "owner" itself is denied.
        let ctx = ctx_with_roles(tenant, &["owner"]);
        assert_eq!(
            policy.evaluate(&ctx, PermissionCode::AuditRead, None),
            Decision::Deny
        );
    }

    #[test]
    fn deny_beats_allow_across_roles() {
        let tenant = TenantId::new();
        let g = graph(
            tenant,
            vec![
                RoleRecord::new(tenant, RoleCode::new("editor"), "Editor"),
                RoleRecord::new(tenant, RoleCode::new("restricted"), "Restricted"),
            ],
        );
        let grants = [
            Grant::allow(RoleCode::new("editor"), PermissionCode::ProjectUpdate),
            Grant::deny(RoleCode::new("restricted"), PermissionCode::ProjectUpdate),
        ];
        let policy = PolicySet::resolve(&g, &grants, Utc::now());
        let ctx = ctx_with_roles(tenant, &["editor", "restricted"]);

        assert_eq!(
            policy.evaluate(&ctx, PermissionCode::ProjectUpdate, None),
            Decision::Deny
        );
    }

    #[test]
    fn resource_scoped_rows() {
        let tenant = TenantId::new();
        let project = Uuid::now_v7();
        let g = graph(tenant, vec![RoleRecord::new(tenant, RoleCode::new("member"), "Member")]);
        let grants = [
            Grant::allow(RoleCode::new("member"), PermissionCode::ProjectUpdate)
                .scoped_to(ResourceRef::new("Project", project)),
        ];
        let policy = PolicySet::resolve(&g, &grants, Utc::now());
        let ctx = ctx_with_roles(tenant, &["member"]);

        assert_eq!(
            policy.evaluate(
                &ctx,
                PermissionCode::ProjectUpdate,
                Some(&ResourceRef::new("Project", project))
            ),
            Decision::Allow
        );
        // The scoped allow does not apply to other resources or to
        // resource-less checks.
        assert_eq!(
            policy.evaluate(
                &ctx,
                PermissionCode::ProjectUpdate,
                Some(&ResourceRef::new("Project", Uuid::now_v7()))
            ),
            Decision::Deny
        );
        assert_eq!(
            policy.evaluate(&ctx, PermissionCode::ProjectUpdate, None),
            Decision::Deny
        );
    }

    #[test]
    fn resource_scoped_deny_wins_over_unscoped_allow() {
        let tenant = TenantId::new();
        let project = Uuid::now_v7();
        let g = graph(tenant, vec![RoleRecord::new(tenant, RoleCode::new("member"), "Member")]);
        let grants = [
            Grant::allow(RoleCode::new("member"), PermissionCode::ProjectUpdate),
            Grant::deny(RoleCode::new("member"), PermissionCode::ProjectUpdate)
                .scoped_to(ResourceRef::new("Project", project)),
        ];
        let policy = PolicySet::resolve(&g, &grants, Utc::now());
        let ctx = ctx_with_roles(tenant, &["member"]);

        assert_eq!(
            policy.evaluate(
                &ctx,
                PermissionCode::ProjectUpdate,
                Some(&ResourceRef::new("Project", project))
            ),
            Decision::Deny
        );
        // Other projects keep the unscoped allow.
        assert_eq!(
            policy.evaluate(
                &ctx,
                PermissionCode::ProjectUpdate,
                Some(&ResourceRef::new("Project", Uuid::now_v7()))
            ),
            Decision::Allow
        );
    }

    #[test]
    fn deactivated_grant_is_ignored() {
        let tenant = TenantId::new();
        let g = graph(tenant, vec![RoleRecord::new(tenant, RoleCode::new("member"), "Member")]);
        let mut grant = Grant::allow(RoleCode::new("member"), PermissionCode::ProjectRead);
        grant.deactivated_at = Some(Utc::now());
        let policy = PolicySet::resolve(&g, &[grant], Utc::now());
        let ctx = ctx_with_roles(tenant, &["member"]);

        assert_eq!(
            policy.evaluate(&ctx, PermissionCode::ProjectRead, None),
            Decision::Deny
        );
    }

    #[test]
    fn system_context_is_always_allowed() {
        let policy = PolicySet::empty();
        let ctx = RequestContext::system(TenantId::new());
        assert_eq!(
            policy.evaluate(&ctx, PermissionCode::RoleManage, None),
            Decision::Allow
        );
    }
}
