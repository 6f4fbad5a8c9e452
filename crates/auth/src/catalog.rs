//! Versioned permission catalog.
//!
//! The catalog is the single source of truth for roles and their granted
//! permission codes. It is produced by offline tooling, consumed here as a
//! read-only document: to seed the tenant grant tables and to keep the
//! `PermissionCode` enum honest (unknown codes fail at deserialization).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use palisade_core::{CoreError, CoreResult, TenantId};

use crate::grants::Grant;
use crate::graph::RoleGraph;
use crate::permissions::PermissionCode;
use crate::rbac::PolicySet;
use crate::roles::{RoleCode, RoleRecord};

/// One role definition in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRole {
    pub code: RoleCode,
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub parents: Vec<RoleCode>,
    /// Permission codes granted to the role.
    #[serde(default)]
    pub grants: Vec<PermissionCode>,
    /// Explicit denials (win over any allow, including inherited ones).
    #[serde(default)]
    pub denials: Vec<PermissionCode>,
}

/// The versioned catalog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionCatalog {
    pub version: u32,
    pub roles: Vec<CatalogRole>,
}

impl PermissionCatalog {
    /// Parse a catalog document; unknown permission codes are rejected.
    pub fn from_json(raw: &str) -> CoreResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| CoreError::validation(format!("permission catalog: {e}")))
    }

    pub fn role(&self, code: &RoleCode) -> Option<&CatalogRole> {
        self.roles.iter().find(|r| &r.code == code)
    }

    /// Materialize tenant role records from the catalog.
    pub fn role_records(&self, tenant_id: TenantId) -> Vec<RoleRecord> {
        self.roles
            .iter()
            .map(|role| {
                let mut record =
                    RoleRecord::new(tenant_id, role.code.clone(), role.name.clone())
                        .with_priority(role.priority);
                record.parents = role.parents.clone();
                record
            })
            .collect()
    }

    /// Materialize grant rows from the catalog.
    pub fn grant_rows(&self) -> Vec<Grant> {
        let mut rows = Vec::new();
        for role in &self.roles {
            for permission in &role.grants {
                rows.push(Grant::allow(role.code.clone(), *permission));
            }
            for permission in &role.denials {
                rows.push(Grant::deny(role.code.clone(), *permission));
            }
        }
        rows
    }

    /// Build a ready-to-evaluate policy set straight from the catalog.
    pub fn policy_set(&self, tenant_id: TenantId, now: DateTime<Utc>) -> CoreResult<PolicySet> {
        let graph = RoleGraph::build(self.role_records(tenant_id))?;
        Ok(PolicySet::resolve(&graph, &self.grant_rows(), now))
    }

    /// The catalog shipped with this build.
    pub fn builtin() -> Self {
        use PermissionCode::*;

        Self {
            version: 3,
            roles: vec![
                CatalogRole {
                    code: RoleCode::new("owner"),
                    name: "Owner".into(),
                    priority: 100,
                    parents: vec![],
                    grants: PermissionCode::ALL.to_vec(),
                    denials: vec![],
                },
                CatalogRole {
                    code: RoleCode::new("admin"),
                    name: "Administrator".into(),
                    priority: 90,
                    parents: vec![RoleCode::new("owner")],
                    grants: vec![],
                    denials: vec![],
                },
                CatalogRole {
                    code: RoleCode::new("manager"),
                    name: "Manager".into(),
                    priority: 50,
                    parents: vec![],
                    grants: vec![
                        ProjectCreate,
                        ProjectRead,
                        ProjectUpdate,
                        ProjectDelete,
                        InvoiceCreate,
                        InvoiceRead,
                        InvoiceUpdate,
                        SequenceRead,
                        SequenceNext,
                        SettingRead,
                        MemberRead,
                        RoleRead,
                    ],
                    denials: vec![],
                },
                CatalogRole {
                    code: RoleCode::new("member"),
                    name: "Member".into(),
                    priority: 10,
                    parents: vec![],
                    grants: vec![ProjectRead, InvoiceRead, SettingRead],
                    denials: vec![],
                },
                CatalogRole {
                    code: RoleCode::new("auditor"),
                    name: "Auditor".into(),
                    priority: 20,
                    parents: vec![RoleCode::new("member")],
                    grants: vec![AuditRead],
                    // Auditors observe, they never mutate.
                    denials: vec![ProjectUpdate, ProjectDelete, InvoiceUpdate, InvoiceDelete],
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{TenantScope, TenantStatus, VerifiedIdentity};
    use crate::rbac::Decision;
    use crate::context::RequestContext;
    use palisade_core::UserId;

    fn ctx(tenant: TenantId, role: &'static str) -> RequestContext {
        RequestContext::from_identity(VerifiedIdentity {
            user_id: Some(UserId::new()),
            tenant: Some(TenantScope { tenant_id: tenant, status: TenantStatus::Active }),
            roles: vec![RoleCode::new(role)],
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn builtin_catalog_resolves() {
        let tenant = TenantId::new();
        let policy = PermissionCatalog::builtin()
            .policy_set(tenant, Utc::now())
            .unwrap();

        // Admin inherits everything from owner.
        assert_eq!(
            policy.evaluate(&ctx(tenant, "admin"), PermissionCode::RoleManage, None),
            Decision::Allow
        );
        // Members read but do not create.
        assert_eq!(
            policy.evaluate(&ctx(tenant, "member"), PermissionCode::ProjectRead, None),
            Decision::Allow
        );
        assert_eq!(
            policy.evaluate(&ctx(tenant, "member"), PermissionCode::ProjectCreate, None),
            Decision::Deny
        );
        // Auditor denial overrides the allow inherited from member.
        assert_eq!(
            policy.evaluate(&ctx(tenant, "auditor"), PermissionCode::AuditRead, None),
            Decision::Allow
        );
        assert_eq!(
            policy.evaluate(&ctx(tenant, "auditor"), PermissionCode::InvoiceUpdate, None),
            Decision::Deny
        );
    }

    #[test]
    fn json_round_trip() {
        let catalog = PermissionCatalog::builtin();
        let json = serde_json::to_string(&catalog).unwrap();
        let back = PermissionCatalog::from_json(&json).unwrap();
        assert_eq!(catalog, back);
    }

    #[test]
    fn unknown_code_fails_parsing() {
        let raw = r#"{
            "version": 1,
            "roles": [{"code": "x", "name": "X", "grants": ["Widget.frobnicate"]}]
        }"#;
        let err = PermissionCatalog::from_json(raw).unwrap_err();
        assert_eq!(err.code(), "validation_failed");
    }
}
