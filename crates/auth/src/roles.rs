//! Roles and member-role assignments.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use palisade_core::{TenantId, UserId};

/// Role identifier used for RBAC.
///
/// Role codes are intentionally opaque strings at this layer; the mapping to
/// permissions lives in the grant tables and the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleCode(Cow<'static, str>);

impl RoleCode {
    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    /// The reserved role published by system contexts.
    pub fn system() -> Self {
        Self(Cow::Borrowed("system"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoleCode {
    fn from(value: &str) -> Self {
        Self(Cow::Owned(value.to_string()))
    }
}

/// Tenant-scoped role record.
///
/// `parents` are DAG edges: a role inherits its ancestors' active, non-denied
/// grants. Cycles are rejected when the graph is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub code: RoleCode,
    pub name: String,
    pub is_active: bool,
    /// Tie-break for listings and primary-role selection; not consulted by
    /// allow/deny evaluation.
    pub priority: i32,
    pub parents: Vec<RoleCode>,
}

impl RoleRecord {
    pub fn new(tenant_id: TenantId, code: RoleCode, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            code,
            name: name.into(),
            is_active: true,
            priority: 0,
            parents: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parent(mut self, parent: RoleCode) -> Self {
        self.parents.push(parent);
        self
    }
}

/// Assignment of a role to a tenant member.
///
/// A member may hold several concurrently active assignments; effective
/// permissions are the union across them. Assignments are deactivated via
/// timestamp, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRole {
    pub tenant_id: TenantId,
    pub member_id: UserId,
    pub role: RoleCode,
    pub is_primary: bool,
    pub is_default: bool,
    pub effective_from: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl MemberRole {
    pub fn new(tenant_id: TenantId, member_id: UserId, role: RoleCode) -> Self {
        Self {
            tenant_id,
            member_id,
            role,
            is_primary: false,
            is_default: false,
            effective_from: Utc::now(),
            deactivated_at: None,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.effective_from <= now && self.deactivated_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_activity_window() {
        let tenant = TenantId::new();
        let member = UserId::new();
        let now = Utc::now();

        let mut assignment = MemberRole::new(tenant, member, RoleCode::new("manager"));
        assert!(assignment.is_active(now));

        assignment.deactivated_at = Some(now);
        assert!(!assignment.is_active(now));
    }

    #[test]
    fn future_assignment_is_not_yet_active() {
        let now = Utc::now();
        let mut assignment =
            MemberRole::new(TenantId::new(), UserId::new(), RoleCode::new("auditor"));
        assignment.effective_from = now + chrono::Duration::hours(1);
        assert!(!assignment.is_active(now));
    }
}
