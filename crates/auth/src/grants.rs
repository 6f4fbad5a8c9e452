//! Grant rows: the `(tenant, role, permission)` join with deny and
//! resource-scope overrides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use palisade_core::ResourceRef;

use crate::permissions::PermissionCode;
use crate::roles::RoleCode;

/// A single role-permission row.
///
/// At most one active row exists per `(tenant, role, permission, resource
/// scope)`; deactivation is via timestamp, never deletion, to preserve audit
/// history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub role: RoleCode,
    pub permission: PermissionCode,
    /// `true` makes this row an explicit denial that beats any allow.
    pub denied: bool,
    pub active: bool,
    /// `None` applies to every resource of the permission's category.
    pub resource: Option<ResourceRef>,
    pub effective_from: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Grant {
    pub fn allow(role: RoleCode, permission: PermissionCode) -> Self {
        Self {
            role,
            permission,
            denied: false,
            active: true,
            resource: None,
            effective_from: Utc::now(),
            deactivated_at: None,
        }
    }

    pub fn deny(role: RoleCode, permission: PermissionCode) -> Self {
        Self { denied: true, ..Self::allow(role, permission) }
    }

    pub fn scoped_to(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Whether the row participates in evaluation at `now`.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.active && self.effective_from <= now && self.deactivated_at.is_none()
    }

    /// Unscoped rows match everything; scoped rows match only the named
    /// resource.
    pub fn matches_resource(&self, resource: Option<&ResourceRef>) -> bool {
        match (&self.resource, resource) {
            (None, _) => true,
            (Some(scope), Some(target)) => scope == target,
            (Some(_), None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn effectiveness_window() {
        let now = Utc::now();
        let mut grant = Grant::allow(RoleCode::new("manager"), PermissionCode::ProjectRead);
        assert!(grant.is_effective(now));

        grant.deactivated_at = Some(now);
        assert!(!grant.is_effective(now));

        let mut future = Grant::allow(RoleCode::new("manager"), PermissionCode::ProjectRead);
        future.effective_from = now + chrono::Duration::minutes(5);
        assert!(!future.is_effective(now));
    }

    #[test]
    fn resource_scope_matching() {
        let id = Uuid::now_v7();
        let scoped = Grant::allow(RoleCode::new("member"), PermissionCode::ProjectUpdate)
            .scoped_to(ResourceRef::new("Project", id));

        assert!(scoped.matches_resource(Some(&ResourceRef::new("Project", id))));
        assert!(!scoped.matches_resource(Some(&ResourceRef::new("Project", Uuid::now_v7()))));
        assert!(!scoped.matches_resource(None));

        let unscoped = Grant::allow(RoleCode::new("member"), PermissionCode::ProjectUpdate);
        assert!(unscoped.matches_resource(None));
        assert!(unscoped.matches_resource(Some(&ResourceRef::new("Project", id))));
    }
}
