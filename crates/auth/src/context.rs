//! Request-scoped security context.
//!
//! A `RequestContext` is built once per inbound operation from verified
//! identity claims, is immutable, and is passed explicitly through every
//! layer. There is no ambient/global context.

use serde::{Deserialize, Serialize};

use palisade_core::{CoreError, CoreResult, CorrelationId, SessionId, TenantId, UserId};

use crate::roles::RoleCode;

/// Tenant lifecycle status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
}

/// The tenant a request is scoped to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantScope {
    pub tenant_id: TenantId,
    pub status: TenantStatus,
}

impl TenantScope {
    pub fn active(tenant_id: TenantId) -> Self {
        Self { tenant_id, status: TenantStatus::Active }
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// Identity performing the request. Immutable once attached to a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub session_id: Option<SessionId>,
    pub display_name: Option<String>,
}

impl Actor {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id, session_id: None, display_name: None }
    }
}

/// Verified identity claims as produced by the transport/security layer.
///
/// Token decoding and signature verification are intentionally outside this
/// crate; by the time this struct exists the claims are trusted.
#[derive(Debug, Clone, Default)]
pub struct VerifiedIdentity {
    pub user_id: Option<UserId>,
    pub session_id: Option<SessionId>,
    pub display_name: Option<String>,
    pub tenant: Option<TenantScope>,
    pub roles: Vec<RoleCode>,
    pub correlation_id: Option<CorrelationId>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ContextKind {
    User,
    System,
}

/// Immutable request-scoped security context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    kind: ContextKind,
    actor: Option<Actor>,
    tenant: TenantScope,
    roles: Vec<RoleCode>,
    correlation_id: CorrelationId,
}

impl RequestContext {
    /// Construct a context from verified identity claims.
    ///
    /// Fails with `Unauthenticated` when actor or tenant is missing, and with
    /// `TenantInactive` when the tenant is not active. A missing correlation
    /// id gets a fresh one.
    pub fn from_identity(identity: VerifiedIdentity) -> CoreResult<Self> {
        let user_id = identity.user_id.ok_or(CoreError::Unauthenticated)?;
        let tenant = identity.tenant.ok_or(CoreError::Unauthenticated)?;
        if !tenant.is_active() {
            return Err(CoreError::TenantInactive);
        }

        Ok(Self {
            kind: ContextKind::User,
            actor: Some(Actor {
                user_id,
                session_id: identity.session_id,
                display_name: identity.display_name,
            }),
            tenant,
            roles: identity.roles,
            correlation_id: identity.correlation_id.unwrap_or_default(),
        })
    }

    /// Internal bootstrap context (tenant provisioning, seeding, migrations).
    ///
    /// Takes no request-derived input and is therefore only constructible
    /// from trusted code paths.
    pub fn system(tenant_id: TenantId) -> Self {
        Self {
            kind: ContextKind::System,
            actor: None,
            tenant: TenantScope::active(tenant_id),
            roles: vec![RoleCode::system()],
            correlation_id: CorrelationId::new(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind == ContextKind::System
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    /// `None` for system contexts.
    pub fn user_id(&self) -> Option<UserId> {
        self.actor.as_ref().map(|a| a.user_id)
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant.tenant_id
    }

    pub fn tenant(&self) -> &TenantScope {
        &self.tenant
    }

    /// Resolved roles; the first entry is the primary role.
    pub fn roles(&self) -> &[RoleCode] {
        &self.roles
    }

    pub fn primary_role(&self) -> Option<&RoleCode> {
        self.roles.first()
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(tenant_status: TenantStatus) -> VerifiedIdentity {
        VerifiedIdentity {
            user_id: Some(UserId::new()),
            session_id: Some(SessionId::new()),
            display_name: Some("Sam Doe".into()),
            tenant: Some(TenantScope { tenant_id: TenantId::new(), status: tenant_status }),
            roles: vec![RoleCode::new("manager"), RoleCode::new("member")],
            correlation_id: None,
        }
    }

    #[test]
    fn builds_from_verified_identity() {
        let ctx = RequestContext::from_identity(identity(TenantStatus::Active)).unwrap();
        assert!(!ctx.is_system());
        assert!(ctx.user_id().is_some());
        assert_eq!(ctx.primary_role(), Some(&RoleCode::new("manager")));
    }

    #[test]
    fn missing_actor_is_unauthenticated() {
        let mut id = identity(TenantStatus::Active);
        id.user_id = None;
        assert_eq!(
            RequestContext::from_identity(id).unwrap_err(),
            CoreError::Unauthenticated
        );
    }

    #[test]
    fn missing_tenant_is_unauthenticated() {
        let mut id = identity(TenantStatus::Active);
        id.tenant = None;
        assert_eq!(
            RequestContext::from_identity(id).unwrap_err(),
            CoreError::Unauthenticated
        );
    }

    #[test]
    fn suspended_tenant_is_rejected() {
        assert_eq!(
            RequestContext::from_identity(identity(TenantStatus::Suspended)).unwrap_err(),
            CoreError::TenantInactive
        );
    }

    #[test]
    fn system_context_has_no_actor() {
        let ctx = RequestContext::system(TenantId::new());
        assert!(ctx.is_system());
        assert!(ctx.actor().is_none());
        assert_eq!(ctx.roles(), &[RoleCode::system()]);
    }
}
