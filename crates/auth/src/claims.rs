//! Session claims published into the database transaction.
//!
//! This payload is the sole contract between the application layer and the
//! database-side row-filtering policies: the policy helper functions read it
//! back with `current_setting` and test tenant and role membership against
//! it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use palisade_core::{CoreError, CoreResult};

use crate::context::RequestContext;

/// Name of the transaction-local session variable carrying the claims.
pub const CLAIMS_VAR: &str = "app.claims";

/// Separator used for the joined `roles` list.
pub const ROLES_SEPARATOR: &str = ";";

/// Claims payload serialized into `app.claims`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub tenant_id: Uuid,
    /// `None` for system contexts.
    pub user_id: Option<Uuid>,
    /// Primary (first) resolved role.
    pub role: String,
    /// All resolved roles, separator-joined, for the policy role helper.
    pub roles: String,
    pub correlation_id: String,
}

impl SessionClaims {
    pub fn from_context(ctx: &RequestContext) -> Self {
        let roles: Vec<&str> = ctx.roles().iter().map(|r| r.as_str()).collect();
        Self {
            tenant_id: *ctx.tenant_id().as_uuid(),
            user_id: ctx.user_id().map(|u| *u.as_uuid()),
            role: roles.first().copied().unwrap_or_default().to_string(),
            roles: roles.join(ROLES_SEPARATOR),
            correlation_id: ctx.correlation_id().to_string(),
        }
    }

    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(self)
            .map_err(|e| CoreError::IsolationPublish(format!("claims serialization: {e}")))
    }
}
