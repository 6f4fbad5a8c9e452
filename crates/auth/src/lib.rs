//! `palisade-auth` — pure authorization boundary (zero-trust).
//!
//! Request-context construction, the permission catalog, the role DAG and the
//! RBAC evaluator. This crate is intentionally decoupled from HTTP and
//! storage: it operates over already-loaded grant data, and the loader that
//! supplies that data must scope its query by tenant.

pub mod catalog;
pub mod claims;
pub mod context;
pub mod grants;
pub mod graph;
pub mod permissions;
pub mod rbac;
pub mod roles;

pub use catalog::{CatalogRole, PermissionCatalog};
pub use claims::SessionClaims;
pub use context::{Actor, RequestContext, TenantScope, TenantStatus, VerifiedIdentity};
pub use grants::Grant;
pub use graph::{RoleGraph, RoleGraphError};
pub use permissions::PermissionCode;
pub use rbac::{Authorizer, Decision, PolicySet};
pub use roles::{MemberRole, RoleCode, RoleRecord};
