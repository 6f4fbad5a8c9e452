//! Metadata shared by every mutable tenant-scoped entity.
//!
//! All audited tables carry the same shape: a business body plus `EntityMeta`
//! (optimistic version, actor stamps, soft-delete markers). Updates must
//! supply the version they read; a mismatch is a conflict, never a silent
//! overwrite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::id::{TenantId, UserId};

/// Reference to a resource for audit records and resource-scoped grants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource kind, e.g. `"Project"`.
    pub kind: String,
    pub id: Uuid,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, id: Uuid) -> Self {
        Self { kind: kind.into(), id }
    }
}

/// Versioning, actor stamps and soft-delete markers for a stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    /// Optimistic concurrency token; starts at 0, +1 per update.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    /// `None` when the row was created by a system context.
    pub created_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<UserId>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl EntityMeta {
    /// Metadata for a freshly created row.
    pub fn new(actor: Option<UserId>, now: DateTime<Utc>) -> Self {
        Self {
            version: 0,
            created_at: now,
            created_by: actor,
            updated_at: now,
            updated_by: actor,
            deleted_at: None,
            deleted_by: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Check an expected version against the stored one.
    pub fn check_version(&self, expected: i64) -> CoreResult<()> {
        if self.version == expected {
            Ok(())
        } else {
            Err(CoreError::OptimisticLock { expected, actual: self.version })
        }
    }

    /// Stamp an update: bump the version and record the updating actor.
    pub fn touch(&mut self, actor: Option<UserId>, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
        self.updated_by = actor;
    }

    /// Stamp a soft delete.
    pub fn mark_deleted(&mut self, actor: Option<UserId>, now: DateTime<Utc>) {
        self.deleted_at = Some(now);
        self.deleted_by = actor;
    }
}

/// A stored tenant-scoped entity: business body + identity + metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<B> {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub body: B,
    pub meta: EntityMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_check() {
        let meta = EntityMeta::new(Some(UserId::new()), Utc::now());
        assert!(meta.check_version(0).is_ok());
        assert_eq!(
            meta.check_version(3),
            Err(CoreError::OptimisticLock { expected: 3, actual: 0 })
        );
    }

    #[test]
    fn touch_bumps_version_and_stamps_actor() {
        let creator = UserId::new();
        let editor = UserId::new();
        let mut meta = EntityMeta::new(Some(creator), Utc::now());

        meta.touch(Some(editor), Utc::now());

        assert_eq!(meta.version, 1);
        assert_eq!(meta.created_by, Some(creator));
        assert_eq!(meta.updated_by, Some(editor));
    }

    #[test]
    fn soft_delete_is_recorded() {
        let mut meta = EntityMeta::new(None, Utc::now());
        assert!(!meta.is_deleted());

        meta.mark_deleted(Some(UserId::new()), Utc::now());
        assert!(meta.is_deleted());
        assert!(meta.deleted_by.is_some());
    }
}
