//! Audited mutation core.
//!
//! `AuditedEntities<B>` is the generic wrapper every entity service composes
//! over: it gates the verb through the RBAC evaluator, runs the row
//! operation through the claims-scoped store, validates the optimistic
//! version on updates, and emits an audit event recording actor, tenant,
//! action, resource and outcome.
//!
//! Audit is layered on top of the authoritative outcome: the event is
//! attempted for success, failure and denial alike, and an emission failure
//! is logged but never masks the business result.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{instrument, warn};
use uuid::Uuid;

use palisade_audit::{AuditAction, AuditEvent, AuditOutcome, AuditSink};
use palisade_auth::{Authorizer, PermissionCode, RequestContext};
use palisade_core::{CoreError, CoreResult, EntityMeta, Page, ResourceRef, Stored};

use crate::entity_store::{EntityRecord, EntityStore};
use crate::sequence_store::{SequenceNumber, SequenceStore};

/// Permission required for each verb of an audited entity.
#[derive(Debug, Copy, Clone)]
pub struct VerbPermissions {
    pub create: PermissionCode,
    pub read: PermissionCode,
    pub update: PermissionCode,
    pub delete: PermissionCode,
}

/// Business body of an audited tenant-scoped entity.
///
/// The body is stored as JSONB next to the shared metadata columns, so one
/// store implementation serves every entity kind.
pub trait EntityBody: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Audited table backing this entity.
    const TABLE: &'static str;
    /// Resource kind used in audit events and resource-scoped grants.
    const RESOURCE: &'static str;
    const PERMISSIONS: VerbPermissions;
    /// Allow-listed sort keys for `list`.
    const SORT_KEYS: &'static [&'static str] = &["created_at", "updated_at"];
}

/// Generic audited/optimistically-locked CRUD over one entity kind.
pub struct AuditedEntities<B: EntityBody> {
    store: Arc<dyn EntityStore>,
    audit: Arc<dyn AuditSink>,
    authorizer: Arc<dyn Authorizer>,
    _marker: PhantomData<fn() -> B>,
}

impl<B: EntityBody> AuditedEntities<B> {
    pub fn new(
        store: Arc<dyn EntityStore>,
        audit: Arc<dyn AuditSink>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self { store, audit, authorizer, _marker: PhantomData }
    }

    #[instrument(
        skip(self, ctx, body),
        fields(
            tenant_id = %ctx.tenant_id(),
            correlation_id = %ctx.correlation_id(),
            resource = B::RESOURCE
        ),
        err
    )]
    pub async fn create(&self, ctx: &RequestContext, body: B) -> CoreResult<Stored<B>> {
        if let Err(err) = self.check(ctx, B::PERMISSIONS.create, None) {
            self.emit(ctx, AuditAction::Create, None, AuditOutcome::Denied, Some(&err))
                .await;
            return Err(err);
        }

        let id = Uuid::now_v7();
        let record = EntityRecord {
            id,
            tenant_id: ctx.tenant_id(),
            body: encode_body(&body)?,
            meta: EntityMeta::new(ctx.user_id(), Utc::now()),
        };

        match self.store.insert(ctx, B::TABLE, record).await {
            Ok(record) => {
                self.emit(ctx, AuditAction::Create, Some(id), AuditOutcome::Success, None)
                    .await;
                decode_record(record)
            }
            Err(err) => {
                self.emit(ctx, AuditAction::Create, Some(id), AuditOutcome::Failure, Some(&err))
                    .await;
                Err(err)
            }
        }
    }

    /// Update under optimistic concurrency.
    ///
    /// `expected_version` is the version the caller read; a mismatch fails
    /// with `OptimisticLock` and nothing is written. The mutation closure
    /// runs on the currently stored body.
    #[instrument(
        skip(self, ctx, mutate),
        fields(
            tenant_id = %ctx.tenant_id(),
            correlation_id = %ctx.correlation_id(),
            resource = B::RESOURCE,
            expected_version
        ),
        err
    )]
    pub async fn update<F>(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        expected_version: i64,
        mutate: F,
    ) -> CoreResult<Stored<B>>
    where
        F: FnOnce(&mut B) -> CoreResult<()> + Send,
    {
        let resource = ResourceRef::new(B::RESOURCE, id);
        if let Err(err) = self.check(ctx, B::PERMISSIONS.update, Some(&resource)) {
            self.emit(ctx, AuditAction::Update, Some(id), AuditOutcome::Denied, Some(&err))
                .await;
            return Err(err);
        }

        let result = self.apply_update(ctx, id, expected_version, mutate).await;
        match &result {
            Ok(_) => {
                self.emit(ctx, AuditAction::Update, Some(id), AuditOutcome::Success, None)
                    .await;
            }
            Err(err) => {
                self.emit(ctx, AuditAction::Update, Some(id), AuditOutcome::Failure, Some(err))
                    .await;
            }
        }
        result
    }

    async fn apply_update<F>(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        expected_version: i64,
        mutate: F,
    ) -> CoreResult<Stored<B>>
    where
        F: FnOnce(&mut B) -> CoreResult<()> + Send,
    {
        let current = self
            .store
            .fetch(ctx, B::TABLE, id)
            .await?
            .ok_or(CoreError::NotFound)?;
        // Early check for a stale token; the store repeats it atomically
        // with the write.
        current.meta.check_version(expected_version)?;

        let mut body: B = decode_body(current.body)?;
        mutate(&mut body)?;

        let record = self
            .store
            .update_body(ctx, B::TABLE, id, expected_version, encode_body(&body)?)
            .await?;
        decode_record(record)
    }

    /// Soft delete: the row stays, flagged with `deleted_at`/`deleted_by`.
    #[instrument(
        skip(self, ctx),
        fields(
            tenant_id = %ctx.tenant_id(),
            correlation_id = %ctx.correlation_id(),
            resource = B::RESOURCE
        ),
        err
    )]
    pub async fn delete(&self, ctx: &RequestContext, id: Uuid) -> CoreResult<()> {
        let resource = ResourceRef::new(B::RESOURCE, id);
        if let Err(err) = self.check(ctx, B::PERMISSIONS.delete, Some(&resource)) {
            self.emit(ctx, AuditAction::Delete, Some(id), AuditOutcome::Denied, Some(&err))
                .await;
            return Err(err);
        }

        let result = self.store.soft_delete(ctx, B::TABLE, id).await;
        let (outcome, err) = match &result {
            Ok(()) => (AuditOutcome::Success, None),
            Err(err) => (AuditOutcome::Failure, Some(err)),
        };
        self.emit(ctx, AuditAction::Delete, Some(id), outcome, err).await;
        result
    }

    /// Hard delete. Works on soft-deleted rows; that is what distinguishes
    /// it from `delete`.
    #[instrument(
        skip(self, ctx),
        fields(
            tenant_id = %ctx.tenant_id(),
            correlation_id = %ctx.correlation_id(),
            resource = B::RESOURCE
        ),
        err
    )]
    pub async fn purge(&self, ctx: &RequestContext, id: Uuid) -> CoreResult<()> {
        let resource = ResourceRef::new(B::RESOURCE, id);
        if let Err(err) = self.check(ctx, B::PERMISSIONS.delete, Some(&resource)) {
            self.emit(ctx, AuditAction::Purge, Some(id), AuditOutcome::Denied, Some(&err))
                .await;
            return Err(err);
        }

        let result = self.store.purge(ctx, B::TABLE, id).await;
        let (outcome, err) = match &result {
            Ok(()) => (AuditOutcome::Success, None),
            Err(err) => (AuditOutcome::Failure, Some(err)),
        };
        self.emit(ctx, AuditAction::Purge, Some(id), outcome, err).await;
        result
    }

    #[instrument(
        skip(self, ctx),
        fields(tenant_id = %ctx.tenant_id(), resource = B::RESOURCE),
        err
    )]
    pub async fn find_by_id(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> CoreResult<Option<Stored<B>>> {
        let resource = ResourceRef::new(B::RESOURCE, id);
        if let Err(err) = self.check(ctx, B::PERMISSIONS.read, Some(&resource)) {
            self.emit(ctx, AuditAction::Read, Some(id), AuditOutcome::Denied, Some(&err))
                .await;
            return Err(err);
        }

        match self.store.fetch(ctx, B::TABLE, id).await {
            Ok(record) => record.map(decode_record).transpose(),
            Err(err) => {
                self.emit(ctx, AuditAction::Read, Some(id), AuditOutcome::Failure, Some(&err))
                    .await;
                Err(err)
            }
        }
    }

    #[instrument(
        skip(self, ctx, page),
        fields(tenant_id = %ctx.tenant_id(), resource = B::RESOURCE),
        err
    )]
    pub async fn list(&self, ctx: &RequestContext, page: Page) -> CoreResult<Vec<Stored<B>>> {
        if let Err(err) = self.check(ctx, B::PERMISSIONS.read, None) {
            self.emit(ctx, AuditAction::Read, None, AuditOutcome::Denied, Some(&err))
                .await;
            return Err(err);
        }

        if let Some(sort) = &page.sort {
            if !B::SORT_KEYS.contains(&sort.key.as_str()) {
                return Err(CoreError::validation(format!(
                    "unsupported sort key '{}'",
                    sort.key
                )));
            }
        }

        match self.store.list(ctx, B::TABLE, &page).await {
            Ok(records) => records.into_iter().map(decode_record).collect(),
            Err(err) => {
                self.emit(ctx, AuditAction::Read, None, AuditOutcome::Failure, Some(&err))
                    .await;
                Err(err)
            }
        }
    }

    fn check(
        &self,
        ctx: &RequestContext,
        permission: PermissionCode,
        resource: Option<&ResourceRef>,
    ) -> CoreResult<()> {
        if self.authorizer.authorize(ctx, permission, resource).is_allowed() {
            Ok(())
        } else {
            Err(CoreError::AuthorizationDenied)
        }
    }

    async fn emit(
        &self,
        ctx: &RequestContext,
        action: AuditAction,
        resource_id: Option<Uuid>,
        outcome: AuditOutcome,
        error: Option<&CoreError>,
    ) {
        let resource = resource_id.map(|id| ResourceRef::new(B::RESOURCE, id));
        let mut event = AuditEvent::for_operation(ctx, action, resource, outcome);
        if let Some(err) = error {
            event = event.with_metadata("error_code", err.code());
        }
        if let Err(err) = self.audit.record(ctx, event).await {
            // Best-effort: the business outcome stands regardless.
            warn!(
                error = %err,
                resource = B::RESOURCE,
                "audit emission failed"
            );
        }
    }
}

/// Audited, RBAC-gated access to number sequences.
///
/// The store does the row-locked counter work; this wrapper adds the same
/// authorization gate and audit discipline as `AuditedEntities`.
pub struct SequenceService {
    store: Arc<dyn SequenceStore>,
    audit: Arc<dyn AuditSink>,
    authorizer: Arc<dyn Authorizer>,
}

impl SequenceService {
    pub fn new(
        store: Arc<dyn SequenceStore>,
        audit: Arc<dyn AuditSink>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self { store, audit, authorizer }
    }

    /// Mint the next counter value.
    #[instrument(
        skip(self, ctx),
        fields(tenant_id = %ctx.tenant_id(), code),
        err
    )]
    pub async fn next(&self, ctx: &RequestContext, code: &str) -> CoreResult<SequenceNumber> {
        if !self
            .authorizer
            .authorize(ctx, PermissionCode::SequenceNext, None)
            .is_allowed()
        {
            self.emit(ctx, AuditAction::SequenceNext, code, AuditOutcome::Denied, None)
                .await;
            return Err(CoreError::AuthorizationDenied);
        }

        match self.store.next(ctx, code).await {
            Ok(number) => Ok(number),
            Err(err) => {
                self.emit(ctx, AuditAction::SequenceNext, code, AuditOutcome::Failure, Some(&err))
                    .await;
                Err(err)
            }
        }
    }

    /// Mint and render the next document number.
    pub async fn generate(&self, ctx: &RequestContext, code: &str) -> CoreResult<String> {
        Ok(self.next(ctx, code).await?.rendered)
    }

    /// Explicitly set the counter (administrative operation; always
    /// audited).
    #[instrument(
        skip(self, ctx),
        fields(tenant_id = %ctx.tenant_id(), code, new_value),
        err
    )]
    pub async fn reset(
        &self,
        ctx: &RequestContext,
        code: &str,
        new_value: Option<i64>,
    ) -> CoreResult<()> {
        if !self
            .authorizer
            .authorize(ctx, PermissionCode::SequenceReset, None)
            .is_allowed()
        {
            self.emit(ctx, AuditAction::SequenceReset, code, AuditOutcome::Denied, None)
                .await;
            return Err(CoreError::AuthorizationDenied);
        }

        let result = self.store.reset(ctx, code, new_value).await;
        let (outcome, err) = match &result {
            Ok(()) => (AuditOutcome::Success, None),
            Err(err) => (AuditOutcome::Failure, Some(err)),
        };
        self.emit(ctx, AuditAction::SequenceReset, code, outcome, err).await;
        result
    }

    async fn emit(
        &self,
        ctx: &RequestContext,
        action: AuditAction,
        code: &str,
        outcome: AuditOutcome,
        error: Option<&CoreError>,
    ) {
        let mut event = AuditEvent::for_operation(ctx, action, None, outcome)
            .with_metadata("sequence_code", code);
        if let Some(err) = error {
            event = event.with_metadata("error_code", err.code());
        }
        if let Err(err) = self.audit.record(ctx, event).await {
            warn!(error = %err, code, "audit emission failed");
        }
    }
}

fn encode_body<B: Serialize>(body: &B) -> CoreResult<serde_json::Value> {
    serde_json::to_value(body)
        .map_err(|e| CoreError::storage(format!("encode entity body: {e}")))
}

fn decode_body<B: DeserializeOwned>(value: serde_json::Value) -> CoreResult<B> {
    serde_json::from_value(value)
        .map_err(|e| CoreError::storage(format!("decode entity body: {e}")))
}

fn decode_record<B: DeserializeOwned>(record: EntityRecord) -> CoreResult<Stored<B>> {
    Ok(Stored {
        id: record.id,
        tenant_id: record.tenant_id,
        body: decode_body(record.body)?,
        meta: record.meta,
    })
}
