//! End-to-end tests for the audited mutation core over the in-memory seams.
//!
//! Verifies:
//! - RBAC gating (default deny, denial auditing) in front of every verb
//! - optimistic concurrency (one winner, one conflict, nothing lost)
//! - tenant isolation at the store seam
//! - soft-delete asymmetry (reads hide, purge still succeeds)
//! - audit best-effort semantics (a sink failure never masks the outcome)
//! - sequence gating and the invoice-numbering example

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use palisade_audit::{AuditAction, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
use palisade_auth::{
    Authorizer, PermissionCatalog, PermissionCode, RequestContext, RoleCode, TenantScope,
    TenantStatus, VerifiedIdentity,
};
use palisade_core::{CoreError, CoreResult, Page, SortSpec, TenantId, UserId};
use palisade_sequences::NumberSequence;

use crate::entity_store::InMemoryEntityStore;
use crate::sequence_store::{InMemorySequenceStore, SequenceStore};
use crate::service::{AuditedEntities, EntityBody, SequenceService, VerbPermissions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ProjectBody {
    name: String,
    archived: bool,
}

impl ProjectBody {
    fn named(name: &str) -> Self {
        Self { name: name.into(), archived: false }
    }
}

impl EntityBody for ProjectBody {
    const TABLE: &'static str = "projects";
    const RESOURCE: &'static str = "Project";
    const PERMISSIONS: VerbPermissions = VerbPermissions {
        create: PermissionCode::ProjectCreate,
        read: PermissionCode::ProjectRead,
        update: PermissionCode::ProjectUpdate,
        delete: PermissionCode::ProjectDelete,
    };
}

struct Harness {
    store: Arc<InMemoryEntityStore>,
    audit: Arc<InMemoryAuditSink>,
    projects: AuditedEntities<ProjectBody>,
}

fn ctx(tenant: TenantId, role: &'static str) -> RequestContext {
    RequestContext::from_identity(VerifiedIdentity {
        user_id: Some(UserId::new()),
        tenant: Some(TenantScope { tenant_id: tenant, status: TenantStatus::Active }),
        roles: vec![RoleCode::new(role)],
        ..Default::default()
    })
    .unwrap()
}

fn harness(tenant: TenantId) -> Harness {
    let store = InMemoryEntityStore::arc();
    let audit = InMemoryAuditSink::arc();
    let policy = Arc::new(
        PermissionCatalog::builtin()
            .policy_set(tenant, Utc::now())
            .unwrap(),
    );
    let projects = AuditedEntities::new(store.clone(), audit.clone(), policy);
    Harness { store, audit, projects }
}

#[tokio::test]
async fn create_update_roundtrip_with_versioning() {
    let tenant = TenantId::new();
    let h = harness(tenant);
    let manager = ctx(tenant, "manager");

    let created = h.projects.create(&manager, ProjectBody::named("Apollo")).await.unwrap();
    assert_eq!(created.meta.version, 0);
    assert_eq!(created.tenant_id, tenant);
    assert_eq!(created.meta.created_by, manager.user_id());
    assert!(created.meta.deleted_at.is_none());

    let updated = h
        .projects
        .update(&manager, created.id, 0, |body| {
            body.name = "Apollo 11".into();
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(updated.meta.version, 1);
    assert_eq!(updated.body.name, "Apollo 11");

    let fetched = h.projects.find_by_id(&manager, created.id).await.unwrap().unwrap();
    assert_eq!(fetched.body, updated.body);
}

#[tokio::test]
async fn stale_version_conflicts_and_loses_nothing() {
    let tenant = TenantId::new();
    let h = harness(tenant);
    let manager = ctx(tenant, "manager");

    let created = h.projects.create(&manager, ProjectBody::named("Apollo")).await.unwrap();

    // Two writers read version 0. The first wins.
    h.projects
        .update(&manager, created.id, 0, |body| {
            body.name = "first".into();
            Ok(())
        })
        .await
        .unwrap();

    // The second must conflict, not silently overwrite.
    let err = h
        .projects
        .update(&manager, created.id, 0, |body| {
            body.name = "second".into();
            Ok(())
        })
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::OptimisticLock { expected: 0, actual: 1 });
    assert!(err.is_retryable());

    let current = h.projects.find_by_id(&manager, created.id).await.unwrap().unwrap();
    assert_eq!(current.body.name, "first");
    assert_eq!(current.meta.version, 1);

    // The conflict itself was audited as a failed update.
    let failures: Vec<AuditEvent> = h
        .audit
        .events()
        .into_iter()
        .filter(|e| e.action == AuditAction::Update && e.outcome == AuditOutcome::Failure)
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].metadata.get("error_code").and_then(|v| v.as_str()),
        Some("optimistic_lock")
    );
}

#[tokio::test]
async fn denied_verb_is_audited_and_not_executed() {
    let tenant = TenantId::new();
    let h = harness(tenant);
    let member = ctx(tenant, "member");

    let err = h.projects.create(&member, ProjectBody::named("Nope")).await.unwrap_err();
    assert_eq!(err, CoreError::AuthorizationDenied);
    assert_eq!(h.store.live_rows("projects"), 0);

    let events = h.audit.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, AuditOutcome::Denied);
    assert_eq!(
        events[0].metadata.get("error_code").and_then(|v| v.as_str()),
        Some("authorization_denied")
    );

    // Reading is granted to members, so the same context can still list.
    assert!(h.projects.list(&member, Page::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn tenant_isolation_hides_foreign_rows() {
    let tenant_a = TenantId::new();
    let tenant_b = TenantId::new();
    let h = harness(tenant_a);

    // Shared store, two tenants. System contexts skip RBAC so this isolates
    // the storage behavior.
    let ctx_a = RequestContext::system(tenant_a);
    let ctx_b = RequestContext::system(tenant_b);

    let created = h.projects.create(&ctx_a, ProjectBody::named("Secret")).await.unwrap();

    assert!(h.projects.find_by_id(&ctx_b, created.id).await.unwrap().is_none());
    assert!(h.projects.list(&ctx_b, Page::default()).await.unwrap().is_empty());

    let err = h
        .projects
        .update(&ctx_b, created.id, 0, |_| Ok(()))
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::NotFound);

    // Tenant A still sees its row.
    assert_eq!(h.projects.list(&ctx_a, Page::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn soft_delete_hides_reads_but_purge_succeeds() {
    let tenant = TenantId::new();
    let h = harness(tenant);
    let manager = ctx(tenant, "manager");

    let created = h.projects.create(&manager, ProjectBody::named("Doomed")).await.unwrap();
    h.projects.delete(&manager, created.id).await.unwrap();

    // Reads behave as if the row were gone.
    assert!(h.projects.find_by_id(&manager, created.id).await.unwrap().is_none());
    assert!(h.projects.list(&manager, Page::default()).await.unwrap().is_empty());

    // Updating a soft-deleted row is not possible.
    let err = h
        .projects
        .update(&manager, created.id, 0, |_| Ok(()))
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::NotFound);

    // But the purge still reaches it.
    h.projects.purge(&manager, created.id).await.unwrap();
    let err = h.projects.purge(&manager, created.id).await.unwrap_err();
    assert_eq!(err, CoreError::NotFound);
}

struct FailingAuditSink;

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn record(&self, _ctx: &RequestContext, _event: AuditEvent) -> CoreResult<()> {
        Err(CoreError::storage("audit sink unavailable"))
    }
}

#[tokio::test]
async fn audit_failure_never_masks_the_business_outcome() {
    let tenant = TenantId::new();
    let store = InMemoryEntityStore::arc();
    let policy = Arc::new(
        PermissionCatalog::builtin()
            .policy_set(tenant, Utc::now())
            .unwrap(),
    );
    let projects: AuditedEntities<ProjectBody> =
        AuditedEntities::new(store.clone(), Arc::new(FailingAuditSink), policy);
    let manager = ctx(tenant, "manager");

    // Success path survives a dead sink.
    let created = projects.create(&manager, ProjectBody::named("Sturdy")).await.unwrap();
    assert_eq!(store.live_rows("projects"), 1);

    // Failure path keeps its original error, not the sink's.
    let err = projects
        .update(&manager, created.id, 7, |_| Ok(()))
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::OptimisticLock { expected: 7, actual: 0 });
}

#[tokio::test]
async fn list_is_bounded_and_sort_keys_are_allow_listed() {
    let tenant = TenantId::new();
    let h = harness(tenant);
    let manager = ctx(tenant, "manager");

    for i in 0..5 {
        h.projects
            .create(&manager, ProjectBody::named(&format!("p{i}")))
            .await
            .unwrap();
    }

    let page = Page::new(2, 0).with_sort(SortSpec::asc("created_at"));
    assert_eq!(h.projects.list(&manager, page).await.unwrap().len(), 2);

    // Sort keys outside the allow-list never reach the store.
    let err = h
        .projects
        .list(&manager, Page::default().with_sort(SortSpec::asc("name; DROP TABLE projects")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation_failed");
}

#[tokio::test]
async fn sequence_service_gates_and_generates() {
    let tenant = TenantId::new();
    let sequences = InMemorySequenceStore::arc();
    let audit = InMemoryAuditSink::arc();
    let policy: Arc<dyn Authorizer> = Arc::new(
        PermissionCatalog::builtin()
            .policy_set(tenant, Utc::now())
            .unwrap(),
    );
    let service = SequenceService::new(sequences.clone(), audit.clone(), policy);

    let system = RequestContext::system(tenant);
    let mut seq = NumberSequence::new(tenant, "INV").with_prefix("INV");
    seq.current_value = 5;
    sequences.create(&system, seq).await.unwrap();

    // Members may not mint numbers; managers may.
    let member = ctx(tenant, "member");
    let err = service.generate(&member, "INV").await.unwrap_err();
    assert_eq!(err, CoreError::AuthorizationDenied);

    let manager = ctx(tenant, "manager");
    assert_eq!(service.generate(&manager, "INV").await.unwrap(), "INV-000006");

    // Reset is a separate, more privileged permission.
    let err = service.reset(&manager, "INV", Some(0)).await.unwrap_err();
    assert_eq!(err, CoreError::AuthorizationDenied);

    let owner = ctx(tenant, "owner");
    service.reset(&owner, "INV", Some(0)).await.unwrap();
    assert_eq!(service.generate(&owner, "INV").await.unwrap(), "INV-000001");

    // The reset landed in the audit trail.
    assert!(h_audit_contains(&audit, AuditAction::SequenceReset, AuditOutcome::Success));
}

fn h_audit_contains(
    audit: &InMemoryAuditSink,
    action: AuditAction,
    outcome: AuditOutcome,
) -> bool {
    audit
        .events()
        .iter()
        .any(|e| e.action == action && e.outcome == outcome)
}
