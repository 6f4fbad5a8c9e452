//! `palisade-infra` — Postgres-backed security core.
//!
//! The isolation bridge (transaction-local session claims consumed by the
//! database's row-level-security policies), the audited entity store, grant
//! loading and catalog seeding, the Postgres audit sink, and the sequence
//! store.
//!
//! The pool handle is injected explicitly; request-scoped claims are never
//! stored on a shared object. They live in the transaction and die with it.

pub mod audit_sink;
pub mod bridge;
pub mod entity_store;
mod error;
pub mod grants;
pub mod sequence_store;
pub mod service;

#[cfg(test)]
mod integration_tests;

pub use audit_sink::PgAuditSink;
pub use bridge::{BridgeConfig, IsolationBridge};
pub use entity_store::{EntityRecord, EntityStore, InMemoryEntityStore, PgEntityStore};
pub use grants::PgGrantLoader;
pub use sequence_store::{
    InMemorySequenceStore, PgSequenceStore, SequenceNumber, SequenceStore,
};
pub use service::{AuditedEntities, EntityBody, SequenceService, VerbPermissions};

/// Embedded schema + row-level-security migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
