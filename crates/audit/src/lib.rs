//! `palisade-audit` — append-only audit trail.
//!
//! Audit events record who did what to which resource, with what outcome.
//! They are written best-effort on top of the authoritative business result:
//! an emission failure is logged, never propagated.

pub mod event;
pub mod sink;

pub use event::{AuditAction, AuditEvent, AuditOutcome, RequestInfo, Severity};
pub use sink::{AuditSink, InMemoryAuditSink};
