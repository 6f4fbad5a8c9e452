//! Storage seam for number sequences.
//!
//! The correctness requirement lives here: two concurrent `next` calls for
//! the same sequence must never observe or return the same value. The
//! Postgres store takes the row lock (`SELECT ... FOR UPDATE`) inside one
//! isolated transaction; the in-memory store serializes through a mutex the
//! same way.

mod postgres;

pub use postgres::PgSequenceStore;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use palisade_auth::RequestContext;
use palisade_core::{CoreError, CoreResult, TenantId};
use palisade_sequences::NumberSequence;

/// A minted counter value plus its rendered document number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceNumber {
    pub value: i64,
    pub rendered: String,
    pub did_reset: bool,
}

#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Provision a sequence (tenant provisioning or on demand).
    async fn create(&self, ctx: &RequestContext, sequence: NumberSequence) -> CoreResult<()>;

    async fn get(&self, ctx: &RequestContext, code: &str) -> CoreResult<Option<NumberSequence>>;

    /// Atomically advance the counter and persist the new state before the
    /// value is handed out.
    async fn next(&self, ctx: &RequestContext, code: &str) -> CoreResult<SequenceNumber>;

    /// Explicitly set the counter, validated against the configured bounds.
    async fn reset(
        &self,
        ctx: &RequestContext,
        code: &str,
        new_value: Option<i64>,
    ) -> CoreResult<()>;
}

/// In-memory sequence store for tests and development.
#[derive(Debug, Default)]
pub struct InMemorySequenceStore {
    sequences: Mutex<HashMap<(TenantId, String), NumberSequence>>,
}

impl InMemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl SequenceStore for InMemorySequenceStore {
    async fn create(&self, ctx: &RequestContext, sequence: NumberSequence) -> CoreResult<()> {
        sequence.validate()?;
        if sequence.tenant_id != ctx.tenant_id() {
            return Err(CoreError::validation("sequence tenant does not match context"));
        }
        let mut sequences = self.sequences.lock().unwrap();
        let key = (sequence.tenant_id, sequence.code.clone());
        if sequences.contains_key(&key) {
            return Err(CoreError::conflict(format!(
                "sequence '{}' already exists",
                sequence.code
            )));
        }
        sequences.insert(key, sequence);
        Ok(())
    }

    async fn get(&self, ctx: &RequestContext, code: &str) -> CoreResult<Option<NumberSequence>> {
        let sequences = self.sequences.lock().unwrap();
        Ok(sequences.get(&(ctx.tenant_id(), code.to_string())).cloned())
    }

    async fn next(&self, ctx: &RequestContext, code: &str) -> CoreResult<SequenceNumber> {
        // The lock plays the role of the database row lock: concurrent
        // callers serialize and each sees the previous caller's write.
        let mut sequences = self.sequences.lock().unwrap();
        let sequence = sequences
            .get_mut(&(ctx.tenant_id(), code.to_string()))
            .filter(|s| s.is_active)
            .ok_or(CoreError::NotFound)?;

        let now = Utc::now();
        let next = sequence.advance(now)?;
        sequence.current_value = next.value;
        if next.did_reset {
            sequence.last_reset_at = Some(now);
        }

        Ok(SequenceNumber {
            value: next.value,
            rendered: sequence.render(next.value),
            did_reset: next.did_reset,
        })
    }

    async fn reset(
        &self,
        ctx: &RequestContext,
        code: &str,
        new_value: Option<i64>,
    ) -> CoreResult<()> {
        let mut sequences = self.sequences.lock().unwrap();
        let sequence = sequences
            .get_mut(&(ctx.tenant_id(), code.to_string()))
            .filter(|s| s.is_active)
            .ok_or(CoreError::NotFound)?;
        sequence.reset_to(new_value, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ctx() -> RequestContext {
        RequestContext::system(TenantId::new())
    }

    async fn store_with_sequence(ctx: &RequestContext) -> InMemorySequenceStore {
        let store = InMemorySequenceStore::new();
        let mut seq = NumberSequence::new(ctx.tenant_id(), "INV").with_prefix("INV");
        seq.current_value = 5;
        store.create(ctx, seq).await.unwrap();
        store
    }

    #[tokio::test]
    async fn invoice_numbering_example() {
        let ctx = ctx();
        let store = store_with_sequence(&ctx).await;

        let number = store.next(&ctx, "INV").await.unwrap();
        assert_eq!(number.value, 6);
        assert_eq!(number.rendered, "INV-000006");

        let persisted = store.get(&ctx, "INV").await.unwrap().unwrap();
        assert_eq!(persisted.current_value, 6);
    }

    #[tokio::test]
    async fn unknown_sequence_is_not_found() {
        let ctx = ctx();
        let store = InMemorySequenceStore::new();
        assert_eq!(store.next(&ctx, "GHOST").await.unwrap_err(), CoreError::NotFound);
    }

    #[tokio::test]
    async fn sequences_are_tenant_scoped() {
        let ctx_a = ctx();
        let ctx_b = ctx();
        let store = store_with_sequence(&ctx_a).await;

        // Same code, different tenant: invisible.
        assert!(store.get(&ctx_b, "INV").await.unwrap().is_none());
        assert_eq!(store.next(&ctx_b, "INV").await.unwrap_err(), CoreError::NotFound);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_next_yields_distinct_values() {
        let ctx = ctx();
        let store = Arc::new(store_with_sequence(&ctx).await);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                store.next(&ctx, "INV").await.unwrap().value
            }));
        }

        let mut values = HashSet::new();
        for handle in handles {
            assert!(values.insert(handle.await.unwrap()), "duplicate value minted");
        }

        assert_eq!(values.len(), 32);
        assert_eq!(*values.iter().max().unwrap(), 5 + 32);
        let persisted = store.get(&ctx, "INV").await.unwrap().unwrap();
        assert_eq!(persisted.current_value, 5 + 32);
    }

    #[tokio::test]
    async fn reset_validates_bounds() {
        let ctx = ctx();
        let store = InMemorySequenceStore::new();
        let seq = NumberSequence::new(ctx.tenant_id(), "DOC").with_bounds(1, Some(100));
        store.create(&ctx, seq).await.unwrap();

        store.reset(&ctx, "DOC", Some(10)).await.unwrap();
        assert_eq!(store.get(&ctx, "DOC").await.unwrap().unwrap().current_value, 10);

        let err = store.reset(&ctx, "DOC", Some(1000)).await.unwrap_err();
        assert_eq!(err.code(), "validation_failed");
    }

    #[tokio::test]
    async fn exhausted_sequence_surfaces_the_error() {
        let ctx = ctx();
        let store = InMemorySequenceStore::new();
        let mut seq = NumberSequence::new(ctx.tenant_id(), "CAP").with_bounds(0, Some(6));
        seq.current_value = 5;
        store.create(&ctx, seq).await.unwrap();

        assert_eq!(store.next(&ctx, "CAP").await.unwrap().value, 6);
        let err = store.next(&ctx, "CAP").await.unwrap_err();
        assert_eq!(err.code(), "sequence_exhausted");
    }
}
