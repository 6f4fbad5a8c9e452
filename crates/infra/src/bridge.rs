//! Isolation bridge: claims-scoped database transactions.
//!
//! Every statement that touches tenant data runs inside a transaction whose
//! first statement publishes the session claims with `set_config(...,
//! true)`. The `true` makes the setting transaction-local: it is discarded on
//! commit, rollback or timeout and can never leak to the next user of the
//! pooled connection. The database's row-level-security policies read the
//! claims back and restrict every subsequent statement to the current
//! tenant, whether or not the query itself filtered by tenant.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{error, instrument, warn};

use palisade_auth::claims::{SessionClaims, CLAIMS_VAR};
use palisade_auth::RequestContext;
use palisade_core::{CoreError, CoreResult};

use crate::error::map_sqlx_error;

/// Timeouts applied to every bridged transaction.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Postgres-side `statement_timeout`, set locally per transaction.
    pub statement_timeout: Duration,
    /// Overall deadline for the operation closure; on expiry the
    /// transaction is rolled back and the caller gets `Timeout`.
    pub transaction_deadline: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_secs(5),
            transaction_deadline: Duration::from_secs(10),
        }
    }
}

/// Opens claims-scoped transactions against an injected pool.
#[derive(Debug, Clone)]
pub struct IsolationBridge {
    pool: PgPool,
    config: BridgeConfig,
}

impl IsolationBridge {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, config: BridgeConfig::default() }
    }

    pub fn with_config(pool: PgPool, config: BridgeConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `op` inside an isolated transaction.
    ///
    /// Claims publication failure aborts the transaction (`IsolationPublish`,
    /// never downgraded to "proceed without isolation"). The closure result
    /// decides commit vs rollback; exceeding the deadline rolls back and
    /// returns `Timeout`.
    #[instrument(
        skip(self, ctx, op),
        fields(
            tenant_id = %ctx.tenant_id(),
            correlation_id = %ctx.correlation_id()
        ),
        err
    )]
    pub async fn with_transaction<T, F>(&self, ctx: &RequestContext, op: F) -> CoreResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(
                &'t mut PgConnection,
            ) -> Pin<Box<dyn Future<Output = CoreResult<T>> + Send + 't>>
            + Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Err(err) = publish_claims(&mut tx, ctx, &self.config).await {
            error!(
                tenant_id = %ctx.tenant_id(),
                error = %err,
                "failed to publish session claims; aborting transaction"
            );
            rollback(tx).await;
            return Err(err);
        }

        let result =
            match tokio::time::timeout(self.config.transaction_deadline, op(&mut *tx)).await {
                Ok(result) => result,
                Err(_) => {
                    rollback(tx).await;
                    return Err(CoreError::Timeout);
                }
            };

        match result {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                Ok(value)
            }
            Err(err) => {
                rollback(tx).await;
                Err(err)
            }
        }
    }
}

/// Publish the claims payload and the local statement timeout as the first
/// statements of the transaction.
async fn publish_claims(
    tx: &mut Transaction<'static, Postgres>,
    ctx: &RequestContext,
    config: &BridgeConfig,
) -> CoreResult<()> {
    let payload = SessionClaims::from_context(ctx).to_json()?;

    sqlx::query("SELECT set_config($1, $2, true)")
        .bind(CLAIMS_VAR)
        .bind(&payload)
        .execute(&mut **tx)
        .await
        .map_err(|e| CoreError::IsolationPublish(e.to_string()))?;

    let timeout = format!("{}ms", config.statement_timeout.as_millis());
    sqlx::query("SELECT set_config('statement_timeout', $1, true)")
        .bind(&timeout)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("set_statement_timeout", e))?;

    Ok(())
}

async fn rollback(tx: Transaction<'static, Postgres>) {
    if let Err(err) = tx.rollback().await {
        warn!(error = %err, "transaction rollback failed");
    }
}
