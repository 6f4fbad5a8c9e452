//! Postgres sequence store.
//!
//! `next` takes the row lock with `SELECT ... FOR UPDATE` inside one
//! isolated transaction: a concurrent caller blocks on the lock, then sees
//! the committed counter. Uniqueness comes from the lock, not from
//! optimistic retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row};
use tracing::instrument;
use uuid::Uuid;

use palisade_auth::RequestContext;
use palisade_core::{CoreError, CoreResult, TenantId};
use palisade_sequences::{NumberSequence, ResetMode};

use crate::bridge::IsolationBridge;
use crate::error::map_sqlx_error;

use super::{SequenceNumber, SequenceStore};

const COLUMNS: &str = "id, tenant_id, code, current_value, min_value, max_value, step, \
                       reset_mode, reset_value, last_reset_at, prefix, suffix, \
                       padding_length, format_template, is_active";

#[derive(Debug, Clone)]
pub struct PgSequenceStore {
    bridge: IsolationBridge,
}

impl PgSequenceStore {
    pub fn new(bridge: IsolationBridge) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl SequenceStore for PgSequenceStore {
    #[instrument(skip(self, ctx, sequence), fields(tenant_id = %ctx.tenant_id()), err)]
    async fn create(&self, ctx: &RequestContext, sequence: NumberSequence) -> CoreResult<()> {
        sequence.validate()?;
        if sequence.tenant_id != ctx.tenant_id() {
            return Err(CoreError::validation("sequence tenant does not match context"));
        }

        self.bridge
            .with_transaction(ctx, move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO number_sequences \
                         (id, tenant_id, code, current_value, min_value, max_value, step, \
                          reset_mode, reset_value, last_reset_at, prefix, suffix, \
                          padding_length, format_template, is_active) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
                    )
                    .bind(sequence.id)
                    .bind(sequence.tenant_id.as_uuid())
                    .bind(&sequence.code)
                    .bind(sequence.current_value)
                    .bind(sequence.min_value)
                    .bind(sequence.max_value)
                    .bind(sequence.step)
                    .bind(reset_mode_str(sequence.reset_mode))
                    .bind(sequence.reset_value)
                    .bind(sequence.last_reset_at)
                    .bind(&sequence.prefix)
                    .bind(&sequence.suffix)
                    .bind(sequence.padding_length as i32)
                    .bind(&sequence.format_template)
                    .bind(sequence.is_active)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| map_sqlx_error("create_sequence", e))?;
                    Ok(())
                })
            })
            .await
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), code), err)]
    async fn get(&self, ctx: &RequestContext, code: &str) -> CoreResult<Option<NumberSequence>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM number_sequences WHERE tenant_id = $1 AND code = $2"
        );
        let tenant_id = *ctx.tenant_id().as_uuid();
        let code = code.to_string();

        self.bridge
            .with_transaction(ctx, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(&sql)
                        .bind(tenant_id)
                        .bind(&code)
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(|e| map_sqlx_error("get_sequence", e))?;

                    row.map(|row| decode_sequence(&row)).transpose()
                })
            })
            .await
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), code), err)]
    async fn next(&self, ctx: &RequestContext, code: &str) -> CoreResult<SequenceNumber> {
        let lock_sql = format!(
            "SELECT {COLUMNS} FROM number_sequences \
             WHERE tenant_id = $1 AND code = $2 AND is_active \
             FOR UPDATE"
        );
        let tenant_id = *ctx.tenant_id().as_uuid();
        let code = code.to_string();

        self.bridge
            .with_transaction(ctx, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(&lock_sql)
                        .bind(tenant_id)
                        .bind(&code)
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(|e| map_sqlx_error("lock_sequence", e))?
                        .ok_or(CoreError::NotFound)?;
                    let sequence = decode_sequence(&row)?;

                    let now = Utc::now();
                    let next = sequence.advance(now)?;
                    let last_reset_at = if next.did_reset {
                        Some(now)
                    } else {
                        sequence.last_reset_at
                    };

                    // Persist before the value is handed out.
                    sqlx::query(
                        "UPDATE number_sequences \
                         SET current_value = $1, last_reset_at = $2 \
                         WHERE id = $3",
                    )
                    .bind(next.value)
                    .bind(last_reset_at)
                    .bind(sequence.id)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| map_sqlx_error("advance_sequence", e))?;

                    Ok(SequenceNumber {
                        value: next.value,
                        rendered: sequence.render(next.value),
                        did_reset: next.did_reset,
                    })
                })
            })
            .await
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), code), err)]
    async fn reset(
        &self,
        ctx: &RequestContext,
        code: &str,
        new_value: Option<i64>,
    ) -> CoreResult<()> {
        let lock_sql = format!(
            "SELECT {COLUMNS} FROM number_sequences \
             WHERE tenant_id = $1 AND code = $2 AND is_active \
             FOR UPDATE"
        );
        let tenant_id = *ctx.tenant_id().as_uuid();
        let code = code.to_string();

        self.bridge
            .with_transaction(ctx, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(&lock_sql)
                        .bind(tenant_id)
                        .bind(&code)
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(|e| map_sqlx_error("lock_sequence", e))?
                        .ok_or(CoreError::NotFound)?;
                    let mut sequence = decode_sequence(&row)?;

                    sequence.reset_to(new_value, Utc::now())?;

                    sqlx::query(
                        "UPDATE number_sequences \
                         SET current_value = $1, last_reset_at = $2 \
                         WHERE id = $3",
                    )
                    .bind(sequence.current_value)
                    .bind(sequence.last_reset_at)
                    .bind(sequence.id)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| map_sqlx_error("reset_sequence", e))?;
                    Ok(())
                })
            })
            .await
    }
}

fn reset_mode_str(mode: ResetMode) -> &'static str {
    match mode {
        ResetMode::Never => "never",
        ResetMode::Daily => "daily",
        ResetMode::Weekly => "weekly",
        ResetMode::Monthly => "monthly",
        ResetMode::Yearly => "yearly",
    }
}

fn parse_reset_mode(raw: &str) -> CoreResult<ResetMode> {
    match raw {
        "never" => Ok(ResetMode::Never),
        "daily" => Ok(ResetMode::Daily),
        "weekly" => Ok(ResetMode::Weekly),
        "monthly" => Ok(ResetMode::Monthly),
        "yearly" => Ok(ResetMode::Yearly),
        other => Err(CoreError::storage(format!("unknown reset mode '{other}'"))),
    }
}

fn decode_sequence(row: &sqlx::postgres::PgRow) -> CoreResult<NumberSequence> {
    let row = SequenceRow::from_row(row)
        .map_err(|e| CoreError::storage(format!("decode sequence row: {e}")))?;

    Ok(NumberSequence {
        id: row.id,
        tenant_id: TenantId::from_uuid(row.tenant_id),
        code: row.code,
        current_value: row.current_value,
        min_value: row.min_value,
        max_value: row.max_value,
        step: row.step,
        reset_mode: parse_reset_mode(&row.reset_mode)?,
        reset_value: row.reset_value,
        last_reset_at: row.last_reset_at,
        prefix: row.prefix,
        suffix: row.suffix,
        padding_length: row.padding_length.max(0) as usize,
        format_template: row.format_template,
        is_active: row.is_active,
    })
}

#[derive(Debug)]
struct SequenceRow {
    id: Uuid,
    tenant_id: Uuid,
    code: String,
    current_value: i64,
    min_value: i64,
    max_value: Option<i64>,
    step: i64,
    reset_mode: String,
    reset_value: i64,
    last_reset_at: Option<DateTime<Utc>>,
    prefix: String,
    suffix: String,
    padding_length: i32,
    format_template: String,
    is_active: bool,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for SequenceRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(SequenceRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            code: row.try_get("code")?,
            current_value: row.try_get("current_value")?,
            min_value: row.try_get("min_value")?,
            max_value: row.try_get("max_value")?,
            step: row.try_get("step")?,
            reset_mode: row.try_get("reset_mode")?,
            reset_value: row.try_get("reset_value")?,
            last_reset_at: row.try_get("last_reset_at")?,
            prefix: row.try_get("prefix")?,
            suffix: row.try_get("suffix")?,
            padding_length: row.try_get("padding_length")?,
            format_template: row.try_get("format_template")?,
            is_active: row.try_get("is_active")?,
        })
    }
}
