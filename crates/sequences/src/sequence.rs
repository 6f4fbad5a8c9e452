//! Number sequence state machine.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use palisade_core::{CoreError, CoreResult, TenantId};

/// When the counter returns to its reset value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetMode {
    Never,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Result of advancing a sequence.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NextValue {
    pub value: i64,
    pub did_reset: bool,
}

/// Tenant-scoped monotonic counter.
///
/// Mutated only through the atomic "get next" operation of the store; never
/// deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberSequence {
    pub id: Uuid,
    pub tenant_id: TenantId,
    /// Unique per tenant.
    pub code: String,
    pub current_value: i64,
    pub min_value: i64,
    /// `None` = unbounded.
    pub max_value: Option<i64>,
    pub step: i64,
    pub reset_mode: ResetMode,
    pub reset_value: i64,
    pub last_reset_at: Option<DateTime<Utc>>,
    pub prefix: String,
    pub suffix: String,
    pub padding_length: usize,
    /// Render template; `{prefix}`, `{number}` and `{suffix}` are
    /// substituted.
    pub format_template: String,
    pub is_active: bool,
}

impl NumberSequence {
    pub fn new(tenant_id: TenantId, code: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            code: code.into(),
            current_value: 0,
            min_value: 0,
            max_value: None,
            step: 1,
            reset_mode: ResetMode::Never,
            reset_value: 0,
            last_reset_at: None,
            prefix: String::new(),
            suffix: String::new(),
            padding_length: 6,
            format_template: "{number}".into(),
            is_active: true,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self.format_template = "{prefix}-{number}".into();
        self
    }

    pub fn with_reset(mut self, mode: ResetMode, reset_value: i64) -> Self {
        self.reset_mode = mode;
        self.reset_value = reset_value;
        self
    }

    pub fn with_bounds(mut self, min_value: i64, max_value: Option<i64>) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    /// Sanity-check the configuration.
    pub fn validate(&self) -> CoreResult<()> {
        if self.code.trim().is_empty() {
            return Err(CoreError::validation("sequence code must not be empty"));
        }
        if self.step < 1 {
            return Err(CoreError::validation("sequence step must be >= 1"));
        }
        if let Some(max) = self.max_value {
            if max < self.min_value {
                return Err(CoreError::validation(
                    "sequence max_value must be >= min_value",
                ));
            }
        }
        Ok(())
    }

    /// Whether a configured reset boundary lies between `last_reset_at` and
    /// `now`.
    ///
    /// Daily/monthly/yearly compare the calendar component; weekly compares
    /// ISO week identifiers. Without a recorded last reset there is no
    /// boundary to cross.
    pub fn should_auto_reset(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_reset_at else {
            return false;
        };
        match self.reset_mode {
            ResetMode::Never => false,
            ResetMode::Daily => now.date_naive() != last.date_naive(),
            ResetMode::Weekly => {
                let (a, b) = (now.iso_week(), last.iso_week());
                (a.year(), a.week()) != (b.year(), b.week())
            }
            ResetMode::Monthly => (now.year(), now.month()) != (last.year(), last.month()),
            ResetMode::Yearly => now.year() != last.year(),
        }
    }

    /// Compute the next value without persisting it.
    ///
    /// The store is responsible for doing this under the row lock and
    /// writing back `current_value` (and `last_reset_at` on reset) before
    /// the value is handed out.
    pub fn advance(&self, now: DateTime<Utc>) -> CoreResult<NextValue> {
        let did_reset = self.should_auto_reset(now);
        let base = if did_reset { self.reset_value } else { self.current_value };
        let mut candidate = base
            .checked_add(self.step)
            .ok_or_else(|| CoreError::SequenceExhausted { code: self.code.clone() })?;

        if candidate < self.min_value {
            if !did_reset {
                // Clamping on a non-reset advance means the counter sits
                // below min_value; almost certainly a misconfigured bound.
                warn!(
                    sequence = %self.code,
                    candidate,
                    min_value = self.min_value,
                    "sequence candidate clamped to min_value outside a reset"
                );
            }
            candidate = self.min_value;
        }

        if let Some(max) = self.max_value {
            if candidate > max {
                return Err(CoreError::SequenceExhausted { code: self.code.clone() });
            }
        }

        Ok(NextValue { value: candidate, did_reset })
    }

    /// Explicitly set the counter, validated against the configured bounds.
    pub fn reset_to(&mut self, new_value: Option<i64>, now: DateTime<Utc>) -> CoreResult<()> {
        let value = new_value.unwrap_or(self.reset_value);
        if value < self.min_value {
            return Err(CoreError::validation(format!(
                "reset value {value} is below min_value {}",
                self.min_value
            )));
        }
        if let Some(max) = self.max_value {
            if value > max {
                return Err(CoreError::validation(format!(
                    "reset value {value} exceeds max_value {max}"
                )));
            }
        }
        self.current_value = value;
        self.last_reset_at = Some(now);
        Ok(())
    }

    /// Render a counter value through the format template.
    pub fn render(&self, value: i64) -> String {
        let number = format!("{:0width$}", value, width = self.padding_length);
        self.format_template
            .replace("{prefix}", &self.prefix)
            .replace("{number}", &number)
            .replace("{suffix}", &self.suffix)
    }
}
