//! Overdue fine arithmetic.
//!
//! Any started day past the due instant is charged as a full day. The same
//! calculation finalises a fine at return time and estimates the accruing
//! fine on loans that are still open.

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const ONE_DAY_MS: i64 = 86_400_000;
pub const DEFAULT_FINE_PER_DAY: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Fine {
    pub days_overdue: i64,
    pub amount: i64,
}

impl Fine {
    pub const NONE: Fine = Fine { days_overdue: 0, amount: 0 };

    pub fn is_charged(&self) -> bool {
        self.amount > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinePolicy {
    pub per_day: i64,
}

impl Default for FinePolicy {
    fn default() -> Self {
        Self { per_day: DEFAULT_FINE_PER_DAY }
    }
}

impl FinePolicy {
    pub fn new(per_day: i64) -> Self {
        Self { per_day }
    }

    /// Fine owed for an item due at `due` when measured at `reference`.
    /// Never negative: a reference at or before `due` (including clock skew)
    /// owes nothing.
    pub fn assess(&self, due: DateTime<Utc>, reference: DateTime<Utc>) -> Fine {
        let overdue_ms = (reference - due).num_milliseconds();
        if overdue_ms <= 0 {
            return Fine::NONE;
        }

        // ceil for a positive numerator
        let days_overdue = (overdue_ms - 1) / ONE_DAY_MS + 1;
        Fine {
            days_overdue,
            amount: days_overdue.saturating_mul(self.per_day),
        }
    }
}

/// [`FinePolicy::assess`] at the standard rate.
pub fn overdue_fine(due: DateTime<Utc>, reference: DateTime<Utc>) -> Fine {
    FinePolicy::default().assess(due, reference)
}
