//! Types for the budget ledger.
//!
//! Money is tracked in integer micro-dollars (1 USD = 1_000_000 micros) to
//! keep running totals free of floating-point drift; the public API accepts
//! and reports USD as `f64` at the edge only.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One millionth of a USD.
pub type MicroUsd = u64;

/// Convert a USD amount to micro-dollars, rounding to the nearest micro.
pub fn micro_usd(usd: f64) -> MicroUsd {
    (usd.max(0.0) * 1_000_000.0).round() as MicroUsd
}

/// Convert micro-dollars back to USD.
pub fn usd(micros: MicroUsd) -> f64 {
    micros as f64 / 1_000_000.0
}

/// A single cost entry feeding the per-user ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub owner: Uuid,
    pub operation: String,
    /// Unit of work the spend is attributed to (an agent run, a scheduled task)
    pub task_id: Option<Uuid>,
    pub tokens: u64,
    pub cost_micros: MicroUsd,
    pub created_at: DateTime<Utc>,
}

/// Per-owner spending caps and alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLimit {
    pub owner: Uuid,
    pub per_task_micros: Option<MicroUsd>,
    pub daily_micros: Option<MicroUsd>,
    pub monthly_micros: Option<MicroUsd>,
    /// When true a cap refuses spend; when false it only raises alerts
    pub hard_stop: bool,
    /// Fractions of a cap that trigger notifications when crossed
    #[serde(default = "default_alert_thresholds")]
    pub alert_thresholds: Vec<f64>,
}

pub fn default_alert_thresholds() -> Vec<f64> {
    vec![0.5, 0.75, 0.9]
}

impl UsageLimit {
    pub fn new(owner: Uuid) -> Self {
        Self {
            owner,
            per_task_micros: None,
            daily_micros: None,
            monthly_micros: None,
            hard_stop: true,
            alert_thresholds: default_alert_thresholds(),
        }
    }

    pub fn per_task_usd(mut self, cap: f64) -> Self {
        self.per_task_micros = Some(micro_usd(cap));
        self
    }

    pub fn daily_usd(mut self, cap: f64) -> Self {
        self.daily_micros = Some(micro_usd(cap));
        self
    }

    pub fn monthly_usd(mut self, cap: f64) -> Self {
        self.monthly_micros = Some(micro_usd(cap));
        self
    }

    pub fn soft(mut self) -> Self {
        self.hard_stop = false;
        self
    }
}

/// Which cap a refusal was measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetScope {
    #[serde(rename = "per-task")]
    PerTask,
    Daily,
    Monthly,
}

impl std::fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerTask => write!(f, "per-task"),
            Self::Daily => write!(f, "daily"),
            Self::Monthly => write!(f, "monthly"),
        }
    }
}

/// Per-owner running totals, updated by compare-and-swap on a version counter
/// so that multiple process instances can share the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRow {
    pub owner: Uuid,
    pub day_key: String,
    pub day_micros: MicroUsd,
    pub month_key: String,
    pub month_micros: MicroUsd,
    pub task_micros: HashMap<Uuid, MicroUsd>,
}

impl LedgerRow {
    pub fn empty(owner: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            owner,
            day_key: day_key(now),
            day_micros: 0,
            month_key: month_key(now),
            month_micros: 0,
            task_micros: HashMap::new(),
        }
    }

    /// Reset day/month totals whose period has rolled over.
    pub fn rolled(mut self, now: DateTime<Utc>) -> Self {
        let day = day_key(now);
        if self.day_key != day {
            self.day_key = day;
            self.day_micros = 0;
        }
        let month = month_key(now);
        if self.month_key != month {
            self.month_key = month;
            self.month_micros = 0;
        }
        self
    }

    pub fn task_total(&self, task_id: Option<Uuid>) -> MicroUsd {
        task_id
            .and_then(|id| self.task_micros.get(&id).copied())
            .unwrap_or(0)
    }
}

pub fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

pub fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Running totals returned after a charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageTotals {
    pub today_usd: f64,
    pub month_usd: f64,
    pub task_usd: Option<f64>,
}

/// Outcome of a passed budget check.
#[derive(Debug, Clone, Default)]
pub struct BudgetCheck {
    /// Alert thresholds the proposed spend newly crosses, ascending
    pub crossed: Vec<f64>,
}

/// Errors in ledger operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BudgetError {
    #[error(
        "Budget exceeded ({scope}): spending ${attempted_usd:.4} on top of ${spent_usd:.4} would pass the ${cap_usd:.2} cap"
    )]
    BudgetExceeded {
        scope: BudgetScope,
        spent_usd: f64,
        attempted_usd: f64,
        cap_usd: f64,
    },

    #[error("Ledger row for {0} was concurrently modified")]
    StaleRow(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn micro_conversion_round_trips_cents() {
        assert_eq!(micro_usd(0.60), 600_000);
        assert_eq!(usd(600_000), 0.60);
        assert_eq!(micro_usd(1.00), 1_000_000);
    }

    #[test]
    fn rollover_resets_elapsed_periods() {
        let jan31 = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        let feb1 = Utc.with_ymd_and_hms(2026, 2, 1, 0, 5, 0).unwrap();

        let mut row = LedgerRow::empty(Uuid::new_v4(), jan31);
        row.day_micros = 500_000;
        row.month_micros = 2_000_000;
        let task = Uuid::new_v4();
        row.task_micros.insert(task, 300_000);

        let rolled = row.rolled(feb1);
        assert_eq!(rolled.day_micros, 0);
        assert_eq!(rolled.month_micros, 0);
        // Per-task totals follow the task's lifetime, not the calendar.
        assert_eq!(rolled.task_total(Some(task)), 300_000);
    }
}
