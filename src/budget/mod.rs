//! Budget ledger: per-owner spend tracking and cap enforcement.
//!
//! # Invariants
//! - A hard-stop cap is never jointly exceeded by concurrent callers: the
//!   check-then-charge sequence runs under a per-owner critical section.
//! - A refused check records no spend.
//! - Totals are updated through a versioned row compare-and-swap, so the
//!   ledger stays correct when several process instances share a backend.

mod store;
mod types;

pub use store::{InMemoryLedgerStore, LedgerStore};
pub use types::{
    default_alert_thresholds, micro_usd, usd, BudgetCheck, BudgetError, BudgetScope, LedgerRow,
    MicroUsd, UsageLimit, UsageRecord, UsageTotals,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Per-owner spend ledger over a pluggable backend.
pub struct BudgetLedger {
    store: Arc<dyn LedgerStore>,
    owner_locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl BudgetLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            owner_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub async fn set_limit(&self, limit: UsageLimit) -> Result<(), BudgetError> {
        self.store.put_limit(limit).await
    }

    pub async fn records(&self, owner: Uuid) -> Result<Vec<UsageRecord>, BudgetError> {
        self.store.records_for_owner(owner).await
    }

    /// Check whether a proposed spend fits the owner's caps.
    ///
    /// With `hard_stop` set, a cap that would be exceeded fails with
    /// [`BudgetError::BudgetExceeded`] and nothing is recorded. Otherwise the
    /// check passes and reports which alert thresholds the spend newly
    /// crosses. Owners without a configured limit always pass.
    pub async fn check(
        &self,
        owner: Uuid,
        task_id: Option<Uuid>,
        cost_usd: f64,
    ) -> Result<BudgetCheck, BudgetError> {
        let Some(limit) = self.store.limit_for(owner).await? else {
            return Ok(BudgetCheck::default());
        };
        let (row, _) = self.store.load_row(owner).await?;
        evaluate_spend(&limit, &row.rolled(Utc::now()), task_id, micro_usd(cost_usd))
    }

    /// Append a usage record and return the new running totals.
    ///
    /// Callers are expected to `check` first; `charge` itself never refuses.
    pub async fn charge(
        &self,
        owner: Uuid,
        operation: &str,
        task_id: Option<Uuid>,
        tokens: u64,
        cost_usd: f64,
    ) -> Result<UsageTotals, BudgetError> {
        let cost = micro_usd(cost_usd);
        let row = loop {
            let (row, version) = self.store.load_row(owner).await?;
            let mut row = row.rolled(Utc::now());
            row.day_micros += cost;
            row.month_micros += cost;
            if let Some(task) = task_id {
                *row.task_micros.entry(task).or_insert(0) += cost;
            }
            match self.store.store_row(row.clone(), version).await {
                Ok(()) => break row,
                Err(BudgetError::StaleRow(_)) => continue,
                Err(e) => return Err(e),
            }
        };

        self.store
            .append_record(UsageRecord {
                id: Uuid::new_v4(),
                owner,
                operation: operation.to_string(),
                task_id,
                tokens,
                cost_micros: cost,
                created_at: Utc::now(),
            })
            .await?;
        debug!(%owner, operation, cost_usd, "usage charged");

        Ok(UsageTotals {
            today_usd: usd(row.day_micros),
            month_usd: usd(row.month_micros),
            task_usd: task_id.map(|t| usd(row.task_total(Some(t)))),
        })
    }

    /// Check-then-charge under the owner's critical section.
    ///
    /// This is the path concurrent agent runs must use: two simultaneous
    /// callers cannot both pass a check that only one spend can satisfy.
    pub async fn charge_checked(
        &self,
        owner: Uuid,
        operation: &str,
        task_id: Option<Uuid>,
        tokens: u64,
        cost_usd: f64,
    ) -> Result<(BudgetCheck, UsageTotals), BudgetError> {
        let lock = self.owner_lock(owner);
        let _guard = lock.lock().await;
        let check = self.check(owner, task_id, cost_usd).await?;
        let totals = self
            .charge(owner, operation, task_id, tokens, cost_usd)
            .await?;
        Ok((check, totals))
    }

    fn owner_lock(&self, owner: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.owner_locks.lock().unwrap();
        locks
            .entry(owner)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Measure a proposed spend against every configured cap.
fn evaluate_spend(
    limit: &UsageLimit,
    row: &LedgerRow,
    task_id: Option<Uuid>,
    cost: MicroUsd,
) -> Result<BudgetCheck, BudgetError> {
    let scopes = [
        (BudgetScope::PerTask, limit.per_task_micros, row.task_total(task_id)),
        (BudgetScope::Daily, limit.daily_micros, row.day_micros),
        (BudgetScope::Monthly, limit.monthly_micros, row.month_micros),
    ];

    let mut crossed = Vec::new();
    for (scope, cap, spent) in scopes {
        let Some(cap) = cap else { continue };
        if spent + cost > cap && limit.hard_stop {
            return Err(BudgetError::BudgetExceeded {
                scope,
                spent_usd: usd(spent),
                attempted_usd: usd(cost),
                cap_usd: usd(cap),
            });
        }
        if cap == 0 {
            continue;
        }
        let before = spent as f64 / cap as f64;
        let after = (spent + cost) as f64 / cap as f64;
        for &threshold in &limit.alert_thresholds {
            if before < threshold && after >= threshold {
                crossed.push(threshold);
            }
        }
    }
    crossed.sort_by(|a, b| a.total_cmp(b));
    crossed.dedup();
    Ok(BudgetCheck { crossed })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> BudgetLedger {
        BudgetLedger::new(Arc::new(InMemoryLedgerStore::new()))
    }

    #[tokio::test]
    async fn per_task_hard_cap_refuses_without_recording_spend() {
        let ledger = ledger();
        let owner = Uuid::new_v4();
        let task = Uuid::new_v4();
        ledger
            .set_limit(UsageLimit::new(owner).per_task_usd(1.00))
            .await
            .unwrap();

        let (_, totals) = ledger
            .charge_checked(owner, "inference", Some(task), 1200, 0.60)
            .await
            .unwrap();
        assert_eq!(totals.task_usd, Some(0.60));

        let err = ledger
            .charge_checked(owner, "inference", Some(task), 900, 0.50)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BudgetError::BudgetExceeded {
                scope: BudgetScope::PerTask,
                ..
            }
        ));

        // The refused charge left the ledger untouched.
        let total: MicroUsd = ledger
            .records(owner)
            .await
            .unwrap()
            .iter()
            .map(|r| r.cost_micros)
            .sum();
        assert_eq!(total, micro_usd(0.60));
    }

    #[tokio::test]
    async fn soft_cap_reports_newly_crossed_thresholds() {
        let ledger = ledger();
        let owner = Uuid::new_v4();
        ledger
            .set_limit(UsageLimit::new(owner).daily_usd(1.00).soft())
            .await
            .unwrap();

        let (check, _) = ledger
            .charge_checked(owner, "inference", None, 0, 0.60)
            .await
            .unwrap();
        assert_eq!(check.crossed, vec![0.5]);

        let (check, _) = ledger
            .charge_checked(owner, "inference", None, 0, 0.20)
            .await
            .unwrap();
        assert_eq!(check.crossed, vec![0.75]);

        // Soft caps never refuse, even past 100%.
        let (check, totals) = ledger
            .charge_checked(owner, "inference", None, 0, 0.40)
            .await
            .unwrap();
        assert_eq!(check.crossed, vec![0.9]);
        assert_eq!(totals.today_usd, 1.20);
    }

    #[tokio::test]
    async fn owner_without_limit_always_passes() {
        let ledger = ledger();
        let owner = Uuid::new_v4();
        let check = ledger.check(owner, None, 100.0).await.unwrap();
        assert!(check.crossed.is_empty());
    }

    #[tokio::test]
    async fn concurrent_chargers_never_jointly_exceed_a_hard_cap() {
        let ledger = Arc::new(ledger());
        let owner = Uuid::new_v4();
        let task = Uuid::new_v4();
        ledger
            .set_limit(UsageLimit::new(owner).per_task_usd(1.00))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .charge_checked(owner, "inference", Some(task), 0, 0.30)
                    .await
                    .is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        // Exactly three $0.30 charges fit under $1.00.
        assert_eq!(successes, 3);
        let total: MicroUsd = ledger
            .records(owner)
            .await
            .unwrap()
            .iter()
            .map(|r| r.cost_micros)
            .sum();
        assert_eq!(total, micro_usd(0.90));
    }
}
