//! Ledger storage with pluggable backends.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{BudgetError, LedgerRow, UsageLimit, UsageRecord};

/// Ledger store trait - implemented by all storage backends.
///
/// `load_row`/`store_row` form the compare-and-swap pair: `store_row` must
/// reject a write whose expected version no longer matches, so concurrent
/// writers from any process instance fall back to re-read and retry.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn put_limit(&self, limit: UsageLimit) -> Result<(), BudgetError>;

    async fn limit_for(&self, owner: Uuid) -> Result<Option<UsageLimit>, BudgetError>;

    /// Current row and its version; a fresh owner gets an empty row at version 0.
    async fn load_row(&self, owner: Uuid) -> Result<(LedgerRow, u64), BudgetError>;

    /// Replace the row if the stored version still equals `expected_version`.
    async fn store_row(&self, row: LedgerRow, expected_version: u64) -> Result<(), BudgetError>;

    async fn append_record(&self, record: UsageRecord) -> Result<(), BudgetError>;

    async fn records_for_owner(&self, owner: Uuid) -> Result<Vec<UsageRecord>, BudgetError>;
}

#[derive(Default)]
struct LedgerState {
    limits: HashMap<Uuid, UsageLimit>,
    rows: HashMap<Uuid, (LedgerRow, u64)>,
    records: Vec<UsageRecord>,
}

/// In-memory ledger store (non-persistent).
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn put_limit(&self, limit: UsageLimit) -> Result<(), BudgetError> {
        self.state.write().await.limits.insert(limit.owner, limit);
        Ok(())
    }

    async fn limit_for(&self, owner: Uuid) -> Result<Option<UsageLimit>, BudgetError> {
        Ok(self.state.read().await.limits.get(&owner).cloned())
    }

    async fn load_row(&self, owner: Uuid) -> Result<(LedgerRow, u64), BudgetError> {
        Ok(self
            .state
            .read()
            .await
            .rows
            .get(&owner)
            .cloned()
            .unwrap_or_else(|| (LedgerRow::empty(owner, Utc::now()), 0)))
    }

    async fn store_row(&self, row: LedgerRow, expected_version: u64) -> Result<(), BudgetError> {
        let mut state = self.state.write().await;
        let current = state.rows.get(&row.owner).map(|(_, v)| *v).unwrap_or(0);
        if current != expected_version {
            return Err(BudgetError::StaleRow(row.owner));
        }
        let owner = row.owner;
        state.rows.insert(owner, (row, expected_version + 1));
        Ok(())
    }

    async fn append_record(&self, record: UsageRecord) -> Result<(), BudgetError> {
        self.state.write().await.records.push(record);
        Ok(())
    }

    async fn records_for_owner(&self, owner: Uuid) -> Result<Vec<UsageRecord>, BudgetError> {
        Ok(self
            .state
            .read()
            .await
            .records
            .iter()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect())
    }
}
