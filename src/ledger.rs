//! C1 — Ledger Store: the append-mostly, guarded-transition system of
//! record for every transaction. Balances are a cache over this store;
//! this module is the only thing that may ever create or advance a
//! `Transaction`.
//!
//! Persistence is in-process (`DashMap`-backed), matching the teacher
//! corpus's precedent for process-wide shared state
//! (`FacilitatorConfig::used_nonces: Arc<RwLock<HashSet<String>>>`) — see
//! DESIGN.md. The `LedgerStore` trait exists so a durable backend can be
//! swapped in later without touching call sites.

use crate::errors::{EngineError, Result};
use crate::types::{Transaction, TransactionStatus, TransactionType};
use crate::utils::now;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Filter for `LedgerStore::find` / `count`.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub user_id: Option<String>,
    pub kind: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub include_deleted: bool,
}

impl TransactionFilter {
    fn matches(&self, txn: &Transaction) -> bool {
        if !self.include_deleted && txn.deleted {
            return false;
        }
        if let Some(uid) = &self.user_id {
            if &txn.user_id != uid {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if txn.kind != kind {
                return false;
            }
        }
        if let Some(status) = self.status {
            if txn.status != status {
                return false;
            }
        }
        true
    }
}

/// Offset-based pagination request/response, matching the `{page, limit}` /
/// `{page, limit, total, totalPages}` envelope shape in spec.md §6.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    pub total_pages: u32,
}

/// Allowed status transitions, per spec.md §4.1. Anything not listed here
/// (including any transition out of a terminal status) is illegal.
fn allowed_transition(from: TransactionStatus, to: TransactionStatus) -> bool {
    use TransactionStatus::*;
    if from.is_terminal() {
        return false;
    }
    matches!(
        (from, to),
        (Pending, Processing)
            | (Pending, Failed)
            | (Pending, Cancelled)
            | (PendingOtpVerification, PendingAdminApproval)
            | (PendingOtpVerification, Cancelled)
            | (PendingOtpVerification, Failed)
            | (PendingAdminApproval, Processing)
            | (PendingAdminApproval, RejectedByAdmin)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Processing, Refunded)
    )
}

/// A patch applied alongside a guarded status transition — lets callers
/// update `payment_provider`/`metadata` atomically with the status move.
pub type StatusPatch = Box<dyn FnOnce(&mut Transaction) + Send>;

/// The Ledger Store contract (C1).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts a new record. Fails with `DuplicateKey` if `transaction_id` exists.
    async fn append(&self, txn: Transaction) -> Result<Transaction>;

    async fn find_by_id(&self, transaction_id: &str) -> Result<Option<Transaction>>;

    /// Alias kept distinct from `find_by_id` because callers sometimes look
    /// up by the externally-visible id from a different context (webhook
    /// ingress keyed by session rather than by record id); today both ids
    /// are the same string, but the seam matters per spec.md §4.1.
    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Transaction>> {
        self.find_by_id(transaction_id).await
    }

    async fn find(&self, filter: TransactionFilter, pagination: Pagination) -> Result<Page<Transaction>>;

    async fn count(&self, filter: TransactionFilter) -> Result<usize>;

    /// Guarded compare-and-set. `patch` is applied only if the transition is legal.
    async fn update_status(
        &self,
        transaction_id: &str,
        new_status: TransactionStatus,
        patch: Option<StatusPatch>,
    ) -> Result<Transaction>;

    /// Withdrawals currently in `processing`, for the reconciler (C7), newest first is not required.
    async fn find_processing_withdrawals(&self, limit: usize) -> Result<Vec<Transaction>>;

    /// Soft-deletes a record (admin recovery tooling only; never used on the write path).
    async fn soft_delete(&self, transaction_id: &str) -> Result<()>;
}

/// In-memory `LedgerStore` implementation.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    records: Arc<DashMap<String, Transaction>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn append(&self, txn: Transaction) -> Result<Transaction> {
        if self.records.contains_key(&txn.transaction_id) {
            return Err(EngineError::DuplicateKey(txn.transaction_id.clone()));
        }
        self.records.insert(txn.transaction_id.clone(), txn.clone());
        Ok(txn)
    }

    async fn find_by_id(&self, transaction_id: &str) -> Result<Option<Transaction>> {
        Ok(self.records.get(transaction_id).map(|r| r.clone()))
    }

    async fn find(&self, filter: TransactionFilter, pagination: Pagination) -> Result<Page<Transaction>> {
        let mut matching: Vec<Transaction> = self
            .records
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len();
        let limit = pagination.limit.max(1);
        let page = pagination.page.max(1);
        let start = ((page - 1) as usize) * (limit as usize);
        let items = matching.into_iter().skip(start).take(limit as usize).collect();
        let total_pages = ((total as u32) + limit - 1) / limit.max(1);

        Ok(Page {
            items,
            page,
            limit,
            total,
            total_pages: total_pages.max(1),
        })
    }

    async fn count(&self, filter: TransactionFilter) -> Result<usize> {
        Ok(self.records.iter().filter(|e| filter.matches(e.value())).count())
    }

    async fn update_status(
        &self,
        transaction_id: &str,
        new_status: TransactionStatus,
        patch: Option<StatusPatch>,
    ) -> Result<Transaction> {
        let mut entry = self
            .records
            .get_mut(transaction_id)
            .ok_or_else(|| EngineError::NotFound(transaction_id.to_string()))?;

        if !allowed_transition(entry.status, new_status) {
            return Err(EngineError::IllegalTransition(format!(
                "{:?} -> {:?}",
                entry.status, new_status
            )));
        }

        entry.status = new_status;
        entry.updated_at = now();
        if let Some(patch) = patch {
            patch(&mut entry);
        }
        Ok(entry.clone())
    }

    async fn find_processing_withdrawals(&self, limit: usize) -> Result<Vec<Transaction>> {
        let mut items: Vec<Transaction> = self
            .records
            .iter()
            .filter(|e| {
                !e.deleted
                    && e.kind == TransactionType::Withdrawal
                    && e.status == TransactionStatus::Processing
            })
            .map(|e| e.value().clone())
            .collect();
        items.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn soft_delete(&self, transaction_id: &str) -> Result<()> {
        let mut entry = self
            .records
            .get_mut(transaction_id)
            .ok_or_else(|| EngineError::NotFound(transaction_id.to_string()))?;
        entry.deleted = true;
        entry.updated_at = now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Currency;
    use rust_decimal::Decimal;

    fn sample(id: &str, status: TransactionStatus, kind: TransactionType) -> Transaction {
        Transaction {
            transaction_id: id.to_string(),
            user_id: "user-1".to_string(),
            kind,
            amount: Decimal::new(1000, 0),
            currency: Currency::Xaf,
            fee: Decimal::ZERO,
            status,
            description: "test".to_string(),
            payment_provider: None,
            metadata: vec![],
            created_at: now(),
            updated_at: now(),
            deleted: false,
        }
    }

    #[tokio::test]
    async fn append_rejects_duplicate_transaction_id() {
        let store = InMemoryLedger::new();
        let txn = sample("t1", TransactionStatus::Pending, TransactionType::Deposit);
        store.append(txn.clone()).await.unwrap();
        let err = store.append(txn).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn update_status_enforces_allowed_transitions() {
        let store = InMemoryLedger::new();
        store
            .append(sample("t1", TransactionStatus::Pending, TransactionType::Deposit))
            .await
            .unwrap();

        store
            .update_status("t1", TransactionStatus::Processing, None)
            .await
            .unwrap();
        store
            .update_status("t1", TransactionStatus::Completed, None)
            .await
            .unwrap();

        let err = store
            .update_status("t1", TransactionStatus::Processing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn update_status_rejects_transitions_not_in_the_allowed_set() {
        let store = InMemoryLedger::new();
        store
            .append(sample("t1", TransactionStatus::Pending, TransactionType::Deposit))
            .await
            .unwrap();

        let err = store
            .update_status("t1", TransactionStatus::Refunded, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn find_filters_by_user_and_excludes_deleted_by_default() {
        let store = InMemoryLedger::new();
        store
            .append(sample("t1", TransactionStatus::Pending, TransactionType::Deposit))
            .await
            .unwrap();
        store
            .append(sample("t2", TransactionStatus::Pending, TransactionType::Withdrawal))
            .await
            .unwrap();
        store.soft_delete("t2").await.unwrap();

        let page = store
            .find(TransactionFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].transaction_id, "t1");
    }

    #[tokio::test]
    async fn find_processing_withdrawals_only_returns_matching_kind_and_status() {
        let store = InMemoryLedger::new();
        store
            .append(sample("t1", TransactionStatus::Processing, TransactionType::Withdrawal))
            .await
            .unwrap();
        store
            .append(sample("t2", TransactionStatus::Pending, TransactionType::Withdrawal))
            .await
            .unwrap();
        store
            .append(sample("t3", TransactionStatus::Processing, TransactionType::Deposit))
            .await
            .unwrap();

        let items = store.find_processing_withdrawals(10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].transaction_id, "t1");
    }
}
