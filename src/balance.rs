//! C2 — User Balance View: the materialized, per-user balance projection.
//!
//! `adjust` is the only mutation point and is linearizable per user via a
//! keyed async mutex, matching the teacher corpus's pattern of guarding
//! shared state behind `Arc<tokio::sync::Mutex/RwLock<_>>` rather than a
//! single global lock.

use crate::errors::{EngineError, Result};
use crate::ledger::LedgerStore;
use crate::types::{BalanceClass, Transaction, TransactionStatus, TransactionType, UserBalanceView};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Reason tag attached to an adjustment, for audit logging (never persisted
/// as free text on the ledger — the triggering transaction is the audit
/// trail; this is purely for structured log fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustReason {
    Settlement,
    Commission,
    WithdrawalDebit,
    WithdrawalRefund,
    ActivationTransfer,
    AdminCorrection,
    InternalService,
}

/// Per-user balance store, keyed mutex over `UserBalanceView`.
#[derive(Clone, Default)]
pub struct BalanceView {
    rows: Arc<DashMap<String, Arc<Mutex<UserBalanceView>>>>,
}

impl BalanceView {
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, user_id: &str) -> Arc<Mutex<UserBalanceView>> {
        self.rows
            .entry(user_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(UserBalanceView {
                    user_id: user_id.to_string(),
                    ..Default::default()
                }))
            })
            .clone()
    }

    /// Returns the current snapshot for a user (creating a zeroed row if unseen).
    pub async fn get_balances(&self, user_id: &str) -> UserBalanceView {
        let row = self.row(user_id);
        let guard = row.lock().await;
        guard.clone()
    }

    /// Applies a signed delta to a user's `balance` or `usdBalance`.
    ///
    /// `user_initiated` debits are rejected with `InsufficientFunds` if they
    /// would drive the balance negative. Admin corrections pass
    /// `user_initiated = false` to bypass the guard, per spec.md §4.2.
    pub async fn adjust(
        &self,
        user_id: &str,
        class: BalanceClass,
        delta: Decimal,
        user_initiated: bool,
        _reason: AdjustReason,
        _correlation_id: &str,
    ) -> Result<UserBalanceView> {
        let row = self.row(user_id);
        let mut guard = row.lock().await;

        let target = match class {
            BalanceClass::Fiat => &mut guard.balance,
            BalanceClass::Usd => &mut guard.usd_balance,
        };
        let candidate = *target + delta;
        if user_initiated && delta < Decimal::ZERO && candidate < Decimal::ZERO {
            return Err(EngineError::InsufficientFunds);
        }
        *target = candidate;
        Ok(guard.clone())
    }

    /// Adjusts the segregated activation balance (C8's only mutation path into C2).
    pub async fn adjust_activation(
        &self,
        user_id: &str,
        delta: Decimal,
        user_initiated: bool,
    ) -> Result<UserBalanceView> {
        let row = self.row(user_id);
        let mut guard = row.lock().await;
        let candidate = guard.activation_balance + delta;
        if user_initiated && delta < Decimal::ZERO && candidate < Decimal::ZERO {
            return Err(EngineError::InsufficientFunds);
        }
        guard.activation_balance = candidate;
        Ok(guard.clone())
    }

    /// Rolls the daily withdrawal window forward if the UTC day has changed,
    /// then checks `amount` against the configured cap and count — both
    /// must hold for the withdrawal to proceed (spec.md §4.2).
    pub async fn within_daily_limits(
        &self,
        user_id: &str,
        amount: Decimal,
        daily_cap: Decimal,
        max_per_day: u32,
    ) -> Result<()> {
        let row = self.row(user_id);
        let mut guard = row.lock().await;
        roll_window_if_needed(&mut guard);

        if guard.daily_withdrawal_total + amount > daily_cap {
            return Err(EngineError::DailyLimitExceeded);
        }
        if guard.daily_withdrawal_count + 1 > max_per_day {
            return Err(EngineError::DailyLimitExceeded);
        }
        Ok(())
    }

    /// Increments the rolling daily counters after a withdrawal becomes
    /// unambiguously successful (confirmed payout webhook), per spec.md §4.2.
    pub async fn record_withdrawal_success(&self, user_id: &str, amount: Decimal) {
        let row = self.row(user_id);
        let mut guard = row.lock().await;
        roll_window_if_needed(&mut guard);
        guard.daily_withdrawal_total += amount;
        guard.daily_withdrawal_count += 1;
    }

    /// Decrements the daily counters when a previously-counted withdrawal is
    /// cancelled or rejected after having been counted
    /// (only used for corrective bookkeeping; normal flow counts on success only).
    pub async fn reverse_withdrawal_count(&self, user_id: &str, amount: Decimal) {
        let row = self.row(user_id);
        let mut guard = row.lock().await;
        guard.daily_withdrawal_total = (guard.daily_withdrawal_total - amount).max(Decimal::ZERO);
        guard.daily_withdrawal_count = guard.daily_withdrawal_count.saturating_sub(1);
    }

    /// Replaces a user's row wholesale — used only by `reproject_from_ledger`.
    async fn set(&self, view: UserBalanceView) {
        let row = self.row(&view.user_id);
        let mut guard = row.lock().await;
        *guard = view;
    }
}

fn roll_window_if_needed(view: &mut UserBalanceView) {
    let today = Utc::now().date_naive();
    let needs_roll = match view.daily_window_start {
        Some(start) => start.date_naive() != today,
        None => true,
    };
    if needs_roll {
        view.daily_window_start = Some(Utc::now());
        view.daily_withdrawal_total = Decimal::ZERO;
        view.daily_withdrawal_count = 0;
    }
}

/// `true` if the user has any non-terminal withdrawal, conversion, or
/// activation transfer — gates currency conversion and other sensitive
/// operations per spec.md §4.2.
pub async fn has_pending_blocking_transactions(
    ledger: &dyn LedgerStore,
    user_id: &str,
) -> Result<bool> {
    use crate::ledger::{Pagination, TransactionFilter};

    for kind in [
        TransactionType::Withdrawal,
        TransactionType::Conversion,
        TransactionType::ActivationTransferIn,
        TransactionType::ActivationTransferOut,
    ] {
        let page = ledger
            .find(
                TransactionFilter {
                    user_id: Some(user_id.to_string()),
                    kind: Some(kind),
                    ..Default::default()
                },
                Pagination { page: 1, limit: 200 },
            )
            .await?;
        if page.items.iter().any(|t| !t.status.is_terminal()) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Recomputes every user's balance from scratch by folding over completed C1
/// entries. This is the canonical re-projection recipe spec.md §9 calls out
/// (`fix-user-balances.ts` in the source); it is the out-of-band repair tool,
/// never called on the live request path.
pub async fn reproject_from_ledger(ledger: &dyn LedgerStore, balances: &BalanceView) -> Result<usize> {
    use crate::ledger::{Pagination, TransactionFilter};

    let mut per_user: std::collections::HashMap<String, UserBalanceView> = std::collections::HashMap::new();
    let mut page_no = 1;
    loop {
        let page = ledger
            .find(
                TransactionFilter {
                    status: Some(TransactionStatus::Completed),
                    ..Default::default()
                },
                Pagination { page: page_no, limit: 500 },
            )
            .await?;
        if page.items.is_empty() {
            break;
        }
        for txn in &page.items {
            apply_to_projection(per_user.entry(txn.user_id.clone()).or_default(), txn);
        }
        if page_no >= page.total_pages {
            break;
        }
        page_no += 1;
    }

    let count = per_user.len();
    for (user_id, view) in per_user {
        balances.set(UserBalanceView { user_id, ..view }).await;
    }
    Ok(count)
}

fn apply_to_projection(view: &mut UserBalanceView, txn: &Transaction) {
    let class = txn.currency.balance_class();
    let sign = if txn.kind.is_credit() { Decimal::ONE } else { -Decimal::ONE };

    match txn.kind {
        TransactionType::ActivationTransferIn | TransactionType::SponsorActivation => {
            // These move money through the segregated activation balance,
            // not the spendable fiat/USD balances.
            if txn.kind == TransactionType::ActivationTransferIn {
                view.activation_balance += txn.amount;
            }
        }
        TransactionType::Conversion => {
            // Conversion moves between the two currency classes using the
            // recorded source/target amounts; it does not use `amount`/`currency` directly.
            for meta in &txn.metadata {
                if let crate::types::TransactionMetadata::Conversion {
                    source_amount,
                    target_amount,
                    ..
                } = meta
                {
                    view.balance -= *source_amount;
                    view.usd_balance += *target_amount;
                }
            }
        }
        _ => match class {
            BalanceClass::Fiat => view.balance += sign * (txn.amount + txn.fee.min(Decimal::ZERO)),
            BalanceClass::Usd => view.usd_balance += sign * (txn.amount + txn.fee.min(Decimal::ZERO)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Currency;

    #[tokio::test]
    async fn adjust_rejects_user_initiated_overdraft() {
        let view = BalanceView::new();
        view.adjust(
            "u1",
            BalanceClass::Fiat,
            Decimal::new(100, 0),
            true,
            AdjustReason::Settlement,
            "c1",
        )
        .await
        .unwrap();

        let err = view
            .adjust(
                "u1",
                BalanceClass::Fiat,
                Decimal::new(-200, 0),
                true,
                AdjustReason::WithdrawalDebit,
                "c2",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds));
    }

    #[tokio::test]
    async fn admin_correction_bypasses_overdraft_guard() {
        let view = BalanceView::new();
        view.adjust(
            "u1",
            BalanceClass::Fiat,
            Decimal::new(-50, 0),
            false,
            AdjustReason::AdminCorrection,
            "c1",
        )
        .await
        .unwrap();
        let balances = view.get_balances("u1").await;
        assert_eq!(balances.balance, Decimal::new(-50, 0));
    }

    #[tokio::test]
    async fn within_daily_limits_enforces_cap_and_count() {
        let view = BalanceView::new();
        view.within_daily_limits("u1", Decimal::new(50_000, 0), Decimal::new(100_000, 0), 3)
            .await
            .unwrap();
        view.record_withdrawal_success("u1", Decimal::new(50_000, 0)).await;

        let err = view
            .within_daily_limits("u1", Decimal::new(60_000, 0), Decimal::new(100_000, 0), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DailyLimitExceeded));
    }

    #[test]
    fn currency_xaf_is_fiat_class_for_projection() {
        assert_eq!(Currency::Xaf.balance_class(), BalanceClass::Fiat);
    }
}
