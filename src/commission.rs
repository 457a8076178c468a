//! C5 — Commission Engine: 3-level referral commission distribution.
//!
//! Each level's credit is idempotent on `(sourcePaymentSessionId,
//! beneficiaryUserId, level)` (spec.md §4.5) so a webhook replay or a
//! reconciler re-sweep can call `distribute` again safely. Crediting is
//! best-effort per level: one level failing does not roll back another —
//! the gap is closeable later by re-running `distribute` for the same
//! session, which skips every level already recorded.

use crate::balance::{AdjustReason, BalanceView};
use crate::errors::Result;
use crate::ledger::{LedgerStore, Pagination, TransactionFilter};
use crate::types::{
    CommissionPlan, PaymentType, Transaction, TransactionMetadata, TransactionStatus, TransactionType,
};
use crate::utils::{generate_id, now};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::warn;

/// Resolves a buyer's upline, nearest referrer first. Backed by the User
/// service in production (`collaborators::UserServiceClient::get_referrer_chain`).
#[async_trait]
pub trait ReferrerChainProvider: Send + Sync {
    async fn referrer_chain(&self, user_id: &str) -> Result<Vec<String>>;
}

pub struct CommissionEngine {
    ledger: Arc<dyn LedgerStore>,
    balances: Arc<BalanceView>,
    referrers: Arc<dyn ReferrerChainProvider>,
    plans: Vec<CommissionPlan>,
}

impl CommissionEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        balances: Arc<BalanceView>,
        referrers: Arc<dyn ReferrerChainProvider>,
        plans: Vec<CommissionPlan>,
    ) -> Self {
        Self {
            ledger,
            balances,
            referrers,
            plans,
        }
    }

    fn plan_for(&self, payment_type: PaymentType) -> Option<&CommissionPlan> {
        self.plans.iter().find(|p| p.payment_type == payment_type)
    }

    /// Already-credited levels for this session, read back from the ledger
    /// rather than tracked in a side table — the ledger is the single
    /// source of idempotency truth (spec.md §4.5). Commission children are
    /// `deposit`-kind entries distinguished by `metadata.commissionLevel`
    /// (spec.md §3's closed type set has no dedicated commission type).
    async fn already_credited_levels(&self, session_id: &str, beneficiary: &str) -> Result<Vec<u8>> {
        let page = self
            .ledger
            .find(
                TransactionFilter {
                    user_id: Some(beneficiary.to_string()),
                    kind: Some(TransactionType::Deposit),
                    ..Default::default()
                },
                Pagination { page: 1, limit: 100 },
            )
            .await?;
        Ok(page
            .items
            .iter()
            .filter(|t| t.source_payment_session_id() == Some(session_id))
            .filter_map(|t| t.commission_level())
            .collect())
    }

    /// Resolves the buyer's chain, then credits each eligible level in the
    /// plan's fixed currency. Returns the number of levels newly credited.
    pub async fn distribute(
        &self,
        source_session_id: &str,
        buyer_user_id: &str,
        payment_type: PaymentType,
    ) -> Result<usize> {
        let Some(plan) = self.plan_for(payment_type) else {
            return Ok(0);
        };
        let plan = plan.clone();

        let chain = self.referrers.referrer_chain(buyer_user_id).await?;
        let mut credited = 0usize;

        for (idx, beneficiary) in chain.iter().take(3).enumerate() {
            let level = (idx + 1) as u8;
            let amount = plan.levels[idx];
            if amount <= Decimal::ZERO {
                continue;
            }

            let already = self.already_credited_levels(source_session_id, beneficiary).await?;
            if already.contains(&level) {
                continue;
            }

            if let Err(e) = self.credit_level(source_session_id, beneficiary, level, amount, plan.currency).await {
                warn!(
                    beneficiary,
                    level,
                    session_id = source_session_id,
                    error = %e,
                    "commission credit failed for level; will retry on next distribute() call"
                );
                continue;
            }
            credited += 1;
        }

        Ok(credited)
    }

    async fn credit_level(
        &self,
        source_session_id: &str,
        beneficiary: &str,
        level: u8,
        amount: Decimal,
        currency: crate::types::Currency,
    ) -> Result<()> {
        let transaction_id = generate_id("txn");
        let txn = Transaction {
            transaction_id: transaction_id.clone(),
            user_id: beneficiary.to_string(),
            kind: TransactionType::Deposit,
            amount,
            currency,
            fee: Decimal::ZERO,
            status: TransactionStatus::Completed,
            description: format!("level {level} referral commission"),
            payment_provider: None,
            metadata: vec![TransactionMetadata::Commission {
                source_payment_session_id: source_session_id.to_string(),
                commission_level: level,
            }],
            created_at: now(),
            updated_at: now(),
            deleted: false,
        };
        self.ledger.append(txn).await?;

        let class = currency.balance_class();
        self.balances
            .adjust(beneficiary, class, amount, false, AdjustReason::Commission, &transaction_id)
            .await?;
        Ok(())
    }

    /// Corrects a commission (or any credit) that was mistakenly recorded in
    /// the wrong currency class — the documented-but-unused repair pattern
    /// from spec.md §9: debit the wrong class, credit the right one, both
    /// tagged `Conversion { is_currency_bug_correction: true }` so the pair
    /// is auditable as a single logical fix rather than two unrelated moves.
    pub async fn record_currency_correction(
        &self,
        user_id: &str,
        wrong_currency: crate::types::Currency,
        wrong_amount: Decimal,
        correct_currency: crate::types::Currency,
        correct_amount: Decimal,
    ) -> Result<()> {
        let debit_id = generate_id("txn");
        let debit = Transaction {
            transaction_id: debit_id.clone(),
            user_id: user_id.to_string(),
            kind: TransactionType::Conversion,
            amount: wrong_amount,
            currency: wrong_currency,
            fee: Decimal::ZERO,
            status: TransactionStatus::Completed,
            description: "currency bug correction: debit".to_string(),
            payment_provider: None,
            metadata: vec![TransactionMetadata::Conversion {
                conversion_type: "currency_bug_correction".to_string(),
                source_amount: wrong_amount,
                target_amount: correct_amount,
                is_currency_bug_correction: true,
            }],
            created_at: now(),
            updated_at: now(),
            deleted: false,
        };
        self.ledger.append(debit).await?;
        self.balances
            .adjust(
                user_id,
                wrong_currency.balance_class(),
                -wrong_amount,
                false,
                AdjustReason::AdminCorrection,
                &debit_id,
            )
            .await?;

        let credit_id = generate_id("txn");
        let credit = Transaction {
            transaction_id: credit_id.clone(),
            user_id: user_id.to_string(),
            kind: TransactionType::Conversion,
            amount: correct_amount,
            currency: correct_currency,
            fee: Decimal::ZERO,
            status: TransactionStatus::Completed,
            description: "currency bug correction: credit".to_string(),
            payment_provider: None,
            metadata: vec![TransactionMetadata::Conversion {
                conversion_type: "currency_bug_correction".to_string(),
                source_amount: wrong_amount,
                target_amount: correct_amount,
                is_currency_bug_correction: true,
            }],
            created_at: now(),
            updated_at: now(),
            deleted: false,
        };
        self.ledger.append(credit).await?;
        self.balances
            .adjust(
                user_id,
                correct_currency.balance_class(),
                correct_amount,
                false,
                AdjustReason::AdminCorrection,
                &credit_id,
            )
            .await?;
        Ok(())
    }
}

/// Test-only `ReferrerChainProvider` stand-ins, exposed crate-wide under
/// `cfg(test)` so sibling modules (`intents`) can build a `CommissionEngine`
/// in their own tests without a real collaborators client.
#[cfg(test)]
pub mod tests_support {
    use super::*;

    pub struct NoReferrers;

    #[async_trait]
    impl ReferrerChainProvider for NoReferrers {
        async fn referrer_chain(&self, _user_id: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    pub struct FixedChain(pub Vec<String>);

    #[async_trait]
    impl ReferrerChainProvider for FixedChain {
        async fn referrer_chain(&self, _user_id: &str) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::FixedChain;
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::types::Currency;

    fn plan() -> CommissionPlan {
        CommissionPlan {
            payment_type: PaymentType::SubscriptionClassique,
            currency: Currency::Xaf,
            levels: [Decimal::new(500, 0), Decimal::new(200, 0), Decimal::new(100, 0)],
        }
    }

    #[tokio::test]
    async fn distribute_credits_three_levels_in_plan_currency() {
        let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());
        let balances = Arc::new(BalanceView::new());
        let referrers = Arc::new(FixedChain(vec!["l1".into(), "l2".into(), "l3".into()]));
        let engine = CommissionEngine::new(ledger, balances.clone(), referrers, vec![plan()]);

        let credited = engine
            .distribute("sess-1", "buyer", PaymentType::SubscriptionClassique)
            .await
            .unwrap();
        assert_eq!(credited, 3);

        assert_eq!(balances.get_balances("l1").await.balance, Decimal::new(500, 0));
        assert_eq!(balances.get_balances("l2").await.balance, Decimal::new(200, 0));
        assert_eq!(balances.get_balances("l3").await.balance, Decimal::new(100, 0));
    }

    #[tokio::test]
    async fn distribute_is_idempotent_per_session_and_level() {
        let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());
        let balances = Arc::new(BalanceView::new());
        let referrers = Arc::new(FixedChain(vec!["l1".into()]));
        let engine = CommissionEngine::new(ledger, balances.clone(), referrers, vec![plan()]);

        engine
            .distribute("sess-1", "buyer", PaymentType::SubscriptionClassique)
            .await
            .unwrap();
        let second_pass = engine
            .distribute("sess-1", "buyer", PaymentType::SubscriptionClassique)
            .await
            .unwrap();

        assert_eq!(second_pass, 0);
        assert_eq!(balances.get_balances("l1").await.balance, Decimal::new(500, 0));
    }

    #[tokio::test]
    async fn distribute_no_ops_when_payment_type_has_no_plan() {
        let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());
        let balances = Arc::new(BalanceView::new());
        let referrers = Arc::new(FixedChain(vec!["l1".into()]));
        let engine = CommissionEngine::new(ledger, balances, referrers, vec![plan()]);

        let credited = engine
            .distribute("sess-1", "buyer", PaymentType::AdPurchase)
            .await
            .unwrap();
        assert_eq!(credited, 0);
    }
}
