//! C8 — Activation Sub-Ledger: the segregated `activationBalance`, topped up
//! from a user's main balance and spent only on activating/upgrading
//! referrals. Sponsoring an activation fans out commissions through the same
//! `CommissionEngine` as a regular payment, using the activation pricing
//! plan's own commission table (spec.md §4.8).

use crate::balance::{AdjustReason, BalanceView};
use crate::commission::CommissionEngine;
use crate::errors::{EngineError, Result};
use crate::ledger::LedgerStore;
use crate::types::{
    ActivationPricing, BalanceClass, PaymentType, Transaction, TransactionMetadata, TransactionStatus,
    TransactionType,
};
use crate::utils::{generate_id, now};
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct ActivationLedger {
    ledger: Arc<dyn LedgerStore>,
    balances: Arc<BalanceView>,
    commission: Arc<CommissionEngine>,
    pricing: Vec<ActivationPricing>,
}

impl ActivationLedger {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        balances: Arc<BalanceView>,
        commission: Arc<CommissionEngine>,
        pricing: Vec<ActivationPricing>,
    ) -> Self {
        Self {
            ledger,
            balances,
            commission,
            pricing,
        }
    }

    fn sku(&self, sku: &str) -> Result<&ActivationPricing> {
        self.pricing
            .iter()
            .find(|p| p.sku == sku)
            .ok_or_else(|| EngineError::NotFound(format!("activation sku {sku}")))
    }

    /// Moves funds from the user's main balance into their activation
    /// balance, atomically from the caller's point of view (both legs
    /// recorded before returning, main-balance debit is the guarded leg).
    pub async fn top_up(&self, user_id: &str, amount: Decimal, class: BalanceClass) -> Result<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation("amount must be positive".into()));
        }

        self.balances
            .adjust(user_id, class, -amount, true, AdjustReason::ActivationTransfer, "activation-top-up")
            .await?;

        let transaction_id = generate_id("txn");
        let txn = Transaction {
            transaction_id: transaction_id.clone(),
            user_id: user_id.to_string(),
            kind: TransactionType::ActivationTransferIn,
            amount,
            currency: class_currency(class),
            fee: Decimal::ZERO,
            status: TransactionStatus::Completed,
            description: "activation balance top-up".to_string(),
            payment_provider: None,
            metadata: vec![TransactionMetadata::ActivationTransfer {
                counterparty_user_id: user_id.to_string(),
            }],
            created_at: now(),
            updated_at: now(),
            deleted: false,
        };
        let saved = self.ledger.append(txn).await?;
        self.balances.adjust_activation(user_id, amount, false).await?;
        Ok(saved)
    }

    /// Peer-to-peer activation balance transfer (e.g. sponsor pre-funding a
    /// downline's activation balance without sponsoring a specific sku yet).
    pub async fn transfer_to_user(&self, from_user_id: &str, to_user_id: &str, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation("amount must be positive".into()));
        }

        self.balances.adjust_activation(from_user_id, -amount, true).await?;

        let out_txn = Transaction {
            transaction_id: generate_id("txn"),
            user_id: from_user_id.to_string(),
            kind: TransactionType::ActivationTransferOut,
            amount,
            currency: crate::types::Currency::Usd,
            fee: Decimal::ZERO,
            status: TransactionStatus::Completed,
            description: format!("activation transfer to {to_user_id}"),
            payment_provider: None,
            metadata: vec![TransactionMetadata::ActivationTransfer {
                counterparty_user_id: to_user_id.to_string(),
            }],
            created_at: now(),
            updated_at: now(),
            deleted: false,
        };
        self.ledger.append(out_txn).await?;

        let in_txn = Transaction {
            transaction_id: generate_id("txn"),
            user_id: to_user_id.to_string(),
            kind: TransactionType::ActivationTransferIn,
            amount,
            currency: crate::types::Currency::Usd,
            fee: Decimal::ZERO,
            status: TransactionStatus::Completed,
            description: format!("activation transfer from {from_user_id}"),
            payment_provider: None,
            metadata: vec![TransactionMetadata::ActivationTransfer {
                counterparty_user_id: from_user_id.to_string(),
            }],
            created_at: now(),
            updated_at: now(),
            deleted: false,
        };
        self.ledger.append(in_txn).await?;
        self.balances.adjust_activation(to_user_id, amount, false).await?;
        Ok(())
    }

    /// Sponsors a referral's activation: debits the sponsor's activation
    /// balance for the sku's price, records the beneficiary's activation
    /// event, and fans out commissions on the activation pricing plan.
    pub async fn sponsor_activation(&self, sponsor_user_id: &str, beneficiary_user_id: &str, sku: &str) -> Result<Transaction> {
        let pricing = self.sku(sku)?.clone();

        self.balances
            .adjust_activation(sponsor_user_id, -pricing.price_usd, true)
            .await?;

        let transaction_id = generate_id("txn");
        let txn = Transaction {
            transaction_id: transaction_id.clone(),
            user_id: beneficiary_user_id.to_string(),
            kind: TransactionType::SponsorActivation,
            amount: pricing.price_usd,
            currency: crate::types::Currency::Usd,
            fee: Decimal::ZERO,
            status: TransactionStatus::Completed,
            description: format!("activation sponsored by {sponsor_user_id}: {sku}"),
            payment_provider: None,
            metadata: vec![TransactionMetadata::ActivationTransfer {
                counterparty_user_id: sponsor_user_id.to_string(),
            }],
            created_at: now(),
            updated_at: now(),
            deleted: false,
        };
        let saved = self.ledger.append(txn).await?;

        self.commission
            .distribute(&transaction_id, sponsor_user_id, activation_payment_type())
            .await?;

        Ok(saved)
    }
}

/// Activation sponsorship is modeled for commission purposes as a
/// `WalletTopup`-shaped payment, since activation pricing plans carry their
/// own `CommissionPlan` keyed the same way (spec.md §4.8).
fn activation_payment_type() -> PaymentType {
    PaymentType::WalletTopup
}

fn class_currency(class: BalanceClass) -> crate::types::Currency {
    match class {
        BalanceClass::Fiat => crate::types::Currency::Xaf,
        BalanceClass::Usd => crate::types::Currency::Usd,
    }
}
