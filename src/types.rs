//! Core domain types for the payment & commission engine.
//!
//! This module contains the data structures shared across every component:
//! the ledger entry (`Transaction`), the pre-settlement `PaymentIntent`, the
//! per-user balance projection, and the commission/activation pricing
//! tables. Provider-specific wire formats live in `gateways`; this module
//! only holds the engine's internal, already-normalized shapes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol/schema version for persisted ledger records. Bumped when the
/// shape of `Transaction` changes in a way that matters to readers.
pub const LEDGER_SCHEMA_VERSION: u32 = 1;

/// Currencies the ledger can hold a balance in.
///
/// Crypto codes are carried as reserved values even though today only
/// `Usd` is actually spendable on the crypto side (`usdBalance` in
/// `UserBalanceView`); the rest round-trip through provider metadata.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Currency {
    Xaf,
    Usd,
    Xof,
    Kes,
    Cdf,
    Gnf,
    Btc,
    Ltc,
    Xrp,
    Trx,
    UsdtSol,
    UsdtBsc,
    BnbBsc,
}

impl Currency {
    /// Which balance class (`balance` vs `usdBalance`) this currency settles into.
    pub fn balance_class(self) -> BalanceClass {
        match self {
            Currency::Xaf | Currency::Xof | Currency::Kes | Currency::Cdf | Currency::Gnf => {
                BalanceClass::Fiat
            }
            _ => BalanceClass::Usd,
        }
    }
}

/// Which of a user's two spendable balances a currency belongs to.
/// `activationBalance` is not a `BalanceClass` — it is segregated and only
/// ever touched through `activation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceClass {
    Fiat,
    Usd,
}

/// The kind of ledger entry. Sign of the balance effect is implied by the
/// type, not stored separately (spec.md §3).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Payment,
    Refund,
    Fee,
    Transfer,
    Conversion,
    ActivationTransferIn,
    ActivationTransferOut,
    SponsorActivation,
}

impl TransactionType {
    /// `true` if a completed entry of this type credits the balance class,
    /// `false` if it debits. Used by `balance::reproject_from_ledger` and by
    /// the universal balance invariant in spec.md §8. Commission credits are
    /// recorded as `Deposit` (distinguished by `metadata.commissionLevel`),
    /// not as a separate type — the closed set here matches spec.md §3.
    pub fn is_credit(self) -> bool {
        matches!(self, TransactionType::Deposit | TransactionType::Refund | TransactionType::ActivationTransferOut)
    }
}

/// Ledger entry status. Transition legality is enforced by `ledger::LedgerStore::update_status`,
/// not by this enum — this is just the vocabulary.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    PendingOtpVerification,
    PendingAdminApproval,
    Processing,
    Completed,
    Failed,
    Refunded,
    RejectedByAdmin,
    Cancelled,
}

impl TransactionStatus {
    /// Terminal statuses may never transition again (spec.md §3 invariant b).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed
                | TransactionStatus::Failed
                | TransactionStatus::Refunded
                | TransactionStatus::RejectedByAdmin
                | TransactionStatus::Cancelled
        )
    }
}

/// The external payment providers this engine integrates with (C3).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    /// Aggregator-A (CinetPay-style): fiat, unsigned webhooks.
    CinetPay,
    /// Aggregator-B (FeexPay-style): fiat, no balance API, no signature.
    FeexPay,
    /// Crypto processor (NOWPayments-style): signed webhooks (HMAC-SHA512).
    NowPayments,
    /// No external provider — used for activation transfers and internal corrections.
    Internal,
}

/// Nested provider linkage carried on a `Transaction` (spec.md §3).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentProviderRef {
    pub provider: GatewayKind,
    pub external_transaction_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub metadata: Value,
}

/// One context-specific metadata payload for a `Transaction`.
///
/// Modeled as a tagged variant per spec.md §9's design note, rather than an
/// open string-keyed map: each context carries the fields that context
/// actually needs, named. `Other` is the escape hatch for genuinely open
/// provider-raw payloads.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionMetadata {
    PaymentConfirmation {
        source_payment_session_id: String,
        status_checked_at: Option<DateTime<Utc>>,
    },
    Commission {
        source_payment_session_id: String,
        commission_level: u8,
    },
    Otp {
        otp_hash: String,
        otp_expires_at: DateTime<Utc>,
        withdrawal_type: WithdrawalType,
        selected_payout_service: Option<GatewayKind>,
        /// Mobile-money details or crypto address the payout dispatches to;
        /// validated present at `initiate` (spec.md §4.6 step 2).
        destination: Value,
    },
    AdminAction {
        approved_at: Option<DateTime<Utc>>,
        rejected_at: Option<DateTime<Utc>>,
        admin_id: Option<String>,
        note: Option<String>,
    },
    Reconciliation {
        status_checked_at: DateTime<Utc>,
    },
    Conversion {
        conversion_type: String,
        source_amount: Decimal,
        target_amount: Decimal,
        is_currency_bug_correction: bool,
    },
    ActivationTransfer {
        counterparty_user_id: String,
    },
    Other(Value),
}

/// Kind of withdrawal destination (spec.md §4.6).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalType {
    MobileMoney,
    Crypto,
}

/// The canonical ledger entry (C1). System of record for every balance mutation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Transaction {
    pub transaction_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: Decimal,
    pub currency: Currency,
    pub fee: Decimal,
    pub status: TransactionStatus,
    pub description: String,
    pub payment_provider: Option<PaymentProviderRef>,
    #[serde(default)]
    pub metadata: Vec<TransactionMetadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

impl Transaction {
    /// Finds the first `sourcePaymentSessionId` recorded on this entry, if any.
    pub fn source_payment_session_id(&self) -> Option<&str> {
        self.metadata.iter().find_map(|m| match m {
            TransactionMetadata::PaymentConfirmation {
                source_payment_session_id,
                ..
            }
            | TransactionMetadata::Commission {
                source_payment_session_id,
                ..
            } => Some(source_payment_session_id.as_str()),
            _ => None,
        })
    }

    /// Commission level recorded on this entry, if it is a commission child record.
    pub fn commission_level(&self) -> Option<u8> {
        self.metadata.iter().find_map(|m| match m {
            TransactionMetadata::Commission {
                commission_level, ..
            } => Some(*commission_level),
            _ => None,
        })
    }
}

/// What a payment intent was created for (spec.md §3).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    SubscriptionClassique,
    SubscriptionCible,
    SubscriptionUpgrade,
    AdPurchase,
    WalletTopup,
}

/// Payment intent lifecycle state (spec.md §3).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    PendingUserInput,
    PendingProvider,
    WaitingForCryptoDeposit,
    Processing,
    Confirmed,
    Succeeded,
    PartiallyPaid,
    Failed,
    Expired,
}

impl IntentStatus {
    /// Terminal intent states are sticky, same contract as `TransactionStatus`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IntentStatus::Succeeded | IntentStatus::Failed | IntentStatus::Expired
        )
    }
}

/// A prospective payment bound to a provider session (C4), not yet a settled ledger entry.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentIntent {
    pub session_id: String,
    pub user_id: String,
    pub payment_type: PaymentType,
    pub requested_amount: Decimal,
    pub requested_currency: Currency,
    pub paid_amount: Decimal,
    pub paid_currency: Currency,
    pub gateway: GatewayKind,
    pub status: IntentStatus,
    pub provider_ref: Option<String>,
    pub originating_service: String,
    pub callback_path: String,
    pub plan_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

/// Per-user balance projection (C2). Recomputable from C1 entries.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UserBalanceView {
    pub user_id: String,
    pub balance: Decimal,
    pub usd_balance: Decimal,
    pub activation_balance: Decimal,
    pub daily_withdrawal_total: Decimal,
    pub daily_withdrawal_count: u32,
    pub daily_window_start: Option<DateTime<Utc>>,
}

/// Per-level absolute commission amounts for one subscription/pack SKU, in a
/// single fixed currency (spec.md §4.5: "the currency is fixed by the plan,
/// not by the buyer's payment").
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CommissionPlan {
    pub payment_type: PaymentType,
    pub currency: Currency,
    pub levels: [Decimal; 3],
}

/// Activation pricing table entry (C8).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActivationPricing {
    pub sku: String,
    pub price_usd: Decimal,
    pub price_xaf: Decimal,
    pub commission_plan: CommissionPlan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_balance_class_routes_fiat_and_crypto() {
        assert_eq!(Currency::Xaf.balance_class(), BalanceClass::Fiat);
        assert_eq!(Currency::Kes.balance_class(), BalanceClass::Fiat);
        assert_eq!(Currency::Usd.balance_class(), BalanceClass::Usd);
        assert_eq!(Currency::UsdtBsc.balance_class(), BalanceClass::Usd);
    }

    #[test]
    fn transaction_type_credit_debit_split_matches_spec() {
        assert!(TransactionType::Deposit.is_credit());
        assert!(TransactionType::Refund.is_credit());
        assert!(TransactionType::ActivationTransferOut.is_credit());
        assert!(!TransactionType::Withdrawal.is_credit());
        assert!(!TransactionType::Fee.is_credit());
        assert!(!TransactionType::Payment.is_credit());
        assert!(!TransactionType::ActivationTransferIn.is_credit());
        assert!(!TransactionType::SponsorActivation.is_credit());
    }

    #[test]
    fn terminal_statuses_match_spec_set() {
        for s in [
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Refunded,
            TransactionStatus::RejectedByAdmin,
            TransactionStatus::Cancelled,
        ] {
            assert!(s.is_terminal());
        }
        for s in [
            TransactionStatus::Pending,
            TransactionStatus::PendingOtpVerification,
            TransactionStatus::PendingAdminApproval,
            TransactionStatus::Processing,
        ] {
            assert!(!s.is_terminal());
        }
    }

    #[test]
    fn source_payment_session_id_reads_through_metadata() {
        let txn = Transaction {
            transaction_id: "t1".into(),
            user_id: "u1".into(),
            kind: TransactionType::Deposit,
            amount: Decimal::new(1000, 0),
            currency: Currency::Xaf,
            fee: Decimal::ZERO,
            status: TransactionStatus::Completed,
            description: "test".into(),
            payment_provider: None,
            metadata: vec![TransactionMetadata::Commission {
                source_payment_session_id: "sess-1".into(),
                commission_level: 2,
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
        };
        assert_eq!(txn.source_payment_session_id(), Some("sess-1"));
        assert_eq!(txn.commission_level(), Some(2));
    }
}
