//! C6 — Withdrawal Orchestrator: OTP-gated withdrawal intake with the debit
//! deferred to admin approval (spec.md §4.6's Open Question decision — see
//! DESIGN.md). No balance is touched until `admin_approve` succeeds, so a
//! user who never completes OTP verification, or whose withdrawal an admin
//! rejects, never had funds moved in the first place.

use crate::balance::{AdjustReason, BalanceView};
use crate::errors::{EngineError, Result};
use crate::gateways::{CreatePayoutRequest, GatewayAdapter, GatewayStatus};
use crate::ledger::LedgerStore;
use crate::types::{
    BalanceClass, Currency, GatewayKind, Transaction, TransactionMetadata, TransactionStatus, TransactionType,
    WithdrawalType,
};
use crate::utils::{generate_id, generate_otp, hash_otp, not_expired, now, verify_otp};
use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// How long an OTP remains valid after issuance.
pub const OTP_TTL_MINUTES: i64 = 10;

/// Config-sourced limits and fee schedule for withdrawal intake (spec.md §4.6
/// steps 1 and 3). Bundled into one struct, matching `CommissionPlan`'s own
/// "fixed table, not scattered literals" shape.
#[derive(Debug, Clone, Copy)]
pub struct WithdrawalPolicy {
    pub daily_cap: Decimal,
    pub max_per_day: u32,
    /// Flat fee component, in the withdrawal's own currency.
    pub fee_fixed: Decimal,
    /// Percentage fee component, e.g. `0.01` for 1%.
    pub fee_percent: Decimal,
    /// Minimum `mobile_money` amount; amounts must also be a multiple of 5.
    pub min_mobile_money: Decimal,
    /// Minimum `crypto` amount, in USD.
    pub min_crypto_usd: Decimal,
}

impl WithdrawalPolicy {
    fn fee_for(&self, amount: Decimal) -> Decimal {
        self.fee_fixed + amount * self.fee_percent
    }
}

pub struct WithdrawalOrchestrator {
    ledger: Arc<dyn LedgerStore>,
    balances: Arc<BalanceView>,
    gateways: HashMap<GatewayKind, Arc<dyn GatewayAdapter>>,
    policy: WithdrawalPolicy,
}

impl WithdrawalOrchestrator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        balances: Arc<BalanceView>,
        gateways: HashMap<GatewayKind, Arc<dyn GatewayAdapter>>,
        policy: WithdrawalPolicy,
    ) -> Self {
        Self {
            ledger,
            balances,
            gateways,
            policy,
        }
    }

    fn gateway(&self, kind: GatewayKind) -> Result<Arc<dyn GatewayAdapter>> {
        self.gateways
            .get(&kind)
            .cloned()
            .ok_or_else(|| EngineError::ProviderUnavailable(format!("no adapter registered for {:?}", kind)))
    }

    /// Per-type minimum and shape checks (spec.md §4.6 step 1).
    fn validate_amount(&self, withdrawal_type: WithdrawalType, amount: Decimal) -> Result<()> {
        match withdrawal_type {
            WithdrawalType::MobileMoney => {
                if amount < self.policy.min_mobile_money {
                    return Err(EngineError::Validation(format!(
                        "mobile money withdrawal must be at least {}",
                        self.policy.min_mobile_money
                    )));
                }
                if (amount % Decimal::from(5)) != Decimal::ZERO {
                    return Err(EngineError::Validation(
                        "mobile money withdrawal amount must be a multiple of 5".into(),
                    ));
                }
            }
            WithdrawalType::Crypto => {
                if amount < self.policy.min_crypto_usd {
                    return Err(EngineError::Validation(format!(
                        "crypto withdrawal must be at least {} USD",
                        self.policy.min_crypto_usd
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fee preview for a not-yet-submitted withdrawal (spec.md §6's
    /// `GET /api/transactions/withdrawal/estimate`). Performs the same
    /// per-type validation `initiate` does, without touching the ledger.
    pub fn estimate(&self, withdrawal_type: WithdrawalType, amount: Decimal) -> Result<(Decimal, Decimal)> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation("amount must be positive".into()));
        }
        self.validate_amount(withdrawal_type, amount)?;
        let fee = self.policy.fee_for(amount);
        Ok((fee, amount + fee))
    }

    /// Opens a withdrawal: checks daily limits and pending-blocker rules,
    /// then records a `pending_otp_verification` entry carrying the hashed
    /// OTP. No debit happens here.
    pub async fn initiate(
        &self,
        user_id: &str,
        amount: Decimal,
        currency: Currency,
        withdrawal_type: WithdrawalType,
        selected_payout_service: Option<GatewayKind>,
        destination: Value,
    ) -> Result<(Transaction, String)> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation("amount must be positive".into()));
        }
        self.validate_amount(withdrawal_type, amount)?;
        if destination.is_null() {
            return Err(EngineError::Validation("a payout destination is required".into()));
        }

        if crate::balance::has_pending_blocking_transactions(self.ledger.as_ref(), user_id).await? {
            return Err(EngineError::PendingBlockingTransaction);
        }

        self.balances
            .within_daily_limits(user_id, amount, self.policy.daily_cap, self.policy.max_per_day)
            .await?;

        let snapshot = self.balances.get_balances(user_id).await;
        let spendable = match currency.balance_class() {
            BalanceClass::Fiat => snapshot.balance,
            BalanceClass::Usd => snapshot.usd_balance,
        };
        let fee = self.policy.fee_for(amount);
        if spendable < amount + fee {
            return Err(EngineError::InsufficientFunds);
        }

        let otp = generate_otp();
        let otp_hash = hash_otp(&otp);
        let expires_at = now() + ChronoDuration::minutes(OTP_TTL_MINUTES);

        let txn = Transaction {
            transaction_id: generate_id("txn"),
            user_id: user_id.to_string(),
            kind: TransactionType::Withdrawal,
            amount,
            currency,
            fee,
            status: TransactionStatus::PendingOtpVerification,
            description: "withdrawal request".to_string(),
            payment_provider: selected_payout_service.map(|provider| crate::types::PaymentProviderRef {
                provider,
                external_transaction_id: None,
                status: "pending".to_string(),
                metadata: Value::Null,
            }),
            metadata: vec![TransactionMetadata::Otp {
                otp_hash,
                otp_expires_at: expires_at,
                withdrawal_type,
                selected_payout_service,
                destination,
            }],
            created_at: now(),
            updated_at: now(),
            deleted: false,
        };
        let saved = self.ledger.append(txn).await?;
        Ok((saved, otp))
    }

    /// Verifies the OTP and advances the withdrawal to `pending_admin_approval`.
    pub async fn verify_otp(&self, transaction_id: &str, code: &str) -> Result<Transaction> {
        let txn = self
            .ledger
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(transaction_id.to_string()))?;

        let otp_meta = txn.metadata.iter().find_map(|m| match m {
            TransactionMetadata::Otp {
                otp_hash,
                otp_expires_at,
                ..
            } => Some((otp_hash.clone(), *otp_expires_at)),
            _ => None,
        });
        let Some((otp_hash, expires_at)) = otp_meta else {
            return Err(EngineError::Internal("withdrawal missing otp metadata".into()));
        };

        if !not_expired(expires_at) {
            self.ledger
                .update_status(transaction_id, TransactionStatus::Cancelled, None)
                .await?;
            return Err(EngineError::Validation("otp expired".into()));
        }
        if !verify_otp(code, &otp_hash) {
            return Err(EngineError::Validation("otp does not match".into()));
        }

        self.ledger
            .update_status(transaction_id, TransactionStatus::PendingAdminApproval, None)
            .await
    }

    /// Debits the user (the sole debit point in the withdrawal flow),
    /// dispatches the payout to the gateway, and moves the entry to `processing`.
    pub async fn admin_approve(&self, transaction_id: &str, admin_id: &str) -> Result<Transaction> {
        let txn = self
            .ledger
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(transaction_id.to_string()))?;
        if txn.status != TransactionStatus::PendingAdminApproval {
            return Err(EngineError::IllegalTransition(format!(
                "cannot approve withdrawal in status {:?}",
                txn.status
            )));
        }

        let gross = txn.amount + txn.fee;
        self.balances
            .adjust(
                &txn.user_id,
                txn.currency.balance_class(),
                -gross,
                true,
                AdjustReason::WithdrawalDebit,
                transaction_id,
            )
            .await?;

        let otp_meta = txn.metadata.iter().find_map(|m| match m {
            TransactionMetadata::Otp {
                selected_payout_service,
                destination,
                ..
            } => Some((*selected_payout_service, destination.clone())),
            _ => None,
        });
        let (selected_payout_service, destination) = otp_meta
            .ok_or_else(|| EngineError::Internal("withdrawal missing otp metadata".into()))?;
        let gateway_kind = selected_payout_service
            .or_else(|| txn.payment_provider.as_ref().map(|p| p.provider))
            .ok_or_else(|| EngineError::Internal("withdrawal missing payout gateway selection".into()))?;

        let adapter = self.gateway(gateway_kind)?;
        let payout = adapter
            .create_payout(CreatePayoutRequest {
                transaction_id: transaction_id.to_string(),
                amount: txn.amount,
                currency: txn.currency,
                destination,
            })
            .await;

        match payout {
            Ok(resp) => {
                let approved_at = now();
                self.ledger
                    .update_status(
                        transaction_id,
                        TransactionStatus::Processing,
                        Some(Box::new(move |t: &mut Transaction| {
                            t.payment_provider = Some(crate::types::PaymentProviderRef {
                                provider: gateway_kind,
                                external_transaction_id: Some(resp.provider_ref),
                                status: "processing".to_string(),
                                metadata: resp.raw,
                            });
                            t.metadata.push(TransactionMetadata::AdminAction {
                                approved_at: Some(approved_at),
                                rejected_at: None,
                                admin_id: Some(admin_id.to_string()),
                                note: None,
                            });
                        })),
                    )
                    .await
            }
            Err(e) => {
                // Dispatch failed after the debit: refund and fail the entry so the
                // user is never left short for a payout that never left the building.
                self.balances
                    .adjust(
                        &txn.user_id,
                        txn.currency.balance_class(),
                        gross,
                        false,
                        AdjustReason::WithdrawalRefund,
                        transaction_id,
                    )
                    .await?;
                self.ledger
                    .update_status(transaction_id, TransactionStatus::Failed, None)
                    .await?;
                Err(e)
            }
        }
    }

    /// Rejects a withdrawal before any debit has happened; no balance change needed.
    pub async fn admin_reject(&self, transaction_id: &str, admin_id: &str, note: Option<String>) -> Result<Transaction> {
        let rejected_at = now();
        self.ledger
            .update_status(
                transaction_id,
                TransactionStatus::RejectedByAdmin,
                Some(Box::new(move |t: &mut Transaction| {
                    t.metadata.push(TransactionMetadata::AdminAction {
                        approved_at: None,
                        rejected_at: Some(rejected_at),
                        admin_id: Some(admin_id.to_string()),
                        note,
                    });
                })),
            )
            .await
    }

    /// User-initiated cancellation, valid only while awaiting OTP — no debit to reverse.
    pub async fn user_cancel(&self, transaction_id: &str, user_id: &str) -> Result<Transaction> {
        let txn = self
            .ledger
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(transaction_id.to_string()))?;
        if txn.user_id != user_id {
            return Err(EngineError::Authorization("not your withdrawal".into()));
        }
        self.ledger
            .update_status(transaction_id, TransactionStatus::Cancelled, None)
            .await
    }

    /// Applies the gateway's confirmed payout status, tallying the daily
    /// counters only once the payout is unambiguously final (spec.md §4.2).
    pub async fn confirm_payout_webhook(&self, transaction_id: &str, status: GatewayStatus) -> Result<Transaction> {
        let txn = self
            .ledger
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(transaction_id.to_string()))?;
        if txn.status.is_terminal() {
            return Ok(txn);
        }

        match status {
            GatewayStatus::Completed => {
                let updated = self
                    .ledger
                    .update_status(transaction_id, TransactionStatus::Completed, None)
                    .await?;
                self.balances.record_withdrawal_success(&txn.user_id, txn.amount).await;
                info!(transaction_id, "withdrawal payout confirmed");
                Ok(updated)
            }
            GatewayStatus::Failed | GatewayStatus::Expired => {
                self.balances
                    .adjust(
                        &txn.user_id,
                        txn.currency.balance_class(),
                        txn.amount + txn.fee,
                        false,
                        AdjustReason::WithdrawalRefund,
                        transaction_id,
                    )
                    .await?;
                self.ledger
                    .update_status(transaction_id, TransactionStatus::Failed, None)
                    .await
            }
            _ => Ok(txn),
        }
    }

    /// Audits a payout attempt against a feature-flagged-off gateway
    /// (FeexPay withdrawals) without touching any OTP state — the request
    /// never reaches `initiate` in that case; this exists so the admin
    /// surface can still show why a user's destination choice was rejected.
    pub fn audit_disabled_gateway_attempt(gateway: GatewayKind, user_id: &str) {
        tracing::warn!(?gateway, user_id, "withdrawal attempted against a disabled payout gateway");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::{CreateIntentRequest, CreateIntentResponse, CreatePayoutResponse, WebhookEvent, WebhookHeaders};
    use crate::ledger::InMemoryLedger;
    use crate::types::Currency;
    use async_trait::async_trait;

    struct OkGateway;

    #[async_trait]
    impl GatewayAdapter for OkGateway {
        fn kind(&self) -> GatewayKind {
            GatewayKind::CinetPay
        }
        async fn create_intent(&self, _req: CreateIntentRequest) -> Result<CreateIntentResponse> {
            unimplemented!()
        }
        async fn check_status(&self, _provider_ref: &str) -> Result<GatewayStatus> {
            unimplemented!()
        }
        async fn create_payout(&self, req: CreatePayoutRequest) -> Result<CreatePayoutResponse> {
            Ok(CreatePayoutResponse {
                provider_ref: format!("payout-{}", req.transaction_id),
                raw: Value::Null,
            })
        }
        fn parse_webhook(&self, _raw: &[u8], _headers: &WebhookHeaders) -> Result<Option<WebhookEvent>> {
            unimplemented!()
        }
    }

    fn test_policy() -> WithdrawalPolicy {
        WithdrawalPolicy {
            daily_cap: Decimal::new(1_000_000, 0),
            max_per_day: 5,
            fee_fixed: Decimal::ZERO,
            fee_percent: Decimal::new(1, 2), // 1%
            min_mobile_money: Decimal::new(500, 0),
            min_crypto_usd: Decimal::new(10, 0),
        }
    }

    fn orchestrator() -> (WithdrawalOrchestrator, Arc<BalanceView>) {
        let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());
        let balances = Arc::new(BalanceView::new());
        let mut gateways: HashMap<GatewayKind, Arc<dyn GatewayAdapter>> = HashMap::new();
        gateways.insert(GatewayKind::CinetPay, Arc::new(OkGateway));
        let o = WithdrawalOrchestrator::new(ledger, balances.clone(), gateways, test_policy());
        (o, balances)
    }

    fn destination() -> Value {
        serde_json::json!({ "msisdn": "+237600000000" })
    }

    #[tokio::test]
    async fn full_flow_debits_amount_plus_fee_only_at_admin_approval() {
        let (orch, balances) = orchestrator();
        balances
            .adjust("u1", BalanceClass::Fiat, Decimal::new(10_000, 0), false, AdjustReason::Settlement, "seed")
            .await
            .unwrap();

        let (txn, otp) = orch
            .initiate(
                "u1",
                Decimal::new(5_000, 0),
                Currency::Xaf,
                WithdrawalType::MobileMoney,
                Some(GatewayKind::CinetPay),
                destination(),
            )
            .await
            .unwrap();
        assert_eq!(txn.fee, Decimal::new(50, 0));

        // no debit yet
        assert_eq!(balances.get_balances("u1").await.balance, Decimal::new(10_000, 0));

        orch.verify_otp(&txn.transaction_id, &otp).await.unwrap();
        // still no debit before approval
        assert_eq!(balances.get_balances("u1").await.balance, Decimal::new(10_000, 0));

        orch.admin_approve(&txn.transaction_id, "admin-1").await.unwrap();
        assert_eq!(balances.get_balances("u1").await.balance, Decimal::new(4_950, 0));
    }

    #[tokio::test]
    async fn fifty_thousand_withdrawal_leaves_forty_nine_thousand_five_hundred() {
        let (orch, balances) = orchestrator();
        balances
            .adjust("u1", BalanceClass::Fiat, Decimal::new(100_000, 0), false, AdjustReason::Settlement, "seed")
            .await
            .unwrap();

        let (txn, otp) = orch
            .initiate(
                "u1",
                Decimal::new(50_000, 0),
                Currency::Xaf,
                WithdrawalType::MobileMoney,
                Some(GatewayKind::CinetPay),
                destination(),
            )
            .await
            .unwrap();
        assert_eq!(txn.fee, Decimal::new(500, 0));

        orch.verify_otp(&txn.transaction_id, &otp).await.unwrap();
        orch.admin_approve(&txn.transaction_id, "admin-1").await.unwrap();
        assert_eq!(balances.get_balances("u1").await.balance, Decimal::new(49_500, 0));
    }

    #[tokio::test]
    async fn wrong_otp_is_rejected() {
        let (orch, balances) = orchestrator();
        balances
            .adjust("u1", BalanceClass::Fiat, Decimal::new(10_000, 0), false, AdjustReason::Settlement, "seed")
            .await
            .unwrap();

        let (txn, _otp) = orch
            .initiate(
                "u1",
                Decimal::new(1_000, 0),
                Currency::Xaf,
                WithdrawalType::MobileMoney,
                Some(GatewayKind::CinetPay),
                destination(),
            )
            .await
            .unwrap();

        let err = orch.verify_otp(&txn.transaction_id, "000000").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn initiate_rejects_amount_exceeding_spendable_balance() {
        let (orch, _balances) = orchestrator();
        let err = orch
            .initiate(
                "u1",
                Decimal::new(1_000, 0),
                Currency::Xaf,
                WithdrawalType::MobileMoney,
                Some(GatewayKind::CinetPay),
                destination(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds));
    }

    #[tokio::test]
    async fn initiate_rejects_mobile_money_amount_not_a_multiple_of_five() {
        let (orch, balances) = orchestrator();
        balances
            .adjust("u1", BalanceClass::Fiat, Decimal::new(10_000, 0), false, AdjustReason::Settlement, "seed")
            .await
            .unwrap();

        let err = orch
            .initiate(
                "u1",
                Decimal::new(1_003, 0),
                Currency::Xaf,
                WithdrawalType::MobileMoney,
                Some(GatewayKind::CinetPay),
                destination(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn initiate_rejects_missing_destination() {
        let (orch, balances) = orchestrator();
        balances
            .adjust("u1", BalanceClass::Fiat, Decimal::new(10_000, 0), false, AdjustReason::Settlement, "seed")
            .await
            .unwrap();

        let err = orch
            .initiate(
                "u1",
                Decimal::new(1_000, 0),
                Currency::Xaf,
                WithdrawalType::MobileMoney,
                Some(GatewayKind::CinetPay),
                Value::Null,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
