//! C7 — Reconciliation Worker: a fixed-cadence background sweep over
//! `processing` withdrawals, re-checking each against its payout gateway so
//! a missed or dropped webhook cannot leave a withdrawal stuck forever
//! (spec.md §4.7).

use crate::errors::Result;
use crate::gateways::GatewayAdapter;
use crate::ledger::LedgerStore;
use crate::types::GatewayKind;
use crate::withdrawal::WithdrawalOrchestrator;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

/// Default sweep cadence (spec.md §4.7).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Upper bound on withdrawals examined per sweep.
pub const SWEEP_BATCH_SIZE: usize = 100;
/// Minimum spacing enforced between successive provider calls within a sweep,
/// so a large batch doesn't hammer a gateway in a tight loop.
pub const MIN_CALL_SPACING: Duration = Duration::from_secs(1);

pub struct Reconciler {
    ledger: Arc<dyn LedgerStore>,
    orchestrator: Arc<WithdrawalOrchestrator>,
    gateways: HashMap<GatewayKind, Arc<dyn GatewayAdapter>>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        orchestrator: Arc<WithdrawalOrchestrator>,
        gateways: HashMap<GatewayKind, Arc<dyn GatewayAdapter>>,
    ) -> Self {
        Self {
            ledger,
            orchestrator,
            gateways,
        }
    }

    /// Runs the sweep forever on `DEFAULT_SWEEP_INTERVAL`, until `shutdown` resolves.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(DEFAULT_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_all().await {
                        error!(error = %e, "reconciliation sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One full sweep pass: fetches up to `SWEEP_BATCH_SIZE` processing
    /// withdrawals and reconciles each, spacing calls by `MIN_CALL_SPACING`.
    #[instrument(skip(self))]
    pub async fn sweep_all(&self) -> Result<usize> {
        let withdrawals = self.ledger.find_processing_withdrawals(SWEEP_BATCH_SIZE).await?;
        let mut reconciled = 0;
        for (idx, txn) in withdrawals.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(MIN_CALL_SPACING).await;
            }
            match self.sweep_one(&txn.transaction_id).await {
                Ok(_) => reconciled += 1,
                Err(e) => error!(transaction_id = %txn.transaction_id, error = %e, "failed to reconcile withdrawal"),
            }
        }
        Ok(reconciled)
    }

    /// Re-checks and applies status for a single withdrawal by id — the
    /// manual path behind an admin "force reconcile" endpoint, and the unit
    /// `sweep_all` iterates.
    pub async fn sweep_one(&self, transaction_id: &str) -> Result<()> {
        let txn = self
            .ledger
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| crate::errors::EngineError::NotFound(transaction_id.to_string()))?;
        if txn.status.is_terminal() {
            return Ok(());
        }
        let Some(provider_ref) = txn
            .payment_provider
            .as_ref()
            .and_then(|p| p.external_transaction_id.clone())
        else {
            return Ok(());
        };
        let Some(gateway_kind) = txn.payment_provider.as_ref().map(|p| p.provider) else {
            return Ok(());
        };
        let Some(adapter) = self.gateways.get(&gateway_kind) else {
            return Ok(());
        };

        let status = adapter.check_status(&provider_ref).await?;
        self.orchestrator.confirm_payout_webhook(transaction_id, status).await?;
        Ok(())
    }
}
