//! Binary entry point: loads configuration, wires every component, starts
//! the reconciler background task, and serves the HTTP API until a signal
//! requests graceful shutdown.

use rust_decimal::Decimal;
use sbc_payment_engine::activation::ActivationLedger;
use sbc_payment_engine::auth::AuthKeys;
use sbc_payment_engine::balance::BalanceView;
use sbc_payment_engine::commission::CommissionEngine;
use sbc_payment_engine::config::EngineConfig;
use sbc_payment_engine::gateways::cinetpay::CinetPayAdapter;
use sbc_payment_engine::gateways::feexpay::FeexPayAdapter;
use sbc_payment_engine::gateways::nowpayments::NowPaymentsAdapter;
use sbc_payment_engine::gateways::GatewayAdapter;
use sbc_payment_engine::intents::IntentManager;
use sbc_payment_engine::ledger::{InMemoryLedger, LedgerStore};
use sbc_payment_engine::reconciler::Reconciler;
use sbc_payment_engine::server::{build_router, AppState};
use sbc_payment_engine::telemetry;
use sbc_payment_engine::types::GatewayKind;
use sbc_payment_engine::withdrawal::{WithdrawalOrchestrator, WithdrawalPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init();
    let config = EngineConfig::load();

    let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());
    let balances = Arc::new(BalanceView::new());

    let mut gateways: HashMap<GatewayKind, Arc<dyn GatewayAdapter>> = HashMap::new();
    gateways.insert(
        GatewayKind::CinetPay,
        Arc::new(CinetPayAdapter::new(
            config.cinetpay_base_url.clone(),
            config.cinetpay_api_key.clone(),
            config.cinetpay_site_id.clone(),
        )),
    );
    gateways.insert(
        GatewayKind::FeexPay,
        Arc::new(FeexPayAdapter::new(
            config.feexpay_base_url.clone(),
            config.feexpay_api_token.clone(),
            config.feexpay_withdrawals_enabled,
        )),
    );
    gateways.insert(
        GatewayKind::NowPayments,
        Arc::new(NowPaymentsAdapter::new(
            config.nowpayments_base_url.clone(),
            config.nowpayments_api_key.clone(),
            config.nowpayments_ipn_secret.clone(),
        )),
    );

    let referrers = Arc::new(sbc_payment_engine::collaborators::UserServiceClient::new(
        config.user_service_url.clone(),
        config.service_secret.clone(),
    ));
    let commission = Arc::new(CommissionEngine::new(
        ledger.clone(),
        balances.clone(),
        referrers,
        commission_plan_table(),
    ));

    let intents = Arc::new(IntentManager::new(
        ledger.clone(),
        balances.clone(),
        commission.clone(),
        gateways.clone(),
    ));
    let withdrawals = Arc::new(WithdrawalOrchestrator::new(
        ledger.clone(),
        balances.clone(),
        gateways.clone(),
        WithdrawalPolicy {
            daily_cap: config.daily_withdrawal_limit,
            max_per_day: config.max_withdrawals_per_day,
            fee_fixed: config.withdrawal_fee_fixed,
            fee_percent: config.withdrawal_fee_percent,
            min_mobile_money: config.min_mobile_money_withdrawal,
            min_crypto_usd: config.min_crypto_withdrawal_usd,
        },
    ));
    let activation = Arc::new(ActivationLedger::new(
        ledger.clone(),
        balances.clone(),
        commission.clone(),
        activation_pricing_table(),
    ));
    let reconciler = Arc::new(Reconciler::new(ledger.clone(), withdrawals.clone(), gateways));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let reconciler_task = tokio::spawn(reconciler.clone().run(shutdown_rx));

    let state = AppState {
        auth: AuthKeys {
            jwt_secret: config.jwt_secret.clone(),
            service_secret: config.service_secret.clone(),
        },
        ledger,
        balances,
        intents,
        withdrawals,
        activation,
        reconciler,
    };
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, mode = %config.node_env, "sbc-payment-engine listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(10), reconciler_task).await;

    Ok(())
}

/// Waits for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Placeholder commission plan table: production values are sourced from
/// the platform's pricing configuration, not compiled into the binary.
fn commission_plan_table() -> Vec<sbc_payment_engine::types::CommissionPlan> {
    use sbc_payment_engine::types::{Currency, PaymentType};
    vec![
        sbc_payment_engine::types::CommissionPlan {
            payment_type: PaymentType::SubscriptionClassique,
            currency: Currency::Xaf,
            levels: [Decimal::new(1000, 0), Decimal::new(500, 0), Decimal::new(250, 0)],
        },
        sbc_payment_engine::types::CommissionPlan {
            payment_type: PaymentType::SubscriptionCible,
            currency: Currency::Xaf,
            levels: [Decimal::new(2000, 0), Decimal::new(1000, 0), Decimal::new(500, 0)],
        },
    ]
}

fn activation_pricing_table() -> Vec<sbc_payment_engine::types::ActivationPricing> {
    use sbc_payment_engine::types::{CommissionPlan, Currency, PaymentType};
    vec![sbc_payment_engine::types::ActivationPricing {
        sku: "starter".to_string(),
        price_usd: Decimal::new(10, 0),
        price_xaf: Decimal::new(6000, 0),
        commission_plan: CommissionPlan {
            payment_type: PaymentType::WalletTopup,
            currency: Currency::Usd,
            levels: [Decimal::new(2, 0), Decimal::ONE, Decimal::new(5, 1)],
        },
    }]
}
