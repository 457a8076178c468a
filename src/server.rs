//! C9 — Public API Surface: the axum `Router` wiring every engine endpoint,
//! the shared `ApiResponse<T>` envelope, and the `IntoResponse` mapping from
//! `EngineError` to HTTP status (spec.md §6, §7).

use crate::activation::ActivationLedger;
use crate::auth::{AuthKeys, AuthenticatedAdmin, AuthenticatedService, AuthenticatedUser};
use crate::balance::{AdjustReason, BalanceView};
use crate::errors::EngineError;
use crate::gateways::{GatewayAdapter, WebhookHeaders};
use crate::intents::IntentManager;
use crate::ledger::{LedgerStore, Pagination, TransactionFilter};
use crate::reconciler::Reconciler;
use crate::types::{
    Currency, GatewayKind, PaymentType, Transaction, TransactionMetadata, TransactionStatus,
    TransactionType, WithdrawalType,
};
use crate::utils::{generate_id, now};
use crate::withdrawal::WithdrawalOrchestrator;
use axum::extract::{FromRef, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Request deadline applied to every endpoint (spec.md §5).
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthKeys,
    pub ledger: Arc<dyn LedgerStore>,
    pub balances: Arc<BalanceView>,
    pub intents: Arc<IntentManager>,
    pub withdrawals: Arc<WithdrawalOrchestrator>,
    pub activation: Arc<ActivationLedger>,
    pub reconciler: Arc<Reconciler>,
}

impl FromRef<AppState> for AuthKeys {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Pagination metadata, matching spec.md §6's envelope shape exactly.
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
}

impl<T> From<&crate::ledger::Page<T>> for PaginationMeta {
    fn from(page: &crate::ledger::Page<T>) -> Self {
        Self {
            page: page.page,
            limit: page.limit,
            total: page.total,
            total_pages: page.total_pages,
        }
    }
}

/// Response envelope shared by every endpoint (spec.md §6):
/// `{success, message?, data?, pagination?}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationMeta>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            pagination: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
            pagination: None,
        }
    }

    pub fn paginated(data: T, pagination: PaginationMeta) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            pagination: Some(pagination),
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Authentication(_) => StatusCode::UNAUTHORIZED,
            EngineError::Authorization(_) => StatusCode::FORBIDDEN,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::DuplicateKey(_) => StatusCode::CONFLICT,
            EngineError::IllegalTransition(_) => StatusCode::CONFLICT,
            EngineError::InsufficientFunds => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::DailyLimitExceeded => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::PendingBlockingTransaction => StatusCode::CONFLICT,
            EngineError::ProviderError(_) => StatusCode::BAD_GATEWAY,
            EngineError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Http(_) => StatusCode::BAD_GATEWAY,
            EngineError::Json(_) => StatusCode::BAD_REQUEST,
            EngineError::Token(_) => StatusCode::UNAUTHORIZED,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "success": false, "message": self.to_string() }));
        (status, body).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/intents", post(create_intent_handler))
        .route("/api/intents/:session_id", get(get_intent_handler))
        .route("/api/intents/:session_id/poll", post(poll_intent_handler))
        .route("/api/webhooks/:gateway", post(webhook_handler))
        .route("/api/balances/me", get(get_my_balance_handler))
        .route("/api/withdrawals", post(initiate_withdrawal_handler))
        .route("/api/withdrawals/:transaction_id/verify-otp", post(verify_otp_handler))
        .route("/api/withdrawals/:transaction_id/approve", post(admin_approve_handler))
        .route("/api/withdrawals/:transaction_id/reject", post(admin_reject_handler))
        .route("/api/withdrawals/:transaction_id/cancel", post(cancel_withdrawal_handler))
        .route("/api/transactions", get(list_transactions_handler))
        .route("/api/transactions/:transaction_id", get(get_transaction_handler))
        .route("/api/transactions/withdrawal/estimate", get(withdrawal_estimate_handler))
        .route("/api/activation-balance/transfer", post(activation_transfer_handler))
        .route("/api/activation-balance/transfer-to-user", post(activation_transfer_to_user_handler))
        .route("/api/activation-balance/sponsor", post(activation_sponsor_handler))
        .route("/api/internal/deposit", post(internal_deposit_handler))
        .route("/api/internal/withdrawal", post(internal_withdrawal_handler))
        .route("/api/internal/conversion", post(internal_conversion_handler))
        .route("/api/internal/user/:user_id/has-pending-transactions", get(has_pending_transactions_handler))
        .route("/api/admin/withdrawals/pending", get(admin_withdrawals_pending_handler))
        .route("/api/admin/withdrawals/validated", get(admin_withdrawals_validated_handler))
        .route("/api/admin/gateway-balances", get(admin_gateway_balances_handler))
        .route("/api/admin/transactions/processing-stats", get(admin_processing_stats_handler))
        .route("/api/admin/reconcile", post(admin_reconcile_handler))
        .route("/api/admin/reconcile/:transaction_id", post(admin_reconcile_one_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(tower::timeout::TimeoutLayer::new(REQUEST_DEADLINE)),
        )
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct CreateIntentBody {
    payment_type: PaymentType,
    amount: Decimal,
    currency: Currency,
    gateway: GatewayKind,
    callback_path: String,
    plan_id: Option<String>,
}

async fn create_intent_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CreateIntentBody>,
) -> Result<impl IntoResponse, EngineError> {
    let intent = state
        .intents
        .create_intent(
            &user.user_id,
            body.payment_type,
            body.amount,
            body.currency,
            body.gateway,
            "public-api",
            &body.callback_path,
            body.plan_id,
        )
        .await?;
    Ok(Json(ApiResponse::ok(intent)))
}

async fn get_intent_handler(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let intent = state
        .intents
        .get_by_session(&session_id)
        .ok_or_else(|| EngineError::NotFound(session_id))?;
    Ok(Json(ApiResponse::ok(intent)))
}

async fn poll_intent_handler(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let intent = state.intents.poll_status(&session_id).await?;
    Ok(Json(ApiResponse::ok(intent)))
}

async fn webhook_handler(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, EngineError> {
    let gateway_kind = match gateway.as_str() {
        "cinetpay" => GatewayKind::CinetPay,
        "feexpay" => GatewayKind::FeexPay,
        "nowpayments" => GatewayKind::NowPayments,
        other => return Err(EngineError::Validation(format!("unknown gateway {other}"))),
    };
    let adapter = state
        .intents
        .gateways
        .get(&gateway_kind)
        .ok_or_else(|| EngineError::ProviderUnavailable(format!("no adapter for {gateway_kind:?}")))?;

    let webhook_headers = WebhookHeaders {
        signature: headers
            .get("x-nowpayments-sig")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    // A structurally valid payload always gets a 200 ack (spec.md §4.3),
    // even when `parse_webhook` yields no actionable event.
    match adapter.parse_webhook(&body, &webhook_headers) {
        Ok(Some(event)) => {
            state.intents.ingest_webhook(gateway_kind, event).await?;
            Ok(Json(json!({ "received": true })))
        }
        Ok(None) => Ok(Json(json!({ "received": true }))),
        Err(e) if matches!(e, EngineError::Authentication(_)) => Err(e),
        Err(_) => Ok(Json(json!({ "received": true }))),
    }
}

async fn get_my_balance_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    let view = state.balances.get_balances(&user.user_id).await;
    Json(ApiResponse::ok(view))
}

#[derive(Debug, Deserialize)]
struct InitiateWithdrawalBody {
    amount: Decimal,
    currency: Currency,
    withdrawal_type: WithdrawalType,
    selected_payout_service: Option<GatewayKind>,
    #[serde(default)]
    destination: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct InitiateWithdrawalResponse {
    transaction_id: String,
    status: crate::types::TransactionStatus,
}

async fn initiate_withdrawal_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<InitiateWithdrawalBody>,
) -> Result<impl IntoResponse, EngineError> {
    let (txn, _otp) = state
        .withdrawals
        .initiate(
            &user.user_id,
            body.amount,
            body.currency,
            body.withdrawal_type,
            body.selected_payout_service,
            body.destination,
        )
        .await?;
    // The OTP itself is delivered out-of-band via the Notification service
    // collaborator, never echoed back in this response.
    Ok(Json(ApiResponse::ok(InitiateWithdrawalResponse {
        transaction_id: txn.transaction_id,
        status: txn.status,
    })))
}

#[derive(Debug, Deserialize)]
struct OtpBody {
    code: String,
}

async fn verify_otp_handler(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(transaction_id): Path<String>,
    Json(body): Json<OtpBody>,
) -> Result<impl IntoResponse, EngineError> {
    let txn = state.withdrawals.verify_otp(&transaction_id, &body.code).await?;
    Ok(Json(ApiResponse::ok(txn)))
}

async fn admin_approve_handler(
    State(state): State<AppState>,
    admin: AuthenticatedAdmin,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let txn = state.withdrawals.admin_approve(&transaction_id, &admin.admin_id).await?;
    Ok(Json(ApiResponse::ok(txn)))
}

#[derive(Debug, Deserialize, Default)]
struct RejectBody {
    note: Option<String>,
}

async fn admin_reject_handler(
    State(state): State<AppState>,
    admin: AuthenticatedAdmin,
    Path(transaction_id): Path<String>,
    body: Option<Json<RejectBody>>,
) -> Result<impl IntoResponse, EngineError> {
    let note = body.map(|Json(b)| b.note).unwrap_or(None);
    let txn = state.withdrawals.admin_reject(&transaction_id, &admin.admin_id, note).await?;
    Ok(Json(ApiResponse::ok(txn)))
}

async fn cancel_withdrawal_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let txn = state.withdrawals.user_cancel(&transaction_id, &user.user_id).await?;
    Ok(Json(ApiResponse::ok(txn)))
}

#[derive(Debug, Deserialize)]
struct ListTransactionsQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

async fn list_transactions_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let page = state
        .ledger
        .find(
            TransactionFilter {
                user_id: Some(user.user_id),
                ..Default::default()
            },
            Pagination {
                page: query.page.unwrap_or(1),
                limit: query.limit.unwrap_or(20),
            },
        )
        .await?;
    let pagination = PaginationMeta::from(&page);
    Ok(Json(ApiResponse::paginated(page.items, pagination)))
}

async fn get_transaction_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let txn = state
        .ledger
        .find_by_id(&transaction_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(transaction_id.clone()))?;
    if txn.user_id != user.user_id && !user.is_admin {
        return Err(EngineError::Authorization("not your transaction".into()));
    }
    Ok(Json(ApiResponse::ok(txn)))
}

#[derive(Debug, Deserialize)]
struct WithdrawalEstimateQuery {
    amount: Decimal,
    withdrawal_type: WithdrawalType,
}

#[derive(Debug, Serialize)]
struct WithdrawalEstimateResponse {
    amount: Decimal,
    fee: Decimal,
    net: Decimal,
}

async fn withdrawal_estimate_handler(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Query(query): Query<WithdrawalEstimateQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let (fee, gross) = state.withdrawals.estimate(query.withdrawal_type, query.amount)?;
    Ok(Json(ApiResponse::ok(WithdrawalEstimateResponse {
        amount: query.amount,
        fee,
        net: gross - fee,
    })))
}

#[derive(Debug, Deserialize)]
struct ActivationTransferBody {
    amount: Decimal,
    #[serde(default = "default_activation_currency")]
    currency: Currency,
}

fn default_activation_currency() -> Currency {
    Currency::Xaf
}

async fn activation_transfer_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<ActivationTransferBody>,
) -> Result<impl IntoResponse, EngineError> {
    let txn = state
        .activation
        .top_up(&user.user_id, body.amount, body.currency.balance_class())
        .await?;
    Ok(Json(ApiResponse::ok(txn)))
}

#[derive(Debug, Deserialize)]
struct ActivationTransferToUserBody {
    to_user_id: String,
    amount: Decimal,
}

async fn activation_transfer_to_user_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<ActivationTransferToUserBody>,
) -> Result<impl IntoResponse, EngineError> {
    if body.to_user_id == user.user_id {
        return Err(EngineError::Validation("cannot transfer activation balance to yourself".into()));
    }
    state
        .activation
        .transfer_to_user(&user.user_id, &body.to_user_id, body.amount)
        .await?;
    Ok(Json(ApiResponse::ok(json!({ "transferred": true }))))
}

#[derive(Debug, Deserialize)]
struct ActivationSponsorBody {
    beneficiary_user_id: String,
    sku: String,
}

async fn activation_sponsor_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<ActivationSponsorBody>,
) -> Result<impl IntoResponse, EngineError> {
    let txn = state
        .activation
        .sponsor_activation(&user.user_id, &body.beneficiary_user_id, &body.sku)
        .await?;
    Ok(Json(ApiResponse::ok(txn)))
}

#[derive(Debug, Deserialize)]
struct InternalDepositBody {
    user_id: String,
    amount: Decimal,
    currency: Currency,
    #[serde(default)]
    description: Option<String>,
}

/// Records a service-to-service ledger entry and applies the matching
/// balance adjustment — the same "append, then adjust" shape
/// `CommissionEngine::credit_level` uses for commission credits.
async fn record_internal_entry(
    state: &AppState,
    user_id: &str,
    kind: TransactionType,
    amount: Decimal,
    currency: Currency,
    description: String,
    service_name: &str,
) -> Result<Transaction, EngineError> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::Validation("amount must be positive".into()));
    }
    let transaction_id = generate_id("txn");
    let txn = Transaction {
        transaction_id: transaction_id.clone(),
        user_id: user_id.to_string(),
        kind,
        amount,
        currency,
        fee: Decimal::ZERO,
        status: TransactionStatus::Completed,
        description,
        payment_provider: None,
        metadata: vec![TransactionMetadata::Other(json!({ "serviceName": service_name }))],
        created_at: now(),
        updated_at: now(),
        deleted: false,
    };
    let saved = state.ledger.append(txn).await?;

    let signed_amount = if kind.is_credit() { amount } else { -amount };
    state
        .balances
        .adjust(user_id, currency.balance_class(), signed_amount, kind == TransactionType::Withdrawal, AdjustReason::InternalService, &transaction_id)
        .await?;
    Ok(saved)
}

async fn internal_deposit_handler(
    State(state): State<AppState>,
    service: AuthenticatedService,
    Json(body): Json<InternalDepositBody>,
) -> Result<impl IntoResponse, EngineError> {
    let description = body.description.unwrap_or_else(|| "internal deposit".to_string());
    let txn = record_internal_entry(
        &state,
        &body.user_id,
        TransactionType::Deposit,
        body.amount,
        body.currency,
        description,
        &service.service_name,
    )
    .await?;
    Ok(Json(ApiResponse::ok(txn)))
}

#[derive(Debug, Deserialize)]
struct InternalWithdrawalBody {
    user_id: String,
    amount: Decimal,
    currency: Currency,
    #[serde(default)]
    description: Option<String>,
}

async fn internal_withdrawal_handler(
    State(state): State<AppState>,
    service: AuthenticatedService,
    Json(body): Json<InternalWithdrawalBody>,
) -> Result<impl IntoResponse, EngineError> {
    let description = body.description.unwrap_or_else(|| "internal withdrawal".to_string());
    let txn = record_internal_entry(
        &state,
        &body.user_id,
        TransactionType::Withdrawal,
        body.amount,
        body.currency,
        description,
        &service.service_name,
    )
    .await?;
    Ok(Json(ApiResponse::ok(txn)))
}

#[derive(Debug, Deserialize)]
struct InternalConversionBody {
    user_id: String,
    source_amount: Decimal,
    source_currency: Currency,
    target_amount: Decimal,
    target_currency: Currency,
}

async fn internal_conversion_handler(
    State(state): State<AppState>,
    service: AuthenticatedService,
    Json(body): Json<InternalConversionBody>,
) -> Result<impl IntoResponse, EngineError> {
    if crate::balance::has_pending_blocking_transactions(state.ledger.as_ref(), &body.user_id).await? {
        return Err(EngineError::PendingBlockingTransaction);
    }

    let debit_id = generate_id("txn");
    let debit = Transaction {
        transaction_id: debit_id.clone(),
        user_id: body.user_id.clone(),
        kind: TransactionType::Conversion,
        amount: body.source_amount,
        currency: body.source_currency,
        fee: Decimal::ZERO,
        status: TransactionStatus::Completed,
        description: format!("conversion requested by {}", service.service_name),
        payment_provider: None,
        metadata: vec![TransactionMetadata::Conversion {
            conversion_type: "service_requested".to_string(),
            source_amount: body.source_amount,
            target_amount: body.target_amount,
            is_currency_bug_correction: false,
        }],
        created_at: now(),
        updated_at: now(),
        deleted: false,
    };
    state.ledger.append(debit).await?;
    state
        .balances
        .adjust(
            &body.user_id,
            body.source_currency.balance_class(),
            -body.source_amount,
            true,
            AdjustReason::InternalService,
            &debit_id,
        )
        .await?;

    let credit_id = generate_id("txn");
    let credit = Transaction {
        transaction_id: credit_id.clone(),
        user_id: body.user_id.clone(),
        kind: TransactionType::Conversion,
        amount: body.target_amount,
        currency: body.target_currency,
        fee: Decimal::ZERO,
        status: TransactionStatus::Completed,
        description: format!("conversion requested by {}", service.service_name),
        payment_provider: None,
        metadata: vec![TransactionMetadata::Conversion {
            conversion_type: "service_requested".to_string(),
            source_amount: body.source_amount,
            target_amount: body.target_amount,
            is_currency_bug_correction: false,
        }],
        created_at: now(),
        updated_at: now(),
        deleted: false,
    };
    let saved = state.ledger.append(credit).await?;
    state
        .balances
        .adjust(
            &body.user_id,
            body.target_currency.balance_class(),
            body.target_amount,
            false,
            AdjustReason::InternalService,
            &credit_id,
        )
        .await?;

    Ok(Json(ApiResponse::ok(saved)))
}

async fn has_pending_transactions_handler(
    State(state): State<AppState>,
    _service: AuthenticatedService,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let pending = crate::balance::has_pending_blocking_transactions(state.ledger.as_ref(), &user_id).await?;
    Ok(Json(ApiResponse::ok(json!({ "hasPendingTransactions": pending }))))
}

async fn admin_withdrawals_pending_handler(
    State(state): State<AppState>,
    _admin: AuthenticatedAdmin,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let page = state
        .ledger
        .find(
            TransactionFilter {
                kind: Some(TransactionType::Withdrawal),
                status: Some(TransactionStatus::PendingAdminApproval),
                ..Default::default()
            },
            Pagination {
                page: query.page.unwrap_or(1),
                limit: query.limit.unwrap_or(20),
            },
        )
        .await?;
    let pagination = PaginationMeta::from(&page);
    Ok(Json(ApiResponse::paginated(page.items, pagination)))
}

async fn admin_withdrawals_validated_handler(
    State(state): State<AppState>,
    _admin: AuthenticatedAdmin,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let pagination_req = Pagination {
        page: query.page.unwrap_or(1),
        limit: query.limit.unwrap_or(20),
    };
    let mut items = Vec::new();
    for status in [TransactionStatus::Completed, TransactionStatus::Failed, TransactionStatus::RejectedByAdmin] {
        let page = state
            .ledger
            .find(
                TransactionFilter {
                    kind: Some(TransactionType::Withdrawal),
                    status: Some(status),
                    ..Default::default()
                },
                Pagination { page: 1, limit: 1000 },
            )
            .await?;
        items.extend(page.items);
    }
    items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    let total = items.len();
    let limit = pagination_req.limit.max(1) as usize;
    let start = ((pagination_req.page.max(1) as usize) - 1) * limit;
    let page_items: Vec<_> = items.into_iter().skip(start).take(limit).collect();
    let pagination = PaginationMeta {
        page: pagination_req.page.max(1),
        limit: pagination_req.limit,
        total,
        total_pages: ((total as u32) + pagination_req.limit - 1) / pagination_req.limit.max(1),
    };
    Ok(Json(ApiResponse::paginated(page_items, pagination)))
}

async fn admin_gateway_balances_handler(
    State(state): State<AppState>,
    _admin: AuthenticatedAdmin,
) -> Result<impl IntoResponse, EngineError> {
    // No provider exposes a balance-check call in `GatewayAdapter` (spec.md
    // §4.3 covers intent/payout/webhook only) — this surfaces which
    // gateways are configured rather than fabricating a number.
    let gateways: Vec<_> = state.intents.gateways.keys().map(|k| json!({ "gateway": k })).collect();
    Ok(Json(ApiResponse::ok_with_message(
        gateways,
        "per-provider balance polling is not implemented by any configured adapter",
    )))
}

async fn admin_processing_stats_handler(
    State(state): State<AppState>,
    _admin: AuthenticatedAdmin,
) -> Result<impl IntoResponse, EngineError> {
    let processing = state
        .ledger
        .count(TransactionFilter {
            kind: Some(TransactionType::Withdrawal),
            status: Some(TransactionStatus::Processing),
            ..Default::default()
        })
        .await?;
    let pending_otp = state
        .ledger
        .count(TransactionFilter {
            kind: Some(TransactionType::Withdrawal),
            status: Some(TransactionStatus::PendingOtpVerification),
            ..Default::default()
        })
        .await?;
    let pending_approval = state
        .ledger
        .count(TransactionFilter {
            kind: Some(TransactionType::Withdrawal),
            status: Some(TransactionStatus::PendingAdminApproval),
            ..Default::default()
        })
        .await?;
    let oldest_processing = state
        .ledger
        .find_processing_withdrawals(1)
        .await?
        .into_iter()
        .next()
        .map(|t| t.updated_at);
    Ok(Json(ApiResponse::ok(json!({
        "processing": processing,
        "pendingOtpVerification": pending_otp,
        "pendingAdminApproval": pending_approval,
        "oldestProcessingSince": oldest_processing,
    }))))
}

async fn admin_reconcile_handler(
    State(state): State<AppState>,
    _admin: AuthenticatedAdmin,
) -> Result<impl IntoResponse, EngineError> {
    let count = state.reconciler.sweep_all().await?;
    Ok(Json(ApiResponse::ok(json!({ "reconciled": count }))))
}

async fn admin_reconcile_one_handler(
    State(state): State<AppState>,
    _admin: AuthenticatedAdmin,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    state.reconciler.sweep_one(&transaction_id).await?;
    Ok(Json(ApiResponse::ok(json!({ "reconciled": true }))))
}
