//! C3 — Gateway Adapters: one `GatewayAdapter` implementation per external
//! payment provider, each translating its own wire format into the engine's
//! normalized `GatewayStatus`/`WebhookEvent` shapes.
//!
//! Every adapter shares the same retry policy (`utils::with_retry`) and the
//! same per-client timeout, matching the teacher's single shared `reqwest::Client`
//! construction in `X402Client`.

pub mod cinetpay;
pub mod feexpay;
pub mod nowpayments;

use crate::errors::Result;
use crate::types::{Currency, GatewayKind, PaymentType};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;

/// Timeout applied to every outbound request to a provider, per spec.md §5.
pub const GATEWAY_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Normalized status an adapter maps a provider's vocabulary onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Waiting,
    Processing,
    Confirmed,
    PartiallyPaid,
    Completed,
    Failed,
    Expired,
}

/// Parameters to open a new payment session with a provider.
#[derive(Debug, Clone)]
pub struct CreateIntentRequest {
    pub session_id: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub payment_type: PaymentType,
    pub callback_path: String,
}

/// What a provider handed back after opening a session.
#[derive(Debug, Clone)]
pub struct CreateIntentResponse {
    pub provider_ref: String,
    pub redirect_url: Option<String>,
    pub raw: Value,
}

/// Parameters to request a payout (withdrawal) from a provider.
#[derive(Debug, Clone)]
pub struct CreatePayoutRequest {
    pub transaction_id: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub destination: Value,
}

#[derive(Debug, Clone)]
pub struct CreatePayoutResponse {
    pub provider_ref: String,
    pub raw: Value,
}

/// A normalized webhook event after provider-specific verification and parsing.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub provider_ref: String,
    pub status: GatewayStatus,
    pub raw: Value,
}

/// The Gateway Adapter contract (C3).
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn kind(&self) -> GatewayKind;

    async fn create_intent(&self, req: CreateIntentRequest) -> Result<CreateIntentResponse>;

    /// Re-fetches authoritative status for a provider reference — the
    /// fallback path for providers whose webhooks are unsigned or absent
    /// (spec.md §4.3/§4.4).
    async fn check_status(&self, provider_ref: &str) -> Result<GatewayStatus>;

    /// Payout support is optional: FeexPay's withdrawal path is feature-flagged
    /// off by default (spec.md §4.6), and `Internal` never has one.
    async fn create_payout(&self, _req: CreatePayoutRequest) -> Result<CreatePayoutResponse> {
        Err(crate::errors::EngineError::ProviderUnavailable(
            "this gateway does not support payouts".into(),
        ))
    }

    /// Verifies and parses a raw webhook body into a normalized event.
    /// Returns `Ok(None)` for payloads that are structurally valid but not
    /// actionable (e.g. a ping); callers must still ack 200 in that case.
    fn parse_webhook(&self, raw_body: &[u8], headers: &WebhookHeaders) -> Result<Option<WebhookEvent>>;
}

/// Headers an adapter may need to verify a webhook (e.g. a signature header).
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub signature: Option<String>,
}
