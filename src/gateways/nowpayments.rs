//! Crypto processor adapter (NOWPayments-style): HMAC-SHA512 signed IPN
//! webhooks, the only provider whose webhook is trusted without a re-fetch
//! (spec.md §4.3, §4.4).

use super::{
    CreateIntentRequest, CreateIntentResponse, GatewayAdapter, GatewayStatus, WebhookEvent,
    WebhookHeaders, GATEWAY_REQUEST_TIMEOUT,
};
use crate::errors::{EngineError, Result};
use crate::types::{Currency, GatewayKind};
use crate::utils::{crypto_fiat_to_usd_rate, is_usd_pegged_stablecoin, verify_hmac_sha512, with_retry};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct NowPaymentsAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    ipn_secret: String,
}

impl NowPaymentsAdapter {
    pub fn new(base_url: String, api_key: String, ipn_secret: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(GATEWAY_REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            base_url,
            api_key,
            ipn_secret,
        }
    }

    /// NOWPayments sends `payment_id` as either a string or a number
    /// depending on endpoint; normalizes to the bare id string either way.
    fn extract_payment_id(value: &Value) -> Option<String> {
        value
            .as_str()
            .map(str::to_string)
            .or_else(|| value.as_u64().map(|n| n.to_string()))
    }

    /// NOWPayments' own lowercase currency codes.
    fn currency_code(currency: Currency) -> &'static str {
        match currency {
            Currency::Xaf => "xaf",
            Currency::Usd => "usd",
            Currency::Xof => "xof",
            Currency::Kes => "kes",
            Currency::Cdf => "cdf",
            Currency::Gnf => "gnf",
            Currency::Btc => "btc",
            Currency::Ltc => "ltc",
            Currency::Xrp => "xrp",
            Currency::Trx => "trx",
            Currency::UsdtSol => "usdtsol",
            Currency::UsdtBsc => "usdtbsc",
            Currency::BnbBsc => "bnbbsc",
        }
    }

    /// NOWPayments doesn't price in XAF/XOF/GNF/CDF/KES directly, so those
    /// are converted to USD before the request goes out; a USD-pegged
    /// stablecoin priced from USD is already 1:1 and skips the provider
    /// round-trip entirely (spec.md §4.3).
    fn resolve_price(amount: rust_decimal::Decimal, currency: Currency) -> (rust_decimal::Decimal, &'static str) {
        if is_usd_pegged_stablecoin(currency) {
            (amount, "usd")
        } else if let Some(rate) = crypto_fiat_to_usd_rate(currency) {
            (amount * rate, "usd")
        } else {
            (amount, Self::currency_code(currency))
        }
    }

    /// Maps NOWPayments' payment-status vocabulary onto `GatewayStatus`,
    /// per spec.md §4.4's table.
    fn map_status(code: &str) -> GatewayStatus {
        match code {
            "waiting" => GatewayStatus::Waiting,
            "confirming" | "sending" => GatewayStatus::Processing,
            "confirmed" => GatewayStatus::Confirmed,
            "partially_paid" => GatewayStatus::PartiallyPaid,
            "finished" => GatewayStatus::Completed,
            "failed" | "refunded" | "expired" => GatewayStatus::Failed,
            _ => GatewayStatus::Processing,
        }
    }
}

#[async_trait]
impl GatewayAdapter for NowPaymentsAdapter {
    fn kind(&self) -> GatewayKind {
        GatewayKind::NowPayments
    }

    async fn create_intent(&self, req: CreateIntentRequest) -> Result<CreateIntentResponse> {
        let url = format!("{}/v1/payment", self.base_url);
        let (price_amount, price_currency) = Self::resolve_price(req.amount, req.currency);
        let body = json!({
            "price_amount": price_amount.to_string(),
            "price_currency": price_currency,
            "order_id": req.session_id,
            "ipn_callback_url": req.callback_path,
        });

        let resp = with_retry(|| {
            let client = self.client.clone();
            let url = url.clone();
            let body = body.clone();
            let api_key = self.api_key.clone();
            async move {
                let resp = client
                    .post(&url)
                    .header("x-api-key", &api_key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| {
                        if crate::utils::is_retryable_transport_error(&e) {
                            EngineError::ProviderUnavailable(e.to_string())
                        } else {
                            EngineError::Http(e)
                        }
                    })?;
                if !resp.status().is_success() {
                    return Err(EngineError::ProviderError(format!(
                        "nowpayments create_intent returned {}",
                        resp.status()
                    )));
                }
                resp.json::<Value>().await.map_err(EngineError::Http)
            }
        })
        .await?;

        let payment_id = resp
            .get("payment_id")
            .and_then(Self::extract_payment_id)
            .ok_or_else(|| EngineError::ProviderError("missing payment_id in response".into()))?;

        Ok(CreateIntentResponse {
            provider_ref: payment_id,
            redirect_url: None,
            raw: resp,
        })
    }

    async fn check_status(&self, provider_ref: &str) -> Result<GatewayStatus> {
        let url = format!("{}/v1/payment/{}", self.base_url, provider_ref);

        let resp = with_retry(|| {
            let client = self.client.clone();
            let url = url.clone();
            let api_key = self.api_key.clone();
            async move {
                let resp = client
                    .get(&url)
                    .header("x-api-key", &api_key)
                    .send()
                    .await
                    .map_err(|e| {
                        if crate::utils::is_retryable_transport_error(&e) {
                            EngineError::ProviderUnavailable(e.to_string())
                        } else {
                            EngineError::Http(e)
                        }
                    })?;
                resp.json::<Value>().await.map_err(EngineError::Http)
            }
        })
        .await?;

        let code = resp.get("payment_status").and_then(Value::as_str).unwrap_or("");
        Ok(Self::map_status(code))
    }

    /// Verifies the HMAC-SHA512 signature against the raw body before
    /// trusting `payment_status` — this is the one adapter allowed to skip
    /// the re-fetch-to-confirm pattern (spec.md §4.3).
    fn parse_webhook(&self, raw_body: &[u8], headers: &WebhookHeaders) -> Result<Option<WebhookEvent>> {
        let signature = headers
            .signature
            .as_deref()
            .ok_or_else(|| EngineError::Authentication("missing x-nowpayments-sig header".into()))?;

        if !verify_hmac_sha512(raw_body, &self.ipn_secret, signature) {
            return Err(EngineError::Authentication("invalid webhook signature".into()));
        }

        let payload: Value =
            serde_json::from_slice(raw_body).map_err(|_| EngineError::Validation("malformed webhook body".into()))?;

        let provider_ref = payload
            .get("payment_id")
            .and_then(Self::extract_payment_id)
            .ok_or_else(|| EngineError::Validation("webhook missing payment_id".into()))?;
        let code = payload.get("payment_status").and_then(Value::as_str).unwrap_or("");

        Ok(Some(WebhookEvent {
            provider_ref,
            status: Self::map_status(code),
            raw: payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_map_matches_spec_table() {
        assert_eq!(NowPaymentsAdapter::map_status("waiting"), GatewayStatus::Waiting);
        assert_eq!(NowPaymentsAdapter::map_status("confirming"), GatewayStatus::Processing);
        assert_eq!(NowPaymentsAdapter::map_status("sending"), GatewayStatus::Processing);
        assert_eq!(NowPaymentsAdapter::map_status("confirmed"), GatewayStatus::Confirmed);
        assert_eq!(NowPaymentsAdapter::map_status("partially_paid"), GatewayStatus::PartiallyPaid);
        assert_eq!(NowPaymentsAdapter::map_status("finished"), GatewayStatus::Completed);
        assert_eq!(NowPaymentsAdapter::map_status("failed"), GatewayStatus::Failed);
        assert_eq!(NowPaymentsAdapter::map_status("refunded"), GatewayStatus::Failed);
        assert_eq!(NowPaymentsAdapter::map_status("expired"), GatewayStatus::Failed);
    }

    #[test]
    fn resolve_price_converts_unsupported_fiat_to_usd() {
        let (amount, code) = NowPaymentsAdapter::resolve_price(rust_decimal::Decimal::new(1000, 0), Currency::Xaf);
        assert_eq!(code, "usd");
        assert_eq!(amount, rust_decimal::Decimal::new(1000, 0) * rust_decimal::Decimal::new(16, 4));
    }

    #[test]
    fn resolve_price_short_circuits_usd_pegged_stablecoins() {
        let (amount, code) = NowPaymentsAdapter::resolve_price(rust_decimal::Decimal::new(50, 0), Currency::UsdtSol);
        assert_eq!(code, "usd");
        assert_eq!(amount, rust_decimal::Decimal::new(50, 0));
    }

    #[test]
    fn resolve_price_passes_through_natively_supported_currencies() {
        let (amount, code) = NowPaymentsAdapter::resolve_price(rust_decimal::Decimal::new(50, 0), Currency::Btc);
        assert_eq!(code, "btc");
        assert_eq!(amount, rust_decimal::Decimal::new(50, 0));
    }

    #[test]
    fn parse_webhook_rejects_missing_signature() {
        let adapter = NowPaymentsAdapter::new("https://api.example".into(), "key".into(), "secret".into());
        let err = adapter
            .parse_webhook(b"{}", &WebhookHeaders::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::Authentication(_)));
    }

    #[test]
    fn parse_webhook_accepts_valid_signature() {
        use hmac::{Hmac, Mac};
        use sha2::Sha512;

        let secret = "secret";
        let adapter = NowPaymentsAdapter::new("https://api.example".into(), "key".into(), secret.into());
        let body = br#"{"payment_id":"abc123","payment_status":"finished"}"#;

        let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        let headers = WebhookHeaders { signature: Some(sig) };
        let event = adapter.parse_webhook(body, &headers).unwrap().unwrap();
        assert_eq!(event.provider_ref, "abc123");
        assert_eq!(event.status, GatewayStatus::Completed);
    }
}
