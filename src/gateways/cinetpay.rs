//! Aggregator-A adapter (CinetPay-style): fiat XAF/XOF/KES/CDF/GNF,
//! unsigned webhooks verified by a mandatory status re-fetch (spec.md §4.3).

use super::{
    CreateIntentRequest, CreateIntentResponse, CreatePayoutRequest, CreatePayoutResponse,
    GatewayAdapter, GatewayStatus, WebhookEvent, WebhookHeaders, GATEWAY_REQUEST_TIMEOUT,
};
use crate::errors::{EngineError, Result};
use crate::types::GatewayKind;
use crate::utils::with_retry;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct CinetPayAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    site_id: String,
}

impl CinetPayAdapter {
    pub fn new(base_url: String, api_key: String, site_id: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(GATEWAY_REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            base_url,
            api_key,
            site_id,
        }
    }

    /// Maps CinetPay's payment-status vocabulary onto `GatewayStatus`.
    fn map_payment_status(code: &str) -> GatewayStatus {
        match code {
            "ACCEPTED" => GatewayStatus::Completed,
            "REFUSED" | "CANCELLED" => GatewayStatus::Failed,
            _ => GatewayStatus::Processing,
        }
    }

    /// Maps CinetPay's payout/transfer-status vocabulary onto `GatewayStatus`.
    fn map_payout_status(code: &str) -> GatewayStatus {
        match code {
            "VAL" => GatewayStatus::Completed,
            "REJ" | "NOS" => GatewayStatus::Failed,
            "NEW" | "REC" => GatewayStatus::Processing,
            _ => GatewayStatus::Processing,
        }
    }
}

#[async_trait]
impl GatewayAdapter for CinetPayAdapter {
    fn kind(&self) -> GatewayKind {
        GatewayKind::CinetPay
    }

    async fn create_intent(&self, req: CreateIntentRequest) -> Result<CreateIntentResponse> {
        let body = json!({
            "apikey": self.api_key,
            "site_id": self.site_id,
            "transaction_id": req.session_id,
            "amount": req.amount.to_string(),
            "currency": req.currency,
            "notify_url": req.callback_path,
        });

        let url = format!("{}/v2/payment", self.base_url);
        let resp = with_retry(|| {
            let client = self.client.clone();
            let url = url.clone();
            let body = body.clone();
            async move {
                let resp = client.post(&url).json(&body).send().await.map_err(|e| {
                    if crate::utils::is_retryable_transport_error(&e) {
                        EngineError::ProviderUnavailable(e.to_string())
                    } else {
                        EngineError::Http(e)
                    }
                })?;
                if !resp.status().is_success() {
                    return Err(EngineError::ProviderError(format!(
                        "cinetpay create_intent returned {}",
                        resp.status()
                    )));
                }
                resp.json::<Value>().await.map_err(EngineError::Http)
            }
        })
        .await?;

        let payment_token = resp
            .get("data")
            .and_then(|d| d.get("payment_token"))
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::ProviderError("missing payment_token in response".into()))?;
        let redirect_url = resp
            .get("data")
            .and_then(|d| d.get("payment_url"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(CreateIntentResponse {
            provider_ref: payment_token.to_string(),
            redirect_url,
            raw: resp,
        })
    }

    async fn check_status(&self, provider_ref: &str) -> Result<GatewayStatus> {
        let url = format!("{}/v2/payment/check", self.base_url);
        let body = json!({
            "apikey": self.api_key,
            "site_id": self.site_id,
            "transaction_id": provider_ref,
        });

        let resp = with_retry(|| {
            let client = self.client.clone();
            let url = url.clone();
            let body = body.clone();
            async move {
                let resp = client.post(&url).json(&body).send().await.map_err(|e| {
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

        let code = resp
            .get("data")
            .and_then(|d| d.get("status"))
            .and_then(Value::as_str)
            .unwrap_or("");
        Ok(Self::map_payment_status(code))
    }

    async fn create_payout(&self, req: CreatePayoutRequest) -> Result<CreatePayoutResponse> {
        let url = format!("{}/v1/transfer/money/send", self.base_url);
        let mut body = json!({
            "apikey": self.api_key,
            "client_transaction_id": req.transaction_id,
            "amount": req.amount.to_string(),
            "currency": req.currency,
        });
        if let Value::Object(map) = &mut body {
            if let Value::Object(dest) = req.destination {
                for (k, v) in dest {
                    map.insert(k, v);
                }
            }
        }

        let resp = with_retry(|| {
            let client = self.client.clone();
            let url = url.clone();
            let body = body.clone();
            async move {
                let resp = client.post(&url).json(&body).send().await.map_err(|e| {
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

        let transfer_id = resp
            .get("transaction_id")
            .and_then(Value::as_str)
            .unwrap_or(&req.transaction_id)
            .to_string();

        Ok(CreatePayoutResponse { provider_ref: transfer_id, raw: resp })
    }

    /// CinetPay webhooks are unsigned; `headers` is accepted for trait-shape
    /// symmetry but never consulted — `ingest_webhook` must always re-fetch
    /// status via `check_status` before trusting this event (spec.md §4.3).
    fn parse_webhook(&self, raw_body: &[u8], _headers: &WebhookHeaders) -> Result<Option<WebhookEvent>> {
        let payload: Value =
            serde_json::from_slice(raw_body).map_err(|_| EngineError::Validation("malformed webhook body".into()))?;

        let provider_ref = payload
            .get("cpm_trans_id")
            .or_else(|| payload.get("transaction_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Validation("webhook missing transaction reference".into()))?
            .to_string();

        // The notify payload carries no trustworthy status; callers treat
        // this event purely as a trigger to re-check.
        Ok(Some(WebhookEvent {
            provider_ref,
            status: GatewayStatus::Processing,
            raw: payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_map_matches_spec() {
        assert_eq!(CinetPayAdapter::map_payment_status("ACCEPTED"), GatewayStatus::Completed);
        assert_eq!(CinetPayAdapter::map_payment_status("REFUSED"), GatewayStatus::Failed);
        assert_eq!(CinetPayAdapter::map_payment_status("CANCELLED"), GatewayStatus::Failed);
        assert_eq!(CinetPayAdapter::map_payment_status("PENDING"), GatewayStatus::Processing);
    }

    #[test]
    fn payout_status_map_matches_spec() {
        assert_eq!(CinetPayAdapter::map_payout_status("VAL"), GatewayStatus::Completed);
        assert_eq!(CinetPayAdapter::map_payout_status("REJ"), GatewayStatus::Failed);
        assert_eq!(CinetPayAdapter::map_payout_status("NOS"), GatewayStatus::Failed);
        assert_eq!(CinetPayAdapter::map_payout_status("NEW"), GatewayStatus::Processing);
        assert_eq!(CinetPayAdapter::map_payout_status("REC"), GatewayStatus::Processing);
    }

    #[test]
    fn parse_webhook_extracts_transaction_reference() {
        let adapter = CinetPayAdapter::new("https://api.example".into(), "key".into(), "site".into());
        let body = br#"{"cpm_trans_id":"sess-123","cpm_amount":"1000"}"#;
        let event = adapter.parse_webhook(body, &WebhookHeaders::default()).unwrap().unwrap();
        assert_eq!(event.provider_ref, "sess-123");
        assert_eq!(event.status, GatewayStatus::Processing);
    }
}
