//! Aggregator-B adapter (FeexPay-style): fiat, no balance API, no webhook
//! signature. Status is always confirmed by re-fetch keyed on the
//! client-chosen reference (spec.md §4.3). Payouts are feature-flagged off
//! by default (spec.md §4.6) and are rejected unless explicitly enabled.

use super::{
    CreateIntentRequest, CreateIntentResponse, CreatePayoutRequest, CreatePayoutResponse,
    GatewayAdapter, GatewayStatus, WebhookEvent, WebhookHeaders, GATEWAY_REQUEST_TIMEOUT,
};
use crate::errors::{EngineError, Result};
use crate::types::GatewayKind;
use crate::utils::with_retry;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct FeexPayAdapter {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    withdrawals_enabled: bool,
}

impl FeexPayAdapter {
    pub fn new(base_url: String, api_token: String, withdrawals_enabled: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(GATEWAY_REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            base_url,
            api_token,
            withdrawals_enabled,
        }
    }

    fn map_status(code: &str) -> GatewayStatus {
        match code {
            "SUCCESSFUL" | "SUCCESS" => GatewayStatus::Completed,
            "FAILED" | "CANCELLED" => GatewayStatus::Failed,
            _ => GatewayStatus::Processing,
        }
    }
}

#[async_trait]
impl GatewayAdapter for FeexPayAdapter {
    fn kind(&self) -> GatewayKind {
        GatewayKind::FeexPay
    }

    async fn create_intent(&self, req: CreateIntentRequest) -> Result<CreateIntentResponse> {
        let url = format!("{}/api/transactions/public/requesttopay", self.base_url);
        let body = json!({
            "reference": req.session_id,
            "amount": req.amount.to_string(),
            "currency": req.currency,
            "callback_info": { "callback_url": req.callback_path },
        });

        let resp = with_retry(|| {
            let client = self.client.clone();
            let url = url.clone();
            let body = body.clone();
            let token = self.api_token.clone();
            async move {
                let resp = client
                    .post(&url)
                    .bearer_auth(&token)
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
                        "feexpay create_intent returned {}",
                        resp.status()
                    )));
                }
                resp.json::<Value>().await.map_err(EngineError::Http)
            }
        })
        .await?;

        let reference = resp
            .get("reference")
            .and_then(Value::as_str)
            .unwrap_or(&req.session_id)
            .to_string();

        Ok(CreateIntentResponse {
            provider_ref: reference,
            redirect_url: None,
            raw: resp,
        })
    }

    async fn check_status(&self, provider_ref: &str) -> Result<GatewayStatus> {
        let url = format!("{}/api/transactions/public/single/status/{}", self.base_url, provider_ref);

        let resp = with_retry(|| {
            let client = self.client.clone();
            let url = url.clone();
            let token = self.api_token.clone();
            async move {
                let resp = client.get(&url).bearer_auth(&token).send().await.map_err(|e| {
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

        let code = resp.get("status").and_then(Value::as_str).unwrap_or("");
        Ok(Self::map_status(code))
    }

    async fn create_payout(&self, req: CreatePayoutRequest) -> Result<CreatePayoutResponse> {
        if !self.withdrawals_enabled {
            return Err(EngineError::ProviderUnavailable(
                "feexpay withdrawals are disabled".into(),
            ));
        }

        let url = format!("{}/api/payouts/public/transfer", self.base_url);
        let mut body = json!({
            "reference": req.transaction_id,
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
            let token = self.api_token.clone();
            async move {
                let resp = client
                    .post(&url)
                    .bearer_auth(&token)
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
                resp.json::<Value>().await.map_err(EngineError::Http)
            }
        })
        .await?;

        let reference = resp
            .get("reference")
            .and_then(Value::as_str)
            .unwrap_or(&req.transaction_id)
            .to_string();
        Ok(CreatePayoutResponse { provider_ref: reference, raw: resp })
    }

    /// FeexPay sends no signature at all; same contract as CinetPay —
    /// the event is a trigger, never a trusted status carrier.
    fn parse_webhook(&self, raw_body: &[u8], _headers: &WebhookHeaders) -> Result<Option<WebhookEvent>> {
        let payload: Value =
            serde_json::from_slice(raw_body).map_err(|_| EngineError::Validation("malformed webhook body".into()))?;

        let provider_ref = payload
            .get("reference")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Validation("webhook missing reference".into()))?
            .to_string();

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
    fn status_map_matches_spec() {
        assert_eq!(FeexPayAdapter::map_status("SUCCESSFUL"), GatewayStatus::Completed);
        assert_eq!(FeexPayAdapter::map_status("FAILED"), GatewayStatus::Failed);
        assert_eq!(FeexPayAdapter::map_status("PENDING"), GatewayStatus::Processing);
    }

    #[tokio::test]
    async fn create_payout_rejected_when_feature_flag_is_off() {
        let adapter = FeexPayAdapter::new("https://api.example".into(), "tok".into(), false);
        let err = adapter
            .create_payout(CreatePayoutRequest {
                transaction_id: "t1".into(),
                amount: rust_decimal::Decimal::new(1000, 0),
                currency: crate::types::Currency::Xof,
                destination: json!({}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ProviderUnavailable(_)));
    }
}
