//! Typed clients for the sibling services this engine calls out to: the
//! User service (referrer chains, balance sync) and the Notification
//! service (spec.md §6's collaborator list). Each request carries the
//! shared service secret and a 5s timeout, matching the gateway adapters'
//! single-shared-`reqwest::Client` construction.

use crate::commission::ReferrerChainProvider;
use crate::errors::{EngineError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
pub struct UserDetails {
    pub user_id: String,
    pub email: Option<String>,
    pub referrer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSearchCriteria {
    pub country: Option<String>,
    pub is_active: Option<bool>,
}

pub struct UserServiceClient {
    client: reqwest::Client,
    base_url: String,
    service_secret: String,
}

impl UserServiceClient {
    pub fn new(base_url: String, service_secret: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(COLLABORATOR_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            base_url,
            service_secret,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("x-service-secret", &self.service_secret)
            .header("x-service-name", "payment-engine")
    }

    pub async fn get_user_details(&self, user_id: &str) -> Result<UserDetails> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/internal/users/{user_id}"))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::ProviderError(format!("user service returned {}", resp.status())));
        }
        resp.json::<UserDetails>().await.map_err(EngineError::Http)
    }

    /// Walks up to 3 levels of `referrer_id` to build the upline chain,
    /// nearest referrer first, used by `CommissionEngine::distribute`.
    pub async fn get_referrer_chain(&self, user_id: &str) -> Result<Vec<String>> {
        let mut chain = Vec::with_capacity(3);
        let mut current = user_id.to_string();
        for _ in 0..3 {
            let details = self.get_user_details(&current).await?;
            match details.referrer_id {
                Some(referrer) => {
                    chain.push(referrer.clone());
                    current = referrer;
                }
                None => break,
            }
        }
        Ok(chain)
    }

    pub async fn find_users_by_criteria(&self, criteria: UserSearchCriteria) -> Result<Vec<UserDetails>> {
        let resp = self
            .request(reqwest::Method::POST, "/internal/users/search")
            .json(&criteria)
            .send()
            .await?;
        resp.json::<Vec<UserDetails>>().await.map_err(EngineError::Http)
    }

    pub async fn get_random_user_ids(&self, count: u32) -> Result<Vec<String>> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/internal/users/random?count={count}"))
            .send()
            .await?;
        resp.json::<Vec<String>>().await.map_err(EngineError::Http)
    }

    /// Pushes this engine's balance view back to the User service's own
    /// cached copy (spec.md §9's `updateUserBalance` collaborator call).
    pub async fn update_balance(&self, user_id: &str, balance: Decimal, usd_balance: Decimal) -> Result<()> {
        let resp = self
            .request(reqwest::Method::PATCH, &format!("/internal/users/{user_id}/balance"))
            .json(&serde_json::json!({ "balance": balance, "usdBalance": usd_balance }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::ProviderError(format!("user service returned {}", resp.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl ReferrerChainProvider for UserServiceClient {
    async fn referrer_chain(&self, user_id: &str) -> Result<Vec<String>> {
        self.get_referrer_chain(user_id).await
    }
}

pub struct NotificationServiceClient {
    client: reqwest::Client,
    base_url: String,
    service_secret: String,
}

impl NotificationServiceClient {
    pub fn new(base_url: String, service_secret: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(COLLABORATOR_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            base_url,
            service_secret,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("x-service-secret", &self.service_secret)
            .header("x-service-name", "payment-engine")
    }

    pub async fn send_internal(&self, user_id: &str, template: &str, payload: Value) -> Result<()> {
        let resp = self
            .request(reqwest::Method::POST, "/internal/notifications/send")
            .json(&serde_json::json!({ "userId": user_id, "template": template, "payload": payload }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::ProviderError(format!(
                "notification service returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    pub async fn broadcast(&self, template: &str, payload: Value) -> Result<()> {
        let resp = self
            .request(reqwest::Method::POST, "/internal/notifications/broadcast")
            .json(&serde_json::json!({ "template": template, "payload": payload }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::ProviderError(format!(
                "notification service returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
