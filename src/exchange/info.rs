//! Read-only REST queries (POST /info).
//!
//! Used at startup to seed local state and every reconciliation cycle to
//! re-anchor it to exchange truth.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::types::{OpenOrder, SpotMeta, SpotUserState, UserRateLimit};

#[derive(Debug, Clone)]
pub struct InfoClient {
    client: Client,
    base_url: String,
}

impl InfoClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("failed to build info HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn query<T: DeserializeOwned>(&self, body: serde_json::Value) -> Result<T> {
        let url = format!("{}/info", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST /info {body}"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("POST /info {body} returned {status}: {text}"));
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("failed to parse /info response for {body}"))
    }

    pub async fn spot_meta(&self) -> Result<SpotMeta> {
        self.query(json!({"type": "spotMeta"})).await
    }

    pub async fn open_orders(&self, user: &str) -> Result<Vec<OpenOrder>> {
        self.query(json!({"type": "openOrders", "user": user})).await
    }

    pub async fn spot_user_state(&self, user: &str) -> Result<SpotUserState> {
        self.query(json!({"type": "spotClearinghouseState", "user": user}))
            .await
    }

    pub async fn user_rate_limit(&self, user: &str) -> Result<UserRateLimit> {
        self.query(json!({"type": "userRateLimit", "user": user}))
            .await
    }
}
