//! Signed batch mutations (POST /exchange).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::signer::Signer;
use super::types::{
    parse_batch_statuses, BatchStatus, CancelAction, CancelWire, ModifyAction, ModifyWire,
    OrderAction, OrderWire,
};
use super::Exchange;

pub struct ExchangeClient {
    client: Client,
    base_url: String,
    signer: Signer,
}

impl std::fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ExchangeClient {
    pub fn new(base_url: &str, signer: Signer) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("failed to build exchange HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer,
        })
    }

    async fn post_action<T: Serialize>(
        &self,
        action: &T,
        batch_len: usize,
    ) -> Result<Vec<BatchStatus>> {
        let nonce = Utc::now().timestamp_millis() as u64;
        let signature = self.signer.sign_action(action, nonce)?;
        let body = serde_json::json!({
            "action": action,
            "nonce": nonce,
            "signature": signature,
            "vaultAddress": null,
        });

        let url = format!("{}/exchange", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("POST /exchange failed")?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .context("failed to read /exchange response")?;
        if !status.is_success() {
            return Err(anyhow!("POST /exchange returned {status}: {text}"));
        }

        debug!(%text, "exchange response");
        let value: serde_json::Value =
            serde_json::from_str(&text).context("failed to parse /exchange response")?;
        Ok(parse_batch_statuses(&value, batch_len))
    }
}

#[async_trait]
impl Exchange for ExchangeClient {
    async fn bulk_orders(&self, orders: Vec<OrderWire>) -> Result<Vec<BatchStatus>> {
        let n = orders.len();
        self.post_action(&OrderAction::new(orders), n).await
    }

    async fn bulk_modify(&self, modifies: Vec<ModifyWire>) -> Result<Vec<BatchStatus>> {
        let n = modifies.len();
        self.post_action(&ModifyAction::new(modifies), n).await
    }

    async fn bulk_cancel(&self, cancels: Vec<CancelWire>) -> Result<Vec<BatchStatus>> {
        let n = cancels.len();
        self.post_action(&CancelAction::new(cancels), n).await
    }
}

/// Render a price or size the way the venue expects: plain decimal, no
/// exponent, trailing zeros trimmed.
pub fn fmt_decimal(x: f64) -> String {
    let s = format!("{x:.8}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() {
        "0".to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_formatting_trims() {
        assert_eq!(fmt_decimal(1.003), "1.003");
        assert_eq!(fmt_decimal(10.0), "10");
        assert_eq!(fmt_decimal(0.0012346), "0.0012346");
        assert_eq!(fmt_decimal(0.0), "0");
        // Float artifacts are rounded away at 8 decimals.
        assert_eq!(fmt_decimal(1.0063000000000001), "1.0063");
    }
}
