//! HTTP client for the services that own orders, reviews and the catalog.

use ahash::AHashSet;
use recx_core::{DateRange, Error, InteractionBatch, ItemId, RawOrder, RawReview, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

/// Only delivered orders count as purchases.
const ORDER_STATUS: &str = "DELIVERED";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub orders_url: String,
    pub reviews_url: String,
    /// Unset means every item is eligible.
    #[serde(default)]
    pub active_items_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            orders_url: "http://localhost:8081/orders/secure/recommend".to_string(),
            reviews_url: "http://localhost:8082/product/public/recommend".to_string(),
            active_items_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        for url in [&config.orders_url, &config.reviews_url].into_iter().chain(config.active_items_url.as_ref()) {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::InvalidConfig(format!("upstream url must be http(s): {}", url)));
            }
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {}", e)))?;
        Ok(Self { client, config })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub async fn fetch_orders(&self, range: &DateRange) -> Result<Vec<RawOrder>> {
        let mut params = vec![("status", ORDER_STATUS.to_string())];
        params.extend(range.query_params());
        let body = self.get_json(&self.config.orders_url, &params).await?;
        parse_orders(body)
    }

    pub async fn fetch_reviews(&self, range: &DateRange) -> Result<Vec<RawReview>> {
        let body = self.get_json(&self.config.reviews_url, &range.query_params()).await?;
        parse_reviews(body)
    }

    pub async fn fetch_batch(&self, range: &DateRange) -> Result<InteractionBatch> {
        let orders = self.fetch_orders(range).await?;
        let reviews = self.fetch_reviews(range).await?;
        info!(orders = orders.len(), reviews = reviews.len(), "upstream data fetched");
        Ok(InteractionBatch::new(orders, reviews))
    }

    /// Currently eligible items, or `None` when no catalog source is configured.
    pub async fn fetch_active_items(&self) -> Result<Option<AHashSet<ItemId>>> {
        let Some(url) = &self.config.active_items_url else {
            return Ok(None);
        };
        let body = self.get_json(url, &[]).await?;
        parse_active_items(body).map(Some)
    }

    async fn get_json(&self, url: &str, params: &[(&'static str, String)]) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| Error::UpstreamFetch {
                status: e.status().map(|s| s.as_u16()),
                detail: format!("{}: {}", url, e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamFetch {
                status: Some(status.as_u16()),
                detail: format!("{}: {}", url, detail.trim()),
            });
        }

        response.json::<Value>().await.map_err(|e| Error::UpstreamFetch {
            status: Some(status.as_u16()),
            detail: format!("{}: invalid json: {}", url, e),
        })
    }
}

fn malformed(detail: impl Into<String>) -> Error {
    Error::UpstreamFetch {
        status: None,
        detail: detail.into(),
    }
}

/// Orders arrive as `{"data": {"content": [...]}}`, where `data` may itself
/// be a JSON-encoded string.
pub fn parse_orders(body: Value) -> Result<Vec<RawOrder>> {
    let data = match body.get("data") {
        Some(Value::String(raw)) => {
            serde_json::from_str::<Value>(raw).map_err(|e| malformed(format!("orders data is not json: {}", e)))?
        }
        Some(data) => data.clone(),
        None => return Err(malformed("orders payload has no 'data' field")),
    };
    let content = data
        .get("content")
        .cloned()
        .ok_or_else(|| malformed("orders payload has no 'data.content' field"))?;
    serde_json::from_value(content).map_err(|e| malformed(format!("orders content: {}", e)))
}

pub fn parse_reviews(body: Value) -> Result<Vec<RawReview>> {
    if !body.is_array() {
        return Err(malformed("reviews payload is not a list"));
    }
    serde_json::from_value(body).map_err(|e| malformed(format!("reviews: {}", e)))
}

pub fn parse_active_items(body: Value) -> Result<AHashSet<ItemId>> {
    let ids: Vec<ItemId> = serde_json::from_value(body).map_err(|e| malformed(format!("active items: {}", e)))?;
    Ok(ids.into_iter().collect())
}
