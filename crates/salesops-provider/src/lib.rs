//! Yampi order-listing client: paginated fetch with retry/backoff.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use salesops_core::OrderFilter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "salesops-provider";

pub const DEFAULT_API_URL: &str = "https://api.dooki.com.br/v2";
pub const PAGE_SIZE: u32 = 100;
pub const ORDER_INCLUDES: &str = "customer,status,items,shipping_address,promocode,transactions";

/// A provider order exactly as received. Shape is normalized downstream.
pub type RawOrder = JsonValue;

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_url: String,
    pub store_alias: String,
    pub user_token: String,
    pub user_secret_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider API error: http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid provider response from {url}: {message}")]
    Decode { url: String, message: String },
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Pagination {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub per_page: Option<u64>,
    #[serde(default)]
    pub current_page: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PageMeta {
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// One page of the order listing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OrdersPage {
    #[serde(default)]
    pub data: Vec<RawOrder>,
    #[serde(default)]
    pub meta: Option<PageMeta>,
}

impl OrdersPage {
    pub fn total_pages(&self) -> Option<u32> {
        self.meta
            .as_ref()
            .and_then(|m| m.pagination.as_ref())
            .and_then(|p| p.total_pages)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderStatus {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub alias: String,
}

#[derive(Debug, Deserialize)]
struct StatusesEnvelope {
    #[serde(default)]
    data: Vec<OrderStatus>,
}

/// Whole-batch order fetch. Implemented by [`ProviderClient`]; the sync engine
/// only depends on this.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_all_orders(&self, filter: &OrderFilter) -> Result<Vec<RawOrder>, FetchError>;
}

/// Query-string pairs for one listing page. `status_id[]` and
/// `payment_method[]` repeat; the date range is only sent when both ends are set.
pub fn order_query(filter: &OrderFilter, page: u32, limit: u32) -> Vec<(String, String)> {
    let mut pairs = vec![
        ("page".to_string(), page.to_string()),
        ("limit".to_string(), limit.to_string()),
        ("include".to_string(), ORDER_INCLUDES.to_string()),
    ];
    if let Some(q) = filter.q.as_deref().filter(|q| !q.is_empty()) {
        pairs.push(("q".to_string(), q.to_string()));
    }
    for id in &filter.status_ids {
        pairs.push(("status_id[]".to_string(), id.clone()));
    }
    for method in &filter.payment_methods {
        pairs.push(("payment_method[]".to_string(), method.clone()));
    }
    if let (Some(from), Some(to)) = (filter.date_from.as_deref(), filter.date_to.as_deref()) {
        pairs.push(("date".to_string(), format!("created_at:{from}|{to}")));
    }
    pairs
}

#[derive(Debug)]
pub struct ProviderClient {
    client: reqwest::Client,
    config: ProviderConfig,
    backoff: BackoffPolicy,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig, http: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(http.timeout);

        if let Some(user_agent) = &http.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            config,
            backoff: http.backoff,
        })
    }

    fn store_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.store_alias,
            path
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<T, FetchError> {
        let mut attempt = 0usize;
        loop {
            let resp_result = self
                .client
                .get(url)
                .query(query)
                .header("User-Token", &self.config.user_token)
                .header("User-Secret-Key", &self.config.user_secret_key)
                .header("Content-Type", "application/json")
                .send()
                .await;

            match resp_result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body = resp.bytes().await?;
                        return serde_json::from_slice(&body).map_err(|e| FetchError::Decode {
                            url: url.to_string(),
                            message: e.to_string(),
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        warn!(%status, attempt, url, "retrying provider request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        warn!(error = %err, attempt, url, "retrying provider request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }

    pub async fn fetch_orders(
        &self,
        filter: &OrderFilter,
        page: u32,
        limit: u32,
    ) -> Result<OrdersPage, FetchError> {
        let url = self.store_url("orders");
        let query = order_query(filter, page, limit);
        self.get_json(&url, &query)
            .instrument(info_span!("provider_fetch", page, limit))
            .await
    }

    /// Walks every listing page. Any failed page fails the whole fetch.
    pub async fn fetch_all_orders(&self, filter: &OrderFilter) -> Result<Vec<RawOrder>, FetchError> {
        let mut all_orders = Vec::new();
        let mut current_page = 1u32;
        let mut total_pages = 1u32;

        loop {
            let page = self.fetch_orders(filter, current_page, PAGE_SIZE).await?;
            if let Some(reported) = page.total_pages() {
                total_pages = reported.max(1);
            }
            debug!(
                page = current_page,
                total_pages,
                records = page.data.len(),
                "fetched provider orders page"
            );
            all_orders.extend(page.data);

            current_page += 1;
            if current_page > total_pages {
                break;
            }
        }

        Ok(all_orders)
    }

    /// Order-status catalog. Failures yield an empty list.
    pub async fn fetch_order_statuses(&self) -> Vec<OrderStatus> {
        let url = self.store_url("catalog/order-statuses");
        match self.get_json::<StatusesEnvelope>(&url, &[]).await {
            Ok(envelope) => envelope.data,
            Err(err) => {
                warn!(error = %err, "order status catalog unavailable");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl OrderSource for ProviderClient {
    async fn fetch_all_orders(&self, filter: &OrderFilter) -> Result<Vec<RawOrder>, FetchError> {
        ProviderClient::fetch_all_orders(self, filter).await
    }
}
