//! Exchange REST client.

use std::time::Duration;

use model::{Bar, Interval};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RestError;
use crate::responses::{parse_kline_row, FundingRate};

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts per request before giving up.
const MAX_ATTEMPTS: u32 = 3;

/// Largest kline page the exchange serves per request.
pub const KLINES_PAGE_LIMIT: usize = 1000;

/// REST client for public market-data endpoints.
pub struct BinanceRestClient {
    client: Client,
    base_url: String,
}

impl BinanceRestClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, RestError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RestError::RequestBuild(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch one page of historical klines, newest-last.
    ///
    /// GET /fapi/v1/klines
    pub async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<Bar>, RestError> {
        let mut query = format!(
            "symbol={}&interval={}&limit={}",
            symbol,
            interval.as_str(),
            limit.min(KLINES_PAGE_LIMIT)
        );
        if let Some(t) = start_time {
            query.push_str(&format!("&startTime={}", t));
        }
        if let Some(t) = end_time {
            query.push_str(&format!("&endTime={}", t));
        }

        let rows: Vec<Value> = self.get_with_retry("/fapi/v1/klines", &query).await?;
        rows.iter()
            .map(|row| parse_kline_row(row, interval))
            .collect()
    }

    /// Latest funding-rate record for a symbol.
    ///
    /// GET /fapi/v1/fundingRate
    pub async fn latest_funding_rate(
        &self,
        symbol: &str,
    ) -> Result<Option<FundingRate>, RestError> {
        let query = format!("symbol={}&limit=1", symbol);
        let mut rates: Vec<FundingRate> =
            self.get_with_retry("/fapi/v1/fundingRate", &query).await?;
        Ok(rates.pop())
    }

    /// GET with bounded retry: transport failures and 5xx/429 are retried
    /// with exponential spacing, everything else fails immediately.
    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, RestError> {
        let mut delay = Duration::from_millis(500);
        let mut last_err = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.get_once(path, query).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        path = %path,
                        attempt = attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "REST request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(RestError::Http {
            status: 0,
            message: "retries exhausted".to_string(),
        }))
    }

    async fn get_once<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T, RestError> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        tracing::debug!(url = %url, "GET request");

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            serde_json::from_str(&body).map_err(|e| {
                tracing::warn!(body = %body, error = %e, "Failed to parse response");
                RestError::Parse(e.to_string())
            })
        } else if status.as_u16() == 429 {
            Err(RestError::RateLimited {
                retry_after_ms: 60_000,
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RestError::Http {
                status: status.as_u16(),
                message: body,
            })
        }
    }
}

impl std::fmt::Debug for BinanceRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceRestClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
