//! REST order-gateway brokerage with rate limiting.
//!
//! Endpoints, relative to the configured base URL:
//! - `POST /orders` places an order and answers `{order_id}`
//! - `GET /orders/{client_order_id}` answers `{order_id, status, average_price?, reason?}`
//! - `GET /quotes/{symbol}` answers `{last_price}`
//!
//! Requests carry a bearer token and wait on a governor rate limiter.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use oi_strangle_core::{BrokerConfig, OptionType, OrderSide};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BrokerError;
use crate::types::{BrokerOrderStatus, Brokerage, OrderHandle, OrderRequest};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the REST brokerage.
#[derive(Debug, Clone)]
pub struct RestBrokerageConfig {
    pub base_url: String,
    /// Bearer token; never printed.
    pub api_key: SecretString,
    pub requests_per_second: NonZeroU32,
    pub timeout_secs: u64,
}

impl RestBrokerageConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: SecretString::from(api_key.into()),
            requests_per_second: nonzero!(8u32),
            timeout_secs: 10,
        }
    }

    /// Builds the gateway configuration from the `[broker]` section.
    ///
    /// # Errors
    /// Returns `Unauthorized` when the URL or key is missing.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let base_url = config
            .base_url
            .clone()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| BrokerError::Unauthorized("broker.base_url is not set".to_string()))?;
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| BrokerError::Unauthorized("broker.api_key is not set".to_string()))?;

        let mut gateway = Self::new(base_url, api_key).with_timeout_secs(config.timeout_secs);
        if let Some(rps) = NonZeroU32::new(config.requests_per_second) {
            gateway = gateway.with_rate_limit(rps);
        }
        Ok(gateway)
    }

    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_second: NonZeroU32) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    client_order_id: &'a str,
    symbol: &'a str,
    side: OrderSide,
    quantity: u32,
    strike: Decimal,
    option_type: &'static str,
    order_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[allow(dead_code)]
    order_id: Option<String>,
    status: String,
    average_price: Option<Decimal>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    last_price: Decimal,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error_code: Option<String>,
    message: Option<String>,
}

// =============================================================================
// RestBrokerage
// =============================================================================

pub struct RestBrokerage {
    config: RestBrokerageConfig,
    http: Client,
    rate_limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
}

impl std::fmt::Debug for RestBrokerage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBrokerage")
            .field("base_url", &self.config.base_url)
            .field("requests_per_second", &self.config.requests_per_second)
            .finish_non_exhaustive()
    }
}

impl RestBrokerage {
    /// Creates a client for the given gateway.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: RestBrokerageConfig) -> Result<Self, BrokerError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BrokerError::Network(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_second(config.requests_per_second);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            config,
            http,
            rate_limiter,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Rejects identifiers that could escape the URL path segment.
    fn validate_identifier(id: &str) -> Result<&str, BrokerError> {
        if id.is_empty() || id.len() > 128 {
            return Err(BrokerError::InvalidSymbol(format!(
                "identifier length out of range: {:?}",
                id
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(BrokerError::InvalidSymbol(format!(
                "identifier must contain only alphanumeric, hyphen, or underscore: {id}"
            )));
        }
        Ok(id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, BrokerError> {
        self.rate_limiter.until_ready().await;
        let url = self.url(path);
        debug!("GET {}", url);
        Ok(self
            .http
            .get(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .header("Accept", "application/json")
            .send()
            .await?)
    }

    /// Maps non-success responses onto typed errors.
    async fn check(
        response: reqwest::Response,
        not_found: impl FnOnce() -> BrokerError,
    ) -> Result<reqwest::Response, BrokerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(1);
            return Err(BrokerError::RateLimited { retry_after_secs });
        }
        if status == StatusCode::NOT_FOUND {
            return Err(not_found());
        }

        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::REQUEST_TIMEOUT {
            return Err(BrokerError::Timeout(format!("gateway answered 408: {text}")));
        }
        if status.is_server_error() {
            return Err(BrokerError::Network(format!("HTTP {}: {text}", status.as_u16())));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BrokerError::Unauthorized(format!(
                "HTTP {}: {text}",
                status.as_u16()
            )));
        }

        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let message = body.message.unwrap_or(text);
        Err(match body.error_code.as_deref() {
            Some("INVALID_SYMBOL") => BrokerError::InvalidSymbol(message),
            Some("INSUFFICIENT_MARGIN") => BrokerError::InsufficientMargin(message),
            _ => BrokerError::Rejected(format!("HTTP {}: {message}", status.as_u16())),
        })
    }
}

#[async_trait]
impl Brokerage for RestBrokerage {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderHandle, BrokerError> {
        Self::validate_identifier(&request.client_order_id)?;
        Self::validate_identifier(&request.symbol)?;

        let body = SubmitBody {
            client_order_id: &request.client_order_id,
            symbol: &request.symbol,
            side: request.side,
            quantity: request.quantity,
            strike: request.strike,
            option_type: match request.option_type {
                OptionType::Call => "CE",
                OptionType::Put => "PE",
            },
            order_type: "MARKET",
        };

        self.rate_limiter.until_ready().await;
        let url = self.url("/orders");
        debug!(
            client_order_id = %request.client_order_id,
            symbol = %request.symbol,
            "POST {}",
            url
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response, || {
            BrokerError::Rejected("order endpoint not found".to_string())
        })
        .await?;
        let submitted: SubmitResponse = response.json().await?;

        Ok(OrderHandle {
            client_order_id: request.client_order_id.clone(),
            broker_order_id: Some(submitted.order_id),
        })
    }

    async fn query_status(&self, handle: &OrderHandle) -> Result<BrokerOrderStatus, BrokerError> {
        let tag = Self::validate_identifier(&handle.client_order_id)?;
        let response = self.get(&format!("/orders/{tag}")).await?;
        let response = Self::check(response, || BrokerError::not_found(tag)).await?;
        let body: StatusResponse = response.json().await?;

        match body.status.to_ascii_lowercase().as_str() {
            "open" | "pending" | "acknowledged" => Ok(BrokerOrderStatus::Open),
            "filled" | "complete" => {
                let avg_price = body.average_price.ok_or_else(|| {
                    BrokerError::Decode(format!("filled order {tag} has no average_price"))
                })?;
                Ok(BrokerOrderStatus::Filled { avg_price })
            }
            "rejected" => Ok(BrokerOrderStatus::Rejected {
                reason: body.reason.unwrap_or_else(|| "rejected".to_string()),
            }),
            "cancelled" | "canceled" => Ok(BrokerOrderStatus::Cancelled {
                reason: body.reason.unwrap_or_else(|| "cancelled".to_string()),
            }),
            other => Err(BrokerError::Decode(format!("unknown order status {other:?}"))),
        }
    }

    async fn get_last_price(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        let symbol = Self::validate_identifier(symbol)?;
        let response = self.get(&format!("/quotes/{symbol}")).await?;
        let response = Self::check(response, || {
            BrokerError::InvalidSymbol(format!("no quote for {symbol}"))
        })
        .await?;
        let quote: QuoteResponse = response.json().await?;
        Ok(quote.last_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_identifier_rejects_path_traversal() {
        assert!(RestBrokerage::validate_identifier("../orders").is_err());
        assert!(RestBrokerage::validate_identifier("a/b").is_err());
        assert!(RestBrokerage::validate_identifier("").is_err());
        assert!(RestBrokerage::validate_identifier("DT-20240110T091900-CE").is_ok());
    }

    #[test]
    fn config_requires_url_and_key() {
        let missing = BrokerConfig::default();
        assert!(RestBrokerageConfig::from_config(&missing).is_err());

        let config = BrokerConfig {
            base_url: Some("https://gateway.example".to_string()),
            api_key: Some("k".to_string()),
            requests_per_second: 3,
            ..BrokerConfig::default()
        };
        let gateway = RestBrokerageConfig::from_config(&config).unwrap();
        assert_eq!(gateway.requests_per_second.get(), 3);
        assert!(!format!("{gateway:?}").contains("\"k\""));
    }
}
