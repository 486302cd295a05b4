//! Brokerage error types.
//!
//! Transient errors are retried by the coordinator under the circuit
//! breaker; everything else rejects the leg immediately.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Request timed out before the gateway answered.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Gateway rate limit hit.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Connection failure or gateway-side 5xx.
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("insufficient margin: {0}")]
    InsufficientMargin(String),

    /// Any other explicit rejection.
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The gateway has no order with this client tag.
    #[error("order not found: {client_order_id}")]
    NotFound { client_order_id: String },

    /// Response body did not match the gateway contract.
    #[error("decode error: {0}")]
    Decode(String),
}

impl BrokerError {
    /// Returns true if the same request may succeed later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited { .. } | Self::Network(_)
        )
    }

    /// Returns true if the request may have reached the gateway.
    ///
    /// Timeouts and 5xx answers leave it unknown whether the order was
    /// accepted, so a retry must look the order up first.
    #[must_use]
    pub const fn may_have_reached_broker(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Network(_))
    }

    pub fn not_found(client_order_id: impl Into<String>) -> Self {
        Self::NotFound {
            client_order_id: client_order_id.into(),
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BrokerError::Timeout("t".into()).is_transient());
        assert!(BrokerError::RateLimited { retry_after_secs: 1 }.is_transient());
        assert!(BrokerError::Network("n".into()).is_transient());

        assert!(!BrokerError::InvalidSymbol("X".into()).is_transient());
        assert!(!BrokerError::InsufficientMargin("m".into()).is_transient());
        assert!(!BrokerError::Unauthorized("u".into()).is_transient());
        assert!(!BrokerError::not_found("DT-1-CE").is_transient());
    }

    #[test]
    fn rate_limit_is_known_not_to_have_landed() {
        assert!(!BrokerError::RateLimited { retry_after_secs: 1 }.may_have_reached_broker());
        assert!(BrokerError::Timeout("t".into()).may_have_reached_broker());
    }
}
