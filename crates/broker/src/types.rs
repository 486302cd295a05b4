//! Brokerage boundary types and the capability trait.

use async_trait::async_trait;
use oi_strangle_core::{OptionType, OrderSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// One option order as sent to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Tag the order can be looked up by even if the broker id is lost.
    pub client_order_id: String,
    /// Option trading symbol, e.g. `NIFTY24JAN19500CE`.
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub strike: Decimal,
    pub option_type: OptionType,
}

/// Reference to a submitted order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderHandle {
    pub client_order_id: String,
    /// Known once the broker acknowledged the submission.
    pub broker_order_id: Option<String>,
}

impl OrderHandle {
    /// Handle for an order whose broker id was never learned.
    #[must_use]
    pub fn by_tag(client_order_id: impl Into<String>) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            broker_order_id: None,
        }
    }
}

/// Order status as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerOrderStatus {
    /// Accepted, not yet filled.
    Open,
    Filled { avg_price: Decimal },
    Rejected { reason: String },
    Cancelled { reason: String },
}

/// What the execution coordinator needs from a broker.
#[async_trait]
pub trait Brokerage: Send + Sync {
    /// Places an order. A returned handle means the broker acknowledged it.
    ///
    /// # Errors
    /// Transient errors (`is_transient`) may be retried; others are final.
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderHandle, BrokerError>;

    /// Looks an order up by broker id, or by client tag when the id is unknown.
    ///
    /// # Errors
    /// `BrokerError::NotFound` when the broker never saw the order.
    async fn query_status(&self, handle: &OrderHandle) -> Result<BrokerOrderStatus, BrokerError>;

    /// Last traded price of an option symbol.
    ///
    /// # Errors
    /// Returns an error if no quote is available.
    async fn get_last_price(&self, symbol: &str) -> Result<Decimal, BrokerError>;

    /// True when no order ever leaves the process.
    fn is_simulated(&self) -> bool {
        false
    }
}
