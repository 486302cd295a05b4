//! Deterministic simulated brokerage for dry runs.
//!
//! Every submission is acknowledged and reported filled at the configured
//! price for its symbol. No randomness: two runs over the same input produce
//! the same journal.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::BrokerError;
use crate::types::{BrokerOrderStatus, Brokerage, OrderHandle, OrderRequest};

#[derive(Debug, Clone)]
struct SimOrder {
    broker_order_id: String,
    fill_price: Decimal,
}

#[derive(Debug, Default)]
struct SimState {
    orders: HashMap<String, SimOrder>,
    prices: HashMap<String, Decimal>,
    submissions: u64,
}

/// Simulated brokerage used in dry-run mode.
#[derive(Debug)]
pub struct SimulatedBrokerage {
    default_price: Decimal,
    state: RwLock<SimState>,
}

impl SimulatedBrokerage {
    /// Creates a brokerage that fills and quotes every symbol at `default_price`.
    #[must_use]
    pub fn new(default_price: Decimal) -> Self {
        Self {
            default_price,
            state: RwLock::new(SimState::default()),
        }
    }

    /// Overrides the price of one symbol, for fills and quotes alike.
    #[must_use]
    pub fn with_price(self, symbol: impl Into<String>, price: Decimal) -> Self {
        self.set_price(symbol, price);
        self
    }

    pub fn set_price(&self, symbol: impl Into<String>, price: Decimal) {
        self.state.write().prices.insert(symbol.into(), price);
    }

    /// Number of accepted submissions (resubmissions of a known tag excluded).
    #[must_use]
    pub fn submissions(&self) -> u64 {
        self.state.read().submissions
    }

    fn price_of(state: &SimState, symbol: &str, default: Decimal) -> Decimal {
        state.prices.get(symbol).copied().unwrap_or(default)
    }
}

#[async_trait]
impl Brokerage for SimulatedBrokerage {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderHandle, BrokerError> {
        let mut state = self.state.write();
        if let Some(existing) = state.orders.get(&request.client_order_id) {
            return Ok(OrderHandle {
                client_order_id: request.client_order_id.clone(),
                broker_order_id: Some(existing.broker_order_id.clone()),
            });
        }

        state.submissions += 1;
        let broker_order_id = format!("SIM-{:06}", state.submissions);
        let fill_price = Self::price_of(&state, &request.symbol, self.default_price);
        state.orders.insert(
            request.client_order_id.clone(),
            SimOrder {
                broker_order_id: broker_order_id.clone(),
                fill_price,
            },
        );

        debug!(
            client_order_id = %request.client_order_id,
            symbol = %request.symbol,
            side = %request.side,
            quantity = request.quantity,
            %broker_order_id,
            "Simulated order acknowledged"
        );

        Ok(OrderHandle {
            client_order_id: request.client_order_id.clone(),
            broker_order_id: Some(broker_order_id),
        })
    }

    async fn query_status(&self, handle: &OrderHandle) -> Result<BrokerOrderStatus, BrokerError> {
        let state = self.state.read();
        state
            .orders
            .get(&handle.client_order_id)
            .map(|order| BrokerOrderStatus::Filled {
                avg_price: order.fill_price,
            })
            .ok_or_else(|| BrokerError::not_found(&handle.client_order_id))
    }

    async fn get_last_price(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        Ok(Self::price_of(&self.state.read(), symbol, self.default_price))
    }

    fn is_simulated(&self) -> bool {
        true
    }
}
