//! Brokerage boundary for the OI strangle coordinator.
//!
//! The coordinator only sees the [`Brokerage`] trait. Dry runs use
//! [`SimulatedBrokerage`]; live runs use [`RestBrokerage`] against an order
//! gateway.

pub mod error;
pub mod rest;
pub mod simulated;
pub mod types;

pub use error::BrokerError;
pub use rest::{RestBrokerage, RestBrokerageConfig};
pub use simulated::SimulatedBrokerage;
pub use types::{BrokerOrderStatus, Brokerage, OrderHandle, OrderRequest};
