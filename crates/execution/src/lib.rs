//! Order execution for OI strangle signals.
//!
//! The [`OrderExecutionCoordinator`] turns situation 2/3 signals into two
//! short option legs, retries transient broker failures under a shared
//! [`CircuitBreaker`], unwinds a filled leg whose partner failed, and
//! rebuilds its state from the event journal after a crash.

pub mod backoff;
pub mod circuit_breaker;
pub mod coordinator;
pub mod error;
pub mod halt;
pub mod recovery;
pub mod strikes;

pub use backoff::Backoff;
pub use circuit_breaker::{BreakerRejection, BreakerState, CircuitBreaker};
pub use coordinator::{ExecutionOutcome, OrderExecutionCoordinator, RiskCheck};
pub use error::ExecutionError;
pub use halt::HaltHandle;
pub use recovery::RecoveryReport;
pub use strikes::{atm_strike, option_symbol, plan_strikes, StrikePlan};
