use oi_strangle_broker::BrokerError;
use oi_strangle_core::{LegStatus, OptionType, OrderKey, SignalId};
use oi_strangle_data::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A transition could not be made durable. The coordinator halts.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("coordinator halted: {reason}")]
    Halted { reason: String },

    #[error("illegal transition for {key}: {from} -> {to}")]
    IllegalTransition {
        key: OrderKey,
        from: LegStatus,
        to: LegStatus,
    },

    /// Execution was requested in a mode that never places orders.
    #[error("execution mode {mode} does not place orders")]
    NotExecutable { mode: String },

    #[error("no open position or order for signal {0}")]
    UnknownSignal(SignalId),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The compensating order for a filled leg did not fill.
    #[error("unwind of {leg} leg for signal {signal_id} failed: {reason}")]
    UnwindFailed {
        signal_id: SignalId,
        leg: OptionType,
        reason: String,
    },
}

impl ExecutionError {
    /// Returns true when the coordinator must stop processing entirely.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// Returns true when the coordinator accepts no further executions.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Halted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_is_fatal_and_halting() {
        let err = ExecutionError::from(StoreError::Injected);
        assert!(err.is_fatal());
        assert!(err.is_halted());
    }

    #[test]
    fn halt_is_not_fatal() {
        let err = ExecutionError::Halted {
            reason: "operator stop".to_string(),
        };
        assert!(!err.is_fatal());
        assert!(err.is_halted());
        assert!(!ExecutionError::Broker(BrokerError::Timeout("t".into())).is_halted());
    }
}
