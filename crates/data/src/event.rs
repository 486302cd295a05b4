//! Journal record types.

use chrono::{DateTime, Utc};
use oi_strangle_core::{Order, Position, Signal, Trade};
use serde::{Deserialize, Serialize};

/// Something the pipeline committed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SignalRecorded(Signal),
    /// New state of one order leg. The latest record per key wins.
    OrderTransition(Order),
    PositionOpened(Position),
    TradeClosed(Trade),
    /// Coordinator-level facts: halts, naked legs, recovery summaries.
    SystemState { key: String, value: String },
}

impl Event {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SignalRecorded(_) => "signal",
            Self::OrderTransition(_) => "order",
            Self::PositionOpened(_) => "position_opened",
            Self::TradeClosed(_) => "trade_closed",
            Self::SystemState { .. } => "system_state",
        }
    }
}

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Strictly increasing within a journal, starting at 1.
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    /// Underlying the journal belongs to.
    pub symbol: String,
    pub event: Event,
}
