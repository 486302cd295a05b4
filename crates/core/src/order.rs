//! Order legs, positions and trades.
//!
//! `LegStatus` encodes the per-leg lifecycle. Every transition the
//! coordinator makes is checked against [`LegStatus::can_transition_to`]
//! before it is journaled.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::signal::SignalId;

/// Option right of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// Exchange suffix used in NSE-style option symbols.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Call => "CE",
            Self::Put => "PE",
        }
    }

    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Call => Self::Put,
            Self::Put => Self::Call,
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Put => write!(f, "put"),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Why an order exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderIntent {
    /// Opens the strangle leg.
    Open,
    /// Compensating close of a filled leg.
    Unwind,
}

impl std::fmt::Display for OrderIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Unwind => write!(f, "unwind"),
        }
    }
}

// =============================================================================
// Leg lifecycle
// =============================================================================

/// Lifecycle state of a single order leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    Pending,
    Submitted,
    Acknowledged,
    Rejected,
    Failed,
    Filled,
    CancelledByRisk,
}

impl LegStatus {
    /// Terminal states never transition again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Filled | Self::CancelledByRisk)
    }

    /// Returns true when `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use LegStatus::{
            Acknowledged, CancelledByRisk, Failed, Filled, Pending, Rejected, Submitted,
        };
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Submitted)
                // breaker short-circuit: no broker contact
                | (Pending, Failed)
                | (Failed, Failed)
                | (Submitted, Acknowledged)
                | (Submitted, Failed)
                | (Submitted, Rejected)
                | (Failed, Submitted)
                | (Failed, Rejected)
                | (Acknowledged, Filled)
                | (Acknowledged, Rejected)
                | (_, CancelledByRisk)
        )
    }
}

impl std::fmt::Display for LegStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Acknowledged => "acknowledged",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::Filled => "filled",
            Self::CancelledByRisk => "cancelled_by_risk",
        };
        f.write_str(s)
    }
}

/// Journal key of an order: one per (signal, leg, intent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderKey {
    pub signal_id: SignalId,
    pub leg: OptionType,
    pub intent: OrderIntent,
}

impl OrderKey {
    #[must_use]
    pub fn new(signal_id: SignalId, leg: OptionType, intent: OrderIntent) -> Self {
        Self {
            signal_id,
            leg,
            intent,
        }
    }

    /// Client order tag sent to the broker; stable across restarts.
    #[must_use]
    pub fn client_order_id(&self) -> String {
        match self.intent {
            OrderIntent::Open => format!("{}-{}", self.signal_id, self.leg.suffix()),
            OrderIntent::Unwind => format!("{}-{}-X", self.signal_id, self.leg.suffix()),
        }
    }
}

impl std::fmt::Display for OrderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.signal_id, self.leg, self.intent)
    }
}

/// Latest known state of one order leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Client order id, see [`OrderKey::client_order_id`].
    pub id: String,
    pub signal_id: SignalId,
    pub leg: OptionType,
    pub intent: OrderIntent,
    /// Option trading symbol, e.g. `NIFTY24JAN19500CE`.
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub strike: Decimal,
    pub status: LegStatus,
    pub retry_count: u32,
    /// Journal sequence number of the record that produced this state.
    pub sequence_no: u64,
    /// Broker-assigned order id once acknowledged.
    pub broker_order_id: Option<String>,
    pub fill_price: Option<Decimal>,
    /// Context for the most recent transition (error text, risk reason).
    pub reason: Option<String>,
    /// Set while a failed submission may still have reached the broker.
    #[serde(default)]
    pub may_be_live: bool,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[must_use]
    pub fn key(&self) -> OrderKey {
        OrderKey::new(self.signal_id.clone(), self.leg, self.intent)
    }
}

// =============================================================================
// Positions and trades
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// One filled leg of a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLeg {
    pub leg: OptionType,
    pub symbol: String,
    pub strike: Decimal,
    pub side: OrderSide,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
}

impl PositionLeg {
    /// Realized P&L of the leg once an exit price is known.
    #[must_use]
    pub fn realized_pnl(&self) -> Option<Decimal> {
        self.exit_price.map(|exit| self.pnl_at(exit))
    }

    /// P&L if the leg were closed at `price`.
    #[must_use]
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        let qty = Decimal::from(self.quantity);
        match self.side {
            OrderSide::Sell => (self.entry_price - price) * qty,
            OrderSide::Buy => (price - self.entry_price) * qty,
        }
    }
}

/// A strangle position (or the surviving leg of a failed pair).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub signal_id: SignalId,
    /// Underlying symbol.
    pub symbol: String,
    pub legs: Vec<PositionLeg>,
    pub status: PositionStatus,
    /// Net premium collected at entry across legs.
    pub entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Closes the position; a closed position stays closed.
    pub fn close(&mut self, at: DateTime<Utc>) {
        if self.status == PositionStatus::Open {
            self.status = PositionStatus::Closed;
            self.closed_at = Some(at);
        }
    }

    /// Sum of realized leg P&L; `None` until every leg has an exit.
    #[must_use]
    pub fn realized_pnl(&self) -> Option<Decimal> {
        self.legs
            .iter()
            .map(PositionLeg::realized_pnl)
            .sum::<Option<Decimal>>()
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Partner leg failed; the filled leg was unwound.
    Unwind,
    /// Mark-to-market loss exceeded the per-trade limit.
    RiskLimit,
    /// Operator requested close.
    Manual,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unwind => write!(f, "unwind"),
            Self::RiskLimit => write!(f, "risk_limit"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Closed position with realized P&L.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub position: Position,
    pub realized_pnl: Decimal,
    pub reason: CloseReason,
}
