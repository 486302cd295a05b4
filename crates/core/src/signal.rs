//! Pattern, open-interest and signal types.
//!
//! These are the values that flow between the pattern detector, the OI
//! analyzer and the signal engine. All of them are immutable once built.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::order::OptionType;

// =============================================================================
// Pivots and patterns
// =============================================================================

/// Whether a pivot is a local high or a local low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PivotKind {
    High,
    Low,
}

/// A local extremum of the candle series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pivot {
    /// Index into the candle slice the pivot was found in.
    pub index: usize,
    pub price: Decimal,
    pub kind: PivotKind,
}

/// Reversal formation recognised by the pattern detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    DoubleTop,
    DoubleBottom,
}

impl PatternKind {
    /// Short code used in signal ids.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::DoubleTop => "DT",
            Self::DoubleBottom => "DB",
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DoubleTop => write!(f, "double_top"),
            Self::DoubleBottom => write!(f, "double_bottom"),
        }
    }
}

/// A confirmed double-top or double-bottom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub kind: PatternKind,
    /// First peak (double top) or trough (double bottom).
    pub pivot_a: Pivot,
    /// Second peak or trough.
    pub pivot_b: Pivot,
    /// The retracement pivot between `pivot_a` and `pivot_b`.
    pub trough_or_peak: Pivot,
    /// First bar at which `pivot_b` is provably a pivot.
    pub confirmed_at_index: usize,
    /// Timestamp of the candle at `confirmed_at_index`.
    pub confirmed_at: DateTime<Utc>,
}

// =============================================================================
// Open interest
// =============================================================================

/// Direction of an open-interest series over the lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rising => write!(f, "rising"),
            Self::Falling => write!(f, "falling"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

/// Classified OI picture at one timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OIState {
    pub as_of: DateTime<Utc>,
    pub call_trend: Trend,
    pub put_trend: Trend,
    pub futures_trend: Trend,
    /// Percentage change of ATM call OI over the window.
    pub call_change_pct: Decimal,
    /// Percentage change of ATM put OI over the window.
    pub put_change_pct: Decimal,
    /// Percentage change of combined futures OI over the window.
    pub futures_change_pct: Decimal,
}

// =============================================================================
// Signals
// =============================================================================

/// Market read implied by the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    /// The option leg on the pattern's dominant side.
    #[must_use]
    pub const fn dominant_leg(self) -> OptionType {
        match self {
            Self::Bullish => OptionType::Call,
            Self::Bearish => OptionType::Put,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
        }
    }
}

/// Outcome class of the decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Situation {
    #[serde(rename = "none")]
    Unclassified,
    /// False breakout: no trade.
    #[serde(rename = "1")]
    One,
    /// Symmetric strangle.
    #[serde(rename = "2")]
    Two,
    /// Skewed strangle, dominant leg closer to spot.
    #[serde(rename = "3")]
    Three,
}

impl Situation {
    /// Returns true when the situation leads to orders.
    #[must_use]
    pub const fn is_tradeable(self) -> bool {
        matches!(self, Self::Two | Self::Three)
    }
}

impl std::fmt::Display for Situation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unclassified => write!(f, "none"),
            Self::One => write!(f, "1"),
            Self::Two => write!(f, "2"),
            Self::Three => write!(f, "3"),
        }
    }
}

/// How strikes are placed around ATM for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum StrikePolicy {
    NoTrade,
    /// Both legs the same number of increments from ATM.
    EqualDistance,
    /// `closer` leg uses the near offset, the other leg the far offset.
    DominantCloser { closer: OptionType },
}

/// Deterministic signal identifier: pattern code plus confirmation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(String);

impl SignalId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds the id for a pattern confirmed at `at`.
    #[must_use]
    pub fn for_pattern(kind: PatternKind, at: DateTime<Utc>) -> Self {
        Self(format!("{}-{}", kind.code(), at.format("%Y%m%dT%H%M%S")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SignalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A classified trade signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub situation: Situation,
    pub strike_policy: StrikePolicy,
    pub pattern: PatternMatch,
    pub oi: OIState,
}

impl Signal {
    /// Human-readable reason string for logs and reports.
    #[must_use]
    pub fn reason(&self) -> String {
        let (leg, trend) = match self.direction {
            Direction::Bullish => ("call", self.oi.call_trend),
            Direction::Bearish => ("put", self.oi.put_trend),
        };
        format!(
            "{} + ATM {leg} OI {trend} + futures OI {}",
            self.pattern.kind, self.oi.futures_trend
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn signal_id_is_derived_from_kind_and_time() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 10, 45, 0).unwrap();
        let id = SignalId::for_pattern(PatternKind::DoubleTop, at);
        assert_eq!(id.as_str(), "DT-20240305T104500");
    }

    #[test]
    fn situation_serializes_as_table_codes() {
        assert_eq!(serde_json::to_string(&Situation::Three).unwrap(), "\"3\"");
        assert_eq!(
            serde_json::to_string(&Situation::Unclassified).unwrap(),
            "\"none\""
        );
    }

    #[test]
    fn only_two_and_three_trade() {
        assert!(!Situation::Unclassified.is_tradeable());
        assert!(!Situation::One.is_tradeable());
        assert!(Situation::Two.is_tradeable());
        assert!(Situation::Three.is_tradeable());
    }
}
