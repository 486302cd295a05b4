//! Decision table fusing a confirmed pattern with the OI picture.
//!
//! | pattern (leg)          | leg OI  | futures OI     | situation | strikes          |
//! |------------------------|---------|----------------|-----------|------------------|
//! | double top (call)      | falling | stable         | 1         | no trade         |
//! | double top (call)      | rising  | stable, rising | 2         | equal distance   |
//! | double top (call)      | rising  | falling        | 3         | call closer      |
//! | double bottom (put)    | mirror of the above, put leg closer in 3          |
//!
//! Anything else is unclassified. The engine holds no state: the same inputs
//! always produce the same [`Signal`].

use oi_strangle_core::{
    Direction, OIState, PatternKind, PatternMatch, Signal, SignalId, Situation, StrikePolicy,
    Trend,
};
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct SignalEngine;

impl SignalEngine {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Builds the signal for a confirmed pattern and the OI state at its confirmation bar.
    #[must_use]
    pub fn evaluate(&self, pattern: &PatternMatch, oi: &OIState) -> Signal {
        let direction = direction_of(pattern.kind);
        let leg_trend = match direction {
            Direction::Bullish => oi.call_trend,
            Direction::Bearish => oi.put_trend,
        };
        let (situation, strike_policy) = decide(direction, leg_trend, oi.futures_trend);

        let signal = Signal {
            id: SignalId::for_pattern(pattern.kind, pattern.confirmed_at),
            timestamp: pattern.confirmed_at,
            direction,
            situation,
            strike_policy,
            pattern: pattern.clone(),
            oi: oi.clone(),
        };

        if situation == Situation::Unclassified {
            info!(
                signal_id = %signal.id,
                pattern = %pattern.kind,
                leg_trend = %leg_trend,
                futures_trend = %oi.futures_trend,
                "unclassified"
            );
        }
        signal
    }
}

/// Double tops read bullish, double bottoms bearish.
#[must_use]
pub const fn direction_of(kind: PatternKind) -> Direction {
    match kind {
        PatternKind::DoubleTop => Direction::Bullish,
        PatternKind::DoubleBottom => Direction::Bearish,
    }
}

/// The decision table proper.
#[must_use]
pub const fn decide(
    direction: Direction,
    leg_trend: Trend,
    futures_trend: Trend,
) -> (Situation, StrikePolicy) {
    match (leg_trend, futures_trend) {
        (Trend::Falling, Trend::Stable) => (Situation::One, StrikePolicy::NoTrade),
        (Trend::Rising, Trend::Stable | Trend::Rising) => {
            (Situation::Two, StrikePolicy::EqualDistance)
        }
        (Trend::Rising, Trend::Falling) => (
            Situation::Three,
            StrikePolicy::DominantCloser {
                closer: direction.dominant_leg(),
            },
        ),
        _ => (Situation::Unclassified, StrikePolicy::NoTrade),
    }
}
