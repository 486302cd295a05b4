//! Strike selection and option symbols.
//!
//! Offsets are whole multiples of the strike increment measured from the ATM
//! strike, which stands in for spot on the strike grid.

use chrono::{DateTime, Datelike, Utc};
use oi_strangle_core::{OptionType, Signal, StrikeConfig, StrikePolicy};
use rust_decimal::{Decimal, RoundingStrategy};

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Strikes chosen for both legs of a strangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrikePlan {
    pub atm: Decimal,
    pub call_strike: Decimal,
    pub put_strike: Decimal,
}

impl StrikePlan {
    #[must_use]
    pub fn strike(&self, leg: OptionType) -> Decimal {
        match leg {
            OptionType::Call => self.call_strike,
            OptionType::Put => self.put_strike,
        }
    }

    /// Distance of the leg's strike from ATM.
    #[must_use]
    pub fn offset(&self, leg: OptionType) -> Decimal {
        (self.strike(leg) - self.atm).abs()
    }

    #[must_use]
    pub fn distance_from(&self, spot: Decimal, leg: OptionType) -> Decimal {
        (self.strike(leg) - spot).abs()
    }

    /// Moves a leg one `increment` further out of the money.
    fn widen(&mut self, leg: OptionType, increment: Decimal) {
        match leg {
            OptionType::Call => self.call_strike += increment,
            OptionType::Put => self.put_strike -= increment,
        }
    }
}

/// Rounds spot to the nearest strike; exact midpoints round to the even multiple.
#[must_use]
pub fn atm_strike(spot: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return spot;
    }
    (spot / increment).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven) * increment
}

/// Picks strikes for a signal, or `None` when its policy does not trade.
#[must_use]
pub fn plan_strikes(signal: &Signal, spot: Decimal, config: &StrikeConfig) -> Option<StrikePlan> {
    let (call_steps, put_steps) = match signal.strike_policy {
        StrikePolicy::NoTrade => return None,
        StrikePolicy::EqualDistance => (
            config.symmetric_offset_steps,
            config.symmetric_offset_steps,
        ),
        StrikePolicy::DominantCloser {
            closer: OptionType::Call,
        } => (config.near_offset_steps, config.far_offset_steps),
        StrikePolicy::DominantCloser {
            closer: OptionType::Put,
        } => (config.far_offset_steps, config.near_offset_steps),
    };

    let atm = atm_strike(spot, config.increment);
    let mut plan = StrikePlan {
        atm,
        call_strike: atm + Decimal::from(call_steps) * config.increment,
        put_strike: atm - Decimal::from(put_steps) * config.increment,
    };

    // A one-step gap ties against spot when spot sits on a rounding midpoint.
    if let StrikePolicy::DominantCloser { closer } = signal.strike_policy {
        let far = closer.other();
        if plan.distance_from(spot, closer) >= plan.distance_from(spot, far) {
            plan.widen(far, config.increment);
        }
    }
    Some(plan)
}

/// NSE-style option symbol, e.g. `NIFTY24JAN19600CE`.
#[must_use]
pub fn option_symbol(
    underlying: &str,
    expiry: DateTime<Utc>,
    strike: Decimal,
    leg: OptionType,
) -> String {
    let month = MONTHS[expiry.month0() as usize];
    format!(
        "{}{:02}{}{}{}",
        underlying.to_ascii_uppercase(),
        expiry.year() % 100,
        month,
        strike.normalize(),
        leg.suffix()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use oi_strangle_core::{
        Direction, OIState, PatternKind, PatternMatch, Pivot, PivotKind, Situation, SignalId,
        Trend,
    };
    use rust_decimal_macros::dec;

    fn config() -> StrikeConfig {
        StrikeConfig {
            increment: dec!(50),
            symmetric_offset_steps: 2,
            near_offset_steps: 1,
            far_offset_steps: 3,
        }
    }

    fn signal(situation: Situation, policy: StrikePolicy, direction: Direction) -> Signal {
        let at = Utc.with_ymd_and_hms(2024, 1, 10, 9, 19, 0).unwrap();
        let pivot = |index, kind| Pivot {
            index,
            price: dec!(100),
            kind,
        };
        Signal {
            id: SignalId::new("DT-20240110T091900"),
            timestamp: at,
            direction,
            situation,
            strike_policy: policy,
            pattern: PatternMatch {
                kind: PatternKind::DoubleTop,
                pivot_a: pivot(1, PivotKind::High),
                pivot_b: pivot(3, PivotKind::High),
                trough_or_peak: pivot(2, PivotKind::Low),
                confirmed_at_index: 4,
                confirmed_at: at,
            },
            oi: OIState {
                as_of: at,
                call_trend: Trend::Rising,
                put_trend: Trend::Stable,
                futures_trend: Trend::Falling,
                call_change_pct: dec!(10),
                put_change_pct: dec!(0),
                futures_change_pct: dec!(-8),
            },
        }
    }

    #[test]
    fn atm_rounds_to_nearest_increment() {
        assert_eq!(atm_strike(dec!(19612), dec!(50)), dec!(19600));
        assert_eq!(atm_strike(dec!(19626), dec!(50)), dec!(19650));
        // 392.5 and 391.5 increments both round to the even 392
        assert_eq!(atm_strike(dec!(19625), dec!(50)), dec!(19600));
        assert_eq!(atm_strike(dec!(19575), dec!(50)), dec!(19600));
    }

    #[test]
    fn equal_distance_is_symmetric() {
        let s = signal(Situation::Two, StrikePolicy::EqualDistance, Direction::Bullish);
        let plan = plan_strikes(&s, dec!(19612), &config()).unwrap();
        assert_eq!(plan.call_strike, dec!(19700));
        assert_eq!(plan.put_strike, dec!(19500));
        assert_eq!(plan.offset(OptionType::Call), plan.offset(OptionType::Put));
    }

    #[test]
    fn dominant_leg_sits_closer() {
        let bullish = signal(
            Situation::Three,
            StrikePolicy::DominantCloser {
                closer: OptionType::Call,
            },
            Direction::Bullish,
        );
        let plan = plan_strikes(&bullish, dec!(19575), &config()).unwrap();
        assert_eq!(plan.call_strike, dec!(19650));
        assert_eq!(plan.put_strike, dec!(19450));
        assert!(plan.offset(OptionType::Call) < plan.offset(OptionType::Put));

        let bearish = signal(
            Situation::Three,
            StrikePolicy::DominantCloser {
                closer: OptionType::Put,
            },
            Direction::Bearish,
        );
        let plan = plan_strikes(&bearish, dec!(19575), &config()).unwrap();
        assert!(plan.offset(OptionType::Put) < plan.offset(OptionType::Call));
    }

    #[test]
    fn dominant_leg_is_strictly_closer_to_spot_across_an_increment() {
        let tight = [
            StrikeConfig {
                near_offset_steps: 1,
                far_offset_steps: 2,
                ..config()
            },
            StrikeConfig {
                near_offset_steps: 0,
                far_offset_steps: 1,
                ..config()
            },
            config(),
        ];
        let policies = [
            (OptionType::Call, Direction::Bullish),
            (OptionType::Put, Direction::Bearish),
        ];

        for cfg in &tight {
            for (closer, direction) in policies {
                let s = signal(
                    Situation::Three,
                    StrikePolicy::DominantCloser { closer },
                    direction,
                );
                // 19450 to 19500 in quarter points, midpoint 19475 included
                for quarter in 0..=200 {
                    let spot = dec!(19450) + Decimal::from(quarter) * dec!(0.25);
                    let plan = plan_strikes(&s, spot, cfg).unwrap();
                    let near = plan.distance_from(spot, closer);
                    let far = plan.distance_from(spot, closer.other());
                    assert!(
                        near < far,
                        "{closer} at {near} not closer than {far} for spot {spot} with {cfg:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn midpoint_tie_pushes_far_leg_out() {
        let cfg = StrikeConfig {
            near_offset_steps: 1,
            far_offset_steps: 2,
            ..config()
        };
        let bullish = signal(
            Situation::Three,
            StrikePolicy::DominantCloser {
                closer: OptionType::Call,
            },
            Direction::Bullish,
        );
        let plan = plan_strikes(&bullish, dec!(19475), &cfg).unwrap();
        assert_eq!(plan.atm, dec!(19500));
        assert_eq!(plan.call_strike, dec!(19550));
        assert_eq!(plan.put_strike, dec!(19350));
    }

    #[test]
    fn no_trade_policy_has_no_strikes() {
        let s = signal(Situation::One, StrikePolicy::NoTrade, Direction::Bullish);
        assert_eq!(plan_strikes(&s, dec!(19600), &config()), None);
    }

    #[test]
    fn symbol_format() {
        let at = Utc.with_ymd_and_hms(2024, 1, 10, 9, 19, 0).unwrap();
        assert_eq!(
            option_symbol("nifty", at, dec!(19600.00), OptionType::Call),
            "NIFTY24JAN19600CE"
        );
        assert_eq!(
            option_symbol("BANKNIFTY", at, dec!(45500), OptionType::Put),
            "BANKNIFTY24JAN45500PE"
        );
    }
}
