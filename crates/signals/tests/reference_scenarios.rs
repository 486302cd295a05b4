//! End-to-end signal generation over the reference candle series.

use chrono::{DateTime, Duration, TimeZone, Utc};
use oi_strangle_core::{
    Candle, Direction, FuturesOISample, OISample, OiConfig, OptionType, PatternConfig,
    PatternKind, Situation, StrikePolicy, Trend, TrendThresholds,
};
use oi_strangle_signals::{OIAnalyzer, PatternDetector, SignalEngine};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn ts(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, 9, 15, 0).unwrap() + Duration::minutes(i as i64)
}

fn candles() -> Vec<Candle> {
    [dec!(100), dec!(105), dec!(100), dec!(106), dec!(101)]
        .iter()
        .enumerate()
        .map(|(i, &c)| Candle::new(ts(i), c, c, c, c))
        .collect()
}

fn detector() -> PatternDetector {
    PatternDetector::new(PatternConfig {
        pivot_width: 1,
        tolerance_pct: dec!(1),
        min_retracement_pct: dec!(2),
        max_bar_gap: 10,
    })
}

fn analyzer() -> OIAnalyzer {
    OIAnalyzer::new(OiConfig {
        lookback_bars: 4,
        options: TrendThresholds {
            rising_pct: dec!(2),
            falling_pct: dec!(2),
        },
        futures: TrendThresholds {
            rising_pct: dec!(2),
            falling_pct: dec!(2),
        },
    })
}

/// Linear path from `from` to `to` across the five bars.
fn path(from: Decimal, to: Decimal) -> Vec<Decimal> {
    (0..5)
        .map(|i| from + (to - from) * Decimal::from(i) / dec!(4))
        .collect()
}

fn options(call: &[Decimal]) -> Vec<OISample> {
    call.iter()
        .enumerate()
        .map(|(i, &call_oi)| OISample {
            timestamp: ts(i),
            call_oi,
            put_oi: dec!(50000),
        })
        .collect()
}

fn futures(combined: &[Decimal]) -> Vec<FuturesOISample> {
    combined
        .iter()
        .enumerate()
        .map(|(i, &c)| FuturesOISample {
            timestamp: ts(i),
            current_month_oi: c * dec!(0.75),
            next_month_oi: c * dec!(0.25),
        })
        .collect()
}

#[test]
fn rising_call_oi_and_falling_futures_give_skewed_strangle() {
    let pattern = detector().detect(&candles()).expect("double top");
    assert_eq!(pattern.kind, PatternKind::DoubleTop);

    let state = analyzer()
        .analyze(
            &options(&path(dec!(100000), dec!(110000))),
            &futures(&path(dec!(1000000), dec!(920000))),
            pattern.confirmed_at,
        )
        .unwrap();
    assert_eq!(state.call_trend, Trend::Rising);
    assert_eq!(state.futures_trend, Trend::Falling);

    let signal = SignalEngine::new().evaluate(&pattern, &state);
    assert_eq!(signal.situation, Situation::Three);
    assert_eq!(signal.direction, Direction::Bullish);
    assert_eq!(
        signal.strike_policy,
        StrikePolicy::DominantCloser {
            closer: OptionType::Call
        }
    );
}

#[test]
fn falling_call_oi_with_stable_futures_is_a_false_breakout() {
    let pattern = detector().detect(&candles()).expect("double top");
    let state = analyzer()
        .analyze(
            &options(&path(dec!(100000), dec!(95000))),
            &futures(&[dec!(1000000); 5]),
            pattern.confirmed_at,
        )
        .unwrap();
    assert_eq!(state.call_trend, Trend::Falling);
    assert_eq!(state.futures_trend, Trend::Stable);

    let signal = SignalEngine::new().evaluate(&pattern, &state);
    assert_eq!(signal.situation, Situation::One);
    assert_eq!(signal.strike_policy, StrikePolicy::NoTrade);
    assert!(!signal.situation.is_tradeable());
}
