//! Open-interest trend classification.
//!
//! Each series is compared between the sample at the target timestamp and the
//! sample `lookback_bars` earlier. Options and futures use their own
//! thresholds; nothing here has a built-in default.

use chrono::{DateTime, Utc};
use oi_strangle_core::{
    DataError, FuturesOISample, OIState, OISample, OiConfig, Trend, TrendThresholds,
};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct OIAnalyzer {
    config: OiConfig,
}

impl OIAnalyzer {
    #[must_use]
    pub const fn new(config: OiConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &OiConfig {
        &self.config
    }

    /// Classifies call, put and combined futures OI at `at`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError`] when either series has no sample at `at`, has
    /// fewer than `lookback_bars` samples before it, or holds a negative or
    /// zero-base value in the window.
    pub fn analyze(
        &self,
        options: &[OISample],
        futures: &[FuturesOISample],
        at: DateTime<Utc>,
    ) -> Result<OIState, DataError> {
        let lookback = self.config.lookback_bars;

        let (base, current) = window(options, at, lookback, "options_oi", |s| s.timestamp)?;
        let call_change_pct = percent_change("call_oi", base.call_oi, current.call_oi, at)?;
        let put_change_pct = percent_change("put_oi", base.put_oi, current.put_oi, at)?;

        let (fut_base, fut_current) =
            window(futures, at, lookback, "futures_oi", |s| s.timestamp)?;
        let futures_change_pct = percent_change(
            "futures_oi",
            fut_base.combined(),
            fut_current.combined(),
            at,
        )?;

        Ok(OIState {
            as_of: at,
            call_trend: classify(call_change_pct, &self.config.options),
            put_trend: classify(put_change_pct, &self.config.options),
            futures_trend: classify(futures_change_pct, &self.config.futures),
            call_change_pct,
            put_change_pct,
            futures_change_pct,
        })
    }
}

/// Maps a percentage change onto a trend.
#[must_use]
pub fn classify(change_pct: Decimal, thresholds: &TrendThresholds) -> Trend {
    if change_pct >= thresholds.rising_pct {
        Trend::Rising
    } else if change_pct <= -thresholds.falling_pct {
        Trend::Falling
    } else {
        Trend::Stable
    }
}

/// Percentage change from `base` to `current`.
///
/// # Errors
///
/// Returns [`DataError::NegativeValue`] for negative inputs and
/// [`DataError::ZeroBase`] when `base` is zero.
pub fn percent_change(
    series: &'static str,
    base: Decimal,
    current: Decimal,
    timestamp: DateTime<Utc>,
) -> Result<Decimal, DataError> {
    for value in [base, current] {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(DataError::NegativeValue {
                series,
                timestamp,
                value,
            });
        }
    }
    if base.is_zero() {
        return Err(DataError::ZeroBase { series, timestamp });
    }
    Ok((current - base) / base * Decimal::ONE_HUNDRED)
}

fn window<'a, T>(
    samples: &'a [T],
    at: DateTime<Utc>,
    lookback: usize,
    series: &'static str,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
) -> Result<(&'a T, &'a T), DataError> {
    let index = samples
        .binary_search_by_key(&at, |s| timestamp(s))
        .map_err(|_| DataError::MissingSample {
            series,
            timestamp: at,
        })?;
    if index < lookback {
        return Err(DataError::InsufficientHistory {
            series,
            timestamp: at,
            available: index,
            required: lookback,
        });
    }
    Ok((&samples[index - lookback], &samples[index]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn config() -> OiConfig {
        OiConfig {
            lookback_bars: 2,
            options: TrendThresholds {
                rising_pct: dec!(3),
                falling_pct: dec!(3),
            },
            futures: TrendThresholds {
                rising_pct: dec!(1),
                falling_pct: dec!(1),
            },
        }
    }

    fn ts(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 9, 15, 0).unwrap() + Duration::minutes(i)
    }

    fn options(values: &[(Decimal, Decimal)]) -> Vec<OISample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &(call_oi, put_oi))| OISample {
                timestamp: ts(i as i64),
                call_oi,
                put_oi,
            })
            .collect()
    }

    fn futures(values: &[(Decimal, Decimal)]) -> Vec<FuturesOISample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &(current_month_oi, next_month_oi))| FuturesOISample {
                timestamp: ts(i as i64),
                current_month_oi,
                next_month_oi,
            })
            .collect()
    }

    #[test]
    fn classifies_each_series_over_the_window() {
        let analyzer = OIAnalyzer::new(config());
        let opts = options(&[
            (dec!(1000), dec!(2000)),
            (dec!(1020), dec!(1990)),
            (dec!(1100), dec!(1900)),
        ]);
        let futs = futures(&[
            (dec!(8000), dec!(2000)),
            (dec!(8000), dec!(2000)),
            (dec!(7400), dec!(1800)),
        ]);

        let state = analyzer.analyze(&opts, &futs, ts(2)).unwrap();
        assert_eq!(state.call_change_pct, dec!(10));
        assert_eq!(state.call_trend, Trend::Rising);
        assert_eq!(state.put_change_pct, dec!(-5));
        assert_eq!(state.put_trend, Trend::Falling);
        assert_eq!(state.futures_change_pct, dec!(-8));
        assert_eq!(state.futures_trend, Trend::Falling);
        assert_eq!(state.as_of, ts(2));
    }

    #[test]
    fn thresholds_are_inclusive() {
        let t = TrendThresholds {
            rising_pct: dec!(2),
            falling_pct: dec!(2),
        };
        assert_eq!(classify(dec!(2), &t), Trend::Rising);
        assert_eq!(classify(dec!(-2), &t), Trend::Falling);
        assert_eq!(classify(dec!(1.99), &t), Trend::Stable);
        assert_eq!(classify(dec!(-1.99), &t), Trend::Stable);
    }

    #[test]
    fn missing_timestamp_is_a_data_error() {
        let analyzer = OIAnalyzer::new(config());
        let opts = options(&[(dec!(1), dec!(1)); 3]);
        let futs = futures(&[(dec!(1), dec!(1)); 3]);

        let err = analyzer.analyze(&opts, &futs, ts(7)).unwrap_err();
        assert!(matches!(
            err,
            DataError::MissingSample {
                series: "options_oi",
                ..
            }
        ));
    }

    #[test]
    fn short_history_is_a_data_error() {
        let analyzer = OIAnalyzer::new(config());
        let opts = options(&[(dec!(1), dec!(1)); 3]);
        let futs = futures(&[(dec!(1), dec!(1)); 3]);

        let err = analyzer.analyze(&opts, &futs, ts(1)).unwrap_err();
        assert_eq!(
            err,
            DataError::InsufficientHistory {
                series: "options_oi",
                timestamp: ts(1),
                available: 1,
                required: 2,
            }
        );
    }

    #[test]
    fn zero_base_is_a_data_error() {
        let analyzer = OIAnalyzer::new(config());
        let opts = options(&[
            (dec!(0), dec!(10)),
            (dec!(5), dec!(10)),
            (dec!(10), dec!(10)),
        ]);
        let futs = futures(&[(dec!(1), dec!(1)); 3]);

        let err = analyzer.analyze(&opts, &futs, ts(2)).unwrap_err();
        assert!(matches!(err, DataError::ZeroBase { series: "call_oi", .. }));
    }

    #[test]
    fn negative_value_is_a_data_error() {
        let err = percent_change("put_oi", dec!(10), dec!(-1), ts(0)).unwrap_err();
        assert!(matches!(err, DataError::NegativeValue { .. }));
    }

    #[test]
    fn futures_are_checked_independently() {
        let analyzer = OIAnalyzer::new(config());
        let opts = options(&[(dec!(10), dec!(10)); 3]);
        let futs = futures(&[(dec!(1), dec!(1)); 2]);

        let err = analyzer.analyze(&opts, &futs, ts(2)).unwrap_err();
        assert!(matches!(
            err,
            DataError::MissingSample {
                series: "futures_oi",
                ..
            }
        ));
    }
}
