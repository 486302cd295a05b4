//! Application configuration.
//!
//! Signal thresholds (`pattern`, `oi`, `strikes`) have no defaults: they are
//! operator inputs and loading fails when they are missing. Resilience knobs
//! under `execution`, `broker` and `storage` fall back to defaults.

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Execution mode chosen by the run flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Signals only; the coordinator is never invoked.
    BacktestOnly,
    /// Full state machine against the simulated brokerage.
    DryRun,
    /// Full state machine against the live brokerage.
    Live,
}

impl ExecutionMode {
    #[must_use]
    pub const fn executes(self) -> bool {
        matches!(self, Self::DryRun | Self::Live)
    }

    #[must_use]
    pub const fn is_dry_run(self) -> bool {
        matches!(self, Self::DryRun)
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BacktestOnly => write!(f, "backtest-only"),
            Self::DryRun => write!(f, "dry-run"),
            Self::Live => write!(f, "live"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub trading: TradingConfig,
    pub pattern: PatternConfig,
    pub oi: OiConfig,
    pub strikes: StrikeConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Underlying index, e.g. `NIFTY`.
    pub underlying_symbol: String,
    /// Derivatives segment, e.g. `NFO`.
    pub exchange: String,
    /// Contracts per leg.
    pub lot_size: u32,
    /// Capital the stop loss is sized against.
    pub capital: Decimal,
    /// Stop loss as a percentage of capital.
    pub stop_loss_pct: Decimal,
    /// Largest loss a single trade may carry.
    pub max_loss_per_trade: Decimal,
}

impl TradingConfig {
    /// Stop loss amount in currency: `capital * stop_loss_pct / 100`.
    #[must_use]
    pub fn stop_loss_amount(&self) -> Decimal {
        self.capital * self.stop_loss_pct / Decimal::ONE_HUNDRED
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Bars on each side a pivot must dominate (W).
    pub pivot_width: usize,
    /// Max distance between the two peaks/troughs, percent.
    pub tolerance_pct: Decimal,
    /// Min depth of the intervening retracement, percent.
    pub min_retracement_pct: Decimal,
    /// Max bars between the two peaks/troughs.
    pub max_bar_gap: usize,
}

/// Percent-change thresholds for trend classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendThresholds {
    /// Change at or above this is rising.
    pub rising_pct: Decimal,
    /// Change at or below the negative of this is falling.
    pub falling_pct: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OiConfig {
    /// Bars between the base sample and the evaluated sample.
    pub lookback_bars: usize,
    /// Applied to ATM call and put OI.
    pub options: TrendThresholds,
    /// Applied to combined futures OI.
    pub futures: TrendThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrikeConfig {
    /// Strike grid spacing, e.g. 50 for NIFTY.
    pub increment: Decimal,
    /// Situation 2: increments from ATM for both legs.
    pub symmetric_offset_steps: u32,
    /// Situation 3: increments from ATM for the dominant leg.
    pub near_offset_steps: u32,
    /// Situation 3: increments from ATM for the opposing leg.
    pub far_offset_steps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_retries: u32,
    pub backoff: BackoffConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Delay between status polls while waiting for a fill.
    pub fill_poll_interval_ms: u64,
    /// Polls before an acknowledged order is given up as unfilled.
    pub max_status_polls: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            fill_poll_interval_ms: 1_000,
            max_status_polls: 30,
        }
    }
}

impl ExecutionConfig {
    #[must_use]
    pub fn fill_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fill_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the random extra delay, percent of the base delay.
    pub jitter_pct: u32,
    /// Jitter RNG seed, so runs are reproducible.
    pub seed: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter_pct: 20,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker (K).
    pub failure_threshold: u32,
    /// Failures older than this no longer count.
    pub window_secs: u64,
    /// Time the breaker stays open before a probe (T).
    pub cool_down_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_secs: 60,
            cool_down_secs: 30,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    #[must_use]
    pub fn cool_down(&self) -> Duration {
        Duration::from_secs(self.cool_down_secs)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Order gateway base URL (live mode).
    pub base_url: Option<String>,
    /// Gateway API key (live mode).
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub requests_per_second: u32,
    /// Premium the simulated brokerage fills and quotes at.
    pub simulated_fill_price: Decimal,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: 10,
            requests_per_second: 8,
            simulated_fill_price: Decimal::ONE_HUNDRED,
        }
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("requests_per_second", &self.requests_per_second)
            .field("simulated_fill_price", &self.simulated_fill_price)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub journal_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            journal_path: PathBuf::from("data/journal.jsonl"),
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

impl AppConfig {
    /// Checks every section; `mode` decides whether live broker settings are required.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self, mode: ExecutionMode) -> Result<(), ConfigError> {
        let t = &self.trading;
        if t.underlying_symbol.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "trading.underlying_symbol",
            });
        }
        if t.lot_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "trading.lot_size",
            });
        }
        positive("trading.capital", t.capital)?;
        positive("trading.max_loss_per_trade", t.max_loss_per_trade)?;
        percent("trading.stop_loss_pct", t.stop_loss_pct)?;

        let p = &self.pattern;
        if p.pivot_width == 0 {
            return Err(ConfigError::NotPositive {
                field: "pattern.pivot_width",
            });
        }
        if p.max_bar_gap == 0 {
            return Err(ConfigError::NotPositive {
                field: "pattern.max_bar_gap",
            });
        }
        percent("pattern.tolerance_pct", p.tolerance_pct)?;
        percent("pattern.min_retracement_pct", p.min_retracement_pct)?;

        if self.oi.lookback_bars == 0 {
            return Err(ConfigError::NotPositive {
                field: "oi.lookback_bars",
            });
        }
        positive("oi.options.rising_pct", self.oi.options.rising_pct)?;
        positive("oi.options.falling_pct", self.oi.options.falling_pct)?;
        positive("oi.futures.rising_pct", self.oi.futures.rising_pct)?;
        positive("oi.futures.falling_pct", self.oi.futures.falling_pct)?;

        let s = &self.strikes;
        positive("strikes.increment", s.increment)?;
        // strikes appear in option symbols without a decimal point
        if !s.increment.fract().is_zero() {
            return Err(ConfigError::NotWhole {
                field: "strikes.increment",
                value: s.increment,
            });
        }
        if s.near_offset_steps >= s.far_offset_steps {
            return Err(ConfigError::OffsetOrder {
                near: s.near_offset_steps,
                far: s.far_offset_steps,
            });
        }

        let e = &self.execution;
        if e.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::NotPositive {
                field: "execution.circuit_breaker.failure_threshold",
            });
        }
        if e.max_status_polls == 0 {
            return Err(ConfigError::NotPositive {
                field: "execution.max_status_polls",
            });
        }
        if e.backoff.max_delay_ms < e.backoff.base_delay_ms {
            return Err(ConfigError::BackoffOrder {
                base: e.backoff.base_delay_ms,
                max: e.backoff.max_delay_ms,
            });
        }
        if e.backoff.jitter_pct > 100 {
            return Err(ConfigError::TooLarge {
                field: "execution.backoff.jitter_pct",
                value: Decimal::from(e.backoff.jitter_pct),
                max: Decimal::ONE_HUNDRED,
            });
        }

        if mode == ExecutionMode::Live {
            if self.broker.base_url.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::MissingForLive {
                    field: "broker.base_url",
                });
            }
            if self.broker.api_key.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::MissingForLive {
                    field: "broker.api_key",
                });
            }
        }
        if self.broker.requests_per_second == 0 {
            return Err(ConfigError::NotPositive {
                field: "broker.requests_per_second",
            });
        }

        Ok(())
    }
}

fn positive(field: &'static str, value: Decimal) -> Result<(), ConfigError> {
    if value <= Decimal::ZERO {
        return Err(ConfigError::NotPositive { field });
    }
    Ok(())
}

fn percent(field: &'static str, value: Decimal) -> Result<(), ConfigError> {
    if value.is_sign_negative() {
        return Err(ConfigError::Negative { field, value });
    }
    if value > Decimal::ONE_HUNDRED {
        return Err(ConfigError::TooLarge {
            field,
            value,
            max: Decimal::ONE_HUNDRED,
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn sample() -> AppConfig {
        AppConfig {
            trading: TradingConfig {
                underlying_symbol: "NIFTY".to_string(),
                exchange: "NFO".to_string(),
                lot_size: 50,
                capital: dec!(1000000),
                stop_loss_pct: dec!(1),
                max_loss_per_trade: dec!(15000),
            },
            pattern: PatternConfig {
                pivot_width: 1,
                tolerance_pct: dec!(1),
                min_retracement_pct: dec!(2),
                max_bar_gap: 10,
            },
            oi: OiConfig {
                lookback_bars: 1,
                options: TrendThresholds {
                    rising_pct: dec!(2),
                    falling_pct: dec!(2),
                },
                futures: TrendThresholds {
                    rising_pct: dec!(2),
                    falling_pct: dec!(2),
                },
            },
            strikes: StrikeConfig {
                increment: dec!(50),
                symmetric_offset_steps: 2,
                near_offset_steps: 1,
                far_offset_steps: 3,
            },
            execution: ExecutionConfig::default(),
            broker: BrokerConfig::default(),
            storage: StorageConfig::default(),
        }
    }

    #[test]
    fn sample_config_is_valid_for_dry_run() {
        assert_eq!(sample().validate(ExecutionMode::DryRun), Ok(()));
    }

    #[test]
    fn live_mode_requires_gateway() {
        assert_eq!(
            sample().validate(ExecutionMode::Live),
            Err(ConfigError::MissingForLive {
                field: "broker.base_url"
            })
        );
    }

    #[test]
    fn near_offset_must_be_inside_far_offset() {
        let mut config = sample();
        config.strikes.near_offset_steps = 3;
        assert_eq!(
            config.validate(ExecutionMode::BacktestOnly),
            Err(ConfigError::OffsetOrder { near: 3, far: 3 })
        );
    }

    #[test]
    fn rejects_fractional_strike_increment() {
        let mut config = sample();
        config.strikes.increment = dec!(12.5);
        assert_eq!(
            config.validate(ExecutionMode::DryRun),
            Err(ConfigError::NotWhole {
                field: "strikes.increment",
                value: dec!(12.5)
            })
        );
    }

    #[test]
    fn rejects_zero_lot_size() {
        let mut config = sample();
        config.trading.lot_size = 0;
        assert!(matches!(
            config.validate(ExecutionMode::DryRun),
            Err(ConfigError::NotPositive {
                field: "trading.lot_size"
            })
        ));
    }

    #[test]
    fn rejects_excessive_jitter() {
        let mut config = sample();
        config.execution.backoff.jitter_pct = 150;
        assert!(matches!(
            config.validate(ExecutionMode::DryRun),
            Err(ConfigError::TooLarge { .. })
        ));
    }

    #[test]
    fn stop_loss_amount_is_percent_of_capital() {
        assert_eq!(sample().trading.stop_loss_amount(), dec!(10000));
    }

    #[test]
    fn debug_redacts_api_key() {
        let broker = BrokerConfig {
            api_key: Some("super-secret".to_string()),
            ..BrokerConfig::default()
        };
        let printed = format!("{broker:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }
}
