pub mod config;
pub mod config_loader;
pub mod error;
pub mod market;
pub mod order;
pub mod signal;

pub use config::{
    AppConfig, BackoffConfig, BrokerConfig, CircuitBreakerConfig, ExecutionConfig, ExecutionMode,
    OiConfig, PatternConfig, StorageConfig, StrikeConfig, TradingConfig, TrendThresholds,
};
pub use config_loader::{ConfigLoader, DEFAULT_CONFIG_PATH, ENV_PREFIX};
pub use error::{ConfigError, DataError};
pub use market::{Candle, FuturesOISample, OISample};
pub use order::{
    CloseReason, LegStatus, OptionType, Order, OrderIntent, OrderKey, OrderSide, Position,
    PositionLeg, PositionStatus, Trade,
};
pub use signal::{
    Direction, OIState, PatternKind, PatternMatch, Pivot, PivotKind, Signal, SignalId, Situation,
    StrikePolicy, Trend,
};
