//! Market data rows consumed by the signal pipeline.
//!
//! All three series are ordered by timestamp and aligned bar-for-bar with
//! the candle series.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLC bar of the underlying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Candle {
    #[must_use]
    pub const fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
        }
    }

    /// Returns true when the high/low envelope contains open and close.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.low <= self.high
    }
}

/// ATM option open interest at one bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OISample {
    pub timestamp: DateTime<Utc>,
    pub call_oi: Decimal,
    pub put_oi: Decimal,
}

/// Futures open interest for the current and next expiry at one bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuturesOISample {
    pub timestamp: DateTime<Utc>,
    pub current_month_oi: Decimal,
    pub next_month_oi: Decimal,
}

impl FuturesOISample {
    /// Combined OI across both expiries.
    #[must_use]
    pub fn combined(&self) -> Decimal {
        self.current_month_oi + self.next_month_oi
    }
}
