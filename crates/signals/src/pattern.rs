//! Double-top and double-bottom detection over a candle window.
//!
//! The detector is a pure function of the window it is handed. Callers that
//! stream bars re-invoke it with the grown window and get the same matches
//! for the same prefix every time.
//!
//! - Pivot high at `i`: high strictly above the `W` bars before it and at
//!   least as high as the `W` bars after it (first of an equal run wins).
//! - Double top: two pivot highs within `tolerance_pct` of each other, a pivot
//!   low between them at least `min_retracement_pct` below both, at most
//!   `max_bar_gap` bars apart, and no candle in between printing above the
//!   higher peak. Double bottom mirrors this.
//! - A formation is confirmed at `pivot_b.index + W`.

use oi_strangle_core::{Candle, PatternConfig, PatternKind, PatternMatch, Pivot, PivotKind};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct PatternDetector {
    config: PatternConfig,
}

impl PatternDetector {
    #[must_use]
    pub const fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &PatternConfig {
        &self.config
    }

    /// Bars needed after a pivot before it counts as confirmed.
    #[must_use]
    pub const fn confirmation_lag(&self) -> usize {
        self.config.pivot_width
    }

    /// All pivots in the window, ordered by index (high before low on the same bar).
    #[must_use]
    pub fn find_pivots(&self, candles: &[Candle]) -> Vec<Pivot> {
        let w = self.config.pivot_width;
        if w == 0 || candles.len() <= 2 * w {
            return Vec::new();
        }

        let mut pivots = Vec::new();
        for i in w..candles.len() - w {
            if is_pivot_high(candles, i, w) {
                pivots.push(Pivot {
                    index: i,
                    price: candles[i].high,
                    kind: PivotKind::High,
                });
            }
            if is_pivot_low(candles, i, w) {
                pivots.push(Pivot {
                    index: i,
                    price: candles[i].low,
                    kind: PivotKind::Low,
                });
            }
        }
        pivots
    }

    /// Every confirmed formation in the window.
    #[must_use]
    pub fn detect_all(&self, candles: &[Candle]) -> Vec<PatternMatch> {
        if candles.len() < 2 * self.config.pivot_width {
            return Vec::new();
        }

        let pivots = self.find_pivots(candles);
        let highs: Vec<Pivot> = pivots
            .iter()
            .filter(|p| p.kind == PivotKind::High)
            .copied()
            .collect();
        let lows: Vec<Pivot> = pivots
            .iter()
            .filter(|p| p.kind == PivotKind::Low)
            .copied()
            .collect();

        let mut matches = Vec::new();
        self.collect_pairs(candles, PatternKind::DoubleTop, &highs, &lows, &mut matches);
        self.collect_pairs(candles, PatternKind::DoubleBottom, &lows, &highs, &mut matches);
        matches
    }

    /// The most recently confirmed formation, if any.
    ///
    /// Ties on confirmation bar go to the later `pivot_b`, then double top
    /// before double bottom, then the nearer `pivot_a`.
    #[must_use]
    pub fn detect(&self, candles: &[Candle]) -> Option<PatternMatch> {
        self.detect_all(candles).into_iter().max_by_key(|m| {
            let kind_rank = match m.kind {
                PatternKind::DoubleTop => 1u8,
                PatternKind::DoubleBottom => 0u8,
            };
            (
                m.confirmed_at_index,
                m.pivot_b.index,
                kind_rank,
                m.pivot_a.index,
            )
        })
    }

    fn collect_pairs(
        &self,
        candles: &[Candle],
        kind: PatternKind,
        extremes: &[Pivot],
        separators: &[Pivot],
        out: &mut Vec<PatternMatch>,
    ) {
        for (i, a) in extremes.iter().enumerate() {
            for b in &extremes[i + 1..] {
                if b.index - a.index > self.config.max_bar_gap {
                    break;
                }
                if let Some(found) = self.match_pair(candles, kind, *a, *b, separators) {
                    out.push(found);
                }
            }
        }
    }

    fn match_pair(
        &self,
        candles: &[Candle],
        kind: PatternKind,
        a: Pivot,
        b: Pivot,
        separators: &[Pivot],
    ) -> Option<PatternMatch> {
        let hundred = Decimal::ONE_HUNDRED;
        let lower = a.price.min(b.price);
        let upper = a.price.max(b.price);
        if lower <= Decimal::ZERO {
            return None;
        }
        if (upper - lower) * hundred > self.config.tolerance_pct * lower {
            return None;
        }

        let between = &candles[a.index + 1..b.index];
        let inside = separators
            .iter()
            .filter(|p| p.index > a.index && p.index < b.index);

        let separator = match kind {
            PatternKind::DoubleTop => {
                if between.iter().any(|c| c.high > upper) {
                    return None;
                }
                let trough = inside.min_by_key(|p| p.price)?;
                if (lower - trough.price) * hundred < self.config.min_retracement_pct * lower {
                    return None;
                }
                *trough
            }
            PatternKind::DoubleBottom => {
                if between.iter().any(|c| c.low < lower) {
                    return None;
                }
                let peak = inside.max_by_key(|p| p.price)?;
                if (peak.price - upper) * hundred < self.config.min_retracement_pct * upper {
                    return None;
                }
                *peak
            }
        };

        let confirmed_at_index = b.index + self.config.pivot_width;
        let confirmed_at = candles.get(confirmed_at_index)?.timestamp;

        Some(PatternMatch {
            kind,
            pivot_a: a,
            pivot_b: b,
            trough_or_peak: separator,
            confirmed_at_index,
            confirmed_at,
        })
    }
}

fn is_pivot_high(candles: &[Candle], i: usize, w: usize) -> bool {
    let high = candles[i].high;
    candles[i - w..i].iter().all(|c| c.high < high)
        && candles[i + 1..=i + w].iter().all(|c| c.high <= high)
}

fn is_pivot_low(candles: &[Candle], i: usize, w: usize) -> bool {
    let low = candles[i].low;
    candles[i - w..i].iter().all(|c| c.low > low)
        && candles[i + 1..=i + w].iter().all(|c| c.low >= low)
}
