//! Read-only views over a journal for reports and dashboards.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use oi_strangle_core::{Order, OrderKey, Position, PositionStatus, Signal, SignalId, Trade};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::event::{Event, EventRecord};
use crate::store::fold_orders;

/// Per-day aggregates (UTC dates).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyMetrics {
    pub date: NaiveDate,
    pub signals: usize,
    pub trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub realized_pnl: Decimal,
}

impl DailyMetrics {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            signals: 0,
            trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            realized_pnl: Decimal::ZERO,
        }
    }
}

/// Everything an observer can see in a journal.
#[derive(Debug, Clone, Default)]
pub struct JournalView {
    signals: Vec<Signal>,
    orders: BTreeMap<OrderKey, Order>,
    positions: BTreeMap<SignalId, Position>,
    trades: Vec<Trade>,
    system_state: BTreeMap<String, String>,
}

impl JournalView {
    #[must_use]
    pub fn from_records(records: &[EventRecord]) -> Self {
        let mut sorted: Vec<&EventRecord> = records.iter().collect();
        sorted.sort_by_key(|r| r.seq);

        let mut view = Self {
            orders: fold_orders(records),
            ..Self::default()
        };
        for record in sorted {
            match &record.event {
                Event::SignalRecorded(signal) => view.signals.push(signal.clone()),
                Event::PositionOpened(position) => {
                    view.positions
                        .insert(position.signal_id.clone(), position.clone());
                }
                Event::TradeClosed(trade) => {
                    view.positions
                        .insert(trade.position.signal_id.clone(), trade.position.clone());
                    view.trades.push(trade.clone());
                }
                Event::SystemState { key, value } => {
                    view.system_state.insert(key.clone(), value.clone());
                }
                Event::OrderTransition(_) => {}
            }
        }
        view
    }

    #[must_use]
    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Latest state of every order leg.
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Latest state of every position, open or closed.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
    }

    #[must_use]
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    #[must_use]
    pub fn system_state(&self) -> &BTreeMap<String, String> {
        &self.system_state
    }

    /// Aggregates by UTC date: signals by signal time, trades by close time.
    #[must_use]
    pub fn daily_metrics(&self) -> Vec<DailyMetrics> {
        let mut days: BTreeMap<NaiveDate, DailyMetrics> = BTreeMap::new();

        for signal in &self.signals {
            let date = signal.timestamp.date_naive();
            days.entry(date)
                .or_insert_with(|| DailyMetrics::empty(date))
                .signals += 1;
        }
        for trade in &self.trades {
            let closed = trade.position.closed_at.unwrap_or(trade.position.opened_at);
            let date = closed.date_naive();
            let day = days.entry(date).or_insert_with(|| DailyMetrics::empty(date));
            day.trades += 1;
            day.realized_pnl += trade.realized_pnl;
            if trade.realized_pnl > Decimal::ZERO {
                day.winning_trades += 1;
            } else if trade.realized_pnl < Decimal::ZERO {
                day.losing_trades += 1;
            }
        }

        days.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use oi_strangle_core::{CloseReason, PositionStatus};
    use rust_decimal_macros::dec;

    use crate::store::{EventStore, MemoryStore};

    fn position(id: &str, day: u32, status: PositionStatus) -> Position {
        let opened_at = Utc.with_ymd_and_hms(2024, 1, day, 9, 30, 0).unwrap();
        Position {
            signal_id: SignalId::new(id),
            symbol: "NIFTY".to_string(),
            legs: Vec::new(),
            status,
            entry_price: dec!(150),
            opened_at,
            closed_at: (status == PositionStatus::Closed)
                .then(|| opened_at + chrono::Duration::hours(2)),
        }
    }

    #[test]
    fn trade_supersedes_opened_position() {
        let store = MemoryStore::new("NIFTY");
        store
            .record(Event::PositionOpened(position("DT-1", 10, PositionStatus::Open)))
            .unwrap();
        store
            .record(Event::PositionOpened(position("DB-2", 10, PositionStatus::Open)))
            .unwrap();
        store
            .record(Event::TradeClosed(Trade {
                position: position("DT-1", 10, PositionStatus::Closed),
                realized_pnl: dec!(-1200),
                reason: CloseReason::RiskLimit,
            }))
            .unwrap();

        let view = JournalView::from_records(&store.records().unwrap());
        assert_eq!(view.positions().count(), 2);
        let open: Vec<_> = view.open_positions().map(|p| p.signal_id.as_str()).collect();
        assert_eq!(open, vec!["DB-2"]);
        assert_eq!(view.trades().len(), 1);
    }

    #[test]
    fn daily_metrics_split_wins_and_losses() {
        let store = MemoryStore::new("NIFTY");
        for (id, day, pnl) in [("A", 10, dec!(500)), ("B", 10, dec!(-200)), ("C", 11, dec!(0))] {
            store
                .record(Event::TradeClosed(Trade {
                    position: position(id, day, PositionStatus::Closed),
                    realized_pnl: pnl,
                    reason: CloseReason::Manual,
                }))
                .unwrap();
        }
        store
            .record(Event::SystemState {
                key: "halted".to_string(),
                value: "manual".to_string(),
            })
            .unwrap();

        let view = JournalView::from_records(&store.records().unwrap());
        let metrics = view.daily_metrics();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].trades, 2);
        assert_eq!(metrics[0].winning_trades, 1);
        assert_eq!(metrics[0].losing_trades, 1);
        assert_eq!(metrics[0].realized_pnl, dec!(300));
        assert_eq!(metrics[1].trades, 1);
        assert_eq!(metrics[1].winning_trades + metrics[1].losing_trades, 0);
        assert_eq!(view.system_state().get("halted").map(String::as_str), Some("manual"));
    }
}
