//! Shared fixtures for execution tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use oi_strangle_broker::{BrokerError, BrokerOrderStatus, Brokerage, OrderHandle, OrderRequest};
use oi_strangle_core::{
    AppConfig, BackoffConfig, BrokerConfig, CircuitBreakerConfig, Direction, ExecutionConfig,
    LegStatus, OIState, OiConfig, OptionType, Order, OrderIntent, OrderKey, OrderSide,
    PatternConfig, PatternKind, PatternMatch, Pivot, PivotKind, Signal, SignalId, Situation,
    StorageConfig, StrikeConfig, StrikePolicy, TradingConfig, Trend, TrendThresholds,
};
use oi_strangle_data::{Event, EventRecord, EventStore, MemoryStore, StoreError};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// =============================================================================
// Configuration and signals
// =============================================================================

pub fn config() -> AppConfig {
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
        execution: ExecutionConfig {
            max_retries: 3,
            backoff: BackoffConfig {
                base_delay_ms: 100,
                max_delay_ms: 1_000,
                jitter_pct: 0,
                seed: 1,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 10,
                window_secs: 60,
                cool_down_secs: 30,
            },
            fill_poll_interval_ms: 100,
            max_status_polls: 5,
        },
        broker: BrokerConfig::default(),
        storage: StorageConfig::default(),
    }
}

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, 9, minute, 0).unwrap()
}

/// A signal with the policy its situation implies.
pub fn signal(situation: Situation, direction: Direction, ts: DateTime<Utc>) -> Signal {
    let kind = match direction {
        Direction::Bullish => PatternKind::DoubleTop,
        Direction::Bearish => PatternKind::DoubleBottom,
    };
    let strike_policy = match situation {
        Situation::Two => StrikePolicy::EqualDistance,
        Situation::Three => StrikePolicy::DominantCloser {
            closer: direction.dominant_leg(),
        },
        Situation::One | Situation::Unclassified => StrikePolicy::NoTrade,
    };
    let pivot = |index, kind| Pivot {
        index,
        price: dec!(19600),
        kind,
    };
    Signal {
        id: SignalId::for_pattern(kind, ts),
        timestamp: ts,
        direction,
        situation,
        strike_policy,
        pattern: PatternMatch {
            kind,
            pivot_a: pivot(1, PivotKind::High),
            pivot_b: pivot(3, PivotKind::High),
            trough_or_peak: pivot(2, PivotKind::Low),
            confirmed_at_index: 4,
            confirmed_at: ts,
        },
        oi: OIState {
            as_of: ts,
            call_trend: Trend::Rising,
            put_trend: Trend::Stable,
            futures_trend: Trend::Stable,
            call_change_pct: dec!(10),
            put_change_pct: dec!(0),
            futures_change_pct: dec!(0),
        },
    }
}

pub fn tag(signal: &Signal, leg: OptionType, intent: OrderIntent) -> String {
    OrderKey::new(signal.id.clone(), leg, intent).client_order_id()
}

/// An entry leg as the coordinator would have journaled it.
pub fn entry_order(signal: &Signal, leg: OptionType, strike: Decimal, status: LegStatus) -> Order {
    let key = OrderKey::new(signal.id.clone(), leg, OrderIntent::Open);
    Order {
        id: key.client_order_id(),
        signal_id: signal.id.clone(),
        leg,
        intent: OrderIntent::Open,
        symbol: format!("NIFTY24JAN{strike}{}", leg.suffix()),
        side: OrderSide::Sell,
        quantity: 50,
        strike,
        status,
        retry_count: 0,
        sequence_no: 0,
        broker_order_id: None,
        fill_price: (status == LegStatus::Filled).then_some(dec!(100)),
        reason: None,
        may_be_live: false,
        updated_at: signal.timestamp,
    }
}

pub fn order_events(store: &dyn EventStore) -> Vec<Order> {
    store
        .records()
        .unwrap()
        .into_iter()
        .filter_map(|r| match r.event {
            Event::OrderTransition(order) => Some(order),
            _ => None,
        })
        .collect()
}

pub fn events_of_kind(store: &dyn EventStore, kind: &str) -> Vec<EventRecord> {
    store
        .records()
        .unwrap()
        .into_iter()
        .filter(|r| r.event.kind() == kind)
        .collect()
}

// =============================================================================
// Scripted brokerage
// =============================================================================

/// What the next submission of a tag does.
#[derive(Debug, Clone)]
pub enum Submit {
    Accept,
    Fail(BrokerError),
    /// The order reaches the broker but the response is lost.
    LandThenFail(BrokerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Submit(String),
    Query(String),
    Price(String),
}

#[derive(Debug, Default)]
struct Script {
    submits: HashMap<String, VecDeque<Submit>>,
    /// Status of every order the broker knows, by client tag.
    known: HashMap<String, BrokerOrderStatus>,
    /// Status newly accepted orders report, by client tag.
    on_accept: HashMap<String, BrokerOrderStatus>,
    prices: HashMap<String, Decimal>,
    calls: Vec<Call>,
}

/// Test brokerage that follows a per-tag script and records every call.
#[derive(Debug)]
pub struct ScriptedBrokerage {
    default_price: Decimal,
    script: Mutex<Script>,
    broker_ids: AtomicUsize,
}

impl Default for ScriptedBrokerage {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBrokerage {
    pub fn new() -> Self {
        Self {
            default_price: dec!(100),
            script: Mutex::new(Script::default()),
            broker_ids: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, tag: &str, steps: impl IntoIterator<Item = Submit>) {
        self.script
            .lock()
            .submits
            .insert(tag.to_string(), steps.into_iter().collect());
    }

    /// Makes the broker already know an order, e.g. one submitted before a crash.
    pub fn know(&self, tag: &str, status: BrokerOrderStatus) {
        self.script.lock().known.insert(tag.to_string(), status);
    }

    /// Status reported for `tag` once it is accepted, instead of filled.
    pub fn on_accept(&self, tag: &str, status: BrokerOrderStatus) {
        self.script.lock().on_accept.insert(tag.to_string(), status);
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.script.lock().prices.insert(symbol.to_string(), price);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().calls.clone()
    }

    pub fn submits_for(&self, tag: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Submit(t) if t == tag))
            .count()
    }

    pub fn total_submits(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Submit(_)))
            .count()
    }

    fn price(script: &Script, symbol: &str, default: Decimal) -> Decimal {
        script.prices.get(symbol).copied().unwrap_or(default)
    }
}

#[async_trait]
impl Brokerage for ScriptedBrokerage {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderHandle, BrokerError> {
        let mut script = self.script.lock();
        let tag = request.client_order_id.clone();
        script.calls.push(Call::Submit(tag.clone()));

        let step = script
            .submits
            .get_mut(&tag)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Submit::Accept);

        let accepted = script.on_accept.get(&tag).cloned().unwrap_or_else(|| {
            BrokerOrderStatus::Filled {
                avg_price: Self::price(&script, &request.symbol, self.default_price),
            }
        });

        match step {
            Submit::Accept => {
                script.known.insert(tag.clone(), accepted);
                let id = self.broker_ids.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(OrderHandle {
                    client_order_id: tag,
                    broker_order_id: Some(format!("B{id}")),
                })
            }
            Submit::Fail(err) => Err(err),
            Submit::LandThenFail(err) => {
                script.known.insert(tag, accepted);
                Err(err)
            }
        }
    }

    async fn query_status(&self, handle: &OrderHandle) -> Result<BrokerOrderStatus, BrokerError> {
        let mut script = self.script.lock();
        script.calls.push(Call::Query(handle.client_order_id.clone()));
        script
            .known
            .get(&handle.client_order_id)
            .cloned()
            .ok_or_else(|| BrokerError::not_found(&handle.client_order_id))
    }

    async fn get_last_price(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        let mut script = self.script.lock();
        script.calls.push(Call::Price(symbol.to_string()));
        Ok(Self::price(&script, symbol, self.default_price))
    }
}

// =============================================================================
// Stores
// =============================================================================

/// Memory store whose writes start failing after `ok_writes` records.
#[derive(Debug)]
pub struct FailingStore {
    inner: MemoryStore,
    ok_writes: usize,
    writes: AtomicUsize,
}

impl FailingStore {
    pub fn after(ok_writes: usize) -> Self {
        Self {
            inner: MemoryStore::new("NIFTY"),
            ok_writes,
            writes: AtomicUsize::new(0),
        }
    }
}

impl EventStore for FailingStore {
    fn record(&self, event: Event) -> Result<u64, StoreError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) >= self.ok_writes {
            return Err(StoreError::Injected);
        }
        self.inner.record(event)
    }

    fn records(&self) -> Result<Vec<EventRecord>, StoreError> {
        self.inner.records()
    }
}
