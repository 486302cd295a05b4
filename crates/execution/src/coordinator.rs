//! Order execution coordinator.
//!
//! Turns a situation 2/3 signal into a short strangle and tracks both legs
//! to a terminal state.
//!
//! # Execution Flow
//!
//! 1. Plan strikes and journal both legs as `Pending`
//! 2. Drive both legs concurrently to a terminal state
//! 3. If both fill: the position opens
//! 4. If one fills: the filled leg is closed with a compensating BUY
//! 5. If neither fills: no exposure
//!
//! A halt cancels legs the broker never saw. A leg that may be live is
//! looked up by client tag; if still open the pair is left unsettled for
//! recovery instead of unwinding the partner.
//!
//! Every transition is journaled before it is applied in memory. A failed
//! journal write halts the coordinator for good.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use oi_strangle_broker::{
    BrokerError, BrokerOrderStatus, Brokerage, OrderHandle, OrderRequest, SimulatedBrokerage,
};
use oi_strangle_core::{
    AppConfig, CloseReason, ExecutionConfig, ExecutionMode, LegStatus, OptionType, Order,
    OrderIntent, OrderKey, OrderSide, Position, PositionLeg, PositionStatus, Signal, SignalId,
    Situation, StrikeConfig, Trade, TradingConfig,
};
use oi_strangle_data::{Event, EventStore};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::circuit_breaker::CircuitBreaker;
use crate::error::ExecutionError;
use crate::halt::HaltHandle;
use crate::strikes::{option_symbol, plan_strikes};

// =============================================================================
// Outcomes
// =============================================================================

/// Result of executing one signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Situation 1 or unclassified: no orders were created.
    NoTrade { situation: Situation },
    /// Orders for this signal already exist; nothing was submitted.
    AlreadyExecuted,
    /// Both legs were cancelled before submission.
    CancelledByRisk { reason: String },
    /// Both legs filled.
    Opened(Position),
    /// One leg filled and was closed again after its partner failed.
    Unwound { trade: Trade, failed_leg: Order },
    /// Neither leg filled; no exposure.
    Rejected { call: Order, put: Order },
    /// A halt left a leg live at the broker; recovery settles the pair.
    Unsettled { call: Order, put: Order },
}

impl ExecutionOutcome {
    /// Short name for summaries.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NoTrade { .. } => "no_trade",
            Self::AlreadyExecuted => "already_executed",
            Self::CancelledByRisk { .. } => "cancelled_by_risk",
            Self::Opened(_) => "opened",
            Self::Unwound { .. } => "unwound",
            Self::Rejected { .. } => "rejected",
            Self::Unsettled { .. } => "unsettled",
        }
    }

    #[must_use]
    pub const fn is_opened(&self) -> bool {
        matches!(self, Self::Opened(_))
    }
}

/// Result of a mark-to-market check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskCheck {
    WithinLimit { unrealized_pnl: Decimal },
    Closed(Trade),
}

/// Whether a leg is subject to the breaker and the halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// Opening legs: gated by the breaker, cancelled by a halt.
    Entry,
    /// Compensating closes: always attempted.
    Compensating,
}

impl Dispatch {
    pub(crate) const fn for_intent(intent: OrderIntent) -> Self {
        match intent {
            OrderIntent::Open => Self::Entry,
            OrderIntent::Unwind => Self::Compensating,
        }
    }
}

enum Attempt {
    Done(Order),
    Retry { order: Order, floor: Duration },
}

// =============================================================================
// Coordinator
// =============================================================================

#[derive(Debug, Default)]
pub(crate) struct CoordinatorState {
    pub(crate) orders: BTreeMap<OrderKey, Order>,
    pub(crate) positions: BTreeMap<SignalId, Position>,
    /// Signal timestamps, used as position open times.
    pub(crate) signals: BTreeMap<SignalId, DateTime<Utc>>,
    pub(crate) in_flight: HashSet<OrderKey>,
    pub(crate) fatal: Option<String>,
}

/// Drives strangle legs through their lifecycle against one brokerage.
///
/// One coordinator per underlying. Breaker and retry state belong to the
/// instance.
pub struct OrderExecutionCoordinator {
    pub(crate) trading: TradingConfig,
    strikes: StrikeConfig,
    pub(crate) execution: ExecutionConfig,
    pub(crate) mode: ExecutionMode,
    pub(crate) broker: Arc<dyn Brokerage>,
    pub(crate) store: Arc<dyn EventStore>,
    breaker: CircuitBreaker,
    backoff: Backoff,
    halt: HaltHandle,
    pub(crate) state: Mutex<CoordinatorState>,
}

impl std::fmt::Debug for OrderExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderExecutionCoordinator")
            .field("underlying", &self.trading.underlying_symbol)
            .field("mode", &self.mode)
            .field("breaker", &self.breaker.state())
            .field("halted", &self.halt.is_halted())
            .finish_non_exhaustive()
    }
}

impl OrderExecutionCoordinator {
    /// Creates a coordinator.
    ///
    /// In dry-run mode a brokerage that is not simulated is replaced by a
    /// [`SimulatedBrokerage`] filling at `broker.simulated_fill_price`, so a
    /// dry run never places real orders.
    #[must_use]
    pub fn new(
        config: &AppConfig,
        mode: ExecutionMode,
        broker: Arc<dyn Brokerage>,
        store: Arc<dyn EventStore>,
    ) -> Self {
        let broker: Arc<dyn Brokerage> = if mode.is_dry_run() && !broker.is_simulated() {
            warn!(
                fill_price = %config.broker.simulated_fill_price,
                "Dry run given a real brokerage, using the simulated one"
            );
            Arc::new(SimulatedBrokerage::new(config.broker.simulated_fill_price))
        } else {
            broker
        };
        Self {
            trading: config.trading.clone(),
            strikes: config.strikes.clone(),
            execution: config.execution.clone(),
            mode,
            broker,
            store,
            breaker: CircuitBreaker::new(&config.execution.circuit_breaker),
            backoff: Backoff::new(&config.execution.backoff),
            halt: HaltHandle::new(),
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    /// Shares an externally owned halt handle, e.g. one wired to Ctrl-C.
    #[must_use]
    pub fn with_halt_handle(mut self, halt: HaltHandle) -> Self {
        self.halt = halt;
        self
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[must_use]
    pub fn halt_handle(&self) -> HaltHandle {
        self.halt.clone()
    }

    /// Latest known state of one leg.
    #[must_use]
    pub fn order(&self, key: &OrderKey) -> Option<Order> {
        self.state.lock().orders.get(key).cloned()
    }

    /// Latest state of every leg, in key order.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().orders.values().cloned().collect()
    }

    #[must_use]
    pub fn open_positions(&self) -> Vec<Position> {
        self.state
            .lock()
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .cloned()
            .collect()
    }

    /// Executes a signal at the given underlying spot price.
    ///
    /// # Errors
    ///
    /// - `NotExecutable` in backtest-only mode
    /// - `Halted` after a halt or an earlier persistence failure
    /// - `Persistence` when a transition could not be journaled
    /// - `UnwindFailed` when a filled leg could not be closed
    pub async fn execute(
        &self,
        signal: &Signal,
        spot: Decimal,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        if !self.mode.executes() {
            return Err(ExecutionError::NotExecutable {
                mode: self.mode.to_string(),
            });
        }
        self.ensure_running()?;

        let plan = match plan_strikes(signal, spot, &self.strikes) {
            Some(plan) if signal.situation.is_tradeable() => plan,
            _ => {
                debug!(signal_id = %signal.id, situation = %signal.situation, "No trade for signal");
                return Ok(ExecutionOutcome::NoTrade {
                    situation: signal.situation,
                });
            }
        };

        {
            let mut state = self.state.lock();
            if state.orders.keys().any(|key| key.signal_id == signal.id) {
                warn!(signal_id = %signal.id, "Signal already has orders, not resubmitting");
                return Ok(ExecutionOutcome::AlreadyExecuted);
            }
            state.signals.insert(signal.id.clone(), signal.timestamp);
        }

        let call = self.journal_new(self.entry_order(signal, plan.call_strike, OptionType::Call))?;
        let put = self.journal_new(self.entry_order(signal, plan.put_strike, OptionType::Put))?;
        info!(
            signal_id = %signal.id,
            situation = %signal.situation,
            direction = %signal.direction,
            %spot,
            atm = %plan.atm,
            call_strike = %plan.call_strike,
            put_strike = %plan.put_strike,
            "Strangle legs created"
        );

        let stop_loss = self.trading.stop_loss_amount();
        if stop_loss > self.trading.max_loss_per_trade {
            let reason = format!(
                "stop loss {stop_loss} exceeds max loss per trade {}",
                self.trading.max_loss_per_trade
            );
            warn!(signal_id = %signal.id, %reason, "Risk limit breached before submission");
            self.cancel(&call, &reason)?;
            self.cancel(&put, &reason)?;
            return Ok(ExecutionOutcome::CancelledByRisk { reason });
        }

        let (call, put) = tokio::join!(
            self.drive(call, Dispatch::Entry),
            self.drive(put, Dispatch::Entry)
        );
        let (call, put) = Self::fatal_first(call, put)?;
        self.settle_pair(&signal.id, signal.timestamp, call, put)
            .await
    }

    /// Prices the filled legs and closes the position when the loss exceeds
    /// `max_loss_per_trade`.
    ///
    /// # Errors
    ///
    /// `UnknownSignal` when no open position exists for the signal; broker
    /// errors from pricing; any error from closing.
    pub async fn check_risk(
        &self,
        signal_id: &SignalId,
        at: DateTime<Utc>,
    ) -> Result<RiskCheck, ExecutionError> {
        let position = self.open_position(signal_id)?;

        let mut unrealized_pnl = Decimal::ZERO;
        for leg in &position.legs {
            let price = self.broker.get_last_price(&leg.symbol).await?;
            unrealized_pnl += leg.pnl_at(price);
        }

        let loss = -unrealized_pnl;
        if loss > self.trading.max_loss_per_trade {
            warn!(
                signal_id = %signal_id,
                %unrealized_pnl,
                max_loss = %self.trading.max_loss_per_trade,
                "Max loss per trade breached, closing position"
            );
            let trade = self
                .unwind_position(position, CloseReason::RiskLimit, at)
                .await?;
            return Ok(RiskCheck::Closed(trade));
        }

        debug!(signal_id = %signal_id, %unrealized_pnl, "Position within risk limit");
        Ok(RiskCheck::WithinLimit { unrealized_pnl })
    }

    /// Closes an open position with compensating orders.
    ///
    /// # Errors
    ///
    /// `UnknownSignal` when no open position exists; `UnwindFailed` when a
    /// leg could not be closed.
    pub async fn close_position(
        &self,
        signal_id: &SignalId,
        reason: CloseReason,
        at: DateTime<Utc>,
    ) -> Result<Trade, ExecutionError> {
        let position = self.open_position(signal_id)?;
        self.unwind_position(position, reason, at).await
    }

    /// Halts the coordinator.
    ///
    /// Pending waits wake up. Entry legs the broker cannot hold are
    /// cancelled; legs that may be live are looked up first and left for
    /// recovery when still open. New executions are refused.
    ///
    /// # Errors
    ///
    /// Returns an error when the halt could not be journaled.
    pub fn halt(&self, reason: &str) -> Result<(), ExecutionError> {
        self.halt.halt(reason);
        if self.state.lock().fatal.is_some() {
            return Ok(());
        }
        self.record(Event::SystemState {
            key: "halted".to_string(),
            value: reason.to_string(),
        })?;

        let idle: Vec<Order> = {
            let state = self.state.lock();
            state
                .orders
                .values()
                .filter(|o| o.intent == OrderIntent::Open && !state.in_flight.contains(&o.key()))
                .filter(|o| match o.status {
                    LegStatus::Pending => true,
                    LegStatus::Failed => !o.may_be_live,
                    _ => false,
                })
                .cloned()
                .collect()
        };
        for order in idle {
            self.cancel(&order, &format!("halted: {reason}"))?;
        }
        Ok(())
    }

    // =========================================================================
    // Pair settlement and unwinds
    // =========================================================================

    pub(crate) async fn settle_pair(
        &self,
        signal_id: &SignalId,
        opened_at: DateTime<Utc>,
        call: Order,
        put: Order,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        if !call.status.is_terminal() || !put.status.is_terminal() {
            warn!(
                signal_id = %signal_id,
                call_status = %call.status,
                put_status = %put.status,
                "Leg still live at broker, leaving pair for recovery"
            );
            return Ok(ExecutionOutcome::Unsettled { call, put });
        }

        let call_filled = call.status == LegStatus::Filled;
        let put_filled = put.status == LegStatus::Filled;

        match (call_filled, put_filled) {
            (true, true) => {
                let position = Position {
                    signal_id: signal_id.clone(),
                    symbol: self.trading.underlying_symbol.clone(),
                    entry_price: call.fill_price.unwrap_or_default()
                        + put.fill_price.unwrap_or_default(),
                    legs: vec![Self::position_leg(&call), Self::position_leg(&put)],
                    status: PositionStatus::Open,
                    opened_at,
                    closed_at: None,
                };
                self.record(Event::PositionOpened(position.clone()))?;
                self.state
                    .lock()
                    .positions
                    .insert(signal_id.clone(), position.clone());
                info!(
                    signal_id = %signal_id,
                    premium = %position.entry_price,
                    "Strangle opened"
                );
                Ok(ExecutionOutcome::Opened(position))
            }
            (true, false) | (false, true) => {
                let (filled, failed) = if call_filled { (call, put) } else { (put, call) };
                warn!(
                    signal_id = %signal_id,
                    filled_leg = %filled.leg,
                    failed_leg = %failed.leg,
                    failed_status = %failed.status,
                    "Partner leg failed, unwinding filled leg"
                );
                let position = Position {
                    signal_id: signal_id.clone(),
                    symbol: self.trading.underlying_symbol.clone(),
                    entry_price: filled.fill_price.unwrap_or_default(),
                    legs: vec![Self::position_leg(&filled)],
                    status: PositionStatus::Open,
                    opened_at,
                    closed_at: None,
                };
                let trade = self
                    .unwind_position(position, CloseReason::Unwind, opened_at)
                    .await?;
                Ok(ExecutionOutcome::Unwound {
                    trade,
                    failed_leg: failed,
                })
            }
            (false, false) => {
                info!(
                    signal_id = %signal_id,
                    call_status = %call.status,
                    put_status = %put.status,
                    "Neither leg filled"
                );
                Ok(ExecutionOutcome::Rejected { call, put })
            }
        }
    }

    /// Closes every leg of `position` with a compensating order and records
    /// the trade.
    pub(crate) async fn unwind_position(
        &self,
        mut position: Position,
        reason: CloseReason,
        at: DateTime<Utc>,
    ) -> Result<Trade, ExecutionError> {
        let signal_id = position.signal_id.clone();
        for leg in &mut position.legs {
            let key = OrderKey::new(signal_id.clone(), leg.leg, OrderIntent::Unwind);
            let existing = self.order(&key);
            let order = match existing {
                Some(order) if order.status.is_terminal() => order,
                Some(order) => self.drive(order, Dispatch::Compensating).await?,
                None => {
                    let order = self.journal_new(Self::unwind_order(&signal_id, leg))?;
                    self.drive(order, Dispatch::Compensating).await?
                }
            };

            if order.status != LegStatus::Filled {
                return Err(self.naked_leg(&signal_id, leg.leg, &order));
            }
            leg.exit_price = order.fill_price;
        }

        position.close(at);
        let trade = Trade {
            realized_pnl: position.realized_pnl().unwrap_or_default(),
            position,
            reason,
        };
        self.record(Event::TradeClosed(trade.clone()))?;
        self.state
            .lock()
            .positions
            .insert(signal_id.clone(), trade.position.clone());
        info!(
            signal_id = %signal_id,
            reason = %reason,
            realized_pnl = %trade.realized_pnl,
            "Position closed"
        );
        Ok(trade)
    }

    fn naked_leg(&self, signal_id: &SignalId, leg: OptionType, order: &Order) -> ExecutionError {
        let reason = order
            .reason
            .clone()
            .unwrap_or_else(|| order.status.to_string());
        error!(
            signal_id = %signal_id,
            leg = %leg,
            status = %order.status,
            %reason,
            "Unwind failed, leg left open at broker"
        );
        let recorded = self.record(Event::SystemState {
            key: "naked_leg".to_string(),
            value: format!("{signal_id}/{leg}: {reason}"),
        });
        match recorded {
            Ok(_) => ExecutionError::UnwindFailed {
                signal_id: signal_id.clone(),
                leg,
                reason,
            },
            Err(err) => err,
        }
    }

    // =========================================================================
    // Leg state machine
    // =========================================================================

    /// Drives a leg until it is terminal or cannot progress.
    pub(crate) async fn drive(
        &self,
        order: Order,
        dispatch: Dispatch,
    ) -> Result<Order, ExecutionError> {
        let key = order.key();
        self.state.lock().in_flight.insert(key.clone());
        let result = self.drive_leg(order, dispatch).await;
        self.state.lock().in_flight.remove(&key);
        result
    }

    async fn drive_leg(&self, order: Order, dispatch: Dispatch) -> Result<Order, ExecutionError> {
        let mut order = order;

        loop {
            let attempt = match order.status {
                LegStatus::Filled | LegStatus::Rejected | LegStatus::CancelledByRisk => {
                    return Ok(order)
                }
                LegStatus::Acknowledged => return self.await_fill(order, dispatch).await,
                // resolved against the broker by recovery, never resubmitted
                LegStatus::Submitted => return Ok(order),
                LegStatus::Pending | LegStatus::Failed => self.attempt(order, dispatch).await?,
            };

            let floor = match attempt {
                Attempt::Done(done) => return Ok(done),
                Attempt::Retry {
                    order: failed,
                    floor,
                } => {
                    order = failed;
                    floor
                }
            };

            if order.retry_count >= self.execution.max_retries {
                let last = order.reason.clone().unwrap_or_default();
                warn!(
                    signal_id = %order.signal_id,
                    leg = %order.leg,
                    retry_count = order.retry_count,
                    %last,
                    "Retries exhausted"
                );
                let reason = format!("retries exhausted after {} retries: {last}", order.retry_count);
                return self.transition(&order, LegStatus::Rejected, |o| o.reason = Some(reason));
            }

            let delay = self.backoff.delay(order.retry_count + 1).max(floor);
            warn!(
                signal_id = %order.signal_id,
                leg = %order.leg,
                intent = %order.intent,
                retry = order.retry_count + 1,
                delay_ms = delay.as_millis() as u64,
                reason = order.reason.as_deref().unwrap_or(""),
                "Transient failure, backing off"
            );
            if !self.wait(delay, dispatch).await {
                return self.stop_for_halt(order).await;
            }
        }
    }

    async fn attempt(&self, order: Order, dispatch: Dispatch) -> Result<Attempt, ExecutionError> {
        if dispatch == Dispatch::Entry && self.halt.is_halted() {
            return self.stop_for_halt(order).await.map(Attempt::Done);
        }

        let retry = u32::from(order.status == LegStatus::Failed);

        if dispatch == Dispatch::Entry {
            if let Err(rejection) = self.breaker.try_acquire() {
                let order = self.transition(&order, LegStatus::Failed, |o| {
                    o.retry_count += retry;
                    o.reason = Some(rejection.to_string());
                })?;
                return Ok(Attempt::Retry {
                    order,
                    floor: Duration::ZERO,
                });
            }
        }

        if order.may_be_live {
            match self.broker.query_status(&Self::handle(&order)).await {
                Ok(status) => {
                    self.breaker.record_success();
                    info!(
                        signal_id = %order.signal_id,
                        leg = %order.leg,
                        client_order_id = %order.id,
                        "Earlier submission found at broker, not resubmitting"
                    );
                    let order = self.transition(&order, LegStatus::Submitted, |o| {
                        o.retry_count += retry;
                        o.may_be_live = false;
                        o.reason = Some("found at broker by client tag".to_string());
                    })?;
                    return self.apply_status(order, status, dispatch).await.map(Attempt::Done);
                }
                // never reached the broker, safe to submit
                Err(BrokerError::NotFound { .. }) => {}
                Err(err) => {
                    self.breaker.record_failure();
                    let order = self.transition(&order, LegStatus::Failed, |o| {
                        o.retry_count += retry;
                        o.reason = Some(format!("status check before retry failed: {err}"));
                    })?;
                    return Ok(Attempt::Retry {
                        order,
                        floor: Self::retry_floor(&err),
                    });
                }
            }
        }

        let order = self.transition(&order, LegStatus::Submitted, |o| {
            o.retry_count += retry;
            o.may_be_live = false;
            o.reason = None;
        })?;

        match self.broker.submit_order(&Self::request(&order)).await {
            Ok(handle) => {
                self.breaker.record_success();
                let order = self.transition(&order, LegStatus::Acknowledged, |o| {
                    o.broker_order_id = handle.broker_order_id;
                })?;
                self.await_fill(order, dispatch).await.map(Attempt::Done)
            }
            Err(err) if err.is_transient() => {
                self.breaker.record_failure();
                let may_be_live = err.may_have_reached_broker();
                let floor = Self::retry_floor(&err);
                let order = self.transition(&order, LegStatus::Failed, |o| {
                    o.may_be_live = may_be_live;
                    o.reason = Some(err.to_string());
                })?;
                Ok(Attempt::Retry { order, floor })
            }
            Err(err) => {
                self.breaker.record_failure();
                warn!(
                    signal_id = %order.signal_id,
                    leg = %order.leg,
                    intent = %order.intent,
                    error = %err,
                    "Order rejected"
                );
                self.transition(&order, LegStatus::Rejected, |o| {
                    o.reason = Some(err.to_string());
                })
                .map(Attempt::Done)
            }
        }
    }

    /// Polls an acknowledged leg until it fills, is rejected, or polls run out.
    pub(crate) async fn await_fill(
        &self,
        order: Order,
        dispatch: Dispatch,
    ) -> Result<Order, ExecutionError> {
        let handle = Self::handle(&order);
        let polls = self.execution.max_status_polls;

        for poll in 1..=polls {
            match self.broker.query_status(&handle).await {
                Ok(status) => {
                    if let Some(done) = self.settle_status(&order, status)? {
                        return Ok(done);
                    }
                }
                Err(err) => warn!(
                    signal_id = %order.signal_id,
                    leg = %order.leg,
                    poll,
                    error = %err,
                    "Status poll failed"
                ),
            }
            if poll < polls && !self.wait(self.execution.fill_poll_interval(), dispatch).await {
                return self.resolve_halted(order).await;
            }
        }

        self.transition(&order, LegStatus::Rejected, |o| {
            o.reason = Some(format!("unfilled after {polls} status polls"));
        })
    }

    /// Applies a broker-reported status to a submitted or acknowledged leg.
    pub(crate) async fn apply_status(
        &self,
        order: Order,
        status: BrokerOrderStatus,
        dispatch: Dispatch,
    ) -> Result<Order, ExecutionError> {
        if let Some(done) = self.settle_status(&order, status)? {
            return Ok(done);
        }
        let order = self.acknowledge(order)?;
        self.await_fill(order, dispatch).await
    }

    /// Terminal statuses settle the leg; `Open` returns `None`.
    fn settle_status(
        &self,
        order: &Order,
        status: BrokerOrderStatus,
    ) -> Result<Option<Order>, ExecutionError> {
        match status {
            BrokerOrderStatus::Open => Ok(None),
            BrokerOrderStatus::Filled { avg_price } => {
                let order = self.acknowledge(order.clone())?;
                self.transition(&order, LegStatus::Filled, |o| {
                    o.fill_price = Some(avg_price);
                    o.reason = None;
                })
                .map(Some)
            }
            BrokerOrderStatus::Rejected { reason } | BrokerOrderStatus::Cancelled { reason } => {
                warn!(
                    signal_id = %order.signal_id,
                    leg = %order.leg,
                    %reason,
                    "Broker rejected acknowledged order"
                );
                self.transition(order, LegStatus::Rejected, |o| o.reason = Some(reason))
                    .map(Some)
            }
        }
    }

    fn acknowledge(&self, order: Order) -> Result<Order, ExecutionError> {
        if order.status == LegStatus::Submitted {
            self.transition(&order, LegStatus::Acknowledged, |_| {})
        } else {
            Ok(order)
        }
    }

    async fn wait(&self, delay: Duration, dispatch: Dispatch) -> bool {
        match dispatch {
            Dispatch::Entry => self.halt.sleep(delay).await,
            Dispatch::Compensating => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }

    /// Stops a leg for a halt. A leg that may have reached the broker is
    /// looked up instead of cancelled.
    async fn stop_for_halt(&self, order: Order) -> Result<Order, ExecutionError> {
        if order.may_be_live {
            self.resolve_halted(order).await
        } else {
            self.cancel_halted(&order)
        }
    }

    /// Settles a halted leg the broker may hold from one status lookup.
    ///
    /// Only a leg the broker never saw is cancelled. One that is still open,
    /// or whose status is unknown, stays non-terminal for recovery.
    async fn resolve_halted(&self, order: Order) -> Result<Order, ExecutionError> {
        match self.broker.query_status(&Self::handle(&order)).await {
            Err(BrokerError::NotFound { .. }) => self.cancel_halted(&order),
            Ok(status) => {
                let order = if order.status == LegStatus::Failed {
                    self.transition(&order, LegStatus::Submitted, |o| {
                        o.may_be_live = false;
                        o.reason = Some("found at broker by client tag".to_string());
                    })?
                } else {
                    order
                };
                match self.settle_status(&order, status)? {
                    Some(done) => Ok(done),
                    None => {
                        let order = self.acknowledge(order)?;
                        self.leave_live(order, "open at broker")
                    }
                }
            }
            Err(err) => self.leave_live(order, &format!("status unknown: {err}")),
        }
    }

    fn leave_live(&self, order: Order, detail: &str) -> Result<Order, ExecutionError> {
        warn!(
            signal_id = %order.signal_id,
            leg = %order.leg,
            client_order_id = %order.id,
            status = %order.status,
            detail,
            "Halted with leg possibly live at broker, leaving it for recovery"
        );
        self.record(Event::SystemState {
            key: "live_at_halt".to_string(),
            value: format!("{}: {detail}", order.id),
        })?;
        Ok(order)
    }

    fn cancel_halted(&self, order: &Order) -> Result<Order, ExecutionError> {
        let reason = self.halt.reason().unwrap_or_default();
        self.cancel(order, &format!("halted: {reason}"))
    }

    pub(crate) fn cancel(&self, order: &Order, reason: &str) -> Result<Order, ExecutionError> {
        self.transition(order, LegStatus::CancelledByRisk, |o| {
            o.reason = Some(reason.to_string());
        })
    }

    // =========================================================================
    // Journal
    // =========================================================================

    /// Journals a state change, then applies it in memory.
    pub(crate) fn transition(
        &self,
        order: &Order,
        to: LegStatus,
        update: impl FnOnce(&mut Order),
    ) -> Result<Order, ExecutionError> {
        if let Some(reason) = self.state.lock().fatal.clone() {
            return Err(ExecutionError::Halted { reason });
        }
        if !order.status.can_transition_to(to) {
            return Err(ExecutionError::IllegalTransition {
                key: order.key(),
                from: order.status,
                to,
            });
        }

        let mut next = order.clone();
        next.status = to;
        next.updated_at = Utc::now();
        update(&mut next);

        let seq = self.record(Event::OrderTransition(next.clone()))?;
        next.sequence_no = seq;
        info!(
            signal_id = %next.signal_id,
            leg = %next.leg,
            intent = %next.intent,
            from = %order.status,
            to = %to,
            retry_count = next.retry_count,
            strike = %next.strike,
            seq,
            "Leg transition"
        );
        self.state.lock().orders.insert(next.key(), next.clone());
        Ok(next)
    }

    fn journal_new(&self, mut order: Order) -> Result<Order, ExecutionError> {
        if let Some(reason) = self.state.lock().fatal.clone() {
            return Err(ExecutionError::Halted { reason });
        }
        order.sequence_no = self.record(Event::OrderTransition(order.clone()))?;
        self.state.lock().orders.insert(order.key(), order.clone());
        Ok(order)
    }

    /// Appends to the journal. A failure is fatal.
    pub(crate) fn record(&self, event: Event) -> Result<u64, ExecutionError> {
        match self.store.record(event) {
            Ok(seq) => Ok(seq),
            Err(err) => {
                error!(error = %err, "Journal write failed, halting coordinator");
                let reason = format!("journal write failed: {err}");
                self.state.lock().fatal.get_or_insert_with(|| reason.clone());
                self.halt.halt(reason);
                Err(ExecutionError::Persistence(err))
            }
        }
    }

    fn ensure_running(&self) -> Result<(), ExecutionError> {
        if let Some(reason) = self.state.lock().fatal.clone() {
            return Err(ExecutionError::Halted { reason });
        }
        match self.halt.reason() {
            Some(reason) => Err(ExecutionError::Halted { reason }),
            None => Ok(()),
        }
    }

    fn open_position(&self, signal_id: &SignalId) -> Result<Position, ExecutionError> {
        self.state
            .lock()
            .positions
            .get(signal_id)
            .filter(|p| p.status == PositionStatus::Open)
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownSignal(signal_id.clone()))
    }

    // =========================================================================
    // Builders
    // =========================================================================

    fn entry_order(&self, signal: &Signal, strike: Decimal, leg: OptionType) -> Order {
        let key = OrderKey::new(signal.id.clone(), leg, OrderIntent::Open);
        Order {
            id: key.client_order_id(),
            signal_id: signal.id.clone(),
            leg,
            intent: OrderIntent::Open,
            symbol: option_symbol(&self.trading.underlying_symbol, signal.timestamp, strike, leg),
            side: OrderSide::Sell,
            quantity: self.trading.lot_size,
            strike,
            status: LegStatus::Pending,
            retry_count: 0,
            sequence_no: 0,
            broker_order_id: None,
            fill_price: None,
            reason: None,
            may_be_live: false,
            updated_at: Utc::now(),
        }
    }

    fn unwind_order(signal_id: &SignalId, leg: &PositionLeg) -> Order {
        let key = OrderKey::new(signal_id.clone(), leg.leg, OrderIntent::Unwind);
        Order {
            id: key.client_order_id(),
            signal_id: signal_id.clone(),
            leg: leg.leg,
            intent: OrderIntent::Unwind,
            symbol: leg.symbol.clone(),
            side: leg.side.opposite(),
            quantity: leg.quantity,
            strike: leg.strike,
            status: LegStatus::Pending,
            retry_count: 0,
            sequence_no: 0,
            broker_order_id: None,
            fill_price: None,
            reason: None,
            may_be_live: false,
            updated_at: Utc::now(),
        }
    }

    fn position_leg(order: &Order) -> PositionLeg {
        PositionLeg {
            leg: order.leg,
            symbol: order.symbol.clone(),
            strike: order.strike,
            side: order.side,
            quantity: order.quantity,
            entry_price: order.fill_price.unwrap_or_default(),
            exit_price: None,
        }
    }

    fn request(order: &Order) -> OrderRequest {
        OrderRequest {
            client_order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            strike: order.strike,
            option_type: order.leg,
        }
    }

    pub(crate) fn handle(order: &Order) -> OrderHandle {
        OrderHandle {
            client_order_id: order.id.clone(),
            broker_order_id: order.broker_order_id.clone(),
        }
    }

    fn retry_floor(err: &BrokerError) -> Duration {
        match err {
            BrokerError::RateLimited { retry_after_secs } => Duration::from_secs(*retry_after_secs),
            _ => Duration::ZERO,
        }
    }

    fn fatal_first(
        call: Result<Order, ExecutionError>,
        put: Result<Order, ExecutionError>,
    ) -> Result<(Order, Order), ExecutionError> {
        match (call, put) {
            (Ok(call), Ok(put)) => Ok((call, put)),
            (Err(a), Err(b)) => Err(if b.is_fatal() && !a.is_fatal() { b } else { a }),
            (Err(err), Ok(_)) | (Ok(_), Err(err)) => Err(err),
        }
    }
}
