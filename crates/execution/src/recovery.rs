//! Crash recovery from the event journal.
//!
//! The journal is folded into the latest state per leg. Legs that may have
//! reached the broker are looked up by client tag before anything else
//! happens; they are never resubmitted blindly.

use std::collections::BTreeMap;

use chrono::Utc;
use oi_strangle_broker::BrokerError;
use oi_strangle_core::{
    CloseReason, LegStatus, OptionType, Order, OrderIntent, PositionStatus, SignalId,
};
use oi_strangle_data::{fold_orders, Event, EventRecord};
use serde::Serialize;
use tracing::{info, warn};

use crate::coordinator::{Dispatch, OrderExecutionCoordinator};
use crate::error::ExecutionError;

/// What recovery found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub records_replayed: usize,
    /// Legs that were non-terminal in the journal.
    pub open_legs: usize,
    /// Legs looked up at the broker by client tag.
    pub verified: usize,
    /// Pending or safely failed legs dispatched, or acknowledged legs polled again.
    pub resumed: usize,
    /// Submissions the broker never saw; marked rejected, not resubmitted.
    pub rejected_unconfirmed: usize,
    /// Legs cancelled because a dry run cannot verify them.
    pub cancelled: usize,
    /// Legs whose broker status could not be determined.
    pub unresolved: usize,
    /// Leg pairs whose outcome was settled after replay.
    pub pairs_settled: usize,
    pub positions_open: usize,
}

impl RecoveryReport {
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "replayed={} open_legs={} verified={} resumed={} rejected_unconfirmed={} cancelled={} unresolved={} pairs_settled={} positions_open={}",
            self.records_replayed,
            self.open_legs,
            self.verified,
            self.resumed,
            self.rejected_unconfirmed,
            self.cancelled,
            self.unresolved,
            self.pairs_settled,
            self.positions_open
        )
    }
}

impl OrderExecutionCoordinator {
    /// Rebuilds state from the journal and resumes unfinished legs.
    ///
    /// Call once on startup, before the first `execute`.
    ///
    /// # Errors
    ///
    /// Returns an error when the journal cannot be read or written.
    pub async fn recover(&self) -> Result<RecoveryReport, ExecutionError> {
        let records = self.store.records()?;
        self.restore(&records);

        let open: Vec<Order> = self
            .state
            .lock()
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect();

        let mut report = RecoveryReport {
            records_replayed: records.len(),
            open_legs: open.len(),
            ..RecoveryReport::default()
        };
        info!(
            records = report.records_replayed,
            open_legs = report.open_legs,
            mode = %self.mode,
            "Replaying journal"
        );

        for order in open {
            self.recover_leg(order, &mut report).await?;
        }
        self.settle_recovered(&mut report).await?;

        report.positions_open = self
            .state
            .lock()
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .count();

        self.record(Event::SystemState {
            key: "recovery".to_string(),
            value: report.summary(),
        })?;
        info!(summary = %report.summary(), "Recovery complete");
        Ok(report)
    }

    fn restore(&self, records: &[EventRecord]) {
        let orders = fold_orders(records);

        let mut sorted: Vec<&EventRecord> = records.iter().collect();
        sorted.sort_by_key(|r| r.seq);

        let mut state = self.state.lock();
        for record in sorted {
            match &record.event {
                Event::SignalRecorded(signal) => {
                    state.signals.insert(signal.id.clone(), signal.timestamp);
                }
                Event::PositionOpened(position) => {
                    state
                        .positions
                        .insert(position.signal_id.clone(), position.clone());
                }
                Event::TradeClosed(trade) => {
                    state
                        .positions
                        .insert(trade.position.signal_id.clone(), trade.position.clone());
                }
                Event::OrderTransition(_) | Event::SystemState { .. } => {}
            }
        }
        state.orders = orders;
    }

    async fn recover_leg(
        &self,
        order: Order,
        report: &mut RecoveryReport,
    ) -> Result<(), ExecutionError> {
        if self.mode.is_dry_run() {
            warn!(
                signal_id = %order.signal_id,
                leg = %order.leg,
                status = %order.status,
                "Dry run cannot verify recovered leg, cancelling"
            );
            self.cancel(&order, "recovered in dry run, cannot be verified")?;
            report.cancelled += 1;
            return Ok(());
        }

        let dispatch = Dispatch::for_intent(order.intent);
        match order.status {
            // the last failure never reached the broker, resubmitting is safe
            LegStatus::Failed if !order.may_be_live => {
                if order.retry_count >= self.execution.max_retries {
                    self.transition(&order, LegStatus::Rejected, |o| {
                        o.reason = Some("retries exhausted before restart".to_string());
                    })?;
                } else {
                    report.resumed += 1;
                    self.drive(order, dispatch).await?;
                }
            }
            LegStatus::Submitted | LegStatus::Failed => {
                report.verified += 1;
                match self.broker.query_status(&Self::handle(&order)).await {
                    Ok(status) => {
                        info!(
                            signal_id = %order.signal_id,
                            leg = %order.leg,
                            client_order_id = %order.id,
                            "Recovered leg found at broker"
                        );
                        let order = if order.status == LegStatus::Failed {
                            self.transition(&order, LegStatus::Submitted, |o| {
                                o.may_be_live = false;
                                o.reason = Some("found at broker by client tag".to_string());
                            })?
                        } else {
                            order
                        };
                        self.apply_status(order, status, dispatch).await?;
                    }
                    Err(BrokerError::NotFound { .. }) => {
                        warn!(
                            signal_id = %order.signal_id,
                            leg = %order.leg,
                            client_order_id = %order.id,
                            "Recovered leg unknown to broker, not resubmitting"
                        );
                        self.transition(&order, LegStatus::Rejected, |o| {
                            o.reason = Some("unconfirmed submission, not resubmitted".to_string());
                        })?;
                        report.rejected_unconfirmed += 1;
                    }
                    Err(err) => {
                        warn!(
                            signal_id = %order.signal_id,
                            leg = %order.leg,
                            error = %err,
                            "Could not verify recovered leg, leaving as is"
                        );
                        report.unresolved += 1;
                    }
                }
            }
            LegStatus::Pending | LegStatus::Acknowledged => {
                report.resumed += 1;
                self.drive(order, dispatch).await?;
            }
            LegStatus::Filled | LegStatus::Rejected | LegStatus::CancelledByRisk => {}
        }
        Ok(())
    }

    /// Settles entry pairs and interrupted closes left behind by the crash.
    async fn settle_recovered(&self, report: &mut RecoveryReport) -> Result<(), ExecutionError> {
        let (pairs, closes) = {
            let state = self.state.lock();

            let mut legs: BTreeMap<SignalId, (Option<Order>, Option<Order>)> = BTreeMap::new();
            for order in state
                .orders
                .values()
                .filter(|o| o.intent == OrderIntent::Open)
            {
                let entry = legs.entry(order.signal_id.clone()).or_default();
                match order.leg {
                    OptionType::Call => entry.0 = Some(order.clone()),
                    OptionType::Put => entry.1 = Some(order.clone()),
                }
            }

            let pairs: Vec<_> = legs
                .into_iter()
                .filter(|(id, _)| !state.positions.contains_key(id))
                .filter_map(|(id, (call, put))| Some((id, call?, put?)))
                .filter(|(_, call, put)| call.status.is_terminal() && put.status.is_terminal())
                .filter(|(_, call, put)| {
                    call.status == LegStatus::Filled || put.status == LegStatus::Filled
                })
                .map(|(id, call, put)| {
                    let opened_at = state.signals.get(&id).copied().unwrap_or(call.updated_at);
                    (id, opened_at, call, put)
                })
                .collect();

            let closes: Vec<_> = state
                .positions
                .values()
                .filter(|p| p.status == PositionStatus::Open)
                .filter(|p| {
                    state
                        .orders
                        .keys()
                        .any(|k| k.signal_id == p.signal_id && k.intent == OrderIntent::Unwind)
                })
                .cloned()
                .collect();

            (pairs, closes)
        };

        for (signal_id, opened_at, call, put) in pairs {
            match self.settle_pair(&signal_id, opened_at, call, put).await {
                Ok(outcome) => {
                    info!(signal_id = %signal_id, outcome = outcome.label(), "Recovered pair settled");
                    report.pairs_settled += 1;
                }
                Err(ExecutionError::UnwindFailed { .. }) => report.unresolved += 1,
                Err(err) => return Err(err),
            }
        }

        for position in closes {
            let signal_id = position.signal_id.clone();
            warn!(signal_id = %signal_id, "Completing interrupted close");
            match self
                .unwind_position(position, CloseReason::Manual, Utc::now())
                .await
            {
                Ok(_) => report.pairs_settled += 1,
                Err(ExecutionError::UnwindFailed { .. }) => report.unresolved += 1,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
