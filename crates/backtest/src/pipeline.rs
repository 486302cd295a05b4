//! Sequential bar-by-bar driver.
//!
//! Each bar extends the candle window by one. A pattern is handled on the
//! bar that confirms it, so re-running the same history never yields it
//! twice. The flow per bar:
//!
//! 1. Detect the most recent formation over the window
//! 2. If it was confirmed on this bar, classify OI at that timestamp
//! 3. Build and journal the signal
//! 4. Hand situation 2/3 signals to the coordinator, spot = bar close
//! 5. Mark open positions to market

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use oi_strangle_core::{AppConfig, Candle, FuturesOISample, OISample, Signal, SignalId};
use oi_strangle_data::{Event, EventStore};
use oi_strangle_execution::{OrderExecutionCoordinator, RiskCheck};
use oi_strangle_signals::{OIAnalyzer, PatternDetector, SignalEngine};
use tracing::{debug, error, info, warn};

use crate::summary::RunSummary;

/// Time series for one underlying, each sorted by timestamp.
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    pub candles: Vec<Candle>,
    pub options: Vec<OISample>,
    pub futures: Vec<FuturesOISample>,
}

pub struct Pipeline {
    detector: PatternDetector,
    analyzer: OIAnalyzer,
    engine: SignalEngine,
    store: Arc<dyn EventStore>,
    coordinator: Option<Arc<OrderExecutionCoordinator>>,
    seen: HashSet<SignalId>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("detector", &self.detector)
            .field("analyzer", &self.analyzer)
            .field("coordinator", &self.coordinator)
            .field("seen", &self.seen.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a signal-only pipeline journaling into `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read.
    pub fn new(config: &AppConfig, store: Arc<dyn EventStore>) -> Result<Self> {
        let seen = store
            .records()
            .context("Failed to read journal")?
            .into_iter()
            .filter_map(|record| match record.event {
                Event::SignalRecorded(signal) => Some(signal.id),
                _ => None,
            })
            .collect();

        Ok(Self {
            detector: PatternDetector::new(config.pattern.clone()),
            analyzer: OIAnalyzer::new(config.oi.clone()),
            engine: SignalEngine::new(),
            store,
            coordinator: None,
            seen,
        })
    }

    /// Hands tradeable signals to `coordinator` when its mode places orders.
    #[must_use]
    pub fn with_coordinator(mut self, coordinator: Arc<OrderExecutionCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    fn executor(&self) -> Option<&OrderExecutionCoordinator> {
        self.coordinator
            .as_deref()
            .filter(|coordinator| coordinator.mode().executes())
    }

    /// Runs every bar of `data` in order.
    ///
    /// # Errors
    ///
    /// Stops on a journal write failure or once the coordinator has halted.
    pub async fn run(&mut self, data: &MarketData) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        info!(
            bars = data.candles.len(),
            options_samples = data.options.len(),
            futures_samples = data.futures.len(),
            executes = self.executor().is_some(),
            "Starting pipeline run"
        );

        for index in 0..data.candles.len() {
            self.on_bar(data, index, &mut summary).await?;
        }

        info!(
            bars = summary.bars,
            patterns = summary.patterns,
            signals = summary.total_signals(),
            skipped = summary.skipped_timestamps,
            "Pipeline run complete"
        );
        Ok(summary)
    }

    /// Processes the bar at `index`, with `data.candles[..=index]` as the window.
    ///
    /// Live callers append the new bar to `data` and call this with its index.
    ///
    /// # Errors
    ///
    /// Same as [`Pipeline::run`].
    pub async fn on_bar(
        &mut self,
        data: &MarketData,
        index: usize,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let Some(bar) = data.candles.get(index) else {
            return Ok(());
        };
        summary.bars += 1;

        if let Some(signal) = self.confirm(data, index, summary)? {
            self.execute(&signal, bar, summary).await?;
        }
        self.mark_to_market(bar, summary).await
    }

    /// Detects a formation confirmed on this bar and journals its signal.
    fn confirm(
        &mut self,
        data: &MarketData,
        index: usize,
        summary: &mut RunSummary,
    ) -> Result<Option<Signal>> {
        let window = &data.candles[..=index];
        let Some(pattern) = self
            .detector
            .detect(window)
            .filter(|p| p.confirmed_at_index == index)
        else {
            return Ok(None);
        };
        summary.patterns += 1;

        let oi = match self
            .analyzer
            .analyze(&data.options, &data.futures, pattern.confirmed_at)
        {
            Ok(oi) => oi,
            Err(err) => {
                warn!(
                    timestamp = %pattern.confirmed_at,
                    pattern = %pattern.kind,
                    error = %err,
                    "Skipping timestamp, OI data unusable"
                );
                summary.skipped_timestamps += 1;
                return Ok(None);
            }
        };

        let signal = self.engine.evaluate(&pattern, &oi);
        if !self.seen.insert(signal.id.clone()) {
            debug!(signal_id = %signal.id, "Signal already journaled");
            summary.duplicate_signals += 1;
            return Ok(None);
        }

        self.store
            .record(Event::SignalRecorded(signal.clone()))
            .with_context(|| format!("Failed to journal signal {}", signal.id))?;
        summary.count_signal(signal.situation);
        info!(
            signal_id = %signal.id,
            situation = %signal.situation,
            direction = %signal.direction,
            reason = %signal.reason(),
            "Signal recorded"
        );
        Ok(Some(signal))
    }

    async fn execute(&self, signal: &Signal, bar: &Candle, summary: &mut RunSummary) -> Result<()> {
        let Some(coordinator) = self.executor() else {
            return Ok(());
        };
        if !signal.situation.is_tradeable() {
            return Ok(());
        }

        match coordinator.execute(signal, bar.close).await {
            Ok(outcome) => {
                summary.count_execution(outcome.label());
                Ok(())
            }
            Err(err) if err.is_halted() => {
                Err(err).with_context(|| format!("Execution of {} stopped the run", signal.id))
            }
            Err(err) => {
                error!(signal_id = %signal.id, error = %err, "Execution failed");
                summary.execution_errors += 1;
                Ok(())
            }
        }
    }

    async fn mark_to_market(&self, bar: &Candle, summary: &mut RunSummary) -> Result<()> {
        let Some(coordinator) = self.executor() else {
            return Ok(());
        };

        for position in coordinator.open_positions() {
            match coordinator.check_risk(&position.signal_id, bar.timestamp).await {
                Ok(RiskCheck::Closed(trade)) => {
                    info!(
                        signal_id = %trade.position.signal_id,
                        realized_pnl = %trade.realized_pnl,
                        "Position closed on risk limit"
                    );
                    summary.risk_closes += 1;
                }
                Ok(RiskCheck::WithinLimit { .. }) => {}
                Err(err) if err.is_halted() => {
                    return Err(err).context("Risk check stopped the run");
                }
                Err(err) => {
                    warn!(
                        signal_id = %position.signal_id,
                        error = %err,
                        "Risk check failed"
                    );
                }
            }
        }
        Ok(())
    }
}
