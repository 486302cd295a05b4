//! `run`: the bar-by-bar pipeline over CSV history.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use oi_strangle_backtest::{MarketData, Pipeline};
use oi_strangle_core::ExecutionMode;
use oi_strangle_data::{load_candles, load_futures_oi, load_options_oi, EventStore};
use tracing::info;

use super::{build_coordinator, halt_on_interrupt, open_journal, print_json, ConfigArgs, ModeArg};

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Candle CSV (`timestamp,open,high,low,close`)
    #[arg(long)]
    pub candles: PathBuf,

    /// ATM option OI CSV (`timestamp,oi_call_atm,oi_put_atm`)
    #[arg(long)]
    pub oi: PathBuf,

    /// Futures OI CSV (`timestamp,current_month_oi,next_month_oi`)
    #[arg(long)]
    pub futures: PathBuf,

    #[command(flatten)]
    pub config: ConfigArgs,

    /// Execution mode
    #[arg(long, value_enum, default_value_t = ModeArg::BacktestOnly)]
    pub mode: ModeArg,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Runs the pipeline command.
///
/// In executing modes the journal is recovered before the first bar.
///
/// # Errors
///
/// Returns an error if configuration, input files or the journal are
/// unusable, or the coordinator halts.
pub async fn run_pipeline(args: RunArgs) -> Result<()> {
    let mode = ExecutionMode::from(args.mode);
    let config = args.config.load(mode)?;

    let candles = load_candles(&args.candles)?;
    let options = load_options_oi(&args.oi)?;
    let futures = load_futures_oi(&args.futures)?;
    info!(
        candles = candles.report.loaded,
        candles_skipped = candles.report.skipped,
        options = options.report.loaded,
        options_skipped = options.report.skipped,
        futures = futures.report.loaded,
        futures_skipped = futures.report.skipped,
        "Market data loaded"
    );
    let data = MarketData {
        candles: candles.rows,
        options: options.rows,
        futures: futures.rows,
    };

    let store: Arc<dyn EventStore> = open_journal(&config)?;
    let mut pipeline = Pipeline::new(&config, store.clone())?;

    let mut interrupt = None;
    if mode.executes() {
        let coordinator = Arc::new(build_coordinator(&config, mode, store)?);
        let report = coordinator
            .recover()
            .await
            .context("Journal recovery failed")?;
        info!(summary = %report.summary(), "Journal recovered");

        interrupt = Some(halt_on_interrupt(coordinator.clone()));
        pipeline = pipeline.with_coordinator(coordinator);
    }

    let result = pipeline.run(&data).await;
    if let Some(handle) = interrupt {
        handle.abort();
    }
    let summary = result?;

    if args.json {
        print_json(&summary)?;
    } else {
        println!("{summary}");
    }
    Ok(())
}
