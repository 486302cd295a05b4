//! `recover`: replay the journal and settle what a crash left behind.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use oi_strangle_core::ExecutionMode;
use oi_strangle_data::EventStore;

use super::{build_coordinator, open_journal, print_json, ConfigArgs, ModeArg};

/// Arguments for the recover command.
#[derive(Args, Debug, Clone)]
pub struct RecoverArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Execution mode; dry-run cancels legs it cannot verify
    #[arg(long, value_enum, default_value_t = ModeArg::DryRun)]
    pub mode: ModeArg,

    /// Print the recovery report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Runs the recover command.
///
/// # Errors
///
/// Returns an error in backtest-only mode, or if the journal cannot be read
/// or written.
pub async fn run_recover(args: RecoverArgs) -> Result<()> {
    let mode = ExecutionMode::from(args.mode);
    if !mode.executes() {
        bail!("Recovery needs --mode dry-run or --mode live");
    }
    let config = args.config.load(mode)?;

    let store: Arc<dyn EventStore> = open_journal(&config)?;
    let coordinator = build_coordinator(&config, mode, store)?;
    let report = coordinator
        .recover()
        .await
        .context("Journal recovery failed")?;

    if args.json {
        return print_json(&report);
    }

    println!("Recovery ({mode})");
    println!("  records replayed:      {}", report.records_replayed);
    println!("  open legs:             {}", report.open_legs);
    println!("  verified at broker:    {}", report.verified);
    println!("  resumed:               {}", report.resumed);
    println!("  rejected unconfirmed:  {}", report.rejected_unconfirmed);
    println!("  cancelled:             {}", report.cancelled);
    println!("  unresolved:            {}", report.unresolved);
    println!("  pairs settled:         {}", report.pairs_settled);
    println!("  positions open:        {}", report.positions_open);
    if report.unresolved > 0 {
        println!("\nSome legs could not be resolved; check the broker before trading.");
    }
    Ok(())
}
