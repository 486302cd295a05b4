//! `report`: read-only journal views.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use oi_strangle_core::{Order, Position, Signal, Trade};
use oi_strangle_data::{DailyMetrics, JournalView, JsonlStore};
use serde::Serialize;

/// Arguments for the report command.
#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    /// Journal to read
    #[arg(long, default_value = "data/journal.jsonl")]
    pub journal: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    signals: &'a [Signal],
    orders: Vec<&'a Order>,
    positions: Vec<&'a Position>,
    trades: &'a [Trade],
    daily: Vec<DailyMetrics>,
    system_state: &'a BTreeMap<String, String>,
}

/// Runs the report command.
///
/// # Errors
///
/// Returns an error if the journal cannot be read.
pub fn run_report(args: &ReportArgs) -> Result<()> {
    let records = JsonlStore::read(&args.journal)
        .with_context(|| format!("Failed to read journal {}", args.journal.display()))?;
    let view = JournalView::from_records(&records);

    if args.json {
        return super::print_json(&JsonReport {
            signals: view.signals(),
            orders: view.orders().collect(),
            positions: view.positions().collect(),
            trades: view.trades(),
            daily: view.daily_metrics(),
            system_state: view.system_state(),
        });
    }

    println!("{}", "=".repeat(80));
    println!("JOURNAL REPORT: {} ({} records)", args.journal.display(), records.len());
    println!("{}", "=".repeat(80));

    println!("\nSignals ({})", view.signals().len());
    println!(
        "  {:<22} {:<9} {:<10} {:<10} {}",
        "id", "situation", "direction", "policy", "reason"
    );
    for signal in view.signals() {
        println!(
            "  {:<22} {:<9} {:<10} {:<10} {}",
            signal.id.as_str(),
            signal.situation.to_string(),
            signal.direction.to_string(),
            policy_label(signal),
            signal.reason()
        );
    }

    println!("\nOrders");
    println!(
        "  {:<26} {:<22} {:<5} {:<16} {:>7} {:>10}",
        "tag", "symbol", "side", "status", "retries", "fill"
    );
    for order in view.orders() {
        println!(
            "  {:<26} {:<22} {:<5} {:<16} {:>7} {:>10}",
            order.id,
            order.symbol,
            order.side.to_string(),
            order.status.to_string(),
            order.retry_count,
            order
                .fill_price
                .map_or_else(|| "-".to_string(), |p| p.to_string())
        );
    }

    println!("\nOpen positions");
    let mut open = 0;
    for position in view.open_positions() {
        open += 1;
        println!(
            "  {:<22} premium {:>10} opened {}",
            position.signal_id.as_str(),
            position.entry_price,
            position.opened_at.format("%Y-%m-%d %H:%M")
        );
    }
    if open == 0 {
        println!("  none");
    }

    println!("\nTrades ({})", view.trades().len());
    for trade in view.trades() {
        println!(
            "  {:<22} {:<10} pnl {:>12}",
            trade.position.signal_id.as_str(),
            trade.reason.to_string(),
            trade.realized_pnl
        );
    }

    println!("\nDaily metrics");
    println!(
        "  {:<12} {:>8} {:>7} {:>5} {:>6} {:>14}",
        "date", "signals", "trades", "won", "lost", "realized pnl"
    );
    for day in view.daily_metrics() {
        println!(
            "  {:<12} {:>8} {:>7} {:>5} {:>6} {:>14}",
            day.date.to_string(),
            day.signals,
            day.trades,
            day.winning_trades,
            day.losing_trades,
            day.realized_pnl
        );
    }

    if !view.system_state().is_empty() {
        println!("\nSystem state");
        for (key, value) in view.system_state() {
            println!("  {key}: {value}");
        }
    }
    Ok(())
}

fn policy_label(signal: &Signal) -> String {
    use oi_strangle_core::StrikePolicy;
    match signal.strike_policy {
        StrikePolicy::NoTrade => "no_trade".to_string(),
        StrikePolicy::EqualDistance => "equal".to_string(),
        StrikePolicy::DominantCloser { closer } => format!("{closer}_near"),
    }
}
