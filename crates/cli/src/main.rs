use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::{RecoverArgs, ReportArgs, RunArgs};

#[derive(Parser)]
#[command(name = "oi-strangle")]
#[command(about = "Pattern and open-interest driven option strangles", long_about = None)]
struct Cli {
    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over candle and OI files
    Run(RunArgs),
    /// Replay the journal and resolve unfinished legs
    Recover(RecoverArgs),
    /// Print signals, positions, trades and daily metrics from a journal
    Report(ReportArgs),
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    match cli.command {
        Commands::Run(args) => commands::run_pipeline(args).await?,
        Commands::Recover(args) => commands::run_recover(args).await?,
        Commands::Report(args) => commands::run_report(&args)?,
    }

    Ok(())
}
