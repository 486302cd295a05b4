//! CLI commands and the setup they share.

pub mod recover;
pub mod report;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use oi_strangle_broker::{Brokerage, RestBrokerage, RestBrokerageConfig, SimulatedBrokerage};
use oi_strangle_core::{AppConfig, ConfigLoader, ExecutionMode, DEFAULT_CONFIG_PATH};
use oi_strangle_data::{EventStore, JsonlStore};
use oi_strangle_execution::OrderExecutionCoordinator;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub use recover::{run_recover, RecoverArgs};
pub use report::{run_report, ReportArgs};
pub use run::{run_pipeline, RunArgs};

/// Execution mode flag.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// Signals only, nothing is executed
    BacktestOnly,
    /// Execute against the simulated brokerage
    DryRun,
    /// Execute against the live order gateway
    Live,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::BacktestOnly => Self::BacktestOnly,
            ModeArg::DryRun => Self::DryRun,
            ModeArg::Live => Self::Live,
        }
    }
}

/// Configuration flags shared by commands that load `Config.toml`.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Profile overlay, read from `Config.{profile}.toml` next to the config file
    #[arg(long)]
    pub profile: Option<String>,

    /// Journal path, overrides `storage.journal_path`
    #[arg(long)]
    pub journal: Option<PathBuf>,
}

impl ConfigArgs {
    /// Loads and validates the configuration for `mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if loading fails or a field is invalid.
    pub fn load(&self, mode: ExecutionMode) -> Result<AppConfig> {
        let mut config = match &self.profile {
            Some(profile) => ConfigLoader::load_with_profile(&self.config, profile),
            None => ConfigLoader::load(&self.config),
        }
        .with_context(|| format!("Failed to load config from {}", self.config.display()))?;

        if let Some(journal) = &self.journal {
            config.storage.journal_path = journal.clone();
        }
        config.validate(mode).context("Invalid configuration")?;

        info!(
            config = %self.config.display(),
            profile = self.profile.as_deref().unwrap_or("-"),
            underlying = %config.trading.underlying_symbol,
            journal = %config.storage.journal_path.display(),
            %mode,
            "Configuration loaded"
        );
        Ok(config)
    }
}

fn open_journal(config: &AppConfig) -> Result<Arc<JsonlStore>> {
    let path = &config.storage.journal_path;
    let store = JsonlStore::open(path.clone(), config.trading.underlying_symbol.clone())
        .with_context(|| format!("Failed to open journal {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Builds the coordinator with the brokerage `mode` calls for.
fn build_coordinator(
    config: &AppConfig,
    mode: ExecutionMode,
    store: Arc<dyn EventStore>,
) -> Result<OrderExecutionCoordinator> {
    let broker: Arc<dyn Brokerage> = match mode {
        ExecutionMode::Live => {
            let gateway = RestBrokerageConfig::from_config(&config.broker)
                .context("Live mode needs broker.base_url and broker.api_key")?;
            Arc::new(RestBrokerage::new(gateway).context("Failed to build order gateway client")?)
        }
        ExecutionMode::DryRun | ExecutionMode::BacktestOnly => {
            Arc::new(SimulatedBrokerage::new(config.broker.simulated_fill_price))
        }
    };
    Ok(OrderExecutionCoordinator::new(config, mode, broker, store))
}

/// Halts the coordinator on Ctrl-C.
fn halt_on_interrupt(coordinator: Arc<OrderExecutionCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, halting coordinator");
            if let Err(err) = coordinator.halt("interrupted by operator") {
                error!(error = %err, "Failed to journal halt");
            }
        }
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
