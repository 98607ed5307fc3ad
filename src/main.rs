mod api;
mod config;
mod error;
mod events;
mod flips;
mod loader;
mod model;
mod pipeline;
mod stats;

use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use api::{PriceSource, WikiClient};
use config::Config;
use error::Result;
use events::TracingSink;

/// Finds items worth flipping from recent hourly Grand Exchange averages.
#[derive(Parser, Debug)]
#[command(name = "marginator", version)]
struct Cli {
    /// Days of history to keep (each counts as 8 hourly snapshots)
    #[arg(long)]
    days: Option<u32>,

    /// Hours per aggregation chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    #[arg(long)]
    map_file: Option<PathBuf>,

    #[arg(long)]
    data_file: Option<PathBuf>,

    #[arg(long)]
    out_file: Option<PathBuf>,

    #[arg(long)]
    base_url: Option<String>,

    /// Drop items whose required capital exceeds the cap instead of only reporting them
    #[arg(long)]
    enforce_capital_cap: bool,

    /// Use only cached data; never call the price API
    #[arg(long)]
    offline: bool,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        self.apply(Config::from_env()?)
    }

    /// Flags win over whatever `cfg` already holds.
    fn apply(self, mut cfg: Config) -> Result<Config> {
        if let Some(days) = self.days {
            cfg.days_saved = days;
        }
        if let Some(size) = self.chunk_size {
            cfg.chunk_size = size;
        }
        if let Some(path) = self.map_file {
            cfg.map_file = path;
        }
        if let Some(path) = self.data_file {
            cfg.data_file = path;
        }
        if let Some(path) = self.out_file {
            cfg.out_file = path;
        }
        if let Some(url) = self.base_url {
            cfg.base_url = url;
        }
        cfg.enforce_capital_cap |= self.enforce_capital_cap;
        cfg.offline |= self.offline;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = cli.into_config()?;
    info!(
        "Window: {} hours, chunks of {}, min roi {}, min profit {}",
        cfg.window_hours()?,
        cfg.chunk_size,
        cfg.min_roi,
        cfg.min_profit
    );

    let mut client = if cfg.offline { None } else { Some(WikiClient::new(&cfg)?) };
    let source = client.as_mut().map(|c| c as &mut dyn PriceSource);

    let outcome = pipeline::run(&cfg, source, Utc::now(), &mut TracingSink)?;
    info!("{} opportunities written to {}", outcome.records.len(), cfg.out_file.display());
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
