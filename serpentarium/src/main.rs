mod app;
mod channel;
mod config;
mod simulation;

use anyhow::{Context, Result};
use app::App;
use clap::Parser;
use config::{AppConfig, SimulationConfig};
use std::path::PathBuf;

/// Evolutionary snake sandbox driven by an external predictor process.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Predictor control socket (overrides the config file).
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Population size (overrides the config file).
    #[arg(long)]
    pub snakes: Option<u32>,

    /// Deterministic seed (overrides the config file).
    #[arg(long)]
    pub seed: Option<u64>,

    /// Rejoin a trainer session already in progress instead of starting one.
    #[arg(long)]
    pub resume: bool,
}

fn load_simulation_config(path: Option<&PathBuf>) -> Result<SimulationConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("failed to parse config file {}", path.display()))
        }
        None => Ok(SimulationConfig::default()),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let simulation = load_simulation_config(cli.config.as_ref())?;
    let config = AppConfig::from_cli_and_config(cli, simulation)?;

    App::new(config)?.run()
}
