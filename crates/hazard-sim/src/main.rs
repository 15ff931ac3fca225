use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use hazard_sim::{run_simulator, SimulatorConfig};
use hazard_sync::SyncConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Cross-window synchronization simulator
#[derive(Debug, Parser)]
#[command(name = "hazard-sim", version, about)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run randomized operations across windows on one bus
    Simulate {
        /// Number of windows
        #[arg(long, default_value_t = 3)]
        windows: usize,

        /// Number of operations to generate
        #[arg(long, default_value_t = 500)]
        operations: u64,

        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Randomly delay deliveries (last-write-wins asymmetry is expected)
        #[arg(long)]
        interleave: bool,

        /// Deliver every message twice
        #[arg(long)]
        duplicate_delivery: bool,

        /// Round-trip every delivery through JSON
        #[arg(long)]
        wire_encoding: bool,

        /// Keep going after the first violation
        #[arg(long)]
        keep_going: bool,

        /// Sync settings file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective sync configuration as TOML
    Config {
        /// Sync settings file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_sync_config(path: Option<&PathBuf>) -> anyhow::Result<SyncConfig> {
    match path {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("loading sync config from {}", path.display())),
        None => Ok(SyncConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Simulate {
            windows,
            operations,
            seed,
            interleave,
            duplicate_delivery,
            wire_encoding,
            keep_going,
            config,
            json,
        } => {
            let config = SimulatorConfig {
                seed,
                windows,
                operations,
                interleave,
                duplicate_delivery,
                wire_encoding,
                stop_on_first_violation: !keep_going,
                sync: load_sync_config(config.as_ref())?,
            };

            let report = run_simulator(config).context("simulation aborted")?;
            if json {
                println!("{}", report.to_json()?);
            } else {
                println!("{}", report.generate_text());
            }

            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Command::Config { config } => {
            let config = load_sync_config(config.as_ref())?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
