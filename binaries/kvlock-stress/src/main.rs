//! kvlock stress - runs lock and put workloads against a simulated network.
//!
//! # Usage
//!
//! ```bash
//! # Ten robust-lock clients for two seconds on a reliable network
//! kvlock-stress
//!
//! # Unreliable network, naive lock, five runs
//! kvlock-stress --unreliable --lock naive --runs 5
//!
//! # Put workload from a configuration file
//! kvlock-stress --config stress.toml --workload put
//! ```
//!
//! No timeline is written unless asked for. `VIS_ENABLE` or `--vis`
//! (`never`, `always`, anything else for on failure) and `VIS_FILE` or
//! `--vis-file` control it.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use kvlock_harness::{workloads, HarnessConfig, LockKind, LoggingConfig, VisMode};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Which workload to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Workload {
    /// Lock clients guarding a shared key and counter.
    Lock,
    /// Clients racing versioned puts on one key.
    Put,
}

/// CLI arguments for kvlock-stress.
#[derive(Parser, Debug)]
#[command(
    name = "kvlock-stress",
    about = "Stress the kvlock store and locks over a simulated unreliable network",
    version,
    author
)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of concurrent clients.
    #[arg(short = 'n', long, value_name = "N")]
    clients: Option<usize>,

    /// How long clients run, in seconds.
    #[arg(short, long, value_name = "SECS")]
    seconds: Option<u64>,

    /// Drop and delay calls.
    #[arg(short, long)]
    unreliable: bool,

    /// Lock implementation used by the lock workload.
    #[arg(long, value_name = "KIND", default_value = "robust")]
    lock: LockKind,

    /// Workload to run.
    #[arg(short, long, value_enum, default_value = "lock")]
    workload: Workload,

    /// Number of consecutive runs.
    #[arg(short, long, default_value_t = 1)]
    runs: u32,

    /// Let simulated timeouts last up to seven seconds.
    #[arg(long)]
    long_delays: bool,

    /// Hold back some replies for up to two seconds.
    #[arg(long)]
    long_reordering: bool,

    /// Fault RNG seed.
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// When to write a timeline (never, always, on-failure).
    #[arg(long, value_name = "MODE")]
    vis: Option<String>,

    /// Timeline output file.
    #[arg(long, value_name = "FILE")]
    vis_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Enable JSON log output.
    #[arg(long)]
    json_logs: bool,

    /// Print the default configuration and exit.
    #[arg(long)]
    print_config: bool,
}

/// Applies command-line overrides on top of the file configuration.
fn merge_cli_args(config: &mut HarnessConfig, args: &CliArgs) {
    if let Some(clients) = args.clients {
        config.clients = clients;
    }

    if let Some(seconds) = args.seconds {
        config.duration_ms = seconds.saturating_mul(1000);
    }

    if args.unreliable {
        config.reliable = false;
    }

    if args.long_delays {
        config.network.long_delays = true;
    }

    if args.long_reordering {
        config.network.long_reordering = true;
    }

    if let Some(seed) = args.seed {
        config.network.seed = Some(seed);
    }

    if let Some(ref mode) = args.vis {
        config.vis.mode = VisMode::from_env_value(mode);
    }

    if let Some(ref file) = args.vis_file {
        config.vis.file = Some(file.clone());
    }

    if let Some(ref level) = args.log_level {
        config.logging.level = level.clone();
    }
}

/// Initialize tracing/logging.
fn init_tracing(config: &LoggingConfig, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    let format = if json_logs || config.format == "json" {
        "json"
    } else {
        &config.format
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

async fn run_once(config: &HarnessConfig, args: &CliArgs) -> Result<()> {
    let total = match args.workload {
        Workload::Lock => workloads::run_lock_clients(config, args.lock).await?,
        Workload::Put => workloads::run_put_clients(config).await?,
    };
    info!(ok = total.ok, maybe = total.maybe, "run finished");
    Ok(())
}

async fn run(config: HarnessConfig, args: &CliArgs) -> Result<()> {
    for run in 1..=args.runs {
        info!(
            run,
            of = args.runs,
            workload = ?args.workload,
            clients = config.clients,
            duration = ?Duration::from_millis(config.duration_ms),
            reliable = config.reliable,
            long_delays = config.network.long_delays,
            long_reordering = config.network.long_reordering,
            "starting run"
        );
        run_once(&config, args)
            .await
            .with_context(|| format!("run {} failed", run))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    if args.print_config {
        let config = HarnessConfig::default();
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut config = if let Some(ref config_path) = args.config {
        HarnessConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        HarnessConfig::default()
    };

    config.apply_env();
    merge_cli_args(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging, args.json_logs)?;

    info!(version = env!("CARGO_PKG_VERSION"), "kvlock-stress starting");

    tokio::select! {
        result = run(config, &args) => {
            if let Err(e) = result {
                error!(error = %e, "stress run failed");
                return Err(e);
            }
        }
        _ = signal::ctrl_c() => {
            warn!("interrupted");
        }
    }

    info!("kvlock-stress stopped");
    Ok(())
}
