use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use statsoor::config::{Config, Percentile};
use statsoor::daemon::Daemon;

/// StatsD-compatible metrics aggregation daemon flushing to Graphite.
#[derive(Parser)]
#[command(name = "statsoor", about)]
struct Cli {
    /// Path to the YAML configuration file; flags override file values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UDP and HTTP listen address.
    #[arg(long)]
    address: Option<String>,

    /// Graphite service address, or `-` to disable flushing.
    #[arg(long)]
    graphite: Option<String>,

    /// Flush interval in seconds.
    #[arg(long = "flush-interval")]
    flush_interval: Option<u64>,

    /// Log emitted lines; also drain state when the downstream dial fails.
    #[arg(long)]
    debug: bool,

    /// Flush intervals to keep emitting zeros for quiet counters.
    #[arg(long = "persist-count-keys")]
    persist_count_keys: Option<i64>,

    /// Bucket name for a meta counter of metrics received per interval.
    #[arg(long = "receive-counter")]
    receive_counter: Option<String>,

    /// Timer percentile; may be given multiple times (e.g. 90, 99.9, -10).
    #[arg(long = "percent-threshold")]
    percent_threshold: Vec<Percentile>,

    /// Parser and UDP reader pool size.
    #[arg(long = "numCPU")]
    num_cpu: Option<usize>,

    /// Prefix for all stats.
    #[arg(long)]
    prefix: Option<String>,

    /// Prefix for timer stats.
    #[arg(long = "prefixTimers")]
    prefix_timers: Option<String>,

    /// Prefix for gauge stats.
    #[arg(long = "prefixGauges")]
    prefix_gauges: Option<String>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via the environment or defaults.
mod version {
    /// Release version string.
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle the version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("statsoor {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;
    fmt().with_env_filter(filter).with_target(true).init();

    let cfg = build_config(&cli)?;

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting statsoor",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg))
}

/// Loads the config file (if any) and layers CLI flags on top.
fn build_config(cli: &Cli) -> Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(address) = &cli.address {
        cfg.address = address.clone();
    }
    if let Some(graphite) = &cli.graphite {
        cfg.graphite = graphite.clone();
    }
    if let Some(secs) = cli.flush_interval {
        cfg.flush_interval = Duration::from_secs(secs);
    }
    if cli.debug {
        cfg.debug = true;
    }
    if let Some(keys) = cli.persist_count_keys {
        cfg.persist_count_keys = keys;
    }
    if let Some(counter) = &cli.receive_counter {
        cfg.receive_counter = counter.clone();
    }
    if !cli.percent_threshold.is_empty() {
        cfg.percentiles = cli.percent_threshold.clone();
    }
    if let Some(workers) = cli.num_cpu {
        cfg.workers = workers;
    }
    if let Some(prefix) = &cli.prefix {
        cfg.prefix = prefix.clone();
    }
    if let Some(prefix) = &cli.prefix_timers {
        cfg.prefix_timers = prefix.clone();
    }
    if let Some(prefix) = &cli.prefix_gauges {
        cfg.prefix_gauges = prefix.clone();
    }

    cfg.validate()?;
    Ok(cfg)
}

async fn run(cfg: Config) -> Result<()> {
    let cancel = CancellationToken::new();

    // One termination signal triggers a final flush and clean exit.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        signal_cancel.cancel();
    });

    let daemon = Daemon::bind(cfg).await?;
    daemon.run(cancel).await?;

    tracing::info!("statsoor stopped");

    Ok(())
}
