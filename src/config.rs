use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level daemon configuration.
///
/// Every field can come from the optional YAML file; command-line flags
/// override file values. Defaults match the classic StatsD deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// UDP and HTTP listen address. A leading `:` binds all interfaces.
    #[serde(default = "default_address")]
    pub address: String,

    /// Downstream Graphite address, or `-` to disable flushing.
    #[serde(default = "default_graphite")]
    pub graphite: String,

    /// Interval between flushes; also the write deadline for one flush.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Log every emitted line, and drain state even when the dial fails.
    #[serde(default)]
    pub debug: bool,

    /// How many flush intervals a quiet counter keeps emitting zeros.
    #[serde(default = "default_persist_count_keys")]
    pub persist_count_keys: i64,

    /// Bucket name for a meta counter bumped on every applied event.
    /// Empty disables it.
    #[serde(default)]
    pub receive_counter: String,

    /// Timer percentile specifiers (e.g. "90", "99.9", "-10").
    #[serde(default)]
    pub percentiles: Vec<Percentile>,

    /// Parser and UDP reader pool size.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Prefix prepended to every bucket.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Additional prefix for timer buckets.
    #[serde(default = "default_prefix_timers")]
    pub prefix_timers: String,

    /// Additional prefix for gauge buckets.
    #[serde(default = "default_prefix_gauges")]
    pub prefix_gauges: String,
}

impl Config {
    /// Loads configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let cfg: Self =
            serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        Ok(cfg)
    }

    /// Rejects configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            bail!("listen address must not be empty");
        }
        if self.graphite.is_empty() {
            bail!("graphite address must not be empty (use - to disable flushing)");
        }
        if self.flush_interval.is_zero() {
            bail!("flush interval must be positive");
        }
        if self.workers == 0 {
            bail!("worker count must be positive");
        }
        if self.persist_count_keys < 0 {
            bail!("persist-count-keys must not be negative");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            graphite: default_graphite(),
            flush_interval: default_flush_interval(),
            debug: false,
            persist_count_keys: default_persist_count_keys(),
            receive_counter: String::new(),
            percentiles: Vec::new(),
            workers: default_workers(),
            prefix: default_prefix(),
            prefix_timers: default_prefix_timers(),
            prefix_gauges: default_prefix_gauges(),
        }
    }
}

fn default_address() -> String {
    ":8125".to_string()
}

fn default_graphite() -> String {
    "127.0.0.1:2003".to_string()
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_persist_count_keys() -> i64 {
    60
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .saturating_sub(1)
        .max(1)
}

fn default_prefix() -> String {
    "stats.".to_string()
}

fn default_prefix_timers() -> String {
    "timers.".to_string()
}

fn default_prefix_gauges() -> String {
    "gauges.".to_string()
}

/// A timer percentile specifier.
///
/// Positive means upper-tail, negative means the same magnitude from the
/// lower tail. The label keeps the digits the operator wrote, with `.`
/// replaced by `_` for use in bucket suffixes (`99.5` becomes `99_5`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct Percentile {
    pub value: f64,
    pub label: String,
}

impl FromStr for Percentile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value: f64 = s
            .parse()
            .map_err(|e| format!("invalid percentile {s:?}: {e}"))?;
        if !(value > -100.0 && value <= 100.0) {
            return Err(format!("percentile {s:?} outside (-100, 100]"));
        }
        Ok(Self {
            value,
            label: s.replace('.', "_"),
        })
    }
}

impl TryFrom<String> for Percentile {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
