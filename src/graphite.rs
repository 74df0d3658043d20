//! Flush protocol for the Graphite plaintext receiver.
//!
//! One connection per flush, closed on every exit path. The write carries a
//! deadline of one flush interval.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::aggregator::Aggregator;
use crate::config::Config;

/// Sentinel receiver address that disables flushing entirely.
pub const DISABLED: &str = "-";

/// Drains the current window downstream.
///
/// Dial failure in debug mode still drains the tables into a discarded
/// buffer, so a disconnected debug run does not accumulate memory; outside
/// debug mode the window is kept and merges into the next one. Past a
/// successful dial the tables are always cleared, even if the write then
/// fails.
pub async fn submit(agg: &mut Aggregator, cfg: &Config) -> Result<()> {
    if cfg.graphite == DISABLED {
        return Ok(());
    }

    let now = unix_now();

    let mut stream = match TcpStream::connect(&cfg.graphite).await {
        Ok(stream) => stream,
        Err(e) => {
            if cfg.debug {
                warn!("downstream unreachable, draining window anyway in debug mode");
                let mut discard = String::new();
                agg.write_all(&mut discard, now);
            }
            bail!("dialing {} failed: {e}", cfg.graphite);
        }
    };

    let mut buffer = String::new();
    let num = agg.write_all(&mut buffer, now);
    if num == 0 {
        return Ok(());
    }

    if cfg.debug {
        for line in buffer.lines() {
            debug!(line, "emitting");
        }
    }

    let write = async {
        stream.write_all(buffer.as_bytes()).await?;
        stream.shutdown().await
    };
    match tokio::time::timeout(cfg.flush_interval, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => bail!("writing {num} stats to {} failed: {e}", cfg.graphite),
        Err(_) => bail!(
            "writing {num} stats to {} exceeded the {:?} deadline",
            cfg.graphite,
            cfg.flush_interval
        ),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
