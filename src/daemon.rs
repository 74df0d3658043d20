//! Supervisor: owns the aggregator loop and spawns everything else.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::graphite;
use crate::metric::MetricEvent;
use crate::pool;
use crate::receiver::{http, udp};

/// Capacity of the raw-payload and parsed-event queues. Producers block
/// when a queue is full; nothing is dropped at the queue itself.
pub const MAX_PENDING_ITEMS: usize = 100_000;

/// How many parsed events one loop wakeup applies before re-entering the
/// select, so a busy ingest cannot starve the flush tick for long.
const APPLY_BATCH_SIZE: usize = 256;

/// A bound daemon, ready to run.
///
/// Binding is separate from running so the listen addresses are observable
/// (and failures surface) before any traffic starts.
pub struct Daemon {
    cfg: Arc<Config>,
    socket: Arc<UdpSocket>,
    http_listener: TcpListener,
}

impl Daemon {
    /// Binds the UDP socket and the HTTP listener. Either failure is fatal.
    pub async fn bind(cfg: Config) -> Result<Self> {
        let cfg = Arc::new(cfg);
        let socket = udp::bind(&cfg.address).await?;

        let bind_addr = udp::normalize_address(&cfg.address);
        let http_listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("binding HTTP listener on {bind_addr}"))?;

        Ok(Self {
            cfg,
            socket: Arc::new(socket),
            http_listener,
        })
    }

    /// Local address of the shared UDP socket.
    pub fn udp_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().context("UDP local address")
    }

    /// Local address of the HTTP listener.
    pub fn http_addr(&self) -> Result<SocketAddr> {
        self.http_listener.local_addr().context("HTTP local address")
    }

    /// Runs the daemon until `cancel` trips, then performs one final flush.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let Self {
            cfg,
            socket,
            http_listener,
        } = self;

        let (raw_tx, raw_rx) = mpsc::channel::<String>(MAX_PENDING_ITEMS);
        let (event_tx, mut event_rx) = mpsc::channel::<MetricEvent>(MAX_PENDING_ITEMS);

        udp::spawn_readers(socket, Arc::clone(&cfg), raw_tx.clone());
        http::spawn(http_listener, raw_tx, cancel.clone());
        pool::spawn(Arc::clone(&cfg), raw_rx, event_tx);

        info!(
            address = %cfg.address,
            graphite = %cfg.graphite,
            flush_interval = ?cfg.flush_interval,
            workers = cfg.workers,
            "daemon started"
        );

        let mut aggregator = Aggregator::new(Arc::clone(&cfg));
        let mut ticker =
            tokio::time::interval_at(Instant::now() + cfg.flush_interval, cfg.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("shutting down, flushing final window");
                    if let Err(e) = graphite::submit(&mut aggregator, &cfg).await {
                        error!(error = %e, "final flush failed");
                    }
                    return Ok(());
                }

                _ = ticker.tick() => {
                    if let Err(e) = graphite::submit(&mut aggregator, &cfg).await {
                        error!(error = %e, "flush failed");
                    }
                }

                event = event_rx.recv() => {
                    let Some(event) = event else {
                        // Every parser worker is gone; nothing more can
                        // arrive, so flush what we have and stop.
                        if let Err(e) = graphite::submit(&mut aggregator, &cfg).await {
                            error!(error = %e, "final flush failed");
                        }
                        return Ok(());
                    };
                    aggregator.apply(event);

                    // Drain a bounded batch without blocking.
                    for _ in 0..APPLY_BATCH_SIZE - 1 {
                        match event_rx.try_recv() {
                            Ok(event) => aggregator.apply(event),
                            Err(_) => break,
                        }
                    }
                }
            }
        }
    }
}
