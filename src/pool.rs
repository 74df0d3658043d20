//! Parser pool: drains raw payloads into parsed events.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::config::Config;
use crate::metric::MetricEvent;
use crate::parse;

/// Spawns the worker tasks.
///
/// The raw-queue receiver is shared behind an async mutex; the lock covers
/// only the dequeue, so parsing and forwarding run unlocked. Workers exit
/// when either side of the pipeline closes.
pub fn spawn(
    cfg: Arc<Config>,
    raw_rx: mpsc::Receiver<String>,
    event_tx: mpsc::Sender<MetricEvent>,
) {
    let raw_rx = Arc::new(Mutex::new(raw_rx));
    for _ in 0..cfg.workers {
        let cfg = Arc::clone(&cfg);
        let raw_rx = Arc::clone(&raw_rx);
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            loop {
                let payload = { raw_rx.lock().await.recv().await };
                let Some(payload) = payload else { return };
                for event in parse::parse_payload(&payload, &cfg) {
                    if event_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });
    }
}
