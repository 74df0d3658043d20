//! HTTP ingress: path-encoded stats rebuilt as StatsD lines.
//!
//! A request for `/a/b/c/<type>/<name>/<amount>` becomes the line
//! `a.b.c.<name>:<amount>|<modifier>` with `<type>` one of `count`, `time`,
//! or `gauge`, and is fed through the same parse path as UDP traffic.

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Builds the ingress router; every path hits the same handler.
pub fn router(raw_tx: mpsc::Sender<String>) -> Router {
    Router::new().fallback(ingest).with_state(raw_tx)
}

/// Serves the router on an already-bound listener until cancellation.
pub fn spawn(listener: TcpListener, raw_tx: mpsc::Sender<String>, cancel: CancellationToken) {
    let app = router(raw_tx);
    tokio::spawn(async move {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "listening on HTTP");
        }
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "HTTP receiver error");
        }
    });
}

async fn ingest(State(raw_tx): State<mpsc::Sender<String>>, uri: Uri) -> impl IntoResponse {
    match synthesize_line(uri.path()) {
        Ok(line) => {
            if raw_tx.send(line.clone()).await.is_err() {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ingest queue closed".to_string(),
                );
            }
            (StatusCode::OK, format!("OK: {line}"))
        }
        Err(reason) => (StatusCode::BAD_REQUEST, reason.to_string()),
    }
}

/// Rebuilds the StatsD line for a stat path.
///
/// The last three segments are `<type>/<name>/<amount>`; everything before
/// them joins with dots into the namespace.
pub fn synthesize_line(path: &str) -> Result<String, &'static str> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() < 4 {
        return Err("not enough path segments for a stat");
    }

    let stat_type = parts[parts.len() - 3];
    let name = parts[parts.len() - 2];
    let amount = parts[parts.len() - 1];

    let modifier = match stat_type {
        "count" => "c",
        "time" => "ms",
        "gauge" => "g",
        _ => return Err("unknown stat type"),
    };

    let mut bucket = String::new();
    for part in &parts[1..parts.len() - 3] {
        if !bucket.is_empty() {
            bucket.push('.');
        }
        bucket.push_str(part);
    }
    if !bucket.is_empty() {
        bucket.push('.');
    }
    bucket.push_str(name);

    Ok(format!("{bucket}:{amount}|{modifier}"))
}
