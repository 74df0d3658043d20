//! UDP ingress: a reader pool sharing one socket.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::Config;

/// Fixed receive buffer size; longer datagrams are truncated by the read.
pub const MAX_DATAGRAM_SIZE: usize = 512;

/// Expands the `:port` listen shorthand to an all-interfaces address.
pub fn normalize_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    }
}

/// Binds the shared ingress socket. Failure here is fatal to the daemon.
pub async fn bind(address: &str) -> Result<UdpSocket> {
    let bind_addr = normalize_address(address);
    let socket = UdpSocket::bind(&bind_addr)
        .await
        .with_context(|| format!("binding UDP socket on {bind_addr}"))?;
    info!(addr = %bind_addr, "listening on UDP");
    Ok(socket)
}

/// Spawns the reader tasks.
///
/// Each reader owns a private buffer; the kernel hands any given datagram
/// to exactly one of them. A failed read is logged and the loop continues.
pub fn spawn_readers(socket: Arc<UdpSocket>, cfg: Arc<Config>, raw_tx: mpsc::Sender<String>) {
    for _ in 0..cfg.workers {
        let socket = Arc::clone(&socket);
        let raw_tx = raw_tx.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM_SIZE];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, _)) => {
                        let payload = String::from_utf8_lossy(&buf[..len]).into_owned();
                        if raw_tx.send(payload).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => error!(error = %e, "reading UDP datagram"),
                }
            }
        });
    }
}
