//! Network ingress surfaces feeding the raw-payload queue.

pub mod http;
pub mod udp;
