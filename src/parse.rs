//! Wire parser for the StatsD line protocol.
//!
//! Valid lines have the shape `name:value|type[|@rate]` with type one of
//! `c`, `g`, `ms`, `s`. Multiple lines per payload are separated by
//! newlines. Malformed lines are skipped; a payload never fails as a whole.

use tracing::{debug, error};

use crate::config::Config;
use crate::metric::{GaugeDelta, MetricEvent, MetricValue};

/// Parses one raw payload into metric events.
///
/// Buckets come out fully prefixed: the global prefix always, plus the
/// timer or gauge sub-prefix for those types. Source-line order is
/// preserved in the output.
pub fn parse_payload(data: &str, cfg: &Config) -> Vec<MetricEvent> {
    let mut events = Vec::new();
    for line in data.split('\n') {
        if line.is_empty() {
            continue;
        }
        if let Some(event) = parse_line(line, cfg) {
            events.push(event);
        }
    }
    events
}

fn parse_line(line: &str, cfg: &Config) -> Option<MetricEvent> {
    let colon = match line.find(':') {
        Some(i) if i < line.len() - 1 => i,
        _ => return skip(line, cfg),
    };
    let name = &line[..colon];
    let rest = &line[colon + 1..];

    let pipe = match rest.find('|') {
        Some(i) if i < rest.len() - 1 => i,
        _ => return skip(line, cfg),
    };
    let raw_value = &rest[..pipe];
    let after = rest[pipe + 1..].as_bytes();
    let type_byte = *after.first()?;

    // The two-byte `ms` type first, then the single-byte types.
    let (type_len, value, sub_prefix) = match type_byte {
        b'm' => {
            if after.get(1) != Some(&b's') {
                return skip(line, cfg);
            }
            let sample = match raw_value.parse::<f64>() {
                Ok(v) => v,
                Err(e) => {
                    error!(line, error = %e, "failed to parse timer value");
                    return None;
                }
            };
            (2, MetricValue::Timer(sample), cfg.prefix_timers.as_str())
        }
        b'c' => {
            let delta = match raw_value.parse::<i64>() {
                Ok(v) => v,
                Err(e) => {
                    error!(line, error = %e, "failed to parse counter value");
                    return None;
                }
            };
            (1, MetricValue::Counter(delta), "")
        }
        b'g' => {
            let (relative, negative, magnitude_str) = match raw_value.as_bytes().first() {
                Some(b'+') => (true, false, &raw_value[1..]),
                Some(b'-') => (true, true, &raw_value[1..]),
                _ => (false, false, raw_value),
            };
            let magnitude = match magnitude_str.parse::<f64>() {
                Ok(v) => v,
                Err(e) => {
                    error!(line, error = %e, "failed to parse gauge value");
                    return None;
                }
            };
            let delta = GaugeDelta {
                relative,
                negative,
                magnitude,
            };
            (1, MetricValue::Gauge(delta), cfg.prefix_gauges.as_str())
        }
        b's' => (1, MetricValue::Set(raw_value.to_string()), ""),
        _ => return skip(line, cfg),
    };

    // An `|@rate` suffix declares sampling; anything else trailing is
    // ignored, and an unparsable rate silently resets to 1.0.
    let trailer = &rest[pipe + 1 + type_len..];
    let sampling = match trailer.strip_prefix("|@") {
        Some(rate) => rate.parse::<f32>().unwrap_or(1.0),
        None => 1.0,
    };

    Some(MetricEvent {
        bucket: format!("{}{}{}", cfg.prefix, sub_prefix, name),
        value,
        sampling,
    })
}

fn skip(line: &str, cfg: &Config) -> Option<MetricEvent> {
    if cfg.debug {
        debug!(line, "failed to parse line");
    }
    None
}
