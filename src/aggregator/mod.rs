//! Single-writer aggregation state.
//!
//! All tables live on the supervisor task; nothing here locks. A flush is
//! therefore serialized with event application by construction. Emission
//! lives in `emit`; the network half of a flush lives in `crate::graphite`.

mod emit;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::metric::{MetricEvent, MetricValue};

/// Ceiling for relative gauge increments.
///
/// The gauge space is treated as non-negative; additive overflow clamps
/// here and relative decrements clamp at zero.
pub const GAUGE_CEILING: f64 = u64::MAX as f64;

/// Owns every per-bucket table for the current window.
pub struct Aggregator {
    cfg: Arc<Config>,
    pub(crate) counters: HashMap<String, i64>,
    pub(crate) count_inactivity: HashMap<String, i64>,
    pub(crate) gauges: HashMap<String, f64>,
    pub(crate) timers: HashMap<String, Vec<f64>>,
    pub(crate) sets: HashMap<String, Vec<String>>,
}

impl Aggregator {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self {
            cfg,
            counters: HashMap::new(),
            count_inactivity: HashMap::new(),
            gauges: HashMap::new(),
            timers: HashMap::new(),
            sets: HashMap::new(),
        }
    }

    /// Applies one parsed event to the window.
    pub fn apply(&mut self, event: MetricEvent) {
        if !self.cfg.receive_counter.is_empty() {
            self.bump_receive_counter();
        }

        match event.value {
            MetricValue::Counter(delta) => {
                // The reciprocal is taken in f32 to match the wire width of
                // the sampling field, then widened for the multiply.
                let scaled = (delta as f64 * f64::from(1.0_f32 / event.sampling)) as i64;
                *self.counters.entry(event.bucket).or_insert(0) += scaled;
            }
            MetricValue::Timer(sample) => {
                self.timers.entry(event.bucket).or_default().push(sample);
            }
            MetricValue::Gauge(delta) => {
                let current = self.gauges.get(&event.bucket).copied().unwrap_or(0.0);
                let next = if delta.relative {
                    if delta.negative {
                        if delta.magnitude > current {
                            0.0
                        } else {
                            current - delta.magnitude
                        }
                    } else if delta.magnitude > GAUGE_CEILING - current {
                        GAUGE_CEILING
                    } else {
                        current + delta.magnitude
                    }
                } else {
                    delta.magnitude
                };
                self.gauges.insert(event.bucket, next);
            }
            MetricValue::Set(member) => {
                self.sets.entry(event.bucket).or_default().push(member);
            }
        }
    }

    /// Bumps the configured meta counter, resetting any prior negative
    /// value first so it always counts up from zero within a window.
    fn bump_receive_counter(&mut self) {
        match self.counters.get_mut(&self.cfg.receive_counter) {
            Some(value) => {
                if *value < 0 {
                    *value = 0;
                }
                *value += 1;
            }
            None => {
                self.counters.insert(self.cfg.receive_counter.clone(), 1);
            }
        }
    }
}
