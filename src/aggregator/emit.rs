//! Flush emitters: drain the window tables into Graphite plaintext.

use std::collections::HashSet;
use std::fmt::Write as _;

use super::Aggregator;

impl Aggregator {
    /// Runs all four emitters into `out`, returning the number of metrics
    /// written. Window state is cleared as a side effect, whether or not
    /// the buffer ever reaches the network.
    pub fn write_all(&mut self, out: &mut String, now: i64) -> u64 {
        let mut num = self.write_counters(out, now);
        num += self.write_gauges(out, now);
        num += self.write_timers(out, now);
        num += self.write_sets(out, now);
        num
    }

    pub(crate) fn write_counters(&mut self, out: &mut String, now: i64) -> u64 {
        let mut num = 0;
        for (bucket, value) in self.counters.drain() {
            let _ = writeln!(out, "{bucket} {value} {now}");
            self.count_inactivity.insert(bucket, 0);
            num += 1;
        }

        // Quiet counters keep emitting zeros for a grace period, then the
        // bucket identity is forgotten.
        let persist = self.cfg.persist_count_keys;
        self.count_inactivity.retain(|bucket, ticks| {
            if *ticks > 0 {
                let _ = writeln!(out, "{bucket} 0 {now}");
                num += 1;
            }
            *ticks += 1;
            *ticks <= persist
        });

        num
    }

    pub(crate) fn write_gauges(&mut self, out: &mut String, now: i64) -> u64 {
        let mut num = 0;
        for (bucket, value) in self.gauges.drain() {
            let _ = writeln!(out, "{bucket} {value:.2} {now}");
            num += 1;
        }
        num
    }

    pub(crate) fn write_sets(&mut self, out: &mut String, now: i64) -> u64 {
        let mut num = 0;
        for (bucket, members) in self.sets.drain() {
            let distinct: HashSet<&str> = members.iter().map(String::as_str).collect();
            let _ = writeln!(out, "{bucket} {} {now}", distinct.len());
            num += 1;
        }
        num
    }

    pub(crate) fn write_timers(&mut self, out: &mut String, now: i64) -> u64 {
        let mut num = 0;
        for (bucket, mut samples) in self.timers.drain() {
            num += 1;
            samples.sort_by(f64::total_cmp);

            let count = samples.len();
            let lower = samples[0];
            let upper = samples[count - 1];
            let median = samples[count / 2];
            let mean = samples.iter().sum::<f64>() / count as f64;

            // A single-sample window reports its one value for every
            // percentile.
            let mut at_threshold = upper;
            for pct in &self.cfg.percentiles {
                if count > 1 {
                    at_threshold = samples[percentile_index(pct.value, count)];
                }
                if pct.value >= 0.0 {
                    let _ =
                        writeln!(out, "{bucket}.upper_{} {at_threshold:.2} {now}", pct.label);
                } else {
                    let label = pct.label.strip_prefix('-').unwrap_or(&pct.label);
                    let _ = writeln!(out, "{bucket}.lower_{label} {at_threshold:.2} {now}");
                }
            }

            let _ = writeln!(out, "{bucket}.mean {mean:.2} {now}");
            let _ = writeln!(out, "{bucket}.median {median:.2} {now}");
            let _ = writeln!(out, "{bucket}.upper {upper:.2} {now}");
            let _ = writeln!(out, "{bucket}.lower {lower:.2} {now}");
            let _ = writeln!(out, "{bucket}.count {count} {now}");
        }
        num
    }
}

/// Sorted-array index for a percentile specifier.
///
/// Positive specifiers round half-up and then step back one for zero-based
/// indexing; negative specifiers address the lower tail at `100 + p` with
/// no step back. The result is clamped into the sample range so tail
/// specifiers on tiny windows read the nearest end.
fn percentile_index(p: f64, count: usize) -> usize {
    let abs = if p >= 0.0 { p } else { 100.0 + p };
    let mut rank = ((abs / 100.0) * count as f64 + 0.5).floor() as i64;
    if p >= 0.0 {
        rank -= 1;
    }
    rank.clamp(0, count as i64 - 1) as usize
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{Config, Percentile};
    use crate::metric::{GaugeDelta, MetricEvent, MetricValue};

    const NOW: i64 = 100;

    fn aggregator_with(percentiles: &[&str], persist_count_keys: i64) -> Aggregator {
        let cfg = Config {
            percentiles: percentiles
                .iter()
                .map(|p| p.parse::<Percentile>().expect("valid percentile"))
                .collect(),
            persist_count_keys,
            ..Config::default()
        };
        Aggregator::new(Arc::new(cfg))
    }

    fn flush(agg: &mut Aggregator) -> (String, u64) {
        let mut out = String::new();
        let num = agg.write_all(&mut out, NOW);
        (out, num)
    }

    #[test]
    fn test_empty_window_emits_nothing() {
        let mut agg = aggregator_with(&[], 60);
        let (out, num) = flush(&mut agg);
        assert_eq!(num, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_counter_emits_and_clears() {
        let mut agg = aggregator_with(&[], 60);
        agg.apply(MetricEvent::new("stats.foo", MetricValue::Counter(1)));
        agg.apply(MetricEvent::new("stats.foo", MetricValue::Counter(2)).with_sampling(0.5));

        let (out, num) = flush(&mut agg);
        assert_eq!(num, 1);
        assert_eq!(out, "stats.foo 5 100\n");
        assert!(agg.counters.is_empty());
    }

    #[test]
    fn test_counter_inactivity_zero_fill_lifecycle() {
        let mut agg = aggregator_with(&[], 2);
        agg.apply(MetricEvent::new("stats.c", MetricValue::Counter(7)));

        let (out, _) = flush(&mut agg);
        assert_eq!(out, "stats.c 7 100\n");

        // Two grace windows of zeros, then the identity is forgotten.
        let (out, num) = flush(&mut agg);
        assert_eq!(out, "stats.c 0 100\n");
        assert_eq!(num, 1);

        let (out, _) = flush(&mut agg);
        assert_eq!(out, "stats.c 0 100\n");

        let (out, num) = flush(&mut agg);
        assert!(out.is_empty());
        assert_eq!(num, 0);
        assert!(agg.count_inactivity.is_empty());
    }

    #[test]
    fn test_counter_traffic_resets_inactivity() {
        let mut agg = aggregator_with(&[], 2);
        agg.apply(MetricEvent::new("stats.c", MetricValue::Counter(7)));
        flush(&mut agg);
        flush(&mut agg); // one zero window elapses

        agg.apply(MetricEvent::new("stats.c", MetricValue::Counter(3)));
        let (out, _) = flush(&mut agg);
        assert_eq!(out, "stats.c 3 100\n");
        assert_eq!(agg.count_inactivity.get("stats.c"), Some(&1));
    }

    #[test]
    fn test_gauge_two_decimals_and_no_persistence() {
        let mut agg = aggregator_with(&[], 60);
        agg.apply(MetricEvent::new(
            "stats.gauges.g",
            MetricValue::Gauge(GaugeDelta {
                relative: false,
                negative: false,
                magnitude: 5.0,
            }),
        ));

        let (out, _) = flush(&mut agg);
        assert_eq!(out, "stats.gauges.g 5.00 100\n");

        // Deleted at flush: nothing re-emitted on the next window.
        let (out, num) = flush(&mut agg);
        assert!(out.is_empty());
        assert_eq!(num, 0);
    }

    #[test]
    fn test_gauge_saturated_sequence() {
        let mut agg = aggregator_with(&[], 60);
        for (negative, magnitude) in [(false, 5.0), (true, 2.0), (true, 10.0)] {
            agg.apply(MetricEvent::new(
                "stats.gauges.g",
                MetricValue::Gauge(GaugeDelta {
                    relative: true,
                    negative,
                    magnitude,
                }),
            ));
        }
        let (out, _) = flush(&mut agg);
        assert_eq!(out, "stats.gauges.g 0.00 100\n");
    }

    #[test]
    fn test_set_emits_distinct_count() {
        let mut agg = aggregator_with(&[], 60);
        for member in ["alice", "bob", "alice"] {
            agg.apply(MetricEvent::new(
                "stats.u",
                MetricValue::Set(member.to_string()),
            ));
        }
        let (out, _) = flush(&mut agg);
        assert_eq!(out, "stats.u 2 100\n");
        assert!(agg.sets.is_empty());
    }

    #[test]
    fn test_timer_summary_lines() {
        let mut agg = aggregator_with(&["90"], 60);
        for sample in [100.0, 200.0, 300.0] {
            agg.apply(MetricEvent::new(
                "stats.timers.lat",
                MetricValue::Timer(sample),
            ));
        }

        let (out, num) = flush(&mut agg);
        assert_eq!(num, 1);
        assert_eq!(
            out,
            "stats.timers.lat.upper_90 300.00 100\n\
             stats.timers.lat.mean 200.00 100\n\
             stats.timers.lat.median 200.00 100\n\
             stats.timers.lat.upper 300.00 100\n\
             stats.timers.lat.lower 100.00 100\n\
             stats.timers.lat.count 3 100\n"
        );
        assert!(agg.timers.is_empty());
    }

    #[test]
    fn test_timer_median_even_count_is_upper_middle() {
        let mut agg = aggregator_with(&[], 60);
        for sample in [4.0, 1.0, 3.0, 2.0] {
            agg.apply(MetricEvent::new("t", MetricValue::Timer(sample)));
        }
        let (out, _) = flush(&mut agg);
        assert!(out.contains("t.median 3.00 100\n"), "got {out}");
    }

    #[test]
    fn test_timer_single_sample_percentile_is_max() {
        let mut agg = aggregator_with(&["90", "-10"], 60);
        agg.apply(MetricEvent::new("t", MetricValue::Timer(42.0)));
        let (out, _) = flush(&mut agg);
        assert!(out.contains("t.upper_90 42.00 100\n"), "got {out}");
        assert!(out.contains("t.lower_10 42.00 100\n"), "got {out}");
    }

    #[test]
    fn test_percentile_asymmetry() {
        // Ten samples 1..=10. The positive 90th steps back one after
        // rounding; the negative tenth does not.
        let mut agg = aggregator_with(&["90", "-10"], 60);
        for sample in 1..=10 {
            agg.apply(MetricEvent::new("t", MetricValue::Timer(f64::from(sample))));
        }
        let (out, _) = flush(&mut agg);
        assert!(out.contains("t.upper_90 9.00 100\n"), "got {out}");
        assert!(out.contains("t.lower_10 10.00 100\n"), "got {out}");
    }

    #[test]
    fn test_percentile_label_replaces_dot() {
        let mut agg = aggregator_with(&["99.9"], 60);
        for sample in 1..=100 {
            agg.apply(MetricEvent::new("t", MetricValue::Timer(f64::from(sample))));
        }
        let (out, _) = flush(&mut agg);
        assert!(out.contains("t.upper_99_9 100.00 100\n"), "got {out}");
    }

    #[test]
    fn test_percentile_index_math() {
        assert_eq!(percentile_index(90.0, 3), 2);
        assert_eq!(percentile_index(90.0, 10), 8);
        assert_eq!(percentile_index(-10.0, 10), 9);
        assert_eq!(percentile_index(50.0, 4), 1);
        // Tail specifiers on tiny windows clamp instead of faulting.
        assert_eq!(percentile_index(0.0, 2), 0);
        assert_eq!(percentile_index(-1.0, 10), 9);
        assert_eq!(percentile_index(100.0, 5), 4);
    }

    #[test]
    fn test_emitter_order_counters_gauges_timers_sets() {
        let mut agg = aggregator_with(&[], 60);
        agg.apply(MetricEvent::new("c", MetricValue::Counter(1)));
        agg.apply(MetricEvent::new(
            "g",
            MetricValue::Gauge(GaugeDelta {
                relative: false,
                negative: false,
                magnitude: 2.0,
            }),
        ));
        agg.apply(MetricEvent::new("t", MetricValue::Timer(3.0)));
        agg.apply(MetricEvent::new("s", MetricValue::Set("x".to_string())));

        let (out, num) = flush(&mut agg);
        assert_eq!(num, 4);
        let positions: Vec<usize> = ["c 1", "g 2.00", "t.mean", "s 1"]
            .iter()
            .map(|needle| out.find(needle).expect("line present"))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "got {out}");
    }
}
