/// A single parsed metric observation, bucket already fully prefixed.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEvent {
    pub bucket: String,
    pub value: MetricValue,
    /// Client-declared sampling rate in (0,1]; only counters consult it.
    pub sampling: f32,
}

impl MetricEvent {
    /// Creates an event with the default sampling rate of 1.0.
    pub fn new(bucket: impl Into<String>, value: MetricValue) -> Self {
        Self {
            bucket: bucket.into(),
            value,
            sampling: 1.0,
        }
    }

    /// Overrides the sampling rate.
    pub fn with_sampling(mut self, sampling: f32) -> Self {
        self.sampling = sampling;
        self
    }
}

/// Per-type payload of a metric event.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// `c` — signed delta added to the window accumulator.
    Counter(i64),
    /// `ms` — one observation appended to the window's sample list.
    Timer(f64),
    /// `g` — absolute set or signed relative adjustment.
    Gauge(GaugeDelta),
    /// `s` — member observation, counted distinctly at flush.
    Set(String),
}

/// Decoded gauge payload.
///
/// A leading `+` or `-` on the wire makes the adjustment relative; a bare
/// value replaces the stored gauge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaugeDelta {
    pub relative: bool,
    pub negative: bool,
    pub magnitude: f64,
}
