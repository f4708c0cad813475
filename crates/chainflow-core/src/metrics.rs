//! # Chain Metrics
//!
//! Counters and gauges updated on the task thread and read by metric
//! collectors on other threads. All handles are cheap clones of `Arc`-backed
//! atomics, so a sink and the metric system can observe the same value
//! without coordination.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use fxhash::FxHashMap;

/// Metric name for the last watermark a chained operator's input sink saw.
pub const CURRENT_INPUT_WATERMARK: &str = "currentInputWatermark";

/// Metric name for the last watermark an operator's downstream sink saw.
pub const CURRENT_OUTPUT_WATERMARK: &str = "currentOutputWatermark";

/// Monotonic counter. Single writer (the task thread), any number of readers.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    /// Creates a counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter by one.
    #[inline]
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads the current count.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Gauge holding the timestamp of the last watermark a sink processed.
///
/// Starts at `i64::MIN` (no watermark seen yet). Updated even while the
/// stream is idle, so the gauge always reflects the last observed value.
#[derive(Debug, Clone)]
pub struct WatermarkGauge(Arc<AtomicI64>);

impl Default for WatermarkGauge {
    fn default() -> Self {
        Self(Arc::new(AtomicI64::new(i64::MIN)))
    }
}

impl WatermarkGauge {
    /// Creates a gauge with no watermark observed yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the timestamp of the latest watermark.
    #[inline]
    pub fn set_current_watermark(&self, timestamp: i64) {
        self.0.store(timestamp, Ordering::Relaxed);
    }

    /// Reads the last recorded watermark timestamp.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-operator metric group.
///
/// Holds the operator's record-in counter and the watermark gauges the chain
/// builder registers during construction.
#[derive(Debug, Default)]
pub struct OperatorMetricGroup {
    num_records_in: Counter,
    gauges: FxHashMap<&'static str, WatermarkGauge>,
}

impl OperatorMetricGroup {
    /// Creates an empty metric group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The operator's incoming-record counter.
    #[must_use]
    pub fn num_records_in(&self) -> &Counter {
        &self.num_records_in
    }

    /// Registers a watermark gauge under `name`, replacing any previous
    /// registration with that name.
    pub fn register_watermark_gauge(&mut self, name: &'static str, gauge: WatermarkGauge) {
        self.gauges.insert(name, gauge);
    }

    /// Looks up a registered watermark gauge.
    #[must_use]
    pub fn watermark_gauge(&self, name: &str) -> Option<&WatermarkGauge> {
        self.gauges.get(name)
    }
}
