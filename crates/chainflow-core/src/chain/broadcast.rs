//! # Broadcasting Fan-Out
//!
//! Sinks that deliver every record to N downstream sinks in order. Required
//! whenever one producer feeds two or more successors.
//!
//! Latency markers are not fanned out: each marker is forwarded to a single
//! downstream sink picked uniformly at random, so probe volume does not
//! multiply with fan-out. The picker is a per-sink xorshift generator.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::chain::error::ChainError;
use crate::chain::output::OutputHandle;
use crate::metrics::WatermarkGauge;
use crate::record::{LatencyMarker, OutputTag, StreamRecord, StreamStatusView, Watermark};

/// Xorshift64 pseudo-random generator with per-sink state.
///
/// Not cryptographic; only used to spread latency probes across fan-out
/// branches.
#[derive(Debug, Clone)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Creates a generator from an explicit seed. A zero seed (which would
    /// make xorshift degenerate) is replaced with a fixed odd constant.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9e37_79b9_7f4a_7c15 } else { seed },
        }
    }

    /// Creates a generator seeded from wall clock and process id.
    #[must_use]
    pub fn from_entropy() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_nanos() & u128::from(u64::MAX)).unwrap_or(0));
        Self::new(nanos ^ u64::from(std::process::id()))
    }

    fn next(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Returns a value in `0..bound`. `bound` must be non-zero.
    #[must_use]
    pub fn next_bounded(&mut self, bound: usize) -> usize {
        debug_assert!(bound > 0);
        (self.next() % bound as u64) as usize
    }
}

/// Fan-out sink delivering each record to every downstream sink in order.
///
/// Every sink observes the same record instance; nothing is copied at this
/// layer. Chosen when object reuse is enabled — defensive copies, where
/// needed, are the downstream copying sinks' concern.
pub struct BroadcastingOutput {
    outputs: Vec<OutputHandle>,
    watermark_gauge: WatermarkGauge,
    status: StreamStatusView,
    rng: XorShift64,
}

impl BroadcastingOutput {
    /// Creates a broadcasting sink over `outputs`.
    #[must_use]
    pub fn new(outputs: Vec<OutputHandle>, status: StreamStatusView) -> Self {
        Self {
            outputs,
            watermark_gauge: WatermarkGauge::new(),
            status,
            rng: XorShift64::from_entropy(),
        }
    }

    /// The gauge tracking the last watermark this sink processed.
    #[must_use]
    pub fn watermark_gauge(&self) -> &WatermarkGauge {
        &self.watermark_gauge
    }

    pub(crate) fn collect(&mut self, record: &StreamRecord) -> Result<(), ChainError> {
        // The same record goes to every sink; no copies are made.
        for output in &self.outputs {
            output.borrow_mut().collect(record)?;
        }
        Ok(())
    }

    pub(crate) fn collect_side(
        &mut self,
        tag: &OutputTag,
        record: &StreamRecord,
    ) -> Result<(), ChainError> {
        for output in &self.outputs {
            output.borrow_mut().collect_side(tag, record)?;
        }
        Ok(())
    }

    pub(crate) fn emit_watermark(&mut self, watermark: Watermark) -> Result<(), ChainError> {
        self.watermark_gauge.set_current_watermark(watermark.timestamp());
        if self.status.is_active() {
            for output in &self.outputs {
                output.borrow_mut().emit_watermark(watermark)?;
            }
        }
        Ok(())
    }

    pub(crate) fn emit_latency_marker(&mut self, marker: LatencyMarker) -> Result<(), ChainError> {
        match self.outputs.len() {
            0 => Ok(()),
            1 => self.outputs[0].borrow_mut().emit_latency_marker(marker),
            len => {
                let pick = self.rng.next_bounded(len);
                self.outputs[pick].borrow_mut().emit_latency_marker(marker)
            }
        }
    }

    pub(crate) fn close(&mut self) -> Result<(), ChainError> {
        for output in &self.outputs {
            output.borrow_mut().close()?;
        }
        Ok(())
    }
}

/// [`BroadcastingOutput`] variant used when object reuse is disabled.
///
/// Hands a shallow copy of the record to every sink except the last, which
/// receives the original: the producer has no other reader once the record
/// enters the fan-out, so the final hand-off can skip the copy.
pub struct CopyingBroadcastingOutput {
    inner: BroadcastingOutput,
}

impl CopyingBroadcastingOutput {
    /// Creates a copying broadcasting sink over `outputs`.
    #[must_use]
    pub fn new(outputs: Vec<OutputHandle>, status: StreamStatusView) -> Self {
        Self {
            inner: BroadcastingOutput::new(outputs, status),
        }
    }

    /// The gauge tracking the last watermark this sink processed.
    #[must_use]
    pub fn watermark_gauge(&self) -> &WatermarkGauge {
        &self.inner.watermark_gauge
    }

    pub(crate) fn collect(&mut self, record: &StreamRecord) -> Result<(), ChainError> {
        let Some(last) = self.inner.outputs.len().checked_sub(1) else {
            return Ok(());
        };
        for output in &self.inner.outputs[..last] {
            let shallow_copy = record.clone();
            output.borrow_mut().collect(&shallow_copy)?;
        }
        // Don't copy for the last output.
        self.inner.outputs[last].borrow_mut().collect(record)
    }

    pub(crate) fn collect_side(
        &mut self,
        tag: &OutputTag,
        record: &StreamRecord,
    ) -> Result<(), ChainError> {
        let Some(last) = self.inner.outputs.len().checked_sub(1) else {
            return Ok(());
        };
        for output in &self.inner.outputs[..last] {
            let shallow_copy = record.clone();
            output.borrow_mut().collect_side(tag, &shallow_copy)?;
        }
        self.inner.outputs[last].borrow_mut().collect_side(tag, record)
    }

    pub(crate) fn emit_watermark(&mut self, watermark: Watermark) -> Result<(), ChainError> {
        self.inner.emit_watermark(watermark)
    }

    pub(crate) fn emit_latency_marker(&mut self, marker: LatencyMarker) -> Result<(), ChainError> {
        self.inner.emit_latency_marker(marker)
    }

    pub(crate) fn close(&mut self) -> Result<(), ChainError> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xorshift_deterministic_for_seed() {
        let mut a = XorShift64::new(42);
        let mut b = XorShift64::new(42);
        for _ in 0..16 {
            assert_eq!(a.next_bounded(7), b.next_bounded(7));
        }
    }

    #[test]
    fn test_xorshift_zero_seed_does_not_stick() {
        let mut rng = XorShift64::new(0);
        let first = rng.next_bounded(1000);
        let second = rng.next_bounded(1000);
        // A degenerate generator would return the same value forever.
        assert!(first != second || rng.next_bounded(1000) != first);
    }

    #[test]
    fn test_bounded_stays_in_range() {
        let mut rng = XorShift64::from_entropy();
        for _ in 0..100 {
            assert!(rng.next_bounded(3) < 3);
        }
    }
}
