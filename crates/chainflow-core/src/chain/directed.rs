//! # Directed Fan-Out
//!
//! Sinks that consult user [`OutputSelector`]s to decide which downstream
//! sinks receive each record. A selector maps a record to zero or more named
//! output streams; only sinks whose edges subscribe to a matching name (or
//! whose edges carry no names at all) receive the record.
//!
//! Routing is precomputed at construction: stream name to ordered sink
//! indices, plus the select-all set. Per `collect`, a reusable mark vector
//! dedupes targets so a sink receives the record at most once, in sink-index
//! order, regardless of how many selectors matched it.

use std::sync::Arc;

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::chain::broadcast::XorShift64;
use crate::chain::error::ChainError;
use crate::chain::output::OutputHandle;
use crate::config::OutputSelector;
use crate::metrics::WatermarkGauge;
use crate::record::{LatencyMarker, OutputTag, StreamRecord, StreamStatusView, Watermark};

/// Fan-out sink routing records through user output selectors.
///
/// Every selected sink observes the same record instance; nothing is copied
/// at this layer. Chosen when object reuse is enabled.
pub struct DirectedOutput {
    selectors: Vec<Arc<dyn OutputSelector>>,
    outputs: Vec<OutputHandle>,
    /// Stream name to the ordered indices of subscribing sinks.
    name_index: FxHashMap<String, SmallVec<[usize; 2]>>,
    /// Indices of sinks whose edges carry no names: they receive everything.
    select_all: Vec<usize>,
    /// Reusable per-call mark vector for dedup.
    selected_marks: Vec<bool>,
    watermark_gauge: WatermarkGauge,
    status: StreamStatusView,
    rng: XorShift64,
}

impl DirectedOutput {
    /// Creates a directed sink.
    ///
    /// `outputs` pairs each sink with the named streams its edge subscribes
    /// to; an empty name list subscribes the sink to every record.
    #[must_use]
    pub fn new(
        selectors: Vec<Arc<dyn OutputSelector>>,
        outputs: Vec<(OutputHandle, Vec<String>)>,
        status: StreamStatusView,
    ) -> Self {
        let mut name_index: FxHashMap<String, SmallVec<[usize; 2]>> = FxHashMap::default();
        let mut select_all = Vec::new();
        let mut handles = Vec::with_capacity(outputs.len());

        for (idx, (handle, names)) in outputs.into_iter().enumerate() {
            if names.is_empty() {
                select_all.push(idx);
            } else {
                for name in names {
                    name_index.entry(name).or_default().push(idx);
                }
            }
            handles.push(handle);
        }

        let sink_count = handles.len();
        Self {
            selectors,
            outputs: handles,
            name_index,
            select_all,
            selected_marks: vec![false; sink_count],
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

    /// Marks every sink the record is destined for. Returns the index of the
    /// last marked sink, or `None` when the record selects nothing.
    fn mark_targets(&mut self, record: &StreamRecord) -> Option<usize> {
        self.selected_marks.fill(false);
        for &idx in &self.select_all {
            self.selected_marks[idx] = true;
        }
        for selector in &self.selectors {
            for name in selector.select(record) {
                if let Some(indices) = self.name_index.get(name.as_str()) {
                    for &idx in indices {
                        self.selected_marks[idx] = true;
                    }
                }
            }
        }
        self.selected_marks.iter().rposition(|&marked| marked)
    }

    pub(crate) fn collect(&mut self, record: &StreamRecord) -> Result<(), ChainError> {
        if self.mark_targets(record).is_none() {
            return Ok(());
        }
        // Every selected sink observes the same record; nothing is copied.
        for idx in 0..self.outputs.len() {
            if self.selected_marks[idx] {
                self.outputs[idx].borrow_mut().collect(record)?;
            }
        }
        Ok(())
    }

    pub(crate) fn collect_side(
        &mut self,
        tag: &OutputTag,
        record: &StreamRecord,
    ) -> Result<(), ChainError> {
        // Side outputs are not routed by selectors: every sink is offered
        // the record and filters on its own tag.
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

/// [`DirectedOutput`] variant used when object reuse is disabled: every
/// selected sink except the last receives a shallow copy, the last receives
/// the original.
pub struct CopyingDirectedOutput {
    inner: DirectedOutput,
}

impl CopyingDirectedOutput {
    /// Creates a copying directed sink; arguments as [`DirectedOutput::new`].
    #[must_use]
    pub fn new(
        selectors: Vec<Arc<dyn OutputSelector>>,
        outputs: Vec<(OutputHandle, Vec<String>)>,
        status: StreamStatusView,
    ) -> Self {
        Self {
            inner: DirectedOutput::new(selectors, outputs, status),
        }
    }

    /// The gauge tracking the last watermark this sink processed.
    #[must_use]
    pub fn watermark_gauge(&self) -> &WatermarkGauge {
        &self.inner.watermark_gauge
    }

    pub(crate) fn collect(&mut self, record: &StreamRecord) -> Result<(), ChainError> {
        let Some(last) = self.inner.mark_targets(record) else {
            return Ok(());
        };
        for idx in 0..last {
            if self.inner.selected_marks[idx] {
                let shallow_copy = record.clone();
                self.inner.outputs[idx].borrow_mut().collect(&shallow_copy)?;
            }
        }
        // Don't copy for the last selected output.
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
