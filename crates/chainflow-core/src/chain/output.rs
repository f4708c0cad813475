//! # Output Sinks
//!
//! [`ChainOutput`] is the uniform emitter an operator writes into: records
//! (main and side-tagged), watermarks, latency markers, and close. It is a
//! closed enum over the seven sink roles the chain builder can wire; the
//! role is fixed at build time, so the per-record path never branches on
//! configuration flags.
//!
//! Every sink reads the task's current stream status through a shared
//! [`StreamStatusView`] and suppresses watermark forwarding while the stream
//! is idle; the sink's watermark gauge updates regardless.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::chain::broadcast::{BroadcastingOutput, CopyingBroadcastingOutput};
use crate::chain::directed::{CopyingDirectedOutput, DirectedOutput};
use crate::chain::error::ChainError;
use crate::chain::writer_output::RecordWriterOutput;
use crate::metrics::{Counter, WatermarkGauge};
use crate::operator::OperatorHandle;
use crate::record::{LatencyMarker, OutputTag, StreamRecord, StreamStatusView, Watermark};
use crate::serializer::{RecordSerializer, SerializerError};

/// Shared handle to a sink.
///
/// Operators hold the handle to the sink they write into; the chain
/// controller keeps a clone of the head's handle as the chain entry point.
/// Confined to the task thread.
pub type OutputHandle = Rc<RefCell<ChainOutput>>;

/// Wraps a sink into a shareable [`OutputHandle`].
#[must_use]
pub fn handle(output: ChainOutput) -> OutputHandle {
    Rc::new(RefCell::new(output))
}

/// A sink in the chain's output tree.
///
/// The variants cover the three roles a producer's output can take —
/// invoke the next operator in-process, fan out to several sinks, or hand
/// records to a network writer — each with a copying twin chosen at build
/// time when object reuse is disabled.
pub enum ChainOutput {
    /// Invokes the next chained operator directly.
    Chaining(ChainingOutput),
    /// Invokes the next chained operator on a defensive deep copy.
    CopyingChaining(CopyingChainingOutput),
    /// Fans out the same record to every downstream sink without copying.
    Broadcasting(BroadcastingOutput),
    /// Fans out, shallow-copying the record for all but the last sink.
    CopyingBroadcasting(CopyingBroadcastingOutput),
    /// Routes through user output selectors.
    Directed(DirectedOutput),
    /// Routes through user output selectors, shallow-copying per recipient.
    CopyingDirected(CopyingDirectedOutput),
    /// Hands records to a network record writer. Shared with the chain
    /// controller, which owns writer lifecycle.
    Writer(Rc<RefCell<RecordWriterOutput>>),
}

impl ChainOutput {
    /// Emits a record to the main stream.
    ///
    /// The record is handed down by reference: non-copying sinks forward the
    /// same borrow all the way to the consuming operator with zero copies;
    /// copying sinks materialize their own copy first.
    ///
    /// # Errors
    ///
    /// Failures below this sink surface as chained-operator failures;
    /// writer failures propagate as-is.
    pub fn collect(&mut self, record: &StreamRecord) -> Result<(), ChainError> {
        match self {
            ChainOutput::Chaining(out) => out.collect(record),
            ChainOutput::CopyingChaining(out) => out.collect(record),
            ChainOutput::Broadcasting(out) => out.collect(record),
            ChainOutput::CopyingBroadcasting(out) => out.collect(record),
            ChainOutput::Directed(out) => out.collect(record),
            ChainOutput::CopyingDirected(out) => out.collect(record),
            ChainOutput::Writer(out) => out.borrow_mut().collect(record),
        }
    }

    /// Emits a record to the side output identified by `tag`.
    ///
    /// # Errors
    ///
    /// As [`collect`](Self::collect); additionally a tagged sink with a
    /// mismatched element type raises a chained-operator failure naming the
    /// tag.
    pub fn collect_side(
        &mut self,
        tag: &OutputTag,
        record: &StreamRecord,
    ) -> Result<(), ChainError> {
        match self {
            ChainOutput::Chaining(out) => out.collect_side(tag, record),
            ChainOutput::CopyingChaining(out) => out.collect_side(tag, record),
            ChainOutput::Broadcasting(out) => out.collect_side(tag, record),
            ChainOutput::CopyingBroadcasting(out) => out.collect_side(tag, record),
            ChainOutput::Directed(out) => out.collect_side(tag, record),
            ChainOutput::CopyingDirected(out) => out.collect_side(tag, record),
            ChainOutput::Writer(out) => out.borrow_mut().collect_side(tag, record),
        }
    }

    /// Propagates event-time progress. The gauge updates unconditionally;
    /// forwarding is suppressed while the stream is idle.
    ///
    /// # Errors
    ///
    /// As [`collect`](Self::collect).
    pub fn emit_watermark(&mut self, watermark: Watermark) -> Result<(), ChainError> {
        match self {
            ChainOutput::Chaining(out) => out.emit_watermark(watermark),
            ChainOutput::CopyingChaining(out) => out.emit_watermark(watermark),
            ChainOutput::Broadcasting(out) => out.emit_watermark(watermark),
            ChainOutput::CopyingBroadcasting(out) => out.emit_watermark(watermark),
            ChainOutput::Directed(out) => out.emit_watermark(watermark),
            ChainOutput::CopyingDirected(out) => out.emit_watermark(watermark),
            ChainOutput::Writer(out) => out.borrow_mut().emit_watermark(watermark),
        }
    }

    /// Propagates a latency probe.
    ///
    /// # Errors
    ///
    /// As [`collect`](Self::collect).
    pub fn emit_latency_marker(&mut self, marker: LatencyMarker) -> Result<(), ChainError> {
        match self {
            ChainOutput::Chaining(out) => out.emit_latency_marker(marker),
            ChainOutput::CopyingChaining(out) => out.emit_latency_marker(marker),
            ChainOutput::Broadcasting(out) => out.emit_latency_marker(marker),
            ChainOutput::CopyingBroadcasting(out) => out.emit_latency_marker(marker),
            ChainOutput::Directed(out) => out.emit_latency_marker(marker),
            ChainOutput::CopyingDirected(out) => out.emit_latency_marker(marker),
            ChainOutput::Writer(out) => out.borrow_mut().emit_latency_marker(marker),
        }
    }

    /// Signals end-of-stream to this sink.
    ///
    /// # Errors
    ///
    /// Operator close failures surface as chained-operator failures. A
    /// network writer output never fails here.
    pub fn close(&mut self) -> Result<(), ChainError> {
        match self {
            ChainOutput::Chaining(out) => out.close(),
            ChainOutput::CopyingChaining(out) => out.close(),
            ChainOutput::Broadcasting(out) => out.close(),
            ChainOutput::CopyingBroadcasting(out) => out.close(),
            ChainOutput::Directed(out) => out.close(),
            ChainOutput::CopyingDirected(out) => out.close(),
            ChainOutput::Writer(out) => {
                out.borrow_mut().close();
                Ok(())
            }
        }
    }

    /// The gauge tracking the last watermark this sink processed.
    #[must_use]
    pub fn watermark_gauge(&self) -> WatermarkGauge {
        match self {
            ChainOutput::Chaining(out) => out.watermark_gauge.clone(),
            ChainOutput::CopyingChaining(out) => out.inner.watermark_gauge.clone(),
            ChainOutput::Broadcasting(out) => out.watermark_gauge().clone(),
            ChainOutput::CopyingBroadcasting(out) => out.watermark_gauge().clone(),
            ChainOutput::Directed(out) => out.watermark_gauge().clone(),
            ChainOutput::CopyingDirected(out) => out.watermark_gauge().clone(),
            ChainOutput::Writer(out) => out.borrow().watermark_gauge().clone(),
        }
    }
}

/// Sink that pushes records straight into the next chained operator.
///
/// Bound to one downstream operator and at most one side-output tag. An
/// untagged instance forwards only main-stream emissions; a tagged instance
/// forwards only emissions for its own tag.
pub struct ChainingOutput {
    operator: OperatorHandle,
    num_records_in: Counter,
    pub(crate) watermark_gauge: WatermarkGauge,
    status: StreamStatusView,
    output_tag: Option<OutputTag>,
}

impl ChainingOutput {
    /// Binds a sink to `operator`, cloning the operator's record-in counter.
    #[must_use]
    pub fn new(
        operator: OperatorHandle,
        status: StreamStatusView,
        output_tag: Option<OutputTag>,
    ) -> Self {
        let num_records_in = operator.borrow().metrics().num_records_in().clone();
        Self {
            operator,
            num_records_in,
            watermark_gauge: WatermarkGauge::new(),
            status,
            output_tag,
        }
    }

    fn push_to_operator(&mut self, record: &StreamRecord) -> Result<(), ChainError> {
        self.num_records_in.inc();
        let mut operator = self.operator.borrow_mut();
        operator
            .set_key_context(record)
            .map_err(ChainError::chained)?;
        operator.process_element(record).map_err(ChainError::chained)
    }

    fn collect(&mut self, record: &StreamRecord) -> Result<(), ChainError> {
        if self.output_tag.is_some() {
            // This sink only carries its side output; the producer's main
            // stream belongs to a sibling sink.
            return Ok(());
        }
        self.push_to_operator(record)
    }

    fn collect_side(&mut self, tag: &OutputTag, record: &StreamRecord) -> Result<(), ChainError> {
        match &self.output_tag {
            Some(own) if own == tag => self.push_to_operator(record),
            _ => Ok(()),
        }
    }

    fn emit_watermark(&mut self, watermark: Watermark) -> Result<(), ChainError> {
        self.watermark_gauge.set_current_watermark(watermark.timestamp());
        if self.status.is_active() {
            self.operator
                .borrow_mut()
                .process_watermark(watermark)
                .map_err(ChainError::chained)?;
        }
        Ok(())
    }

    fn emit_latency_marker(&mut self, marker: LatencyMarker) -> Result<(), ChainError> {
        self.operator
            .borrow_mut()
            .process_latency_marker(marker)
            .map_err(ChainError::chained)
    }

    fn close(&mut self) -> Result<(), ChainError> {
        self.operator.borrow_mut().close().map_err(ChainError::chained)
    }
}

/// [`ChainingOutput`] variant that deep-copies every record before hand-off,
/// chosen when object reuse is disabled.
pub struct CopyingChainingOutput {
    pub(crate) inner: ChainingOutput,
    serializer: Arc<dyn RecordSerializer>,
}

impl CopyingChainingOutput {
    /// Binds a copying sink to `operator`, using `serializer` (the
    /// operator's input codec) for defensive copies.
    #[must_use]
    pub fn new(
        operator: OperatorHandle,
        serializer: Arc<dyn RecordSerializer>,
        status: StreamStatusView,
        output_tag: Option<OutputTag>,
    ) -> Self {
        Self {
            inner: ChainingOutput::new(operator, status, output_tag),
            serializer,
        }
    }

    fn push_to_operator(&mut self, record: &StreamRecord) -> Result<(), ChainError> {
        self.inner.num_records_in.inc();

        let copy = match self.serializer.copy(record) {
            Ok(copy) => copy,
            Err(err @ SerializerError::SchemaMismatch { .. }) => {
                return Err(match &self.inner.output_tag {
                    Some(tag) => ChainError::chained_side_output_mismatch(tag.id()),
                    None => ChainError::chained(err),
                });
            }
            Err(err) => return Err(ChainError::chained(err)),
        };
        let mut operator = self.inner.operator.borrow_mut();
        operator.set_key_context(&copy).map_err(ChainError::chained)?;
        operator.process_element(&copy).map_err(ChainError::chained)
    }

    fn collect(&mut self, record: &StreamRecord) -> Result<(), ChainError> {
        if self.inner.output_tag.is_some() {
            return Ok(());
        }
        self.push_to_operator(record)
    }

    fn collect_side(&mut self, tag: &OutputTag, record: &StreamRecord) -> Result<(), ChainError> {
        match &self.inner.output_tag {
            Some(own) if own == tag => self.push_to_operator(record),
            _ => Ok(()),
        }
    }

    fn emit_watermark(&mut self, watermark: Watermark) -> Result<(), ChainError> {
        self.inner.emit_watermark(watermark)
    }

    fn emit_latency_marker(&mut self, marker: LatencyMarker) -> Result<(), ChainError> {
        self.inner.emit_latency_marker(marker)
    }

    fn close(&mut self) -> Result<(), ChainError> {
        self.inner.close()
    }
}
