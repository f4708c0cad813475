//! # Network Writer Output
//!
//! The terminal sink of a chain: records are serialized and enqueued on a
//! network [`RecordWriter`]; watermarks, latency markers, stream status, and
//! checkpoint barriers are broadcast to every downstream channel as
//! non-record events. Flushing is deferred to the writer's own batching.

use std::sync::Arc;

use tracing::warn;

use crate::chain::error::ChainError;
use crate::metrics::WatermarkGauge;
use crate::record::{LatencyMarker, OutputTag, StreamRecord, StreamStatus, StreamStatusView, Watermark};
use crate::serializer::RecordSerializer;
use crate::writer::{ChannelEvent, RecordWriter};

/// Terminal chain sink wrapping one network record writer.
///
/// An untagged instance carries the producer's main stream; a tagged
/// instance carries exactly one side output. Owned by the chain controller.
pub struct RecordWriterOutput {
    writer: Box<dyn RecordWriter>,
    serializer: Arc<dyn RecordSerializer>,
    output_tag: Option<OutputTag>,
    status: StreamStatusView,
    watermark_gauge: WatermarkGauge,
    closed: bool,
}

impl RecordWriterOutput {
    /// Binds `writer` to an out-edge carrying elements encoded by
    /// `serializer`, optionally restricted to the side output `output_tag`.
    #[must_use]
    pub fn new(
        writer: Box<dyn RecordWriter>,
        serializer: Arc<dyn RecordSerializer>,
        output_tag: Option<OutputTag>,
        status: StreamStatusView,
    ) -> Self {
        Self {
            writer,
            serializer,
            output_tag,
            status,
            watermark_gauge: WatermarkGauge::new(),
            closed: false,
        }
    }

    fn serialize_and_write(&mut self, record: &StreamRecord) -> Result<(), ChainError> {
        let payload = self.serializer.serialize(record)?;
        self.writer.write(payload)?;
        Ok(())
    }

    /// Emits a main-stream record. Tagged instances drop untagged emits.
    ///
    /// # Errors
    ///
    /// Serialization and writer failures propagate; fatal to the task.
    pub fn collect(&mut self, record: &StreamRecord) -> Result<(), ChainError> {
        if self.output_tag.is_some() {
            return Ok(());
        }
        self.serialize_and_write(record)
    }

    /// Emits a side-output record. Forwarded only when `tag` matches this
    /// instance's own tag.
    ///
    /// # Errors
    ///
    /// Serialization and writer failures propagate; fatal to the task.
    pub fn collect_side(
        &mut self,
        tag: &OutputTag,
        record: &StreamRecord,
    ) -> Result<(), ChainError> {
        match &self.output_tag {
            Some(own) if own == tag => self.serialize_and_write(record),
            _ => Ok(()),
        }
    }

    /// Broadcasts event-time progress downstream. Suppressed while the
    /// stream is idle; the gauge updates regardless.
    ///
    /// # Errors
    ///
    /// Writer failures propagate; fatal to the task.
    pub fn emit_watermark(&mut self, watermark: Watermark) -> Result<(), ChainError> {
        self.watermark_gauge.set_current_watermark(watermark.timestamp());
        if self.status.is_active() {
            self.writer
                .broadcast_event(&ChannelEvent::Watermark(watermark))?;
        }
        Ok(())
    }

    /// Broadcasts a latency probe downstream.
    ///
    /// # Errors
    ///
    /// Writer failures propagate; fatal to the task.
    pub fn emit_latency_marker(&mut self, marker: LatencyMarker) -> Result<(), ChainError> {
        self.writer
            .broadcast_event(&ChannelEvent::LatencyMarker(marker))?;
        Ok(())
    }

    /// Broadcasts a stream-status transition downstream.
    ///
    /// # Errors
    ///
    /// Writer failures propagate; fatal to the task.
    pub fn emit_stream_status(&mut self, status: StreamStatus) -> Result<(), ChainError> {
        self.writer
            .broadcast_event(&ChannelEvent::StreamStatus(status))?;
        Ok(())
    }

    /// Broadcasts an arbitrary channel event (checkpoint barriers and cancel
    /// markers) downstream.
    ///
    /// # Errors
    ///
    /// Writer failures propagate; fatal to the task.
    pub fn broadcast_event(&mut self, event: &ChannelEvent) -> Result<(), ChainError> {
        self.writer.broadcast_event(event)?;
        Ok(())
    }

    /// Flushes buffered records on the writer.
    ///
    /// # Errors
    ///
    /// Writer failures propagate; fatal to the task.
    pub fn flush(&mut self) -> Result<(), ChainError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Releases the writer. Idempotent and infallible: close failures are
    /// logged, never propagated, so teardown always completes.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.writer.close() {
            warn!(error = %err, "failed to close record writer output");
        }
    }

    /// Whether this output has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The gauge tracking the last watermark this sink processed.
    #[must_use]
    pub fn watermark_gauge(&self) -> &WatermarkGauge {
        &self.watermark_gauge
    }
}
