//! # Network Record Writers
//!
//! The narrow interface through which the chain hands serialized records and
//! control events to the network output layer. The chain never sees buffers,
//! channels, or backpressure directly; a blocking `write` on a full writer
//! is the engine's designed backpressure path.

use bytes::Bytes;

use crate::record::{LatencyMarker, StreamStatus, Watermark};

/// Errors raised by a network record writer.
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    /// The downstream channel was closed.
    #[error("writer channel closed")]
    Closed,

    /// The write failed in the transport layer.
    #[error("write failed: {0}")]
    Io(String),
}

/// How a checkpoint snapshot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointType {
    /// A regular periodic checkpoint.
    #[default]
    Checkpoint,
    /// A user-triggered savepoint.
    Savepoint,
}

/// Options attached to a checkpoint barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckpointOptions {
    /// The kind of snapshot this barrier announces.
    pub checkpoint_type: CheckpointType,
}

/// A checkpoint barrier broadcast to every downstream channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointBarrier {
    /// Unique identifier of the checkpoint.
    pub checkpoint_id: u64,
    /// Wall-clock timestamp at which the checkpoint was triggered.
    pub timestamp: i64,
    /// Snapshot options.
    pub options: CheckpointOptions,
}

impl CheckpointBarrier {
    /// Creates a barrier for checkpoint `checkpoint_id`.
    #[must_use]
    pub fn new(checkpoint_id: u64, timestamp: i64, options: CheckpointOptions) -> Self {
        Self {
            checkpoint_id,
            timestamp,
            options,
        }
    }
}

/// A non-record event broadcast on every channel of a record writer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A checkpoint barrier.
    Barrier(CheckpointBarrier),
    /// Cancellation of an in-flight checkpoint.
    CancelCheckpoint {
        /// The checkpoint being cancelled.
        checkpoint_id: u64,
    },
    /// Event-time progress.
    Watermark(Watermark),
    /// A latency probe.
    LatencyMarker(LatencyMarker),
    /// A stream-status transition.
    StreamStatus(StreamStatus),
}

/// One task-to-task output: serialized records go to the paired downstream
/// task, events broadcast to all of its channels.
///
/// Exactly one writer backs each non-chained out-edge; writers are supplied
/// to the chain constructor positionally, in
/// [`ChainConfig::out_edges_in_order`](crate::config::ChainConfig::out_edges_in_order)
/// order.
pub trait RecordWriter {
    /// Enqueues one serialized record. May block on backpressure.
    ///
    /// # Errors
    ///
    /// Returns a [`WriterError`] if the channel is closed or the transport
    /// fails; fatal to the task.
    fn write(&mut self, payload: Bytes) -> Result<(), WriterError>;

    /// Broadcasts a non-record event to every downstream channel.
    ///
    /// # Errors
    ///
    /// Returns a [`WriterError`] if the channel is closed or the transport
    /// fails; fatal to the task.
    fn broadcast_event(&mut self, event: &ChannelEvent) -> Result<(), WriterError>;

    /// Flushes buffered records.
    ///
    /// # Errors
    ///
    /// Returns a [`WriterError`] if buffered data cannot be pushed out.
    fn flush(&mut self) -> Result<(), WriterError>;

    /// Releases writer resources.
    ///
    /// # Errors
    ///
    /// Close failures are swallowed and logged by the owning output; they
    /// never abort teardown.
    fn close(&mut self) -> Result<(), WriterError>;
}
