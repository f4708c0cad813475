//! # Stream Elements
//!
//! The element types that flow through an operator chain: data records,
//! watermarks, latency markers, and the stream status scalar that gates
//! watermark forwarding.
//!
//! A record's payload is an Arrow `RecordBatch` behind an `Arc`; the element
//! type of a stream is its Arrow schema. Cloning a [`StreamRecord`] produces
//! a new envelope sharing the same value handle (a shallow copy). Deep copies
//! go through a [`RecordSerializer`](crate::serializer::RecordSerializer).

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;

use crate::config::NodeId;

/// A record flowing through the chain: a value paired with an optional
/// event-time timestamp.
///
/// `Clone` is a shallow copy: the envelope is duplicated, the value handle is
/// shared.
#[derive(Debug, Clone)]
pub struct StreamRecord {
    /// Record payload. Shared via `Arc` so fan-out can hand the same value
    /// to several consumers without copying buffers.
    pub value: Arc<RecordBatch>,
    /// Event-time timestamp in milliseconds, if one has been assigned.
    pub timestamp: Option<i64>,
}

impl StreamRecord {
    /// Creates a record without an event-time timestamp.
    #[must_use]
    pub fn new(value: RecordBatch) -> Self {
        Self {
            value: Arc::new(value),
            timestamp: None,
        }
    }

    /// Creates a record carrying an event-time timestamp.
    #[must_use]
    pub fn with_timestamp(value: RecordBatch, timestamp: i64) -> Self {
        Self {
            value: Arc::new(value),
            timestamp: Some(timestamp),
        }
    }

    /// Returns a new envelope holding `value`, keeping this record's
    /// timestamp. Used when a deep copy replaces the payload.
    #[must_use]
    pub fn with_value(&self, value: RecordBatch) -> Self {
        Self {
            value: Arc::new(value),
            timestamp: self.timestamp,
        }
    }

    /// The schema of the record's payload.
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        self.value.schema()
    }

    /// Whether two records share the same value handle.
    #[must_use]
    pub fn shares_value(&self, other: &StreamRecord) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

/// A watermark indicating event-time progress.
///
/// Watermarks are monotonically increasing assertions that no elements with
/// timestamps earlier than the watermark will arrive on the stream that
/// carries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(pub i64);

impl Watermark {
    /// The end-of-time watermark, emitted when a bounded stream finishes.
    pub const MAX: Watermark = Watermark(i64::MAX);

    /// Creates a new watermark with the given timestamp.
    #[inline]
    #[must_use]
    pub fn new(timestamp: i64) -> Self {
        Self(timestamp)
    }

    /// Returns the watermark timestamp in milliseconds.
    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Watermark({})", self.0)
    }
}

/// A latency probe injected at a source and forwarded through the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyMarker {
    /// Wall-clock timestamp at which the marker was created.
    pub marked_at: i64,
    /// The source operator that emitted the marker.
    pub source: NodeId,
}

impl LatencyMarker {
    /// Creates a latency marker originating from `source` at `marked_at`.
    #[must_use]
    pub fn new(marked_at: i64, source: NodeId) -> Self {
        Self { marked_at, source }
    }
}

/// Status of the stream feeding the chain.
///
/// While a stream is [`Idle`](StreamStatus::Idle), watermarks are not
/// forwarded to operators or downstream tasks; they would otherwise advance
/// event time based on a stream that is not producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamStatus {
    /// The stream is producing elements; watermarks advance normally.
    #[default]
    Active,
    /// The stream is temporarily not producing; watermarks are suppressed.
    Idle,
}

impl StreamStatus {
    /// Whether watermark forwarding is currently allowed.
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, StreamStatus::Active)
    }
}

/// Shared, non-owning view of the task's current stream status.
///
/// The chain controller owns the authoritative toggle; every sink holds a
/// clone of this view and reads it when deciding whether to forward a
/// watermark. Confined to the task thread.
#[derive(Debug, Clone, Default)]
pub struct StreamStatusView(Rc<Cell<StreamStatus>>);

impl StreamStatusView {
    /// Creates a view with the stream initially [`StreamStatus::Active`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the current status.
    #[inline]
    #[must_use]
    pub fn get(&self) -> StreamStatus {
        self.0.get()
    }

    /// Whether the stream is currently active.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0.get().is_active()
    }

    /// Replaces the current status. Only the chain controller writes here.
    pub(crate) fn set(&self, status: StreamStatus) {
        self.0.set(status);
    }
}

/// Identifier of a side-output stream.
///
/// A tag pairs a stream id with the element type (schema) of the side
/// output. Two tags are equal when both the id and the schema fields match;
/// an id collision between tags of different types is a configuration error
/// surfaced when a record is pushed through the mismatched sink.
#[derive(Debug, Clone)]
pub struct OutputTag {
    id: String,
    schema: SchemaRef,
}

impl OutputTag {
    /// Creates a tag for the side output `id` carrying elements of `schema`.
    #[must_use]
    pub fn new(id: impl Into<String>, schema: SchemaRef) -> Self {
        Self {
            id: id.into(),
            schema,
        }
    }

    /// The side output's stream id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The declared element type of the side output.
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }
}

impl PartialEq for OutputTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.schema.fields() == other.schema.fields()
    }
}

impl fmt::Display for OutputTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputTag({})", self.id)
    }
}
