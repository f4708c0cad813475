//! # Record Serialization
//!
//! [`RecordSerializer`] is the per-edge codec the chain uses for two
//! purposes: producing deep copies of records when object reuse is disabled,
//! and turning records into the byte payloads handed to network record
//! writers.
//!
//! The default implementation, [`IpcBatchSerializer`], encodes the payload as
//! an Arrow IPC stream. A deep copy is a serialize/deserialize round trip,
//! which guarantees the copy owns fresh buffers.

use std::io::Cursor;
use std::sync::Arc;

use arrow_ipc::reader::StreamReader;
use arrow_ipc::writer::StreamWriter;
use arrow_schema::{ArrowError, Schema, SchemaRef};
use bytes::Bytes;

use crate::record::StreamRecord;

/// Sentinel encoded in the timestamp prefix when a record carries no
/// event-time timestamp.
const NO_TIMESTAMP: i64 = i64::MIN;

/// Errors raised while copying or encoding records.
#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
    /// The underlying Arrow IPC codec failed.
    #[error("arrow codec error: {0}")]
    Arrow(#[from] ArrowError),

    /// The record's schema does not match the serializer's declared schema.
    #[error("record schema does not match serializer schema: expected [{expected}], got [{actual}]")]
    SchemaMismatch {
        /// The serializer's declared schema, rendered for diagnostics.
        expected: String,
        /// The offending record's schema, rendered for diagnostics.
        actual: String,
    },

    /// A payload decoded to zero record batches.
    #[error("payload contained no record batch")]
    EmptyPayload,

    /// A payload was too short to carry the timestamp prefix.
    #[error("payload truncated: {0} bytes")]
    Truncated(usize),
}

/// Per-edge codec for stream records.
///
/// Implementations are shared (`Arc`) between the configuration tree and the
/// sinks built from it; they hold no per-record state.
pub trait RecordSerializer {
    /// The declared element type of the stream this serializer encodes.
    /// An empty schema is type-erased and accepts any payload.
    fn schema(&self) -> SchemaRef;

    /// Produces a deep copy of `record`: the returned record's value shares
    /// no buffers with the input.
    ///
    /// # Errors
    ///
    /// Returns [`SerializerError::SchemaMismatch`] if the record does not
    /// match the declared schema, or an Arrow error from the codec.
    fn copy(&self, record: &StreamRecord) -> Result<StreamRecord, SerializerError>;

    /// Encodes `record` into the wire payload handed to a record writer.
    ///
    /// # Errors
    ///
    /// Returns [`SerializerError::SchemaMismatch`] if the record does not
    /// match the declared schema, or an Arrow error from the codec.
    fn serialize(&self, record: &StreamRecord) -> Result<Bytes, SerializerError>;

    /// Decodes a payload produced by [`serialize`](Self::serialize).
    ///
    /// # Errors
    ///
    /// Returns a decode error if the payload is truncated or not a valid
    /// Arrow IPC stream.
    fn deserialize(&self, payload: &[u8]) -> Result<StreamRecord, SerializerError>;
}

/// Whether a payload of schema `actual` is acceptable for a stream declared
/// as `declared`.
///
/// An empty declared schema is type-erased and compatible with anything;
/// otherwise field count and data types must match.
#[must_use]
pub fn schemas_compatible(declared: &Schema, actual: &Schema) -> bool {
    if declared.fields().is_empty() {
        return true;
    }
    if declared.fields().len() != actual.fields().len() {
        return false;
    }
    declared
        .fields()
        .iter()
        .zip(actual.fields().iter())
        .all(|(d, a)| d.data_type() == a.data_type())
}

/// Arrow IPC stream codec for a fixed schema.
#[derive(Debug, Clone)]
pub struct IpcBatchSerializer {
    schema: SchemaRef,
}

impl IpcBatchSerializer {
    /// Creates a serializer for streams of `schema`.
    #[must_use]
    pub fn new(schema: SchemaRef) -> Self {
        Self { schema }
    }

    /// Creates a type-erased serializer that accepts any payload.
    #[must_use]
    pub fn type_erased() -> Self {
        Self {
            schema: Arc::new(Schema::empty()),
        }
    }

    fn check(&self, record: &StreamRecord) -> Result<(), SerializerError> {
        let actual = record.schema();
        if schemas_compatible(&self.schema, &actual) {
            Ok(())
        } else {
            Err(SerializerError::SchemaMismatch {
                expected: format_fields(&self.schema),
                actual: format_fields(&actual),
            })
        }
    }

    fn encode_batch(record: &StreamRecord) -> Result<Vec<u8>, SerializerError> {
        let mut buf = Vec::new();
        {
            // Encode with the record's own schema; the declared schema may
            // be the type-erased wildcard.
            let mut writer = StreamWriter::try_new(&mut buf, record.schema().as_ref())?;
            writer.write(&record.value)?;
            writer.finish()?;
        }
        Ok(buf)
    }

    fn decode_batch(payload: &[u8]) -> Result<arrow_array::RecordBatch, SerializerError> {
        let mut reader = StreamReader::try_new(Cursor::new(payload), None)?;
        reader
            .next()
            .ok_or(SerializerError::EmptyPayload)?
            .map_err(SerializerError::from)
    }
}

impl RecordSerializer for IpcBatchSerializer {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn copy(&self, record: &StreamRecord) -> Result<StreamRecord, SerializerError> {
        self.check(record)?;
        let encoded = Self::encode_batch(record)?;
        let batch = Self::decode_batch(&encoded)?;
        Ok(record.with_value(batch))
    }

    fn serialize(&self, record: &StreamRecord) -> Result<Bytes, SerializerError> {
        self.check(record)?;
        let encoded = Self::encode_batch(record)?;
        let mut payload = Vec::with_capacity(8 + encoded.len());
        payload.extend_from_slice(&record.timestamp.unwrap_or(NO_TIMESTAMP).to_le_bytes());
        payload.extend_from_slice(&encoded);
        Ok(Bytes::from(payload))
    }

    fn deserialize(&self, payload: &[u8]) -> Result<StreamRecord, SerializerError> {
        if payload.len() < 8 {
            return Err(SerializerError::Truncated(payload.len()));
        }
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&payload[..8]);
        let raw_ts = i64::from_le_bytes(prefix);
        let batch = Self::decode_batch(&payload[8..])?;
        Ok(StreamRecord {
            value: Arc::new(batch),
            timestamp: (raw_ts != NO_TIMESTAMP).then_some(raw_ts),
        })
    }
}

fn format_fields(schema: &Schema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| format!("{}: {}", f.name(), f.data_type()))
        .collect::<Vec<_>>()
        .join(", ")
}
