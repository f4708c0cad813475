//! Error types for chain construction and the per-record path.

use crate::config::NodeId;
use crate::operator::OperatorError;
use crate::serializer::SerializerError;
use crate::writer::WriterError;

/// Errors raised while building or running an operator chain.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// A downstream operator invoked from inside the chain failed. The
    /// original cause is preserved as the error source.
    #[error("could not forward element to next operator: {0}")]
    ChainedOperator(#[source] Box<ChainError>),

    /// Operator user code failed.
    #[error(transparent)]
    Operator(#[from] OperatorError),

    /// A record pushed through a tagged sink did not match the side
    /// output's declared element type.
    #[error(
        "failed to push record to side output '{tag_id}': record type does not match \
         the side output's element type. This can occur when multiple OutputTags with \
         different types but identical names are being used"
    )]
    SideOutputTypeMismatch {
        /// The offending tag's id.
        tag_id: String,
    },

    /// A network record writer failed.
    #[error(transparent)]
    Writer(#[from] WriterError),

    /// Record encoding or copying failed.
    #[error(transparent)]
    Serializer(#[from] SerializerError),

    /// The number of supplied record writers does not match the chain's
    /// non-chained edges.
    #[error("{writers} record writers supplied for {edges} non-chained edges")]
    WriterCountMismatch {
        /// Record writers handed to the constructor.
        writers: usize,
        /// Non-chained edges in the configuration.
        edges: usize,
    },

    /// A chained edge targets an operator with no configuration entry.
    #[error("no configuration for chained operator {0}")]
    MissingOperatorConfig(NodeId),

    /// A non-chained edge had no record writer output bound to it.
    #[error("no record writer output bound for edge {edge_source} -> {target}")]
    UnboundOutputEdge {
        /// The producing operator.
        edge_source: NodeId,
        /// The downstream task.
        target: NodeId,
    },
}

impl ChainError {
    /// Wraps a failure raised below a sink as a chained-operator failure.
    pub(crate) fn chained(cause: impl Into<ChainError>) -> Self {
        ChainError::ChainedOperator(Box::new(cause.into()))
    }

    /// Chained-operator failure for a side-output element type mismatch.
    pub(crate) fn chained_side_output_mismatch(tag_id: &str) -> Self {
        ChainError::chained(ChainError::SideOutputTypeMismatch {
            tag_id: tag_id.to_string(),
        })
    }

    /// Whether this is a chained-operator failure.
    #[must_use]
    pub fn is_chained_operator(&self) -> bool {
        matches!(self, ChainError::ChainedOperator(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_chained_wrapper_preserves_cause() {
        let err = ChainError::chained(OperatorError::ProcessingFailed("boom".into()));
        assert!(err.is_chained_operator());
        assert!(err.source().is_some());
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_side_output_mismatch_message() {
        let err = ChainError::chained_side_output_mismatch("late-data");
        let message = err.to_string();
        assert!(message.contains("late-data"));
        assert!(message
            .contains("multiple OutputTags with different types but identical names"));
    }
}
