//! # Stream Operators
//!
//! The operator contract the chain drives. Operators are black boxes to the
//! chain: it pushes elements and control events into them and invokes their
//! lifecycle hooks, but never inspects what they compute.
//!
//! Optional capabilities (bounded-input hooks, two-input heads) are modeled
//! as capability queries on the base trait rather than a type hierarchy: a
//! caller asks `as_bounded_one_input()` and gets `Some` only if the operator
//! participates in end-of-input finalization.

use std::cell::RefCell;
use std::rc::Rc;

use crate::chain::output::OutputHandle;
use crate::config::StreamConfig;
use crate::metrics::OperatorMetricGroup;
use crate::record::{LatencyMarker, StreamRecord, Watermark};

/// Shared handle to a constructed operator.
///
/// The chain controller's reverse-topological operator list and the chaining
/// output feeding the operator hold the same handle. Confined to the task
/// thread.
pub type OperatorHandle = Rc<RefCell<Box<dyn StreamOperator>>>;

/// Errors raised by operator user code.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    /// Element or control-event processing failed.
    #[error("processing failed: {0}")]
    ProcessingFailed(String),

    /// The operator could not be closed cleanly.
    #[error("close failed: {0}")]
    CloseFailed(String),

    /// The operator was constructed with an invalid configuration.
    #[error("invalid operator configuration: {0}")]
    InvalidConfiguration(String),
}

/// How the head operator consumes the task's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// The operator produces elements itself and has no task input.
    Source,
    /// The operator consumes a single task input.
    OneInput,
    /// The operator consumes two task inputs (head position only).
    TwoInput,
}

/// Hook for operators that want to act when their single logical input ends.
pub trait BoundedOneInput {
    /// Called once when all inputs of the chain have ended. The operator may
    /// still emit records downstream from this hook.
    ///
    /// # Errors
    ///
    /// Propagated to the task as a chained-operator failure.
    fn end_input(&mut self) -> Result<(), OperatorError>;
}

/// Hook for multi-input heads that want to act per ended input.
pub trait BoundedMultiInput {
    /// Called when the task input `input_id` (1-based) ends.
    ///
    /// # Errors
    ///
    /// Propagated to the task as a chained-operator failure.
    fn end_input(&mut self, input_id: u32) -> Result<(), OperatorError>;
}

/// A processing unit fused into an operator chain.
///
/// All methods are invoked from the task thread. An operator that emits
/// output does so through the [`OutputHandle`] it received at construction;
/// the chain never pulls from an operator.
pub trait StreamOperator {
    /// Processes one element from this operator's (chain-internal) input.
    ///
    /// The record is borrowed: with object reuse enabled the same record
    /// instance is visible to sibling branches, so implementations clone
    /// whatever they retain or forward.
    ///
    /// # Errors
    ///
    /// Propagated to the task as a chained-operator failure.
    fn process_element(&mut self, record: &StreamRecord) -> Result<(), OperatorError>;

    /// Processes a watermark. Operators enforce their own monotonicity and
    /// usually forward the watermark to their output.
    ///
    /// # Errors
    ///
    /// Propagated to the task as a chained-operator failure.
    fn process_watermark(&mut self, watermark: Watermark) -> Result<(), OperatorError>;

    /// Processes a latency probe. The default forwards nothing.
    ///
    /// # Errors
    ///
    /// Propagated to the task as a chained-operator failure.
    fn process_latency_marker(&mut self, _marker: LatencyMarker) -> Result<(), OperatorError> {
        Ok(())
    }

    /// Sets the keyed-state context from an incoming element, before
    /// `process_element` is invoked for it. No-op for unkeyed operators.
    ///
    /// # Errors
    ///
    /// Propagated to the task as a chained-operator failure.
    fn set_key_context(&mut self, _record: &StreamRecord) -> Result<(), OperatorError> {
        Ok(())
    }

    /// Hook invoked on every operator, head to tail, before checkpoint
    /// barriers are broadcast downstream.
    ///
    /// # Errors
    ///
    /// Propagated to the caller that initiated the checkpoint.
    fn prepare_snapshot_pre_barrier(&mut self, _checkpoint_id: u64) -> Result<(), OperatorError> {
        Ok(())
    }

    /// Closes the operator at end of stream.
    ///
    /// # Errors
    ///
    /// Propagated to the task as a chained-operator failure.
    fn close(&mut self) -> Result<(), OperatorError>;

    /// The operator's metric group.
    fn metrics(&self) -> &OperatorMetricGroup;

    /// Mutable access to the metric group, used by the chain builder to
    /// register watermark gauges.
    fn metrics_mut(&mut self) -> &mut OperatorMetricGroup;

    /// How this operator consumes task input. Only meaningful for the head.
    fn input_kind(&self) -> InputKind {
        InputKind::OneInput
    }

    /// Capability query: end-of-input hook for single-input operators.
    fn as_bounded_one_input(&mut self) -> Option<&mut dyn BoundedOneInput> {
        None
    }

    /// Capability query: per-input end hook for two-input heads.
    fn as_bounded_multi_input(&mut self) -> Option<&mut dyn BoundedMultiInput> {
        None
    }
}

/// Creates operator instances during chain construction.
///
/// The factory receives the operator's static configuration and the output
/// sink the new operator must write to.
pub trait OperatorFactory {
    /// Instantiates the operator.
    ///
    /// # Errors
    ///
    /// A failure here aborts chain construction; already-created network
    /// writer outputs are closed by the chain builder.
    fn create(
        &self,
        config: &StreamConfig,
        output: OutputHandle,
    ) -> Result<Box<dyn StreamOperator>, OperatorError>;
}

/// Bitmask over 1-based task input ids, tracking which inputs have ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputSelection {
    mask: u64,
}

impl InputSelection {
    /// The sentinel selecting every input.
    pub const ALL: InputSelection = InputSelection { mask: u64::MAX };

    /// Creates an empty selection.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether `input_id` (1-based) is selected. Always true for
    /// [`InputSelection::ALL`].
    #[must_use]
    pub fn is_selected(self, input_id: u32) -> bool {
        debug_assert!(input_id >= 1);
        self.mask & (1 << (input_id - 1)) != 0
    }

    /// Returns a selection that additionally selects `input_id` (1-based).
    #[must_use]
    pub fn select(self, input_id: u32) -> Self {
        debug_assert!(input_id >= 1);
        Self {
            mask: self.mask | (1 << (input_id - 1)),
        }
    }

    /// Whether every input is selected.
    #[must_use]
    pub fn are_all_inputs_selected(self) -> bool {
        self.mask == u64::MAX
    }

    /// The raw bitmask.
    #[must_use]
    pub fn input_mask(self) -> u64 {
        self.mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_selection_starts_empty() {
        let selection = InputSelection::none();
        assert_eq!(selection.input_mask(), 0);
        assert!(!selection.is_selected(1));
        assert!(!selection.are_all_inputs_selected());
    }

    #[test]
    fn test_input_selection_select() {
        let selection = InputSelection::none().select(2);
        assert!(selection.is_selected(2));
        assert!(!selection.is_selected(1));
        assert!(!selection.are_all_inputs_selected());
    }

    #[test]
    fn test_all_sentinel() {
        assert!(InputSelection::ALL.are_all_inputs_selected());
        assert!(InputSelection::ALL.is_selected(1));
        assert!(InputSelection::ALL.is_selected(64));
    }
}
