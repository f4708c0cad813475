//! # Operator Chain
//!
//! An [`OperatorChain`] contains all operators executed as one fused unit
//! within a single parallel task. Records entering the head operator flow
//! synchronously through the chained operators — a stack-based descent
//! through nested output sinks, with no queues and no suspension points —
//! and leave the task through network writer outputs or as side outputs.
//!
//! The chain also owns the control plane of the task's output side:
//! stream-status toggling, checkpoint barrier broadcast, end-of-input
//! propagation, and the lifecycle of every network writer output.
//!
//! ## Structure
//!
//! ```text
//!                      ┌────────────────────────────────────────────┐
//!   task input ──────▶ │ head operator                              │
//!                      │   └─ output sink (chaining / fan-out)      │
//!                      │        └─ chained operator                 │
//!                      │             └─ output sink ─▶ record writer │──▶ network
//!                      └────────────────────────────────────────────┘
//! ```
//!
//! Operators are stored in reverse topological order: the highest index is
//! the head, index zero a deepest leaf. Head-to-tail iteration (high to low
//! index) drives `prepare_snapshot_pre_barrier` and end-of-input
//! finalization, so producers run their hooks before the consumers that
//! must still accept their emissions.

pub mod broadcast;
mod builder;
pub mod directed;
pub mod error;
pub mod output;
pub mod writer_output;


pub use broadcast::{BroadcastingOutput, CopyingBroadcastingOutput, XorShift64};
pub use directed::{CopyingDirectedOutput, DirectedOutput};
pub use error::ChainError;
pub use output::{handle, ChainOutput, ChainingOutput, CopyingChainingOutput, OutputHandle};
pub use writer_output::RecordWriterOutput;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::config::ChainConfig;
use crate::operator::{InputKind, InputSelection, OperatorHandle};
use crate::record::{StreamStatus, StreamStatusView};
use crate::writer::{ChannelEvent, CheckpointBarrier, CheckpointOptions, RecordWriter};

/// The fused operator chain of one task.
///
/// Owns every operator and every network writer output; exposes the chain
/// entry point the task's input reader emits into, and the lifecycle and
/// checkpoint operations the task invokes.
pub struct OperatorChain {
    /// All operators of the chain in reverse topological order: the head is
    /// at the highest index.
    all_operators: Vec<OperatorHandle>,
    /// Network writer outputs in out-edge order.
    stream_outputs: Vec<Rc<RefCell<RecordWriterOutput>>>,
    /// The sink the head operator writes into.
    chain_entry_point: OutputHandle,
    head_operator: OperatorHandle,
    /// Current status of the chain's input stream. Watermarks generated by
    /// operators in the chain are blocked while the status is idle.
    status: StreamStatusView,
    /// Tracks which task inputs have seen end-of-input.
    finished_inputs: InputSelection,
}

impl OperatorChain {
    /// Builds the chain from its configuration tree and the record writers
    /// backing its non-chained out-edges.
    ///
    /// `record_writers` correspond positionally to
    /// [`ChainConfig::out_edges_in_order`]; supplying them in any other
    /// order silently miswires outputs, so callers must preserve it.
    ///
    /// # Errors
    ///
    /// Any construction failure after network writer outputs exist closes
    /// every already-created output, then re-raises the error.
    pub fn new(
        config: &ChainConfig,
        record_writers: Vec<Box<dyn RecordWriter>>,
    ) -> Result<Self, ChainError> {
        let status = StreamStatusView::new();
        let built = builder::build_chain(config, record_writers, status.clone())?;

        debug!(
            operators = built.all_operators.len(),
            stream_outputs = built.stream_outputs.len(),
            "assembled operator chain"
        );

        Ok(Self {
            all_operators: built.all_operators,
            stream_outputs: built.stream_outputs,
            chain_entry_point: built.chain_entry_point,
            head_operator: built.head_operator,
            status,
            finished_inputs: InputSelection::none(),
        })
    }

    /// Assembles a chain from pre-built parts, bypassing the builder.
    #[cfg(test)]
    pub(crate) fn from_parts(
        all_operators: Vec<OperatorHandle>,
        stream_outputs: Vec<Rc<RefCell<RecordWriterOutput>>>,
        chain_entry_point: OutputHandle,
        head_operator: OperatorHandle,
        status: StreamStatusView,
    ) -> Self {
        Self {
            all_operators,
            stream_outputs,
            chain_entry_point,
            head_operator,
            status,
            finished_inputs: InputSelection::none(),
        }
    }

    /// The current status of the chain's input stream.
    #[must_use]
    pub fn stream_status(&self) -> StreamStatus {
        self.status.get()
    }

    /// The shared status view sinks consult when gating watermarks.
    #[must_use]
    pub fn stream_status_view(&self) -> StreamStatusView {
        self.status.clone()
    }

    /// Transitions the stream status. A no-op when `status` equals the
    /// current value; otherwise the new status is broadcast once on every
    /// network writer output.
    ///
    /// # Errors
    ///
    /// Writer failures propagate; fatal to the task.
    pub fn toggle_stream_status(&mut self, status: StreamStatus) -> Result<(), ChainError> {
        if status != self.status.get() {
            self.status.set(status);

            // Forward the change to all outgoing connections.
            for output in &self.stream_outputs {
                output.borrow_mut().emit_stream_status(status)?;
            }
        }
        Ok(())
    }

    /// Broadcasts a checkpoint barrier on every network writer output. All
    /// outputs observe the same barrier.
    ///
    /// # Errors
    ///
    /// Writer failures propagate; fatal to the task.
    pub fn broadcast_checkpoint_barrier(
        &mut self,
        checkpoint_id: u64,
        timestamp: i64,
        options: CheckpointOptions,
    ) -> Result<(), ChainError> {
        let event = ChannelEvent::Barrier(CheckpointBarrier::new(
            checkpoint_id,
            timestamp,
            options,
        ));
        for output in &self.stream_outputs {
            output.borrow_mut().broadcast_event(&event)?;
        }
        Ok(())
    }

    /// Broadcasts a checkpoint cancel marker on every network writer output.
    ///
    /// # Errors
    ///
    /// Writer failures propagate; fatal to the task.
    pub fn broadcast_checkpoint_cancel_marker(
        &mut self,
        checkpoint_id: u64,
    ) -> Result<(), ChainError> {
        let event = ChannelEvent::CancelCheckpoint { checkpoint_id };
        for output in &self.stream_outputs {
            output.borrow_mut().broadcast_event(&event)?;
        }
        Ok(())
    }

    /// Invokes each operator's pre-barrier snapshot hook, head to tail, so
    /// every hook completes before the caller broadcasts barriers.
    ///
    /// # Errors
    ///
    /// The first operator failure propagates.
    pub fn prepare_snapshot_pre_barrier(&mut self, checkpoint_id: u64) -> Result<(), ChainError> {
        for operator in self.all_operators.iter().rev() {
            operator
                .borrow_mut()
                .prepare_snapshot_pre_barrier(checkpoint_id)?;
        }
        Ok(())
    }

    /// Ends the task input `input_id` (1-based).
    ///
    /// For a two-input head, each input ends independently: the head's
    /// per-input hook fires once per input, and only when both inputs have
    /// ended does finalization run. For a one-input or source head, a single
    /// call finishes all inputs. Finalization invokes the end-of-input hook
    /// of every bounded operator in the chain, head to tail, exactly once;
    /// later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Operator hook failures propagate.
    pub fn end_input(&mut self, input_id: u32) -> Result<(), ChainError> {
        if self.finished_inputs.are_all_inputs_selected() {
            return Ok(());
        }

        if self.head_operator.borrow().input_kind() == InputKind::TwoInput {
            if self.finished_inputs.is_selected(input_id) {
                return Ok(());
            }

            {
                let mut head = self.head_operator.borrow_mut();
                if let Some(bounded) = head.as_bounded_multi_input() {
                    bounded.end_input(input_id)?;
                }
            }

            self.finished_inputs = if self.finished_inputs.input_mask() == 0 {
                self.finished_inputs.select(input_id)
            } else {
                InputSelection::ALL
            };
        } else {
            // The head is a source or a one-input operator, so a single
            // end-of-input finishes everything.
            self.finished_inputs = InputSelection::ALL;
        }

        if self.finished_inputs.are_all_inputs_selected() {
            // Finalization runs from head to tail: a producer may still
            // emit records from its hook, and its consumers must accept
            // them before finalizing themselves.
            for operator in self.all_operators.iter().rev() {
                let mut op = operator.borrow_mut();
                if let Some(bounded) = op.as_bounded_one_input() {
                    bounded.end_input()?;
                }
            }
        }

        Ok(())
    }

    /// Flushes every network writer output so buffered records are sent.
    ///
    /// # Errors
    ///
    /// The first flush failure propagates.
    pub fn flush_outputs(&mut self) -> Result<(), ChainError> {
        for output in &self.stream_outputs {
            output.borrow_mut().flush()?;
        }
        Ok(())
    }

    /// Releases every network writer output. Never fails: close errors are
    /// logged by the outputs and teardown always completes.
    pub fn release_outputs(&mut self) {
        for output in &self.stream_outputs {
            output.borrow_mut().close();
        }
    }

    /// The sink receiving the head operator's emissions; the task's input
    /// reader also uses it when the head is a source.
    #[must_use]
    pub fn chain_entry_point(&self) -> OutputHandle {
        self.chain_entry_point.clone()
    }

    /// The chain's head operator.
    #[must_use]
    pub fn head_operator(&self) -> &OperatorHandle {
        &self.head_operator
    }

    /// All operators in reverse topological order (head last).
    #[must_use]
    pub fn all_operators(&self) -> &[OperatorHandle] {
        &self.all_operators
    }

    /// The network writer outputs in out-edge order.
    #[must_use]
    pub fn stream_outputs(&self) -> &[Rc<RefCell<RecordWriterOutput>>] {
        &self.stream_outputs
    }

    /// Number of operators fused into this chain.
    #[must_use]
    pub fn chain_length(&self) -> usize {
        self.all_operators.len()
    }
}

impl fmt::Debug for OperatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorChain")
            .field("chain_length", &self.all_operators.len())
            .field("stream_outputs", &self.stream_outputs.len())
            .field("stream_status", &self.status.get())
            .field("finished_inputs", &self.finished_inputs)
            .finish_non_exhaustive()
    }
}
