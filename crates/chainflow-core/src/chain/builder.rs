//! # Chain Construction
//!
//! Wires operators and output sinks bottom-up from a [`ChainConfig`] tree:
//! network writer outputs are created upfront for every non-chained edge,
//! then the recursion descends from the head configuration, building each
//! chained subtree before instantiating the operator that writes into it.
//! The head operator is instantiated last, against the topmost sink of the
//! recursion, and appended to the end of the operator list — the list is
//! reverse topological, with the head at the highest index.
//!
//! Record writers correspond positionally to
//! [`ChainConfig::out_edges_in_order`]; the caller must supply them in that
//! order. If any construction step fails after network outputs exist, every
//! already-created writer output is closed before the error is re-raised.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use fxhash::FxHashMap;

use crate::chain::broadcast::{BroadcastingOutput, CopyingBroadcastingOutput};
use crate::chain::directed::{CopyingDirectedOutput, DirectedOutput};
use crate::chain::error::ChainError;
use crate::chain::output::{handle, ChainOutput, ChainingOutput, CopyingChainingOutput, OutputHandle};
use crate::chain::writer_output::RecordWriterOutput;
use crate::config::{ChainConfig, StreamConfig, StreamEdge};
use crate::metrics::{CURRENT_INPUT_WATERMARK, CURRENT_OUTPUT_WATERMARK};
use crate::operator::OperatorHandle;
use crate::record::{OutputTag, StreamStatusView};
use crate::writer::RecordWriter;

/// Key identifying a non-chained edge for writer-output lookup.
type EdgeKey = (u32, u32, Option<String>);

fn edge_key(edge: &StreamEdge) -> EdgeKey {
    (
        edge.source().0,
        edge.target().0,
        edge.output_tag().map(|tag| tag.id().to_string()),
    )
}

/// The assembled parts handed back to the chain controller.
pub(crate) struct BuiltChain {
    pub all_operators: Vec<OperatorHandle>,
    pub stream_outputs: Vec<Rc<RefCell<RecordWriterOutput>>>,
    pub chain_entry_point: OutputHandle,
    pub head_operator: OperatorHandle,
}

/// Builds the chain from configuration and positional record writers.
///
/// # Errors
///
/// Fails on a writer/edge count mismatch, a missing operator configuration,
/// or an operator factory failure. In all cases every network writer output
/// created so far has been closed before this returns.
pub(crate) fn build_chain(
    config: &ChainConfig,
    record_writers: Vec<Box<dyn RecordWriter>>,
    status: StreamStatusView,
) -> Result<BuiltChain, ChainError> {
    let stream_outputs = create_stream_outputs(config, record_writers, &status)?;

    // From here on the writer outputs must be shut down again on failure.
    match assemble(config, &stream_outputs, status) {
        Ok(built) => Ok(built),
        Err(err) => {
            for output in &stream_outputs {
                output.borrow_mut().close();
            }
            Err(err)
        }
    }
}

/// Creates one [`RecordWriterOutput`] per non-chained edge, binding the
/// writers positionally.
fn create_stream_outputs(
    config: &ChainConfig,
    record_writers: Vec<Box<dyn RecordWriter>>,
    status: &StreamStatusView,
) -> Result<Vec<Rc<RefCell<RecordWriterOutput>>>, ChainError> {
    let edges = config.out_edges_in_order();
    if edges.len() != record_writers.len() {
        return Err(ChainError::WriterCountMismatch {
            writers: record_writers.len(),
            edges: edges.len(),
        });
    }

    Ok(edges
        .iter()
        .zip(record_writers)
        .map(|(edge, writer)| {
            Rc::new(RefCell::new(RecordWriterOutput::new(
                writer,
                edge.serializer().clone(),
                edge.output_tag().cloned(),
                status.clone(),
            )))
        })
        .collect())
}

fn assemble(
    config: &ChainConfig,
    stream_outputs: &[Rc<RefCell<RecordWriterOutput>>],
    status: StreamStatusView,
) -> Result<BuiltChain, ChainError> {
    let mut edge_outputs: FxHashMap<EdgeKey, VecDeque<Rc<RefCell<RecordWriterOutput>>>> =
        FxHashMap::default();
    for (edge, output) in config.out_edges_in_order().iter().zip(stream_outputs) {
        edge_outputs
            .entry(edge_key(edge))
            .or_default()
            .push_back(output.clone());
    }

    let mut builder = ChainBuilder {
        config,
        status,
        edge_outputs,
        all_operators: Vec::with_capacity(config.operator_count()),
    };

    let head_id = config.head_operator_id();
    let head_config = config
        .operator_config(head_id)
        .ok_or(ChainError::MissingOperatorConfig(head_id))?;

    let chain_entry_point = builder.create_output_collector(head_config)?;

    let head_operator: OperatorHandle = Rc::new(RefCell::new(
        head_config
            .factory()
            .create(head_config, chain_entry_point.clone())?,
    ));
    head_operator.borrow_mut().metrics_mut().register_watermark_gauge(
        CURRENT_OUTPUT_WATERMARK,
        chain_entry_point.borrow().watermark_gauge(),
    );

    // The head goes to the end of the reverse-topological list.
    builder.all_operators.push(head_operator.clone());

    Ok(BuiltChain {
        all_operators: builder.all_operators,
        stream_outputs: stream_outputs.to_vec(),
        chain_entry_point,
        head_operator,
    })
}

struct ChainBuilder<'a> {
    config: &'a ChainConfig,
    status: StreamStatusView,
    edge_outputs: FxHashMap<EdgeKey, VecDeque<Rc<RefCell<RecordWriterOutput>>>>,
    all_operators: Vec<OperatorHandle>,
}

impl ChainBuilder<'_> {
    /// Builds the sink a producer with configuration `operator_config`
    /// writes into, recursively constructing chained successors.
    fn create_output_collector(
        &mut self,
        operator_config: &StreamConfig,
    ) -> Result<OutputHandle, ChainError> {
        let mut all_outputs: Vec<(OutputHandle, &StreamEdge)> = Vec::with_capacity(4);

        // Collectors for the network outputs.
        for edge in operator_config.non_chained_outputs() {
            let writer_output = self.take_stream_output(edge)?;
            all_outputs.push((handle(ChainOutput::Writer(writer_output)), edge));
        }

        // Collectors for the chained outputs; this recursively creates the
        // downstream operators.
        for edge in operator_config.chained_outputs() {
            let chained_config = self
                .config
                .operator_config(edge.target())
                .ok_or(ChainError::MissingOperatorConfig(edge.target()))?;
            let output =
                self.create_chained_operator(chained_config, edge.output_tag().cloned())?;
            all_outputs.push((output, edge));
        }

        let selectors = operator_config.output_selectors();
        if selectors.is_empty() {
            if all_outputs.len() == 1 {
                // Simple path, no wrapper necessary.
                let (output, _) = all_outputs.pop().expect("exactly one output");
                return Ok(output);
            }

            // Send to N outputs, including the special case of zero.
            let outputs: Vec<OutputHandle> =
                all_outputs.into_iter().map(|(output, _)| output).collect();
            let wrapped = if self.config.object_reuse() {
                ChainOutput::Broadcasting(BroadcastingOutput::new(outputs, self.status.clone()))
            } else {
                ChainOutput::CopyingBroadcasting(CopyingBroadcastingOutput::new(
                    outputs,
                    self.status.clone(),
                ))
            };
            Ok(handle(wrapped))
        } else {
            // Selectors present, routing goes through a directed output.
            let outputs: Vec<(OutputHandle, Vec<String>)> = all_outputs
                .into_iter()
                .map(|(output, edge)| (output, edge.selected_names().to_vec()))
                .collect();
            let selectors = selectors.to_vec();
            let wrapped = if self.config.object_reuse() {
                ChainOutput::Directed(DirectedOutput::new(
                    selectors,
                    outputs,
                    self.status.clone(),
                ))
            } else {
                ChainOutput::CopyingDirected(CopyingDirectedOutput::new(
                    selectors,
                    outputs,
                    self.status.clone(),
                ))
            };
            Ok(handle(wrapped))
        }
    }

    /// Creates the sink subtree below `operator_config`, instantiates the
    /// operator against it, and returns the chaining output that binds the
    /// new operator back to its upstream producer.
    fn create_chained_operator(
        &mut self,
        operator_config: &StreamConfig,
        output_tag: Option<OutputTag>,
    ) -> Result<OutputHandle, ChainError> {
        // Create the output the operator writes to first; this may
        // recursively create more operators.
        let chained_operator_output = self.create_output_collector(operator_config)?;

        let operator: OperatorHandle = Rc::new(RefCell::new(
            operator_config
                .factory()
                .create(operator_config, chained_operator_output.clone())?,
        ));

        let current_operator_output = if self.config.object_reuse() {
            handle(ChainOutput::Chaining(ChainingOutput::new(
                operator.clone(),
                self.status.clone(),
                output_tag,
            )))
        } else {
            handle(ChainOutput::CopyingChaining(CopyingChainingOutput::new(
                operator.clone(),
                operator_config.input_serializer().clone(),
                self.status.clone(),
                output_tag,
            )))
        };

        {
            let mut op = operator.borrow_mut();
            let metrics = op.metrics_mut();
            metrics.register_watermark_gauge(
                CURRENT_INPUT_WATERMARK,
                current_operator_output.borrow().watermark_gauge(),
            );
            metrics.register_watermark_gauge(
                CURRENT_OUTPUT_WATERMARK,
                chained_operator_output.borrow().watermark_gauge(),
            );
        }

        self.all_operators.push(operator);

        Ok(current_operator_output)
    }

    /// Pops the writer output bound to `edge`. Outputs with identical keys
    /// are consumed in declaration order.
    fn take_stream_output(
        &mut self,
        edge: &StreamEdge,
    ) -> Result<Rc<RefCell<RecordWriterOutput>>, ChainError> {
        self.edge_outputs
            .get_mut(&edge_key(edge))
            .and_then(VecDeque::pop_front)
            .ok_or(ChainError::UnboundOutputEdge {
                edge_source: edge.source(),
                target: edge.target(),
            })
    }
}
