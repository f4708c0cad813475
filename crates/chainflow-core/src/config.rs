//! # Chain Configuration
//!
//! Static, read-only configuration for one task's operator chain: the
//! per-operator [`StreamConfig`] entries, the edges connecting them, and the
//! task-wide [`ChainConfig`] tree the chain builder consumes.
//!
//! Topology rules are enforced at build time by [`ChainConfigBuilder`]:
//! the chain is a DAG rooted at the head operator, every non-head operator
//! has exactly one in-chain predecessor, and every operator is reachable
//! from the head. Once built, the configuration is immutable.

use std::fmt;
use std::sync::Arc;

use fxhash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::operator::OperatorFactory;
use crate::record::{OutputTag, StreamRecord};
use crate::serializer::{IpcBatchSerializer, RecordSerializer};

/// Unique identifier for an operator in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Errors raised during chain configuration construction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Two operator configurations share an id.
    #[error("duplicate operator id: {0}")]
    DuplicateOperator(NodeId),

    /// An edge or the head references an operator with no configuration.
    #[error("operator not found: {0}")]
    OperatorNotFound(NodeId),

    /// No head operator was configured.
    #[error("no head operator configured")]
    MissingHead,

    /// The chained edges form a cycle.
    #[error("cycle detected involving operator: {0}")]
    CycleDetected(NodeId),

    /// An operator is the target of more than one chained edge.
    #[error("operator {0} has more than one in-chain predecessor")]
    MultiplePredecessors(NodeId),

    /// An operator configuration is not reachable from the head.
    #[error("operator {0} is not reachable from the head")]
    Unreachable(NodeId),

    /// An edge was declared on an operator it does not originate from.
    #[error("edge declared on operator {declared} has source {edge_source}")]
    EdgeSourceMismatch {
        /// The operator the edge was declared on.
        declared: NodeId,
        /// The edge's actual source.
        edge_source: NodeId,
    },
}

/// Partitioning descriptor for a non-chained edge.
///
/// The chain does not partition records itself; the descriptor is carried to
/// the network layer that owns channel selection.
#[derive(Debug, Clone, Default)]
pub enum Partitioner {
    /// Send to the single paired downstream subtask.
    #[default]
    Forward,
    /// Round-robin across downstream subtasks.
    Rebalance,
    /// Replicate to every downstream subtask.
    Broadcast,
    /// Hash-partition by the named key expression.
    KeyHash(String),
}

/// A static topology edge.
///
/// An edge either stays inside the task (chained: the target is another
/// operator in this chain) or leaves it (non-chained: the target id refers
/// to a downstream task and the edge is bound to a network record writer).
/// Read-only after construction.
#[derive(Clone)]
pub struct StreamEdge {
    source: NodeId,
    target: NodeId,
    output_tag: Option<OutputTag>,
    selected_names: Vec<String>,
    partitioner: Partitioner,
    serializer: Arc<dyn RecordSerializer>,
}

impl StreamEdge {
    /// Creates an edge from `source` to `target` carrying elements encoded
    /// by `serializer`.
    #[must_use]
    pub fn new(source: NodeId, target: NodeId, serializer: Arc<dyn RecordSerializer>) -> Self {
        Self {
            source,
            target,
            output_tag: None,
            selected_names: Vec::new(),
            partitioner: Partitioner::default(),
            serializer,
        }
    }

    /// Marks this edge as carrying the given side output.
    #[must_use]
    pub fn with_output_tag(mut self, tag: OutputTag) -> Self {
        self.output_tag = Some(tag);
        self
    }

    /// Restricts this edge to the given named output streams (consumed by
    /// directed outputs). An edge with no names receives every record.
    #[must_use]
    pub fn with_selected_names(mut self, names: Vec<String>) -> Self {
        self.selected_names = names;
        self
    }

    /// Sets the partitioning descriptor.
    #[must_use]
    pub fn with_partitioner(mut self, partitioner: Partitioner) -> Self {
        self.partitioner = partitioner;
        self
    }

    /// The producing operator.
    #[must_use]
    pub fn source(&self) -> NodeId {
        self.source
    }

    /// The consuming operator (or downstream task).
    #[must_use]
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// The side-output tag, if this edge carries a side output.
    #[must_use]
    pub fn output_tag(&self) -> Option<&OutputTag> {
        self.output_tag.as_ref()
    }

    /// The named output streams this edge subscribes to.
    #[must_use]
    pub fn selected_names(&self) -> &[String] {
        &self.selected_names
    }

    /// The partitioning descriptor.
    #[must_use]
    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    /// The element codec for this edge.
    #[must_use]
    pub fn serializer(&self) -> &Arc<dyn RecordSerializer> {
        &self.serializer
    }
}

impl fmt::Debug for StreamEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamEdge")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("output_tag", &self.output_tag)
            .field("selected_names", &self.selected_names)
            .field("partitioner", &self.partitioner)
            .finish_non_exhaustive()
    }
}

/// Maps a record to the named output streams that should receive it.
///
/// Selectors are user code; the directed output evaluates them in
/// declaration order and unions the results.
pub trait OutputSelector {
    /// Returns the names of the output streams `record` is destined for.
    /// An empty result drops the record.
    fn select(&self, record: &StreamRecord) -> SmallVec<[String; 2]>;
}

/// Static configuration of one operator in the chain.
pub struct StreamConfig {
    operator_id: NodeId,
    name: String,
    factory: Arc<dyn OperatorFactory>,
    chained_outputs: Vec<StreamEdge>,
    non_chained_outputs: Vec<StreamEdge>,
    output_selectors: Vec<Arc<dyn OutputSelector>>,
    input_serializer: Arc<dyn RecordSerializer>,
}

impl StreamConfig {
    /// Creates a configuration for operator `operator_id`.
    ///
    /// The input serializer defaults to the type-erased codec; set it
    /// explicitly when defensive copies must use a typed codec.
    #[must_use]
    pub fn new(
        operator_id: NodeId,
        name: impl Into<String>,
        factory: Arc<dyn OperatorFactory>,
    ) -> Self {
        Self {
            operator_id,
            name: name.into(),
            factory,
            chained_outputs: Vec::new(),
            non_chained_outputs: Vec::new(),
            output_selectors: Vec::new(),
            input_serializer: Arc::new(IpcBatchSerializer::type_erased()),
        }
    }

    /// Adds an intra-task edge to a chained downstream operator.
    #[must_use]
    pub fn with_chained_output(mut self, edge: StreamEdge) -> Self {
        self.chained_outputs.push(edge);
        self
    }

    /// Adds an inter-task edge bound to a network record writer.
    #[must_use]
    pub fn with_non_chained_output(mut self, edge: StreamEdge) -> Self {
        self.non_chained_outputs.push(edge);
        self
    }

    /// Adds a user output selector. Any selector makes this operator's
    /// output directed.
    #[must_use]
    pub fn with_output_selector(mut self, selector: Arc<dyn OutputSelector>) -> Self {
        self.output_selectors.push(selector);
        self
    }

    /// Sets the codec used for defensive copies of this operator's input.
    #[must_use]
    pub fn with_input_serializer(mut self, serializer: Arc<dyn RecordSerializer>) -> Self {
        self.input_serializer = serializer;
        self
    }

    /// The operator's id.
    #[must_use]
    pub fn operator_id(&self) -> NodeId {
        self.operator_id
    }

    /// The operator's human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The factory that instantiates the operator.
    #[must_use]
    pub fn factory(&self) -> &Arc<dyn OperatorFactory> {
        &self.factory
    }

    /// Intra-task out-edges, in declaration order.
    #[must_use]
    pub fn chained_outputs(&self) -> &[StreamEdge] {
        &self.chained_outputs
    }

    /// Inter-task out-edges, in declaration order.
    #[must_use]
    pub fn non_chained_outputs(&self) -> &[StreamEdge] {
        &self.non_chained_outputs
    }

    /// User output selectors, in declaration order.
    #[must_use]
    pub fn output_selectors(&self) -> &[Arc<dyn OutputSelector>] {
        &self.output_selectors
    }

    /// The codec used for defensive copies of this operator's input.
    #[must_use]
    pub fn input_serializer(&self) -> &Arc<dyn RecordSerializer> {
        &self.input_serializer
    }
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("operator_id", &self.operator_id)
            .field("name", &self.name)
            .field("chained_outputs", &self.chained_outputs)
            .field("non_chained_outputs", &self.non_chained_outputs)
            .field("selector_count", &self.output_selectors.len())
            .finish_non_exhaustive()
    }
}

/// The task-level configuration tree the chain builder consumes.
///
/// `out_edges_in_order` lists every non-chained edge of the chain in the
/// positional order record writers must be supplied to the chain
/// constructor: a depth-first walk from the head, taking each operator's
/// non-chained edges in declaration order before descending into its chained
/// successors.
pub struct ChainConfig {
    head_operator_id: NodeId,
    operator_configs: FxHashMap<NodeId, StreamConfig>,
    out_edges_in_order: Vec<StreamEdge>,
    object_reuse: bool,
}

impl ChainConfig {
    /// The head operator's id.
    #[must_use]
    pub fn head_operator_id(&self) -> NodeId {
        self.head_operator_id
    }

    /// Looks up the configuration of one operator.
    #[must_use]
    pub fn operator_config(&self, id: NodeId) -> Option<&StreamConfig> {
        self.operator_configs.get(&id)
    }

    /// All non-chained edges of the chain, in record-writer order.
    #[must_use]
    pub fn out_edges_in_order(&self) -> &[StreamEdge] {
        &self.out_edges_in_order
    }

    /// Whether records may be handed between operators without defensive
    /// copies. Task-wide and constant over a run.
    #[must_use]
    pub fn object_reuse(&self) -> bool {
        self.object_reuse
    }

    /// Number of configured operators.
    #[must_use]
    pub fn operator_count(&self) -> usize {
        self.operator_configs.len()
    }
}

impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("head_operator_id", &self.head_operator_id)
            .field("operator_count", &self.operator_configs.len())
            .field("out_edges_in_order", &self.out_edges_in_order)
            .field("object_reuse", &self.object_reuse)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`ChainConfig`].
///
/// The first operator added becomes the head unless [`head`](Self::head)
/// overrides it. `build()` validates the topology and derives the
/// record-writer edge order.
pub struct ChainConfigBuilder {
    head: Option<NodeId>,
    configs: Vec<StreamConfig>,
    object_reuse: bool,
}

impl ChainConfigBuilder {
    /// Creates an empty builder with object reuse disabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: None,
            configs: Vec::new(),
            object_reuse: false,
        }
    }

    /// Adds an operator configuration.
    #[must_use]
    pub fn operator(mut self, config: StreamConfig) -> Self {
        if self.head.is_none() {
            self.head = Some(config.operator_id());
        }
        self.configs.push(config);
        self
    }

    /// Overrides which operator is the head of the chain.
    #[must_use]
    pub fn head(mut self, id: NodeId) -> Self {
        self.head = Some(id);
        self
    }

    /// Sets the task-wide object-reuse mode.
    #[must_use]
    pub fn object_reuse(mut self, enabled: bool) -> Self {
        self.object_reuse = enabled;
        self
    }

    /// Validates the topology and builds the immutable configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the head is missing, an operator id is
    /// duplicated, a chained edge targets a missing operator, an operator has
    /// more than one in-chain predecessor, the chained edges form a cycle, or
    /// an operator is unreachable from the head.
    pub fn build(self) -> Result<ChainConfig, ConfigError> {
        let head = self.head.ok_or(ConfigError::MissingHead)?;

        let mut operator_configs: FxHashMap<NodeId, StreamConfig> = FxHashMap::default();
        for config in self.configs {
            let id = config.operator_id();
            for edge in config
                .chained_outputs()
                .iter()
                .chain(config.non_chained_outputs())
            {
                if edge.source() != id {
                    return Err(ConfigError::EdgeSourceMismatch {
                        declared: id,
                        edge_source: edge.source(),
                    });
                }
            }
            if operator_configs.insert(id, config).is_some() {
                return Err(ConfigError::DuplicateOperator(id));
            }
        }

        if !operator_configs.contains_key(&head) {
            return Err(ConfigError::OperatorNotFound(head));
        }

        let mut visited = FxHashSet::default();
        let mut on_stack = FxHashSet::default();
        let mut out_edges = Vec::new();
        collect_out_edges(
            head,
            &operator_configs,
            &mut visited,
            &mut on_stack,
            &mut out_edges,
        )?;

        if let Some(&unreachable) = operator_configs.keys().find(|id| !visited.contains(*id)) {
            return Err(ConfigError::Unreachable(unreachable));
        }

        Ok(ChainConfig {
            head_operator_id: head,
            operator_configs,
            out_edges_in_order: out_edges,
            object_reuse: self.object_reuse,
        })
    }
}

impl Default for ChainConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Depth-first walk collecting non-chained edges in writer order, while
/// checking reachability, predecessor uniqueness, and acyclicity.
fn collect_out_edges(
    id: NodeId,
    configs: &FxHashMap<NodeId, StreamConfig>,
    visited: &mut FxHashSet<NodeId>,
    on_stack: &mut FxHashSet<NodeId>,
    out_edges: &mut Vec<StreamEdge>,
) -> Result<(), ConfigError> {
    if on_stack.contains(&id) {
        return Err(ConfigError::CycleDetected(id));
    }
    if !visited.insert(id) {
        // Reached through a second chained edge.
        return Err(ConfigError::MultiplePredecessors(id));
    }
    on_stack.insert(id);

    let config = configs
        .get(&id)
        .ok_or(ConfigError::OperatorNotFound(id))?;

    for edge in config.non_chained_outputs() {
        out_edges.push(edge.clone());
    }
    for edge in config.chained_outputs() {
        collect_out_edges(edge.target(), configs, visited, on_stack, out_edges)?;
    }

    on_stack.remove(&id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::output::OutputHandle;
    use crate::operator::{OperatorError, StreamOperator};

    struct NoopFactory;

    impl OperatorFactory for NoopFactory {
        fn create(
            &self,
            _config: &StreamConfig,
            _output: OutputHandle,
        ) -> Result<Box<dyn StreamOperator>, OperatorError> {
            Err(OperatorError::InvalidConfiguration(
                "noop factory cannot create operators".into(),
            ))
        }
    }

    fn erased() -> Arc<dyn RecordSerializer> {
        Arc::new(IpcBatchSerializer::type_erased())
    }

    fn config(id: u32) -> StreamConfig {
        StreamConfig::new(NodeId(id), format!("op-{id}"), Arc::new(NoopFactory))
    }

    #[test]
    fn test_missing_head() {
        let result = ChainConfigBuilder::new().build();
        assert!(matches!(result, Err(ConfigError::MissingHead)));
    }

    #[test]
    fn test_duplicate_operator() {
        let result = ChainConfigBuilder::new()
            .operator(config(1))
            .operator(config(1))
            .build();
        assert!(matches!(result, Err(ConfigError::DuplicateOperator(NodeId(1)))));
    }

    #[test]
    fn test_chained_target_must_exist() {
        let result = ChainConfigBuilder::new()
            .operator(config(1).with_chained_output(StreamEdge::new(NodeId(1), NodeId(2), erased())))
            .build();
        assert!(matches!(result, Err(ConfigError::OperatorNotFound(NodeId(2)))));
    }

    #[test]
    fn test_multiple_predecessors_rejected() {
        let result = ChainConfigBuilder::new()
            .operator(
                config(1)
                    .with_chained_output(StreamEdge::new(NodeId(1), NodeId(2), erased()))
                    .with_chained_output(StreamEdge::new(NodeId(1), NodeId(3), erased())),
            )
            .operator(config(2).with_chained_output(StreamEdge::new(NodeId(2), NodeId(3), erased())))
            .operator(config(3))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::MultiplePredecessors(NodeId(3)))
        ));
    }

    #[test]
    fn test_unreachable_operator() {
        let result = ChainConfigBuilder::new()
            .operator(config(1))
            .operator(config(2))
            .build();
        assert!(matches!(result, Err(ConfigError::Unreachable(NodeId(2)))));
    }

    #[test]
    fn test_out_edges_collected_head_first() {
        let chain = ChainConfigBuilder::new()
            .operator(
                config(1)
                    .with_non_chained_output(StreamEdge::new(NodeId(1), NodeId(10), erased()))
                    .with_chained_output(StreamEdge::new(NodeId(1), NodeId(2), erased())),
            )
            .operator(
                config(2).with_non_chained_output(StreamEdge::new(NodeId(2), NodeId(11), erased())),
            )
            .build()
            .unwrap();

        let targets: Vec<u32> = chain
            .out_edges_in_order()
            .iter()
            .map(|e| e.target().0)
            .collect();
        assert_eq!(targets, vec![10, 11]);
        assert_eq!(chain.head_operator_id(), NodeId(1));
        assert!(!chain.object_reuse());
    }
}
