//! # `chainflow` Core
//!
//! The in-task operator chain runtime for the `chainflow` streaming engine.
//!
//! A task's operators are fused into one [`OperatorChain`]: records entering
//! the head operator flow synchronously through the chained operators and
//! leave through network writer outputs or as side outputs. The chain also
//! propagates control events — watermarks, stream-status toggles, latency
//! markers, checkpoint barriers and cancel markers, end-of-input — and owns
//! the lifecycle of the task's output writers.
//!
//! ## Design Principles
//!
//! 1. **No per-emit configuration branches** — sink roles (copying vs
//!    reusing, chaining vs fan-out vs network) are fixed at build time as
//!    distinct sink variants
//! 2. **Strictly single-threaded** — every operator and sink is invoked from
//!    the task thread; only atomic metric values cross threads
//! 3. **Synchronous hot path** — a record traverses the chain as a
//!    stack-based descent with no queues or suspension points
//! 4. **Orderly teardown** — construction failures close every
//!    already-created network output; release never throws
//!
//! ## Example
//!
//! ```rust,ignore
//! use chainflow_core::config::ChainConfigBuilder;
//! use chainflow_core::OperatorChain;
//!
//! let config = ChainConfigBuilder::new()
//!     .operator(head_config)
//!     .operator(map_config)
//!     .object_reuse(true)
//!     .build()?;
//!
//! let mut chain = OperatorChain::new(&config, record_writers)?;
//! // feed records into chain.head_operator(), then:
//! chain.flush_outputs()?;
//! chain.release_outputs();
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod chain;
pub mod config;
pub mod metrics;
pub mod operator;
pub mod record;
pub mod serializer;
pub mod writer;

// Re-export key types
pub use chain::{ChainError, OperatorChain};

/// Result type for chainflow-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for chainflow-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Chain construction or per-record path errors
    #[error("chain error: {0}")]
    Chain(#[from] chain::ChainError),

    /// Configuration tree errors
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Operator user-code errors
    #[error("operator error: {0}")]
    Operator(#[from] operator::OperatorError),

    /// Record codec errors
    #[error("serializer error: {0}")]
    Serializer(#[from] serializer::SerializerError),

    /// Network writer errors
    #[error("writer error: {0}")]
    Writer(#[from] writer::WriterError),
}
