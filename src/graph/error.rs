//! Graph-specific error types.

use crate::connection::ConnectionError;
use crate::error::ErrorClass;
use crate::graph::BlockId;
use crate::transport::ChannelError;
use crate::work::SlotDirection;
use thiserror::Error;

/// Errors raised while building or running a composite.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("No block {0}")]
    NoSuchBlock(BlockId),

    #[error("A block named '{0}' already exists")]
    DuplicateBlock(String),

    #[error("Block '{block}' has no {direction:?} slot {slot} ({available} declared)")]
    NoSuchSlot {
        block: String,
        direction: SlotDirection,
        slot: usize,
        available: usize,
    },

    #[error("Cannot connect {from} ({source_schema}) to {to} ({dest_schema})")]
    SchemaMismatch {
        from: String,
        to: String,
        source_schema: String,
        dest_schema: String,
    },

    #[error("Input slot {slot} of '{block}' is already connected")]
    SlotAlreadyBound { block: String, slot: usize },

    #[error("Step '{step}' assigned to node {node}, but the world has {size} nodes")]
    InvalidNode { step: String, node: u32, size: u32 },

    #[error("Lifecycle violation: {0}")]
    Lifecycle(String),

    #[error("Channel of {edge} cannot be replicated: {source}")]
    Replicate {
        edge: String,
        #[source]
        source: ChannelError,
    },

    #[error("Step '{step}' failed: {source:#}")]
    Computation {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Run cancelled")]
    Cancelled,
}

impl GraphError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GraphError::Computation { .. } => ErrorClass::Computation,
            GraphError::Connection(e) => e.class(),
            GraphError::Cancelled => ErrorClass::Cancelled,
            _ => ErrorClass::Configuration,
        }
    }
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;
