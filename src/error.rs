//! Error handling for stepgraph
//!
//! Every subsystem owns its own error enum (`ChannelError`, `DataError`,
//! `ConnectionError`, `GraphError`, `AppError`). This module aggregates them
//! into [`StepGraphError`] and maps each failure onto the framework's error
//! taxonomy through [`StepGraphError::class`].

use crate::app::AppError;
use crate::connection::ConnectionError;
use crate::data::DataError;
use crate::graph::GraphError;
use crate::transport::ChannelError;
use thiserror::Error;

/// Coarse classification of a failure, used by callers deciding between
/// retry, abort and reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad schema, arity mismatch, cyclic graph, invalid config. Fatal before `run()`.
    Configuration,
    /// Connection refused, reset, truncated I/O.
    Transport,
    /// Schema name/version mismatch on the wire.
    Protocol,
    /// A WorkHolder hook failed.
    Computation,
    /// The execution context was cancelled.
    Cancelled,
}

/// Main error type for stepgraph operations
#[derive(Error, Debug)]
pub enum StepGraphError {
    /// Transport-level failures
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Schema, field access and wire protocol failures
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// Connection transaction failures
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Graph construction and scheduling failures
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Application lifecycle failures
    #[error("Application error: {0}")]
    App(#[from] AppError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<StepGraphError>,
    },
}

impl StepGraphError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        StepGraphError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            StepGraphError::Channel(e) => e.class(),
            StepGraphError::Data(e) => e.class(),
            StepGraphError::Connection(e) => e.class(),
            StepGraphError::Graph(e) => e.class(),
            StepGraphError::App(e) => e.class(),
            StepGraphError::Config(_) => ErrorClass::Configuration,
            StepGraphError::Io(_) => ErrorClass::Transport,
            StepGraphError::WithContext { source, .. } => source.class(),
        }
    }
}

/// Result type alias for stepgraph operations
pub type Result<T> = std::result::Result<T, StepGraphError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<StepGraphError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
