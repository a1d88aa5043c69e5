//! Process-wide execution context.
//!
//! One `ExecutionContext` is created at process start and passed by
//! reference to every channel and composite that needs topology information
//! or the shared channel registry. Sibling contexts created with
//! [`ExecutionContext::with_rank`] share the registry and the cancel token,
//! so several nodes can run as threads of one process.

use crate::config::FrameworkConfig;
use crate::error::{Result, StepGraphError};
use crate::transport::ChannelRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared by a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Blocked channel waits return `Cancelled` and the
    /// scheduler stops before the next step.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Clear a previous cancellation so the context can be reused.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}

/// Topology and shared resources of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    rank: u32,
    size: u32,
    config: Arc<FrameworkConfig>,
    registry: Arc<ChannelRegistry>,
    cancel: CancelToken,
}

impl ExecutionContext {
    /// Create a context from a validated configuration.
    pub fn new(config: FrameworkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            rank: config.execution.rank,
            size: config.execution.size,
            config: Arc::new(config),
            registry: Arc::new(ChannelRegistry::new()),
            cancel: CancelToken::new(),
        })
    }

    /// Single-rank context with default configuration.
    pub fn local() -> Self {
        let config = FrameworkConfig::default();
        Self {
            rank: 0,
            size: 1,
            config: Arc::new(config),
            registry: Arc::new(ChannelRegistry::new()),
            cancel: CancelToken::new(),
        }
    }

    /// Single-rank context whose world has `size` ranks.
    pub fn with_world(size: u32) -> Result<Self> {
        let mut config = FrameworkConfig::default();
        config.execution.size = size;
        Self::new(config)
    }

    /// Sibling context for another rank, sharing registry and cancel token.
    pub fn with_rank(&self, rank: u32) -> Result<Self> {
        if rank >= self.size {
            return Err(StepGraphError::Config(format!(
                "rank {} out of range for size {}",
                rank, self.size
            )));
        }
        Ok(Self {
            rank,
            ..self.clone()
        })
    }

    #[inline]
    pub fn rank(&self) -> u32 {
        self.rank
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    #[inline]
    pub fn is_local(&self, node: u32) -> bool {
        node == self.rank
    }
}
