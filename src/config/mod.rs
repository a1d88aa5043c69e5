//! Configuration module for stepgraph
//!
//! This module handles framework configuration including:
//! - Execution topology (rank, world size, failure policy)
//! - Transport tuning (buffer capacities, socket timeouts)
//! - Reconnection policy for client-side connections
//! - Logging filter and optional log file
//!
//! Application-level settings are not interpreted here; they travel as an
//! opaque [`ParameterSet`] to `Application::define`.
//!
//! # Example
//!
//! ```ignore
//! use stepgraph::config::FrameworkConfig;
//!
//! let config = FrameworkConfig::load("node.toml")?;
//! let ctx = stepgraph::ExecutionContext::new(config)?;
//! ```

pub mod params;

pub use params::{ParameterSet, ParameterValue};

use crate::error::{Result, StepGraphError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default number of frames an in-memory link buffers before a blocking send waits
pub const DEFAULT_MEMORY_CAPACITY: usize = 1;

/// Default shared memory segment size (1 MiB)
pub const DEFAULT_SHM_SEGMENT_BYTES: usize = 1024 * 1024;

/// Default timeout for TCP connect in milliseconds
pub const DEFAULT_TCP_CONNECT_TIMEOUT_MS: u64 = 2_000;

/// Default timeout for TCP accept in milliseconds
pub const DEFAULT_TCP_ACCEPT_TIMEOUT_MS: u64 = 10_000;

/// Default timeout for the fabric join handshake in milliseconds
pub const DEFAULT_FABRIC_JOIN_TIMEOUT_MS: u64 = 5_000;

/// Default number of reconnection attempts for client connections
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Default log filter
pub const DEFAULT_LOG_FILTER: &str = "info,stepgraph=debug";

/// What the scheduler does when a WorkHolder's `process()` fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Halt the current iteration and surface the error.
    #[default]
    Abort,
    /// Log the failure, skip the step for this iteration and continue.
    SkipStep,
}

/// Execution topology settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Rank of this process in the deployment
    pub rank: u32,
    /// Number of ranks in the deployment
    pub size: u32,
    /// Policy applied on computation errors
    pub failure_policy: FailurePolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            rank: 0,
            size: 1,
            failure_policy: FailurePolicy::Abort,
        }
    }
}

/// Transport tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Frames buffered by an in-memory link
    pub memory_capacity: usize,
    /// Size of a shared memory segment in bytes
    pub shm_segment_bytes: usize,
    /// Fabric join handshake timeout in milliseconds
    pub fabric_join_timeout_ms: u64,
    /// TCP connect timeout in milliseconds
    pub tcp_connect_timeout_ms: u64,
    /// TCP accept timeout in milliseconds
    pub tcp_accept_timeout_ms: u64,
    /// Disable Nagle's algorithm on TCP sockets
    pub tcp_nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            shm_segment_bytes: DEFAULT_SHM_SEGMENT_BYTES,
            fabric_join_timeout_ms: DEFAULT_FABRIC_JOIN_TIMEOUT_MS,
            tcp_connect_timeout_ms: DEFAULT_TCP_CONNECT_TIMEOUT_MS,
            tcp_accept_timeout_ms: DEFAULT_TCP_ACCEPT_TIMEOUT_MS,
            tcp_nodelay: true,
        }
    }
}

impl TransportConfig {
    pub fn tcp_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_connect_timeout_ms)
    }

    pub fn tcp_accept_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_accept_timeout_ms)
    }

    pub fn fabric_join_timeout(&self) -> Duration {
        Duration::from_millis(self.fabric_join_timeout_ms)
    }
}

/// Reconnection policy for client-side connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Number of reconnection attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first attempt in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound for the exponential backoff in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            initial_backoff_ms: 50,
            max_backoff_ms: 1_000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff before reconnection attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Optional log file; logs go to stderr only when unset
    pub file: Option<std::path::PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            file: None,
        }
    }
}

/// Complete framework configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    pub execution: ExecutionConfig,
    pub transport: TransportConfig,
    pub reconnect: ReconnectConfig,
    pub logging: LoggingConfig,
}

impl FrameworkConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| StepGraphError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StepGraphError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Save the configuration to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StepGraphError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| StepGraphError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            StepGraphError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.execution.size == 0 {
            return Err(StepGraphError::Config(
                "execution.size must be at least 1".to_string(),
            ));
        }
        if self.execution.rank >= self.execution.size {
            return Err(StepGraphError::Config(format!(
                "execution.rank {} out of range for size {}",
                self.execution.rank, self.execution.size
            )));
        }
        if self.transport.memory_capacity == 0 {
            return Err(StepGraphError::Config(
                "transport.memory_capacity must be at least 1".to_string(),
            ));
        }
        if self.transport.shm_segment_bytes == 0 {
            return Err(StepGraphError::Config(
                "transport.shm_segment_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
