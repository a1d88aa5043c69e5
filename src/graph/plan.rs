use serde::Serialize;

/// Compiled execution order for one composite.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// Block indices in topological order
    pub order: Vec<usize>,

    /// Edge indices arriving at each block, in edge insertion order
    pub inbound: Vec<Vec<usize>>,

    /// Edge indices leaving each block, in edge insertion order
    pub outbound: Vec<Vec<usize>>,

    /// Graph generation the plan was compiled from
    pub generation: u64,

    /// Compilation statistics
    pub stats: PlanStats,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PlanStats {
    /// Number of blocks in the composite
    pub total_blocks: usize,

    /// Number of edges in the composite
    pub total_edges: usize,

    /// Blocks without inbound edges
    pub source_blocks: usize,

    /// Blocks without outbound edges
    pub sink_blocks: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether the plan is still valid for a graph at `generation`.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}
