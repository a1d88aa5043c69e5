//! Serializable view of a composite, produced by `Composite::dump`.

use crate::connection::{ConnectionStats, TransferMode};
use crate::graph::plan::PlanStats;
use crate::work::WorkState;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub name: String,
    pub state: WorkState,
    pub iteration: u64,
    /// Block names in execution order; empty before `preprocess`.
    pub order: Vec<String>,
    pub plan: Option<PlanStats>,
    pub blocks: Vec<BlockSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockSnapshot {
    Step(StepSnapshot),
    Composite(GraphSnapshot),
}

#[derive(Debug, Clone, Serialize)]
pub struct StepSnapshot {
    pub name: String,
    pub type_name: String,
    pub node: u32,
    pub state: WorkState,
    pub inputs: Vec<SlotSnapshot>,
    pub outputs: Vec<SlotSnapshot>,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotSnapshot {
    pub name: String,
    pub schema: String,
    pub initialized: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeSnapshot {
    pub name: String,
    pub from: String,
    pub from_slot: usize,
    pub to: String,
    pub to_slot: usize,
    pub kind: String,
    pub endpoint: String,
    pub tag: u32,
    pub mode: TransferMode,
    /// Local end of the connection on this node; `None` when not involved.
    pub side: Option<String>,
    pub stats: ConnectionStats,
}
