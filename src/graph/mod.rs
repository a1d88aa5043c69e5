//! Graph construction and scheduling.
//!
//! - [`Step`] - one work holder with its input and output holders
//! - [`Composite`] - a DAG of steps and nested composites, run pass by pass
//! - [`PlanCompiler`] - topological ordering and cycle detection
//! - [`GraphSnapshot`] - serializable view produced by `Composite::dump`

pub mod compiler;
pub mod composite;
pub mod error;
pub mod id;
pub mod plan;
pub mod snapshot;
pub mod step;

pub use compiler::PlanCompiler;
pub use composite::{Block, Composite, RunStats};
pub use error::{GraphError, GraphResult};
pub use id::{BlockId, EdgeId};
pub use plan::{ExecutionPlan, PlanStats};
pub use snapshot::{BlockSnapshot, EdgeSnapshot, GraphSnapshot, SlotSnapshot, StepSnapshot};
pub use step::Step;
