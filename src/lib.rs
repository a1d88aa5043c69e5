//! # stepgraph: dataflow execution kernel
//!
//! Units of computation ([`WorkHolder`]s) are wrapped in [`Step`]s and wired
//! into a directed acyclic [`Composite`] graph. Steps exchange typed,
//! versioned [`DataHolder`] messages through [`Connection`]s over pluggable
//! [`Channel`] transports. The composite is executed pass by pass in
//! topological order, optionally spread over several nodes.
//!
//! ## Architecture
//!
//! - **transport**: poll-based channels (in-memory, shared segment, message
//!   fabric, TCP, null) with blocking and non-blocking helpers
//! - **data**: schemas, data holders and the self-describing wire format
//! - **connection**: encode/send and receive/validate over one channel, with
//!   role-dependent reconnect
//! - **work** / **graph**: work holders, steps and the composite scheduler
//! - **app**: the application boundary and its control loop
//!
//! ## Example
//!
//! ```ignore
//! use stepgraph::prelude::*;
//!
//! let ctx = ExecutionContext::local();
//! let mut graph = Composite::new("double");
//! let src = graph.add_block(Step::from_prototype("src", VectorSource::new(vec![1.0, 2.0])?))?;
//! let x2 = graph.add_block(Step::from_prototype("x2", Scale::new(2, 2.0)?))?;
//! graph.connect(src, 0, x2, 0, Connection::new("src-x2", Box::new(MemoryChannel::new(&ctx, "src-x2"))))?;
//!
//! graph.preprocess(&ctx)?;
//! graph.run(10)?;
//! graph.postprocess()?;
//! ```

pub mod app;
pub mod config;
pub mod connection;
pub mod context;
pub mod data;
pub mod error;
pub mod graph;
pub mod logging;
pub mod transport;
pub mod work;

pub use app::{Application, ApplicationHolder};
pub use config::{FrameworkConfig, ParameterSet};
pub use connection::{Connection, TransferMode};
pub use context::{CancelToken, ExecutionContext};
pub use data::{DataHolder, Schema};
pub use error::{ErrorClass, Result, StepGraphError};
pub use graph::{Composite, Step};
pub use transport::{Channel, ChannelExt};
pub use work::{WorkFactory, WorkHolder};

/// Everything needed to build and run a graph.
pub mod prelude {
    pub use crate::app::{Application, ApplicationHolder, ControlBridge, ControlCommand, ControlReply};
    pub use crate::config::{FailurePolicy, FrameworkConfig, ParameterSet};
    pub use crate::connection::{Connection, Transfer, TransferMode};
    pub use crate::context::{CancelToken, ExecutionContext};
    pub use crate::data::{DataHolder, FieldType, Schema};
    pub use crate::error::{ErrorClass, Result, StepGraphError};
    pub use crate::graph::{Composite, Step};
    pub use crate::transport::{
        Channel, ChannelExt, FabricChannel, MemoryChannel, NullChannel, SharedMemoryChannel,
        Side, TcpChannel,
    };
    pub use crate::work::holders::{Passthrough, RecordLog, Recorder, Scale, Sum, VectorSource};
    pub use crate::work::{SlotSpec, WorkContext, WorkFactory, WorkHolder};
}
