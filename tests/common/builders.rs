//! Graph builders shared by the integration tests

use stepgraph::graph::BlockId;
use stepgraph::prelude::*;

/// Transport used for every edge of a built graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Medium {
    Memory,
    SharedMemory,
    Fabric,
}

/// Connection named `key` over `medium`, carrying data from `from` to `to`.
pub fn link(ctx: &ExecutionContext, medium: Medium, key: &str, from: u32, to: u32) -> Connection {
    let channel: Box<dyn Channel> = match medium {
        Medium::Memory => Box::new(MemoryChannel::new(ctx, key)),
        Medium::SharedMemory => Box::new(SharedMemoryChannel::new(ctx, key)),
        Medium::Fabric => Box::new(FabricChannel::new(ctx, key, from, to).expect("ranks in range")),
    };
    Connection::new(key, channel)
}

/// Builder for the source → scale → recorder pipeline
pub struct PipelineBuilder {
    name: String,
    values: Vec<f64>,
    ramp: f64,
    factor: f64,
    nodes: [u32; 3],
    medium: Medium,
    log: RecordLog,
}

impl PipelineBuilder {
    pub fn new(name: &str, log: &RecordLog) -> Self {
        Self {
            name: name.to_string(),
            values: vec![1.0, 2.0, 3.0],
            ramp: 0.0,
            factor: 2.0,
            nodes: [0, 0, 0],
            medium: Medium::Memory,
            log: log.clone(),
        }
    }

    pub fn values(mut self, values: Vec<f64>) -> Self {
        self.values = values;
        self
    }

    pub fn ramp(mut self, ramp: f64) -> Self {
        self.ramp = ramp;
        self
    }

    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Nodes of source, scale and recorder.
    pub fn nodes(mut self, nodes: [u32; 3]) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn medium(mut self, medium: Medium) -> Self {
        self.medium = medium;
        self
    }

    pub fn build(self, ctx: &ExecutionContext) -> Composite {
        self.build_with_recorder(ctx, |r| r)
    }

    /// Build, letting the caller adjust the recorder (e.g. add a delay).
    pub fn build_with_recorder(
        self,
        ctx: &ExecutionContext,
        adjust: impl FnOnce(Recorder) -> Recorder,
    ) -> Composite {
        let len = self.values.len();
        let [n_src, n_scale, n_sink] = self.nodes;
        let source = VectorSource::new(self.values).unwrap().with_ramp(self.ramp);
        let recorder = adjust(Recorder::new(len, self.log).unwrap());

        let mut graph = Composite::new(&self.name);
        let a = graph
            .add_block(Step::from_prototype("source", source).on_node(n_src))
            .unwrap();
        let b = graph
            .add_block(Step::from_prototype("scale", Scale::new(len, self.factor).unwrap()).on_node(n_scale))
            .unwrap();
        let c = graph
            .add_block(Step::from_prototype("sink", recorder).on_node(n_sink))
            .unwrap();
        let ab = format!("{}/source-scale", self.name);
        let bc = format!("{}/scale-sink", self.name);
        graph
            .connect(a, 0, b, 0, link(ctx, self.medium, &ab, n_src, n_scale))
            .unwrap();
        graph
            .connect(b, 0, c, 0, link(ctx, self.medium, &bc, n_scale, n_sink))
            .unwrap();
        graph
    }
}

/// Add a block and return its id, panicking on build errors.
pub fn add(graph: &mut Composite, block: impl Into<stepgraph::graph::Block>) -> BlockId {
    graph.add_block(block).unwrap()
}
