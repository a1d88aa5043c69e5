//! Composite - a scheduled DAG of steps and nested composites.
//!
//! A composite owns its blocks and the connections between them. After
//! `preprocess` compiles the graph once, every `process` call performs one
//! pass in topological order: for each block, read its inbound connections
//! into its input holders, run it, then write its output holders to its
//! outbound connections.
//!
//! # Multiple nodes
//!
//! Every node builds the same graph. A node only runs the steps assigned to
//! its rank, only writes connections whose producer is local and only reads
//! connections whose consumer is local. Edges with neither end local are
//! never opened.
//!
//! # Non-blocking connections
//!
//! A non-blocking read that finds nothing leaves the consumer's input holder
//! as it was, so the step runs on the previous message. A non-blocking write
//! that cannot complete stays pending: the next write on that edge first
//! waits for it, and `postprocess` flushes it. A producer whose consumer has
//! stopped reading therefore blocks on its second pending write until the
//! consumer resumes or the context is cancelled.
//!
//! # Failed preprocess
//!
//! If a block fails to preprocess, the blocks already started are
//! postprocessed in reverse order, every edge is closed and the composite
//! is back to `Uninitialized`, ready for another `preprocess`.
//!
//! # Nesting
//!
//! A nested composite exposes the inputs of its entry block and the outputs
//! of its exit block, by default the first and last block added.

use crate::config::FailurePolicy;
use crate::connection::{Connection, Transfer};
use crate::context::ExecutionContext;
use crate::data::DataHolder;
use crate::graph::compiler::PlanCompiler;
use crate::graph::error::{GraphError, GraphResult};
use crate::graph::plan::ExecutionPlan;
use crate::graph::snapshot::{BlockSnapshot, EdgeSnapshot, GraphSnapshot};
use crate::graph::step::Step;
use crate::graph::{BlockId, EdgeId};
use crate::transport::Side;
use crate::work::{SlotDirection, SlotSpec, WorkState};

/// Anything a composite can schedule.
#[derive(Debug)]
pub enum Block {
    Step(Step),
    Composite(Composite),
}

impl From<Step> for Block {
    fn from(step: Step) -> Self {
        Block::Step(step)
    }
}

impl From<Composite> for Block {
    fn from(composite: Composite) -> Self {
        Block::Composite(composite)
    }
}

impl Block {
    pub fn name(&self) -> &str {
        match self {
            Block::Step(s) => s.name(),
            Block::Composite(c) => c.name(),
        }
    }

    pub fn input_specs(&self) -> &[SlotSpec] {
        match self {
            Block::Step(s) => s.input_specs(),
            Block::Composite(c) => c.entry().map(Block::input_specs).unwrap_or(&[]),
        }
    }

    pub fn output_specs(&self) -> &[SlotSpec] {
        match self {
            Block::Step(s) => s.output_specs(),
            Block::Composite(c) => c.exit().map(Block::output_specs).unwrap_or(&[]),
        }
    }

    pub fn as_step(&self) -> Option<&Step> {
        match self {
            Block::Step(s) => Some(s),
            Block::Composite(_) => None,
        }
    }

    pub fn as_composite(&self) -> Option<&Composite> {
        match self {
            Block::Step(_) => None,
            Block::Composite(c) => Some(c),
        }
    }

    /// Node running the step that consumes this block's inputs.
    fn input_node(&self) -> Option<u32> {
        match self {
            Block::Step(s) => Some(s.node()),
            Block::Composite(c) => c.entry().and_then(Block::input_node),
        }
    }

    /// Node running the step that produces this block's outputs.
    fn output_node(&self) -> Option<u32> {
        match self {
            Block::Step(s) => Some(s.node()),
            Block::Composite(c) => c.exit().and_then(Block::output_node),
        }
    }

    fn input_holder_mut(&mut self, slot: usize) -> Option<&mut DataHolder> {
        match self {
            Block::Step(s) => s.input_mut(slot),
            Block::Composite(c) => {
                let entry = c.entry_index()?;
                c.blocks[entry].input_holder_mut(slot)
            }
        }
    }

    fn output_holder(&self, slot: usize) -> Option<&DataHolder> {
        match self {
            Block::Step(s) => s.output(slot),
            Block::Composite(c) => c.exit()?.output_holder(slot),
        }
    }

    /// Whether an edge inside this block already feeds input `slot`.
    fn input_bound_inside(&self, slot: usize) -> bool {
        match self {
            Block::Step(_) => false,
            Block::Composite(c) => match c.entry_index() {
                Some(entry) => {
                    c.edges
                        .iter()
                        .any(|e| e.to.index() == entry && e.to_slot == slot)
                        || c.blocks[entry].input_bound_inside(slot)
                }
                None => false,
            },
        }
    }

    fn preprocess(&mut self, ctx: &ExecutionContext) -> GraphResult<()> {
        match self {
            Block::Step(s) => {
                if s.node() >= ctx.size() {
                    return Err(GraphError::InvalidNode {
                        step: s.name().to_string(),
                        node: s.node(),
                        size: ctx.size(),
                    });
                }
                if ctx.is_local(s.node()) {
                    s.preprocess()?;
                }
                Ok(())
            }
            Block::Composite(c) => c.preprocess(ctx),
        }
    }

    fn postprocess(&mut self, iteration: u64) -> GraphResult<()> {
        match self {
            Block::Step(s) => s.postprocess(iteration),
            Block::Composite(c) => c.postprocess(),
        }
    }

    fn rollback(&mut self) -> GraphResult<()> {
        match self {
            Block::Step(s) => s.rollback(),
            Block::Composite(c) => {
                c.rollback();
                Ok(())
            }
        }
    }

    fn replicate(&self) -> GraphResult<Block> {
        Ok(match self {
            Block::Step(s) => Block::Step(s.replicate(s.name())),
            Block::Composite(c) => Block::Composite(c.replicate(c.name())?),
        })
    }

    fn snapshot(&self) -> BlockSnapshot {
        match self {
            Block::Step(s) => BlockSnapshot::Step(s.snapshot()),
            Block::Composite(c) => BlockSnapshot::Composite(c.dump()),
        }
    }
}

#[derive(Debug)]
struct Edge {
    from: BlockId,
    from_slot: usize,
    to: BlockId,
    to_slot: usize,
    connection: Connection,
    side: Option<Side>,
    /// A non-blocking write has not completed yet.
    pending: bool,
}

/// Counters kept across passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub passes: u64,
    /// Step executions skipped under `FailurePolicy::SkipStep`.
    pub skipped_steps: u64,
}

#[derive(Debug)]
pub struct Composite {
    name: String,
    blocks: Vec<Block>,
    edges: Vec<Edge>,
    entry: Option<BlockId>,
    exit: Option<BlockId>,
    failure_policy: Option<FailurePolicy>,
    generation: u64,
    plan: Option<ExecutionPlan>,
    state: WorkState,
    iteration: u64,
    ctx: Option<ExecutionContext>,
    stats: RunStats,
}

impl Composite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            edges: Vec::new(),
            entry: None,
            exit: None,
            failure_policy: None,
            generation: 0,
            plan: None,
            state: WorkState::Uninitialized,
            iteration: 0,
            ctx: None,
            stats: RunStats::default(),
        }
    }

    /// Pin the failure policy; otherwise the context's policy applies.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkState {
        self.state
    }

    /// Passes completed so far.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.plan.as_ref()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    pub fn block_id(&self, name: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|b| b.name() == name)
            .map(|i| BlockId(i as u32))
    }

    /// Find a step by name, searching nested composites too.
    pub fn find_step(&self, name: &str) -> Option<&Step> {
        self.blocks.iter().find_map(|b| match b {
            Block::Step(s) if s.name() == name => Some(s),
            Block::Step(_) => None,
            Block::Composite(c) => c.find_step(name),
        })
    }

    pub fn connection(&self, id: EdgeId) -> Option<&Connection> {
        self.edges.get(id.index()).map(|e| &e.connection)
    }

    fn entry_index(&self) -> Option<usize> {
        match self.entry {
            Some(id) => Some(id.index()),
            None if self.blocks.is_empty() => None,
            None => Some(0),
        }
    }

    fn entry(&self) -> Option<&Block> {
        self.blocks.get(self.entry_index()?)
    }

    fn exit(&self) -> Option<&Block> {
        match self.exit {
            Some(id) => self.blocks.get(id.index()),
            None => self.blocks.last(),
        }
    }

    fn ensure_building(&self, what: &str) -> GraphResult<()> {
        if self.state != WorkState::Uninitialized {
            return Err(GraphError::Lifecycle(format!(
                "cannot {} '{}' after preprocess",
                what, self.name
            )));
        }
        Ok(())
    }

    fn check_block(&self, id: BlockId) -> GraphResult<&Block> {
        self.blocks.get(id.index()).ok_or(GraphError::NoSuchBlock(id))
    }

    /// Add a step or nested composite. Block names must be unique within
    /// this composite.
    pub fn add_block(&mut self, block: impl Into<Block>) -> GraphResult<BlockId> {
        self.ensure_building("add blocks to")?;
        let block = block.into();
        if self.block_id(block.name()).is_some() {
            return Err(GraphError::DuplicateBlock(block.name().to_string()));
        }
        if let Block::Composite(c) = &block {
            c.ensure_building("nest")?;
        }
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        self.generation += 1;
        Ok(id)
    }

    /// Use `id`'s inputs as this composite's inputs.
    pub fn expose_inputs(&mut self, id: BlockId) -> GraphResult<()> {
        self.ensure_building("rewire")?;
        self.check_block(id)?;
        self.entry = Some(id);
        Ok(())
    }

    /// Use `id`'s outputs as this composite's outputs.
    pub fn expose_outputs(&mut self, id: BlockId) -> GraphResult<()> {
        self.ensure_building("rewire")?;
        self.check_block(id)?;
        self.exit = Some(id);
        Ok(())
    }

    /// Connect output `from_slot` of `from` to input `to_slot` of `to`.
    ///
    /// Slot indices, schema compatibility and acyclicity are checked here,
    /// so a composite that builds successfully can always be scheduled.
    pub fn connect(
        &mut self,
        from: BlockId,
        from_slot: usize,
        to: BlockId,
        to_slot: usize,
        connection: Connection,
    ) -> GraphResult<EdgeId> {
        self.ensure_building("connect blocks in")?;
        let producer = self.check_block(from)?;
        let consumer = self.check_block(to)?;

        let out_spec = producer
            .output_specs()
            .get(from_slot)
            .ok_or_else(|| GraphError::NoSuchSlot {
                block: producer.name().to_string(),
                direction: SlotDirection::Output,
                slot: from_slot,
                available: producer.output_specs().len(),
            })?;
        let in_spec = consumer
            .input_specs()
            .get(to_slot)
            .ok_or_else(|| GraphError::NoSuchSlot {
                block: consumer.name().to_string(),
                direction: SlotDirection::Input,
                slot: to_slot,
                available: consumer.input_specs().len(),
            })?;

        if !out_spec.schema.is_wire_compatible(&in_spec.schema) {
            return Err(GraphError::SchemaMismatch {
                from: format!("{}.{}", producer.name(), out_spec.name),
                to: format!("{}.{}", consumer.name(), in_spec.name),
                source_schema: out_spec.schema.label(),
                dest_schema: in_spec.schema.label(),
            });
        }

        if self
            .edges
            .iter()
            .any(|e| e.to == to && e.to_slot == to_slot)
            || consumer.input_bound_inside(to_slot)
        {
            return Err(GraphError::SlotAlreadyBound {
                block: consumer.name().to_string(),
                slot: to_slot,
            });
        }

        let pairs = self.edge_pairs();
        if let Some(path) = PlanCompiler::find_path(self.blocks.len(), &pairs, to.index(), from.index()) {
            let mut cycle = vec![producer.name().to_string()];
            cycle.extend(path.into_iter().map(|i| self.blocks[i].name().to_string()));
            return Err(GraphError::Cycle(cycle));
        }

        tracing::debug!(
            composite = %self.name,
            connection = %connection.name(),
            "{}.{} -> {}.{}",
            producer.name(),
            out_spec.name,
            consumer.name(),
            in_spec.name
        );

        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge {
            from,
            from_slot,
            to,
            to_slot,
            connection,
            side: None,
            pending: false,
        });
        self.generation += 1;
        Ok(id)
    }

    /// Feed input `to_slot` of `to` from output `from_slot` of `from`.
    pub fn connect_input(
        &mut self,
        to: BlockId,
        to_slot: usize,
        from: BlockId,
        from_slot: usize,
        connection: Connection,
    ) -> GraphResult<EdgeId> {
        self.connect(from, from_slot, to, to_slot, connection)
    }

    fn edge_pairs(&self) -> Vec<(usize, usize)> {
        self.edges
            .iter()
            .map(|e| (e.from.index(), e.to.index()))
            .collect()
    }

    fn policy(&self, ctx: &ExecutionContext) -> FailurePolicy {
        self.failure_policy
            .unwrap_or(ctx.config().execution.failure_policy)
    }

    /// Compile the execution order, open the connections this node takes
    /// part in and preprocess the local steps.
    pub fn preprocess(&mut self, ctx: &ExecutionContext) -> GraphResult<()> {
        self.ensure_building("preprocess")?;

        let names: Vec<String> = self.blocks.iter().map(|b| b.name().to_string()).collect();
        let plan = PlanCompiler::compile(&names, &self.edge_pairs(), self.generation)?;

        if let Err(e) = self.open_edges(ctx) {
            self.close_edges();
            return Err(e);
        }

        for (pos, &idx) in plan.order.iter().enumerate() {
            if let Err(e) = self.blocks[idx].preprocess(ctx) {
                tracing::warn!(composite = %self.name, block = %self.blocks[idx].name(), "preprocess failed: {}", e);
                self.unwind(&plan.order[..=pos]);
                return Err(e);
            }
        }

        tracing::info!(
            composite = %self.name,
            rank = ctx.rank(),
            blocks = plan.stats.total_blocks,
            edges = plan.stats.total_edges,
            compile_time_us = plan.stats.compile_time_us,
            "composite ready"
        );

        self.plan = Some(plan);
        self.ctx = Some(ctx.clone());
        self.state = WorkState::Ready;
        Ok(())
    }

    fn open_edges(&mut self, ctx: &ExecutionContext) -> GraphResult<()> {
        let rank = ctx.rank();
        for edge in &mut self.edges {
            let sends = self.blocks[edge.from.index()].output_node() == Some(rank);
            let receives = self.blocks[edge.to.index()].input_node() == Some(rank);
            let side = match (sends, receives) {
                (true, true) => Side::Both,
                (true, false) => Side::Sender,
                (false, true) => Side::Receiver,
                (false, false) => continue,
            };
            edge.connection
                .bind(ctx.cancel_token(), &ctx.config().reconnect);
            edge.connection.open(side)?;
            edge.side = Some(side);
        }
        Ok(())
    }

    /// Roll back `started` blocks in reverse order and close every edge.
    fn unwind(&mut self, started: &[usize]) {
        for &idx in started.iter().rev() {
            if let Err(e) = self.blocks[idx].rollback() {
                tracing::warn!(composite = %self.name, block = %self.blocks[idx].name(), "rollback failed: {}", e);
            }
        }
        self.close_edges();
    }

    /// Return a ready composite to `Uninitialized` without running a pass,
    /// so a failed sibling's parent can preprocess it again.
    fn rollback(&mut self) {
        if self.state != WorkState::Ready {
            return;
        }
        let order = self.plan.take().map(|p| p.order).unwrap_or_default();
        self.unwind(&order);
        self.ctx = None;
        self.state = WorkState::Uninitialized;
        self.iteration = 0;
        self.stats = RunStats::default();
    }

    fn close_edges(&mut self) {
        for edge in &mut self.edges {
            edge.connection.close();
            edge.side = None;
            edge.pending = false;
        }
    }

    /// Run one pass over the graph.
    pub fn process(&mut self) -> GraphResult<()> {
        if self.state != WorkState::Ready {
            return Err(GraphError::Lifecycle(format!(
                "composite '{}' is {:?}, not ready",
                self.name, self.state
            )));
        }
        let Some(ctx) = self.ctx.clone() else {
            return Err(GraphError::Lifecycle(format!(
                "composite '{}' has no execution context",
                self.name
            )));
        };
        let policy = self.policy(&ctx);
        let cancel = ctx.cancel_token();
        let rank = ctx.rank();

        self.iteration += 1;
        let iteration = self.iteration;
        let Self {
            name,
            blocks,
            edges,
            plan,
            stats,
            ..
        } = self;
        let Some(plan) = plan.as_ref() else {
            return Err(GraphError::Lifecycle(format!("composite '{}' has no plan", name)));
        };

        for &idx in &plan.order {
            if cancel.is_cancelled() {
                tracing::info!(composite = %name, iteration, "pass cancelled");
                return Err(GraphError::Cancelled);
            }

            for &e in &plan.inbound[idx] {
                let edge = &mut edges[e];
                if !edge.side.is_some_and(Side::receives) {
                    continue;
                }
                let block = &mut blocks[idx];
                let block_name = block.name().to_string();
                let dest = block
                    .input_holder_mut(edge.to_slot)
                    .ok_or_else(|| GraphError::NoSuchSlot {
                        block: block_name,
                        direction: SlotDirection::Input,
                        slot: edge.to_slot,
                        available: 0,
                    })?;
                if edge.connection.read(dest)? == Transfer::Pending {
                    tracing::trace!(connection = %edge.connection.name(), "no new message");
                }
            }

            match &mut blocks[idx] {
                Block::Step(step) if step.node() == rank => match step.process(iteration) {
                    Ok(()) => {}
                    Err(e @ GraphError::Computation { .. }) if policy == FailurePolicy::SkipStep => {
                        tracing::warn!(composite = %name, iteration, "skipping: {}", e);
                        stats.skipped_steps += 1;
                    }
                    Err(e) => {
                        tracing::error!(composite = %name, iteration, "{}", e);
                        return Err(e);
                    }
                },
                Block::Step(_) => continue,
                Block::Composite(inner) => inner.process()?,
            }

            for &e in &plan.outbound[idx] {
                let edge = &mut edges[e];
                if !edge.side.is_some_and(Side::sends) {
                    continue;
                }
                if edge.pending {
                    edge.connection.wait_for_sent()?;
                    edge.pending = false;
                }
                let block = &blocks[idx];
                let source = block
                    .output_holder(edge.from_slot)
                    .ok_or_else(|| GraphError::NoSuchSlot {
                        block: block.name().to_string(),
                        direction: SlotDirection::Output,
                        slot: edge.from_slot,
                        available: block.output_specs().len(),
                    })?;
                edge.pending = edge.connection.write(source)? == Transfer::Pending;
            }
        }

        stats.passes += 1;
        tracing::trace!(composite = %name, iteration, "pass complete");
        Ok(())
    }

    /// Run `passes` passes, stopping at the first error.
    pub fn run(&mut self, passes: u64) -> GraphResult<()> {
        for _ in 0..passes {
            self.process()?;
        }
        Ok(())
    }

    /// Flush pending writes, postprocess local steps and close every
    /// connection. Every step is given the chance to finish; the first
    /// error is returned.
    pub fn postprocess(&mut self) -> GraphResult<()> {
        if self.state != WorkState::Ready {
            return Err(GraphError::Lifecycle(format!(
                "composite '{}' is {:?}, not ready",
                self.name, self.state
            )));
        }
        let mut first_error = None;

        for edge in &mut self.edges {
            if edge.pending {
                edge.pending = false;
                if let Err(e) = edge.connection.wait_for_sent() {
                    first_error.get_or_insert(GraphError::from(e));
                }
            }
        }

        let order = self
            .plan
            .as_ref()
            .map(|p| p.order.clone())
            .unwrap_or_default();
        for idx in order {
            if let Err(e) = self.blocks[idx].postprocess(self.iteration) {
                tracing::error!(composite = %self.name, "postprocess failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        self.close_edges();
        self.state = WorkState::Done;
        tracing::info!(
            composite = %self.name,
            passes = self.stats.passes,
            skipped_steps = self.stats.skipped_steps,
            "composite finished"
        );
        first_error.map_or(Ok(()), Err)
    }

    /// Independent, unstarted copy named `name`. Steps get fresh work
    /// instances and connections get cloned channels, so the copy can run
    /// alongside the original. Fails if a channel cannot be cloned.
    pub fn replicate(&self, name: impl Into<String>) -> GraphResult<Composite> {
        let blocks = self
            .blocks
            .iter()
            .map(Block::replicate)
            .collect::<GraphResult<Vec<_>>>()?;
        let edges = self
            .edges
            .iter()
            .map(|e| {
                let connection = e
                    .connection
                    .replicate(e.connection.name())
                    .map_err(|source| GraphError::Replicate {
                        edge: e.connection.name().to_string(),
                        source,
                    })?;
                Ok(Edge {
                    from: e.from,
                    from_slot: e.from_slot,
                    to: e.to,
                    to_slot: e.to_slot,
                    connection,
                    side: None,
                    pending: false,
                })
            })
            .collect::<GraphResult<Vec<_>>>()?;

        Ok(Composite {
            name: name.into(),
            blocks,
            edges,
            entry: self.entry,
            exit: self.exit,
            failure_policy: self.failure_policy,
            generation: self.generation,
            plan: None,
            state: WorkState::Uninitialized,
            iteration: 0,
            ctx: None,
            stats: RunStats::default(),
        })
    }

    /// Snapshot of the graph, nested composites included.
    pub fn dump(&self) -> GraphSnapshot {
        let order = self
            .plan
            .as_ref()
            .map(|p| p.order.iter().map(|&i| self.blocks[i].name().to_string()).collect())
            .unwrap_or_default();
        let edges = self
            .edges
            .iter()
            .map(|e| {
                let from = &self.blocks[e.from.index()];
                let to = &self.blocks[e.to.index()];
                let channel = e.connection.channel();
                EdgeSnapshot {
                    name: e.connection.name().to_string(),
                    from: from.name().to_string(),
                    from_slot: e.from_slot,
                    to: to.name().to_string(),
                    to_slot: e.to_slot,
                    kind: channel.kind().to_string(),
                    endpoint: channel.endpoint(),
                    tag: e.connection.tag(),
                    mode: e.connection.mode(),
                    side: e.side.map(|s| format!("{:?}", s).to_lowercase()),
                    stats: e.connection.stats(),
                }
            })
            .collect();

        GraphSnapshot {
            name: self.name.clone(),
            state: self.state,
            iteration: self.iteration,
            order,
            plan: self.plan.as_ref().map(|p| p.stats),
            blocks: self.blocks.iter().map(Block::snapshot).collect(),
            edges,
        }
    }

    /// [`Composite::dump`] as pretty-printed JSON.
    pub fn dump_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.dump())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameworkConfig;
    use crate::error::ErrorClass;
    use crate::transport::{MemoryChannel, NullChannel};
    use crate::work::holders::{vector_schema, Passthrough, RecordLog, Recorder, Scale, VectorSource};
    use crate::work::{WorkContext, WorkHolder};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    fn memory(ctx: &ExecutionContext, key: &str) -> Connection {
        Connection::new(key, Box::new(MemoryChannel::new(ctx, key)))
    }

    fn source(name: &str) -> Step {
        Step::from_prototype(name, VectorSource::new(vec![1.0, 2.0, 3.0]).unwrap())
    }

    fn scale(name: &str, factor: f64) -> Step {
        Step::from_prototype(name, Scale::new(3, factor).unwrap())
    }

    fn recorder(name: &str, log: &RecordLog) -> Step {
        Step::from_prototype(name, Recorder::new(3, log.clone()).unwrap())
    }

    #[derive(Clone)]
    struct Failing;

    impl WorkHolder for Failing {
        fn type_name(&self) -> &str {
            "failing"
        }
        fn inputs(&self) -> &[SlotSpec] {
            &[]
        }
        fn outputs(&self) -> &[SlotSpec] {
            &[]
        }
        fn process(&mut self, ctx: &mut WorkContext<'_>) -> anyhow::Result<()> {
            anyhow::bail!("bad input at pass {}", ctx.iteration)
        }
    }

    #[test]
    fn test_linear_pipeline() {
        let ctx = ExecutionContext::local();
        let log = RecordLog::new();
        let mut graph = Composite::new("linear");
        let a = graph.add_block(source("a")).unwrap();
        let b = graph.add_block(scale("b", 2.0)).unwrap();
        let c = graph.add_block(recorder("c", &log)).unwrap();
        graph.connect(a, 0, b, 0, memory(&ctx, "a-b")).unwrap();
        graph.connect(b, 0, c, 0, memory(&ctx, "b-c")).unwrap();

        graph.preprocess(&ctx).unwrap();
        graph.run(3).unwrap();
        graph.postprocess().unwrap();

        assert_eq!(log.values(), vec![vec![2.0, 4.0, 6.0]; 3]);
        assert_eq!(graph.stats().passes, 3);
        assert_eq!(graph.state(), WorkState::Done);
    }

    #[test]
    fn test_order_follows_edges() {
        let ctx = ExecutionContext::local();
        let log = RecordLog::new();
        let mut graph = Composite::new("reversed");
        let c = graph.add_block(recorder("c", &log)).unwrap();
        let b = graph.add_block(scale("b", 10.0)).unwrap();
        let a = graph.add_block(source("a")).unwrap();
        graph.connect(b, 0, c, 0, memory(&ctx, "b-c")).unwrap();
        graph.connect(a, 0, b, 0, memory(&ctx, "a-b")).unwrap();

        graph.preprocess(&ctx).unwrap();
        assert_eq!(graph.dump().order, vec!["a", "b", "c"]);
        graph.process().unwrap();
        assert_eq!(log.values(), vec![vec![10.0, 20.0, 30.0]]);
    }

    #[test]
    fn test_cycle_rejected_at_build() {
        let ctx = ExecutionContext::local();
        let schema = vector_schema(3).unwrap();
        let mut graph = Composite::new("loop");
        let a = graph.add_block(Step::from_prototype("a", Passthrough::new(schema.clone()))).unwrap();
        let b = graph.add_block(Step::from_prototype("b", Passthrough::new(schema))).unwrap();
        graph.connect(a, 0, b, 0, memory(&ctx, "a-b")).unwrap();

        let err = graph.connect(b, 0, a, 0, memory(&ctx, "b-a")).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
        match err {
            GraphError::Cycle(path) => assert_eq!(path, vec!["b", "a", "b"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_build_time_checks() {
        let ctx = ExecutionContext::local();
        let log = RecordLog::new();
        let mut graph = Composite::new("checks");
        let a = graph.add_block(source("a")).unwrap();
        let wide = graph
            .add_block(Step::from_prototype("wide", Scale::new(4, 1.0).unwrap()))
            .unwrap();
        let c = graph.add_block(recorder("c", &log)).unwrap();

        assert!(matches!(
            graph.connect(a, 1, c, 0, memory(&ctx, "x")),
            Err(GraphError::NoSuchSlot { direction: SlotDirection::Output, .. })
        ));
        assert!(matches!(
            graph.connect(a, 0, wide, 0, memory(&ctx, "y")),
            Err(GraphError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            graph.add_block(source("a")),
            Err(GraphError::DuplicateBlock(_))
        ));

        graph.connect(a, 0, c, 0, memory(&ctx, "a-c")).unwrap();
        assert!(matches!(
            graph.connect(a, 0, c, 0, memory(&ctx, "a-c2")),
            Err(GraphError::SlotAlreadyBound { .. })
        ));
    }

    #[test]
    fn test_nested_composite_matches_flat() {
        let ctx = ExecutionContext::local();
        let log = RecordLog::new();

        let mut inner = Composite::new("inner");
        let b = inner.add_block(scale("b", 2.0)).unwrap();
        let c = inner.add_block(scale("c", 3.0)).unwrap();
        inner.connect(b, 0, c, 0, memory(&ctx, "b-c")).unwrap();

        let mut outer = Composite::new("outer");
        let a = outer.add_block(source("a")).unwrap();
        let n = outer.add_block(inner).unwrap();
        let d = outer.add_block(recorder("d", &log)).unwrap();
        outer.connect(a, 0, n, 0, memory(&ctx, "a-inner")).unwrap();
        outer.connect(n, 0, d, 0, memory(&ctx, "inner-d")).unwrap();

        outer.preprocess(&ctx).unwrap();
        outer.run(2).unwrap();
        outer.postprocess().unwrap();

        assert_eq!(log.values(), vec![vec![6.0, 12.0, 18.0]; 2]);
        assert_eq!(outer.find_step("c").unwrap().state(), WorkState::Done);
    }

    #[test]
    fn test_computation_error_aborts() {
        let ctx = ExecutionContext::local();
        let mut graph = Composite::new("abort");
        graph.add_block(Step::from_prototype("bad", Failing)).unwrap();
        graph.preprocess(&ctx).unwrap();

        let err = graph.process().unwrap_err();
        assert_eq!(err.class(), ErrorClass::Computation);
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_skip_step_policy_keeps_running() {
        let mut config = FrameworkConfig::default();
        config.execution.failure_policy = FailurePolicy::SkipStep;
        let ctx = ExecutionContext::new(config).unwrap();
        let log = RecordLog::new();

        let mut graph = Composite::new("skip");
        graph.add_block(Step::from_prototype("bad", Failing)).unwrap();
        let a = graph.add_block(source("a")).unwrap();
        let c = graph.add_block(recorder("c", &log)).unwrap();
        graph.connect(a, 0, c, 0, memory(&ctx, "a-c")).unwrap();

        graph.preprocess(&ctx).unwrap();
        graph.run(2).unwrap();
        assert_eq!(graph.stats().skipped_steps, 2);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_cancel_stops_pass() {
        let ctx = ExecutionContext::local();
        let mut graph = Composite::new("cancel");
        graph.add_block(source("a")).unwrap();
        graph.preprocess(&ctx).unwrap();

        ctx.cancel_token().cancel();
        let err = graph.process().unwrap_err();
        assert_eq!(err.class(), ErrorClass::Cancelled);
    }

    #[test]
    fn test_lifecycle_order_enforced() {
        let ctx = ExecutionContext::local();
        let mut graph = Composite::new("order");
        graph.add_block(source("a")).unwrap();

        assert!(matches!(graph.process(), Err(GraphError::Lifecycle(_))));
        graph.preprocess(&ctx).unwrap();
        assert!(matches!(graph.add_block(source("b")), Err(GraphError::Lifecycle(_))));
        assert!(matches!(graph.preprocess(&ctx), Err(GraphError::Lifecycle(_))));
    }

    /// Records its teardown and fails `preprocess` while `fail` is set.
    #[derive(Clone)]
    struct Tracked {
        torn_down: Arc<Mutex<Vec<String>>>,
        fail: Arc<AtomicBool>,
    }

    impl WorkHolder for Tracked {
        fn type_name(&self) -> &str {
            "tracked"
        }
        fn inputs(&self) -> &[SlotSpec] {
            &[]
        }
        fn outputs(&self) -> &[SlotSpec] {
            &[]
        }
        fn preprocess(&mut self, ctx: &mut WorkContext<'_>) -> anyhow::Result<()> {
            anyhow::ensure!(!self.fail.load(Ordering::SeqCst), "{} refused to start", ctx.step);
            Ok(())
        }
        fn process(&mut self, _ctx: &mut WorkContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
        fn postprocess(&mut self, ctx: &mut WorkContext<'_>) -> anyhow::Result<()> {
            self.torn_down.lock().unwrap().push(ctx.step.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_failed_preprocess_rolls_back_started_blocks() {
        let ctx = ExecutionContext::local();
        let torn_down = Arc::new(Mutex::new(Vec::new()));
        let ok = Tracked { torn_down: torn_down.clone(), fail: Arc::new(AtomicBool::new(false)) };
        let gate = Arc::new(AtomicBool::new(true));
        let gated = Tracked { torn_down: torn_down.clone(), fail: gate.clone() };

        let mut inner = Composite::new("inner");
        let x = inner.add_block(source("x")).unwrap();
        let y = inner.add_block(Step::from_prototype("y", Passthrough::new(vector_schema(3).unwrap()))).unwrap();
        inner.connect(x, 0, y, 0, memory(&ctx, "x-y")).unwrap();
        inner.add_block(Step::from_prototype("inner-ok", ok.clone())).unwrap();

        let mut graph = Composite::new("partial");
        graph.add_block(Step::from_prototype("a", ok)).unwrap();
        graph.add_block(inner).unwrap();
        graph.add_block(Step::from_prototype("b", gated)).unwrap();

        let err = graph.preprocess(&ctx).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Computation);
        assert!(err.to_string().contains("b refused to start"));
        assert_eq!(graph.state(), WorkState::Uninitialized);
        assert_eq!(*torn_down.lock().unwrap(), vec!["inner-ok", "a"]);
        for name in ["a", "x", "y", "inner-ok", "b"] {
            assert_eq!(graph.find_step(name).unwrap().state(), WorkState::Uninitialized, "{}", name);
        }
        let nested = graph.block(BlockId(1)).and_then(Block::as_composite).unwrap();
        assert_eq!(nested.state(), WorkState::Uninitialized);
        assert!(nested.dump().edges.iter().all(|e| e.side.is_none()));
        assert!(matches!(graph.postprocess(), Err(GraphError::Lifecycle(_))));

        gate.store(false, Ordering::SeqCst);
        graph.preprocess(&ctx).unwrap();
        graph.run(1).unwrap();
        graph.postprocess().unwrap();
        assert_eq!(torn_down.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_remote_steps_are_skipped() {
        let ctx = ExecutionContext::with_world(2).unwrap();
        let log = RecordLog::new();
        let mut graph = Composite::new("split");
        let a = graph.add_block(source("a")).unwrap();
        let c = graph.add_block(recorder("c", &log).on_node(1)).unwrap();
        graph
            .connect(a, 0, c, 0, Connection::new("a-c", Box::new(NullChannel::new())))
            .unwrap();

        graph.preprocess(&ctx).unwrap();
        graph.run(3).unwrap();
        assert!(log.is_empty());
        assert_eq!(graph.find_step("c").unwrap().state(), WorkState::Uninitialized);
        assert_eq!(graph.dump().edges[0].side.as_deref(), Some("sender"));
    }

    #[test]
    fn test_node_out_of_range() {
        let ctx = ExecutionContext::local();
        let mut graph = Composite::new("range");
        graph.add_block(source("a").on_node(3)).unwrap();
        assert!(matches!(
            graph.preprocess(&ctx),
            Err(GraphError::InvalidNode { node: 3, size: 1, .. })
        ));
    }

    #[test]
    fn test_replicate_runs_independently() {
        let ctx = ExecutionContext::local();
        let log = RecordLog::new();
        let mut graph = Composite::new("orig");
        let a = graph.add_block(source("a")).unwrap();
        let b = graph.add_block(recorder("b", &log)).unwrap();
        graph.connect(a, 0, b, 0, memory(&ctx, "a-b")).unwrap();

        let mut copy = graph.replicate("copy").unwrap();
        graph.preprocess(&ctx).unwrap();
        copy.preprocess(&ctx).unwrap();
        graph.process().unwrap();
        copy.process().unwrap();
        copy.process().unwrap();

        assert_eq!(log.len(), 3);
        assert_eq!(copy.name(), "copy");
        assert_eq!(copy.iteration(), 2);
    }

    #[test]
    fn test_dump_json() {
        let ctx = ExecutionContext::local();
        let log = RecordLog::new();
        let mut graph = Composite::new("dumped");
        let a = graph.add_block(source("a")).unwrap();
        let b = graph.add_block(recorder("b", &log)).unwrap();
        graph.connect(a, 0, b, 0, memory(&ctx, "a-b")).unwrap();
        graph.preprocess(&ctx).unwrap();
        graph.process().unwrap();

        let json: serde_json::Value = serde_json::from_str(&graph.dump_json().unwrap()).unwrap();
        assert_eq!(json["name"], "dumped");
        assert_eq!(json["blocks"][0]["kind"], "step");
        assert_eq!(json["blocks"][1]["type_name"], "recorder");
        assert_eq!(json["edges"][0]["kind"], "memory");
        assert_eq!(json["edges"][0]["stats"]["messages_sent"], 1);
    }
}
