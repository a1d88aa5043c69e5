//! A single schedulable unit: one work holder plus its slot holders.

use crate::data::DataHolder;
use crate::graph::error::{GraphError, GraphResult};
use crate::graph::snapshot::{SlotSnapshot, StepSnapshot};
use crate::work::{DataManager, SlotDirection, SlotSpec, WorkContext, WorkFactory, WorkHolder, WorkState};

pub struct Step {
    name: String,
    factory: WorkFactory,
    work: Box<dyn WorkHolder>,
    node: u32,
    state: WorkState,
    inputs: DataManager,
    outputs: DataManager,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("type", &self.work.type_name())
            .field("node", &self.node)
            .field("state", &self.state)
            .finish()
    }
}

impl Step {
    /// Build a step running a fresh instance from `factory`, on node 0.
    pub fn new(name: impl Into<String>, factory: WorkFactory) -> Self {
        let name = name.into();
        let work = factory.make(&name);
        let inputs = DataManager::from_slots(&name, SlotDirection::Input, work.inputs());
        let outputs = DataManager::from_slots(&name, SlotDirection::Output, work.outputs());
        Self {
            name,
            factory,
            work,
            node: 0,
            state: WorkState::Uninitialized,
            inputs,
            outputs,
        }
    }

    /// Shorthand for a step built from a cloneable prototype.
    pub fn from_prototype<W>(name: impl Into<String>, prototype: W) -> Self
    where
        W: WorkHolder + Clone + Sync + 'static,
    {
        Self::new(name, WorkFactory::from_prototype(prototype))
    }

    /// Builder form of [`Step::run_on_node`] for steps not yet started.
    pub fn on_node(mut self, node: u32) -> Self {
        self.node = node;
        self
    }

    /// Assign the rank that executes this step. Only allowed before
    /// `preprocess`.
    pub fn run_on_node(&mut self, node: u32) -> GraphResult<()> {
        if self.state != WorkState::Uninitialized {
            return Err(GraphError::Lifecycle(format!(
                "step '{}' cannot move to node {} after it has started",
                self.name, node
            )));
        }
        self.node = node;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> u32 {
        self.node
    }

    pub fn state(&self) -> WorkState {
        self.state
    }

    pub fn type_name(&self) -> &str {
        self.work.type_name()
    }

    pub fn work(&self) -> &dyn WorkHolder {
        self.work.as_ref()
    }

    pub fn input_specs(&self) -> &[SlotSpec] {
        self.work.inputs()
    }

    pub fn output_specs(&self) -> &[SlotSpec] {
        self.work.outputs()
    }

    pub fn in_data_manager(&self) -> &DataManager {
        &self.inputs
    }

    pub fn in_data_manager_mut(&mut self) -> &mut DataManager {
        &mut self.inputs
    }

    pub fn out_data_manager(&self) -> &DataManager {
        &self.outputs
    }

    pub fn out_data_manager_mut(&mut self) -> &mut DataManager {
        &mut self.outputs
    }

    pub fn input(&self, slot: usize) -> Option<&DataHolder> {
        self.inputs.get(slot)
    }

    pub fn output(&self, slot: usize) -> Option<&DataHolder> {
        self.outputs.get(slot)
    }

    /// Fresh, unstarted copy with its own work instance and holders.
    pub fn replicate(&self, name: impl Into<String>) -> Step {
        Step::new(name, self.factory.clone()).on_node(self.node)
    }

    pub(crate) fn preprocess(&mut self) -> GraphResult<()> {
        if self.state != WorkState::Uninitialized {
            return Err(GraphError::Lifecycle(format!(
                "step '{}' already preprocessed",
                self.name
            )));
        }
        self.inputs.init_all();
        self.outputs.init_all();
        self.invoke(0, |work, ctx| work.preprocess(ctx))?;
        self.state = WorkState::Ready;
        Ok(())
    }

    pub(crate) fn process(&mut self, iteration: u64) -> GraphResult<()> {
        if self.state != WorkState::Ready {
            return Err(GraphError::Lifecycle(format!(
                "step '{}' is {:?}, not ready",
                self.name, self.state
            )));
        }
        self.invoke(iteration, |work, ctx| work.process(ctx))
    }

    pub(crate) fn postprocess(&mut self, iteration: u64) -> GraphResult<()> {
        if self.state != WorkState::Ready {
            return Ok(());
        }
        self.state = WorkState::Done;
        self.invoke(iteration, |work, ctx| work.postprocess(ctx))
    }

    /// Undo `preprocess`: run the postprocess hook if the step got that far,
    /// then swap in a fresh work instance and fresh holders.
    pub(crate) fn rollback(&mut self) -> GraphResult<()> {
        let result = if self.state == WorkState::Ready {
            self.invoke(0, |work, ctx| work.postprocess(ctx))
        } else {
            Ok(())
        };
        self.work = self.factory.make(&self.name);
        self.inputs = DataManager::from_slots(&self.name, SlotDirection::Input, self.work.inputs());
        self.outputs = DataManager::from_slots(&self.name, SlotDirection::Output, self.work.outputs());
        self.state = WorkState::Uninitialized;
        result
    }

    pub(crate) fn input_mut(&mut self, slot: usize) -> Option<&mut DataHolder> {
        self.inputs.get_mut(slot)
    }

    fn invoke(
        &mut self,
        iteration: u64,
        hook: impl FnOnce(&mut dyn WorkHolder, &mut WorkContext<'_>) -> anyhow::Result<()>,
    ) -> GraphResult<()> {
        let mut ctx = WorkContext {
            step: &self.name,
            iteration,
            inputs: self.inputs.holders(),
            outputs: self.outputs.holders_mut(),
        };
        hook(self.work.as_mut(), &mut ctx).map_err(|source| GraphError::Computation {
            step: self.name.clone(),
            source,
        })
    }

    pub(crate) fn snapshot(&self) -> StepSnapshot {
        let slots = |manager: &DataManager| {
            (0..manager.len())
                .filter_map(|i| {
                    let holder = manager.get(i)?;
                    Some(SlotSnapshot {
                        name: manager.slot_name(i).unwrap_or_default().to_string(),
                        schema: holder.schema().label(),
                        initialized: holder.is_initialized(),
                        timestamp: holder.timestamp(),
                    })
                })
                .collect()
        };
        StepSnapshot {
            name: self.name.clone(),
            type_name: self.work.type_name().to_string(),
            node: self.node,
            state: self.state,
            inputs: slots(&self.inputs),
            outputs: slots(&self.outputs),
            config: self.work.describe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::holders::{read_vector, write_vector, Scale};

    fn scale_step(name: &str) -> Step {
        Step::from_prototype(name, Scale::new(3, 2.0).unwrap())
    }

    #[test]
    fn test_holders_follow_work_slots() {
        let step = scale_step("double");
        assert_eq!(step.type_name(), "scale");
        assert_eq!(step.in_data_manager().len(), 1);
        assert_eq!(step.out_data_manager().len(), 1);
        assert_eq!(step.input(0).unwrap().name(), "double.in");
        assert_eq!(step.output(0).unwrap().name(), "double.out");
        assert_eq!(step.state(), WorkState::Uninitialized);
    }

    #[test]
    fn test_lifecycle() {
        let mut step = scale_step("double");
        step.preprocess().unwrap();
        assert_eq!(step.state(), WorkState::Ready);

        write_vector(step.input_mut(0).unwrap(), &[1.0, 2.0, 3.0]).unwrap();
        step.process(1).unwrap();
        assert_eq!(read_vector(step.output(0).unwrap()).unwrap(), vec![2.0, 4.0, 6.0]);

        step.postprocess(1).unwrap();
        assert_eq!(step.state(), WorkState::Done);
        assert!(matches!(step.process(2), Err(GraphError::Lifecycle(_))));
    }

    #[test]
    fn test_rollback_returns_to_uninitialized() {
        let mut step = scale_step("double");
        step.preprocess().unwrap();
        write_vector(step.input_mut(0).unwrap(), &[1.0, 2.0, 3.0]).unwrap();

        step.rollback().unwrap();
        assert_eq!(step.state(), WorkState::Uninitialized);
        assert!(!step.input(0).unwrap().is_initialized());

        step.run_on_node(1).unwrap();
        step.preprocess().unwrap();
        assert_eq!(step.state(), WorkState::Ready);
    }

    #[test]
    fn test_node_is_fixed_after_start() {
        let mut step = scale_step("double");
        step.run_on_node(1).unwrap();
        assert_eq!(step.node(), 1);
        step.preprocess().unwrap();
        assert!(matches!(step.run_on_node(0), Err(GraphError::Lifecycle(_))));
    }

    #[test]
    fn test_replicate_is_fresh() {
        let mut step = scale_step("double").on_node(2);
        step.preprocess().unwrap();
        let copy = step.replicate("double#1");
        assert_eq!(copy.name(), "double#1");
        assert_eq!(copy.node(), 2);
        assert_eq!(copy.state(), WorkState::Uninitialized);
        assert!(!copy.input(0).unwrap().is_initialized());
    }
}
