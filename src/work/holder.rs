//! The computation extension point.
//!
//! Domain logic implements [`WorkHolder`]; the framework never looks inside
//! it beyond the declared slots. A [`WorkFactory`] is the value a step is
//! built from: it can make any number of equivalent, fresh instances, which
//! is how steps and composites are replicated.

use crate::work::SlotSpec;
use crate::data::DataHolder;
use std::fmt;
use std::sync::Arc;

/// Context passed to every lifecycle hook.
pub struct WorkContext<'a> {
    /// Name of the step running the hook.
    pub step: &'a str,
    /// 1-based pass number; 0 for `preprocess`.
    pub iteration: u64,
    /// Input holders, in slot order, filled by upstream connections.
    pub inputs: &'a [DataHolder],
    /// Output holders, in slot order, owned by this step.
    pub outputs: &'a mut [DataHolder],
}

impl<'a> WorkContext<'a> {
    pub fn input(&self, slot: usize) -> anyhow::Result<&DataHolder> {
        self.inputs
            .get(slot)
            .ok_or_else(|| anyhow::anyhow!("step {} has no input slot {}", self.step, slot))
    }

    pub fn output(&mut self, slot: usize) -> anyhow::Result<&mut DataHolder> {
        let step = self.step;
        self.outputs
            .get_mut(slot)
            .ok_or_else(|| anyhow::anyhow!("step {} has no output slot {}", step, slot))
    }
}

/// One unit of computation with fixed-arity, typed slots.
///
/// The scheduler calls `preprocess` once, `process` once per pass and
/// `postprocess` once, in that order. Errors propagate to the owning
/// composite.
pub trait WorkHolder: Send {
    /// Kind of work, e.g. `"scale"`.
    fn type_name(&self) -> &str;

    /// Input slots. Must not change after construction.
    fn inputs(&self) -> &[SlotSpec];

    /// Output slots. Must not change after construction.
    fn outputs(&self) -> &[SlotSpec];

    fn preprocess(&mut self, _ctx: &mut WorkContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn process(&mut self, ctx: &mut WorkContext<'_>) -> anyhow::Result<()>;

    fn postprocess(&mut self, _ctx: &mut WorkContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Configuration shown by `Composite::dump`.
    fn describe(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Lifecycle of a work holder inside a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    Uninitialized,
    Ready,
    Done,
}

type MakeFn = dyn Fn(&str) -> Box<dyn WorkHolder> + Send + Sync;

/// Makes fresh, identically configured work holders.
#[derive(Clone)]
pub struct WorkFactory {
    type_name: String,
    make: Arc<MakeFn>,
}

impl WorkFactory {
    pub fn new<F>(type_name: impl Into<String>, make: F) -> Self
    where
        F: Fn(&str) -> Box<dyn WorkHolder> + Send + Sync + 'static,
    {
        Self {
            type_name: type_name.into(),
            make: Arc::new(make),
        }
    }

    /// Factory for any cloneable work holder; every instance starts as a clone.
    pub fn from_prototype<W>(prototype: W) -> Self
    where
        W: WorkHolder + Clone + Sync + 'static,
    {
        let type_name = prototype.type_name().to_string();
        Self::new(type_name, move |_| Box::new(prototype.clone()))
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// New instance for the step called `name`.
    pub fn make(&self, name: &str) -> Box<dyn WorkHolder> {
        (self.make)(name)
    }
}

impl fmt::Debug for WorkFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkFactory")
            .field("type_name", &self.type_name)
            .finish()
    }
}
