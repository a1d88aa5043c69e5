//! Passthrough - copies its input message to its output unchanged.
//!
//! Works for any schema, including the extra block and timestamp.

use crate::data::Schema;
use crate::work::{SlotSpec, WorkContext, WorkHolder};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Passthrough {
    inputs: Vec<SlotSpec>,
    outputs: Vec<SlotSpec>,
}

impl Passthrough {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            inputs: vec![SlotSpec::input("in", schema.clone())],
            outputs: vec![SlotSpec::output("out", schema)],
        }
    }
}

impl WorkHolder for Passthrough {
    fn type_name(&self) -> &str {
        "passthrough"
    }

    fn inputs(&self) -> &[SlotSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[SlotSpec] {
        &self.outputs
    }

    fn process(&mut self, ctx: &mut WorkContext<'_>) -> anyhow::Result<()> {
        let inputs = ctx.inputs;
        let input = inputs
            .first()
            .ok_or_else(|| anyhow::anyhow!("step {} has no input slot 0", ctx.step))?;
        ctx.output(0)?.copy_from(input)?;
        Ok(())
    }
}
