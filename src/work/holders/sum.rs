//! Sum - element-wise sum of several vectors.

use crate::data::{DataResult, FieldId};
use crate::work::holders::vector::{values_field, vector_schema};
use crate::work::{SlotSpec, WorkContext, WorkHolder};
use serde_json::json;

#[derive(Debug, Clone)]
pub struct Sum {
    len: usize,
    field: FieldId,
    inputs: Vec<SlotSpec>,
    outputs: Vec<SlotSpec>,
}

impl Sum {
    /// Sum `arity` vectors of `len` elements, read from slots `in0..in{arity-1}`.
    pub fn new(len: usize, arity: usize) -> DataResult<Self> {
        let schema = vector_schema(len)?;
        Ok(Self {
            len,
            field: values_field(&schema)?,
            inputs: (0..arity)
                .map(|i| SlotSpec::input(format!("in{}", i), schema.clone()))
                .collect(),
            outputs: vec![SlotSpec::output("out", schema)],
        })
    }
}

impl WorkHolder for Sum {
    fn type_name(&self) -> &str {
        "sum"
    }

    fn inputs(&self) -> &[SlotSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[SlotSpec] {
        &self.outputs
    }

    fn process(&mut self, ctx: &mut WorkContext<'_>) -> anyhow::Result<()> {
        let mut total = vec![0.0; self.len];
        for input in ctx.inputs {
            for (acc, v) in total.iter_mut().zip(input.values::<f64>(self.field)?) {
                *acc += v;
            }
        }
        ctx.output(0)?.set_values(self.field, &total)?;
        Ok(())
    }

    fn describe(&self) -> serde_json::Value {
        json!({ "arity": self.inputs.len() })
    }
}
