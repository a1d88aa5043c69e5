//! Scale - multiplies every element of a vector by a constant.

use crate::data::{DataResult, FieldId};
use crate::work::holders::vector::{values_field, vector_schema};
use crate::work::{SlotSpec, WorkContext, WorkHolder};
use serde_json::json;

#[derive(Debug, Clone)]
pub struct Scale {
    factor: f64,
    field: FieldId,
    inputs: Vec<SlotSpec>,
    outputs: Vec<SlotSpec>,
}

impl Scale {
    pub fn new(len: usize, factor: f64) -> DataResult<Self> {
        let schema = vector_schema(len)?;
        Ok(Self {
            factor,
            field: values_field(&schema)?,
            inputs: vec![SlotSpec::input("in", schema.clone())],
            outputs: vec![SlotSpec::output("out", schema)],
        })
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl WorkHolder for Scale {
    fn type_name(&self) -> &str {
        "scale"
    }

    fn inputs(&self) -> &[SlotSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[SlotSpec] {
        &self.outputs
    }

    fn process(&mut self, ctx: &mut WorkContext<'_>) -> anyhow::Result<()> {
        let input = ctx.input(0)?;
        let timestamp = input.timestamp();
        let scaled: Vec<f64> = input
            .values::<f64>(self.field)?
            .into_iter()
            .map(|v| v * self.factor)
            .collect();

        let out = ctx.output(0)?;
        out.set_values(self.field, &scaled)?;
        if let Some(ts) = timestamp {
            out.set_timestamp(ts);
        }
        Ok(())
    }

    fn describe(&self) -> serde_json::Value {
        json!({ "factor": self.factor })
    }
}
