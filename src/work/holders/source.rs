//! VectorSource - emits a fixed vector each pass.
//!
//! With a non-zero `ramp`, pass `n` emits `values[i] + n * ramp`, which makes
//! individual passes distinguishable downstream.

use crate::data::{DataResult, FieldId};
use crate::work::holders::vector::{values_field, vector_schema};
use crate::work::{SlotSpec, WorkContext, WorkHolder};
use serde_json::json;

#[derive(Debug, Clone)]
pub struct VectorSource {
    values: Vec<f64>,
    ramp: f64,
    field: FieldId,
    slots: Vec<SlotSpec>,
}

impl VectorSource {
    pub fn new(values: Vec<f64>) -> DataResult<Self> {
        let schema = vector_schema(values.len())?;
        Ok(Self {
            field: values_field(&schema)?,
            values,
            ramp: 0.0,
            slots: vec![SlotSpec::output("out", schema)],
        })
    }

    pub fn with_ramp(mut self, ramp: f64) -> Self {
        self.ramp = ramp;
        self
    }
}

impl WorkHolder for VectorSource {
    fn type_name(&self) -> &str {
        "vector_source"
    }

    fn inputs(&self) -> &[SlotSpec] {
        &[]
    }

    fn outputs(&self) -> &[SlotSpec] {
        &self.slots
    }

    fn process(&mut self, ctx: &mut WorkContext<'_>) -> anyhow::Result<()> {
        let offset = ctx.iteration as f64 * self.ramp;
        let values: Vec<f64> = self.values.iter().map(|v| v + offset).collect();
        let out = ctx.output(0)?;
        out.set_values(self.field, &values)?;
        out.touch();
        Ok(())
    }

    fn describe(&self) -> serde_json::Value {
        json!({ "values": self.values, "ramp": self.ramp })
    }
}
