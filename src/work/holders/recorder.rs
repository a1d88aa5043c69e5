//! Recorder - sink that keeps every vector it receives.
//!
//! Replicas made from the same recorder share one [`RecordLog`], so a test
//! or application can inspect what reached the end of a graph. An optional
//! per-pass delay simulates a slow consumer.

use crate::data::{DataResult, FieldId};
use crate::work::holders::vector::{values_field, vector_schema};
use crate::work::{SlotSpec, WorkContext, WorkHolder};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One received vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub step: String,
    pub iteration: u64,
    pub values: Vec<f64>,
    pub at: Instant,
}

/// Shared, append-only list of records.
#[derive(Debug, Clone, Default)]
pub struct RecordLog {
    records: Arc<Mutex<Vec<Record>>>,
}

impl RecordLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, record: Record) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn values(&self) -> Vec<Vec<f64>> {
        self.records().into_iter().map(|r| r.values).collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct Recorder {
    log: RecordLog,
    delay: Duration,
    field: FieldId,
    slots: Vec<SlotSpec>,
}

impl Recorder {
    pub fn new(len: usize, log: RecordLog) -> DataResult<Self> {
        let schema = vector_schema(len)?;
        Ok(Self {
            log,
            delay: Duration::ZERO,
            field: values_field(&schema)?,
            slots: vec![SlotSpec::input("in", schema)],
        })
    }

    /// Sleep this long in every `process` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn log(&self) -> &RecordLog {
        &self.log
    }
}

impl WorkHolder for Recorder {
    fn type_name(&self) -> &str {
        "recorder"
    }

    fn inputs(&self) -> &[SlotSpec] {
        &self.slots
    }

    fn outputs(&self) -> &[SlotSpec] {
        &[]
    }

    fn process(&mut self, ctx: &mut WorkContext<'_>) -> anyhow::Result<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let values = ctx.input(0)?.values::<f64>(self.field)?;
        self.log.push(Record {
            step: ctx.step.to_string(),
            iteration: ctx.iteration,
            values,
            at: Instant::now(),
        });
        Ok(())
    }

    fn describe(&self) -> serde_json::Value {
        json!({ "delay_ms": self.delay.as_millis() as u64, "recorded": self.log.len() })
    }
}
