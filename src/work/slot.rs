//! Slot descriptors for work holders.
//!
//! Each work holder declares its input and output slots once, at
//! construction. Composites use these to validate connections before any
//! data flows.

use crate::data::Schema;
use std::sync::Arc;

/// Whether a slot is consumed or produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotDirection {
    Input,
    Output,
}

/// Static descriptor for one slot.
#[derive(Debug, Clone)]
pub struct SlotSpec {
    pub name: String,
    pub direction: SlotDirection,
    pub schema: Arc<Schema>,
}

impl SlotSpec {
    pub fn input(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self {
            name: name.into(),
            direction: SlotDirection::Input,
            schema,
        }
    }

    pub fn output(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self {
            name: name.into(),
            direction: SlotDirection::Output,
            schema,
        }
    }
}
