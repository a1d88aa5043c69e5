//! Slot tables of a step.
//!
//! A [`DataManager`] holds one [`DataHolder`] per declared slot, in slot
//! order. A step owns two of them, one for inputs and one for outputs.

use crate::data::DataHolder;
use crate::work::{SlotDirection, SlotSpec};

#[derive(Debug, Clone)]
pub struct DataManager {
    direction: SlotDirection,
    names: Vec<String>,
    holders: Vec<DataHolder>,
}

impl DataManager {
    /// Build holders for `slots`, named `<owner>.<slot>`.
    pub fn from_slots(owner: &str, direction: SlotDirection, slots: &[SlotSpec]) -> Self {
        Self {
            direction,
            names: slots.iter().map(|s| s.name.clone()).collect(),
            holders: slots
                .iter()
                .map(|s| DataHolder::new(format!("{}.{}", owner, s.name), s.schema.clone()))
                .collect(),
        }
    }

    pub fn direction(&self) -> SlotDirection {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    /// Index of the slot called `name`.
    pub fn slot_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn slot_name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn get(&self, index: usize) -> Option<&DataHolder> {
        self.holders.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut DataHolder> {
        self.holders.get_mut(index)
    }

    pub fn holders(&self) -> &[DataHolder] {
        &self.holders
    }

    pub fn holders_mut(&mut self) -> &mut [DataHolder] {
        &mut self.holders
    }

    /// Allocate every holder's data block.
    pub fn init_all(&mut self) {
        for holder in &mut self.holders {
            holder.init();
        }
    }

    /// Fresh, uninitialized copy for another owner.
    pub fn clone_for(&self, owner: &str) -> Self {
        Self {
            direction: self.direction,
            names: self.names.clone(),
            holders: self
                .names
                .iter()
                .zip(&self.holders)
                .map(|(slot, h)| h.clone_empty(format!("{}.{}", owner, slot)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FieldType, Schema};

    #[test]
    fn test_holders_follow_slots() {
        let schema = Schema::builder("v", 1).field("x", FieldType::F32, 2).build().unwrap();
        let slots = vec![
            SlotSpec::input("left", schema.clone()),
            SlotSpec::input("right", schema),
        ];
        let mut manager = DataManager::from_slots("mix", SlotDirection::Input, &slots);

        assert_eq!(manager.len(), 2);
        assert_eq!(manager.slot_index("right"), Some(1));
        assert_eq!(manager.get(0).unwrap().name(), "mix.left");
        assert!(!manager.get(1).unwrap().is_initialized());

        manager.init_all();
        assert!(manager.holders().iter().all(DataHolder::is_initialized));

        let copy = manager.clone_for("mix#1");
        assert_eq!(copy.get(1).unwrap().name(), "mix#1.right");
        assert!(!copy.get(1).unwrap().is_initialized());
    }
}
