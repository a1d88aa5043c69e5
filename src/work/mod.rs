//! Units of computation.
//!
//! - [`WorkHolder`] - the trait domain code implements
//! - [`WorkFactory`] - makes fresh instances, used to build and replicate steps
//! - [`SlotSpec`] - declared input/output slots
//! - [`DataManager`] - a step's table of holders, one per slot
//!
//! Built-in holders live in [`holders`].

pub mod data_manager;
pub mod holder;
pub mod holders;
pub mod slot;

pub use data_manager::DataManager;
pub use holder::{WorkContext, WorkFactory, WorkHolder, WorkState};
pub use slot::{SlotDirection, SlotSpec};
