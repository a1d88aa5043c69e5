//! Application boundary.
//!
//! An [`Application`] builds exactly one top-level composite; the
//! [`ApplicationHolder`] drives it through `define`, `init`, `run` and
//! `quit`. An external controller can issue the same commands through a
//! [`ControlBridge`] served on the application thread.

pub mod control;
pub mod error;
pub mod holder;

pub use control::{serve, ControlBridge, ControlCommand, ControlReply};
pub use error::AppError;
pub use holder::{AppState, Application, ApplicationHolder, PauseHandle};
