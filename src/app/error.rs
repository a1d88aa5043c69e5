//! Application boundary error types.

use crate::app::AppState;
use crate::error::ErrorClass;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Missing parameter '{0}'")]
    MissingParameter(String),

    #[error("Parameter '{key}' should be {expected}, found {found}")]
    ParameterType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Cannot {command} while the application is {state:?}")]
    InvalidState {
        command: &'static str,
        state: AppState,
    },

    #[error("'{0}' is not supported by the execution core")]
    Unsupported(&'static str),

    #[error("Control channel closed")]
    ControlClosed,
}

impl AppError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Configuration
    }
}
