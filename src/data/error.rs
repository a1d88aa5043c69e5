//! Data layer error types.

use crate::data::FieldType;
use crate::error::ErrorClass;
use thiserror::Error;

/// A received message could not be trusted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Bad blob magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("Blob truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Schema mismatch: expected {expected} v{expected_version}, received {name} v{version}")]
    SchemaMismatch {
        expected: String,
        expected_version: u32,
        name: String,
        version: u32,
    },

    #[error("Extra block mismatch: expected {expected} v{expected_version}, received {name} v{version}")]
    ExtraMismatch {
        expected: String,
        expected_version: u32,
        name: String,
        version: u32,
    },

    #[error("Unexpected extra block {name} v{version}")]
    UnexpectedExtra { name: String, version: u32 },

    #[error("Fixed block is {actual} bytes, schema needs {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Malformed blob: {0}")]
    Malformed(String),
}

/// Errors raised by schemas, holders and the codec.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("DataHolder '{0}' used before init()")]
    NotInitialized(String),

    #[error("DataHolder '{holder}' has no field '{field}'")]
    NoSuchField { holder: String, field: String },

    #[error("Field '{field}' is {found}, accessed as {expected}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: FieldType,
    },

    #[error("Index {index} out of range for field '{field}' with {count} elements")]
    IndexOutOfRange {
        field: String,
        index: usize,
        count: usize,
    },

    #[error("Field '{field}' holds {expected} elements, got {actual}")]
    CountMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl DataError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DataError::Protocol(_) => ErrorClass::Protocol,
            _ => ErrorClass::Configuration,
        }
    }
}

pub type DataResult<T> = std::result::Result<T, DataError>;
