//! Built-in work holder implementations.

pub mod passthrough;
pub mod recorder;
pub mod scale;
pub mod source;
pub mod sum;
pub mod vector;

pub use passthrough::Passthrough;
pub use recorder::{Record, RecordLog, Recorder};
pub use scale::Scale;
pub use source::VectorSource;
pub use sum::Sum;
pub use vector::{read_vector, vector_schema, write_vector, VALUES_FIELD, VECTOR_SCHEMA, VECTOR_VERSION};
