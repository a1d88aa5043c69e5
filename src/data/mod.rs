//! Typed messages and their wire format.
//!
//! - [`Schema`] - ordered field table with resolved offsets
//! - [`DataHolder`] - one message instance owning its data block
//! - [`BlobWriter`] / [`BlobReader`] - self-describing nested blocks
//! - [`encode`] / [`decode_into`] - holder <-> wire bytes

pub mod blob;
pub mod codec;
pub mod element;
pub mod error;
pub mod holder;
pub mod schema;

pub use blob::{BlobHeader, BlobReader, BlobWriter, BLOB_MAGIC};
pub use codec::{decode_into, encode, peek_schema};
pub use element::{Complex, Complex32, Complex64, Element};
pub use error::{DataError, DataResult, ProtocolError};
pub use holder::{DataHolder, Extra};
pub use schema::{ExtraSpec, FieldDescriptor, FieldId, FieldType, Schema, SchemaBuilder};
