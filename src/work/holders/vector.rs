//! The `vector` message used by the built-in holders: `values: [f64; len]`.

use crate::data::{DataError, DataHolder, DataResult, FieldId, FieldType, Schema};
use std::sync::Arc;

pub const VECTOR_SCHEMA: &str = "vector";
pub const VECTOR_VERSION: u32 = 1;
pub const VALUES_FIELD: &str = "values";

/// Schema of a vector of `len` doubles.
pub fn vector_schema(len: usize) -> DataResult<Arc<Schema>> {
    Schema::builder(VECTOR_SCHEMA, VECTOR_VERSION)
        .field(VALUES_FIELD, FieldType::F64, len)
        .build()
}

pub(crate) fn values_field(schema: &Schema) -> DataResult<FieldId> {
    schema.field_id(VALUES_FIELD).ok_or_else(|| DataError::NoSuchField {
        holder: schema.label(),
        field: VALUES_FIELD.to_string(),
    })
}

/// Read the values of a vector holder.
pub fn read_vector(holder: &DataHolder) -> DataResult<Vec<f64>> {
    let id = values_field(holder.schema())?;
    holder.values(id)
}

/// Overwrite the values of a vector holder.
pub fn write_vector(holder: &mut DataHolder, values: &[f64]) -> DataResult<()> {
    let id = values_field(holder.schema())?;
    holder.set_values(id, values)
}
