//! Message schemas.
//!
//! A [`Schema`] is an ordered table of named, typed, fixed-count fields,
//! resolved once into byte offsets inside a single packed block. Fields are
//! laid out in declaration order with no padding. A schema is identified on
//! the wire by its name and version and may additionally accept one
//! self-describing extra block.
//!
//! ```ignore
//! let schema = Schema::builder("vector", 1)
//!     .field("values", FieldType::F64, 3)
//!     .build()?;
//! let values = schema.field_id("values").unwrap();
//! ```

use crate::data::{DataError, DataResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Primitive type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// 8-bit unsigned integer
    U8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit unsigned integer
    U64,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
    /// Pair of f32
    Complex32,
    /// Pair of f64
    Complex64,
}

impl FieldType {
    /// Returns the size in bytes of one element
    pub fn size_bytes(&self) -> usize {
        match self {
            FieldType::U8 => 1,
            FieldType::I16 => 2,
            FieldType::I32 | FieldType::U32 | FieldType::F32 => 4,
            FieldType::I64 | FieldType::U64 | FieldType::F64 | FieldType::Complex32 => 8,
            FieldType::Complex64 => 16,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::U8 => "u8",
            FieldType::I16 => "i16",
            FieldType::I32 => "i32",
            FieldType::I64 => "i64",
            FieldType::U32 => "u32",
            FieldType::U64 => "u64",
            FieldType::F32 => "f32",
            FieldType::F64 => "f64",
            FieldType::Complex32 => "complex32",
            FieldType::Complex64 => "complex64",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One resolved field of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: FieldType,
    pub count: usize,
    /// Byte offset inside the data block
    pub offset: usize,
}

impl FieldDescriptor {
    pub fn byte_len(&self) -> usize {
        self.ty.size_bytes() * self.count
    }
}

/// Name and version of the extra block a schema accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtraSpec {
    pub name: String,
    pub version: u32,
}

/// Handle to a field, resolved once against a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(pub(crate) usize);

impl FieldId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Schema {
    name: String,
    version: u32,
    fields: Vec<FieldDescriptor>,
    size: usize,
    extra: Option<ExtraSpec>,
}

impl Schema {
    pub fn builder(name: impl Into<String>, version: u32) -> SchemaBuilder {
        SchemaBuilder::new(name, version)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Total size of the fixed data block in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn extra(&self) -> Option<&ExtraSpec> {
        self.extra.as_ref()
    }

    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.fields.iter().position(|f| f.name == name).map(FieldId)
    }

    /// `None` when `id` was resolved against a schema with fewer fields.
    pub fn field(&self, id: FieldId) -> Option<&FieldDescriptor> {
        self.fields.get(id.0)
    }

    /// Two schemas can exchange messages when name, version and layout agree.
    pub fn is_wire_compatible(&self, other: &Schema) -> bool {
        self == other
    }

    /// `name vN` for diagnostics
    pub fn label(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}

/// Builder collecting field declarations before layout.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    version: u32,
    fields: Vec<(String, FieldType, usize)>,
    extra: Option<ExtraSpec>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            fields: Vec::new(),
            extra: None,
        }
    }

    /// Declare a field of `count` elements of `ty`.
    pub fn field(mut self, name: impl Into<String>, ty: FieldType, count: usize) -> Self {
        self.fields.push((name.into(), ty, count));
        self
    }

    /// Accept an extra block with this name and version.
    pub fn extra(mut self, name: impl Into<String>, version: u32) -> Self {
        self.extra = Some(ExtraSpec {
            name: name.into(),
            version,
        });
        self
    }

    /// Validate the declarations and compute field offsets.
    pub fn build(self) -> DataResult<Arc<Schema>> {
        check_name(&self.name, "schema")?;
        if let Some(extra) = &self.extra {
            check_name(&extra.name, "extra block")?;
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(self.fields.len());
        let mut offset = 0usize;
        for (name, ty, count) in self.fields {
            if name.is_empty() {
                return Err(DataError::InvalidSchema(format!(
                    "{}: field names must not be empty",
                    self.name
                )));
            }
            if !seen.insert(name.clone()) {
                return Err(DataError::InvalidSchema(format!(
                    "{}: duplicate field '{}'",
                    self.name, name
                )));
            }
            if count == 0 {
                return Err(DataError::InvalidSchema(format!(
                    "{}: field '{}' has zero elements",
                    self.name, name
                )));
            }
            let descriptor = FieldDescriptor {
                name,
                ty,
                count,
                offset,
            };
            offset = offset
                .checked_add(descriptor.byte_len())
                .ok_or_else(|| DataError::InvalidSchema(format!("{}: block too large", self.name)))?;
            fields.push(descriptor);
        }

        Ok(Arc::new(Schema {
            name: self.name,
            version: self.version,
            fields,
            size: offset,
            extra: self.extra,
        }))
    }
}

fn check_name(name: &str, what: &str) -> DataResult<()> {
    if name.is_empty() {
        return Err(DataError::InvalidSchema(format!("{} name must not be empty", what)));
    }
    if name.len() > u16::MAX as usize {
        return Err(DataError::InvalidSchema(format!("{} name is too long", what)));
    }
    Ok(())
}
