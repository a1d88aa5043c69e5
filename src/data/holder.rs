//! Typed message envelope.
//!
//! A [`DataHolder`] owns one packed block laid out by its [`Schema`], a
//! timestamp and an optional [`Extra`] payload. The block is allocated by
//! [`DataHolder::init`] and keeps its layout for the holder's lifetime;
//! fields are reached through [`FieldId`] handles resolved once.

use crate::data::{DataError, DataResult, Element, FieldDescriptor, FieldId, Schema};
use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;

/// Optional self-describing payload carried next to the fixed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extra {
    pub name: String,
    pub version: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DataHolder {
    name: String,
    schema: Arc<Schema>,
    data: Option<Vec<u8>>,
    timestamp: Option<DateTime<Utc>>,
    extra: Option<Extra>,
}

impl DataHolder {
    pub fn new(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self {
            name: name.into(),
            schema,
            data: None,
            timestamp: None,
            extra: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Allocate the zeroed data block. Calling it again keeps the contents.
    pub fn init(&mut self) {
        if self.data.is_none() {
            self.data = Some(vec![0; self.schema.size()]);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.data.is_some()
    }

    /// Fresh, uninitialized holder with the same schema.
    pub fn clone_empty(&self, name: impl Into<String>) -> Self {
        Self::new(name, self.schema.clone())
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestamp = Some(timestamp);
    }

    /// Stamp the holder with the current time, at the microsecond
    /// resolution the wire carries.
    pub fn touch(&mut self) {
        self.timestamp = Some(Utc::now().trunc_subsecs(6));
    }

    pub fn extra(&self) -> Option<&Extra> {
        self.extra.as_ref()
    }

    /// Attach an extra payload. An empty payload removes it.
    pub fn set_extra(&mut self, name: impl Into<String>, version: u32, bytes: Vec<u8>) {
        self.extra = if bytes.is_empty() {
            None
        } else {
            Some(Extra {
                name: name.into(),
                version,
                bytes,
            })
        };
    }

    pub fn clear_extra(&mut self) {
        self.extra = None;
    }

    /// Resolve a field by name.
    pub fn field(&self, name: &str) -> DataResult<FieldId> {
        self.schema
            .field_id(name)
            .ok_or_else(|| DataError::NoSuchField {
                holder: self.name.clone(),
                field: name.to_string(),
            })
    }

    pub fn bytes(&self) -> DataResult<&[u8]> {
        self.data
            .as_deref()
            .ok_or_else(|| DataError::NotInitialized(self.name.clone()))
    }

    pub fn bytes_mut(&mut self) -> DataResult<&mut [u8]> {
        match self.data.as_deref_mut() {
            Some(data) => Ok(data),
            None => Err(DataError::NotInitialized(self.name.clone())),
        }
    }

    fn typed<T: Element>(&self, id: FieldId) -> DataResult<&FieldDescriptor> {
        let field = self.schema.field(id).ok_or_else(|| DataError::NoSuchField {
            holder: self.name.clone(),
            field: format!("#{}", id.0),
        })?;
        if field.ty != T::TYPE {
            return Err(DataError::TypeMismatch {
                field: field.name.clone(),
                expected: T::TYPE,
                found: field.ty,
            });
        }
        Ok(field)
    }

    fn element_range<T: Element>(&self, id: FieldId, index: usize) -> DataResult<std::ops::Range<usize>> {
        let field = self.typed::<T>(id)?;
        if index >= field.count {
            return Err(DataError::IndexOutOfRange {
                field: field.name.clone(),
                index,
                count: field.count,
            });
        }
        let size = field.ty.size_bytes();
        let start = field.offset + index * size;
        Ok(start..start + size)
    }

    /// Element `index` of field `id`.
    pub fn get<T: Element>(&self, id: FieldId, index: usize) -> DataResult<T> {
        let range = self.element_range::<T>(id, index)?;
        Ok(T::read(&self.bytes()?[range]))
    }

    pub fn set<T: Element>(&mut self, id: FieldId, index: usize, value: T) -> DataResult<()> {
        let range = self.element_range::<T>(id, index)?;
        value.write(&mut self.bytes_mut()?[range]);
        Ok(())
    }

    /// All elements of field `id`.
    pub fn values<T: Element>(&self, id: FieldId) -> DataResult<Vec<T>> {
        let field = self.typed::<T>(id)?;
        let size = field.ty.size_bytes();
        let block = &self.bytes()?[field.offset..field.offset + field.byte_len()];
        Ok(block.chunks_exact(size).map(T::read).collect())
    }

    /// Overwrite field `id`; `values` must hold exactly `count` elements.
    pub fn set_values<T: Element>(&mut self, id: FieldId, values: &[T]) -> DataResult<()> {
        let field = self.typed::<T>(id)?;
        if values.len() != field.count {
            return Err(DataError::CountMismatch {
                field: field.name.clone(),
                expected: field.count,
                actual: values.len(),
            });
        }
        let (offset, len, size) = (field.offset, field.byte_len(), field.ty.size_bytes());
        let block = &mut self.bytes_mut()?[offset..offset + len];
        for (chunk, value) in block.chunks_exact_mut(size).zip(values) {
            value.write(chunk);
        }
        Ok(())
    }

    /// Copy block, timestamp and extra from a holder with a compatible schema.
    pub fn copy_from(&mut self, other: &DataHolder) -> DataResult<()> {
        if !self.schema.is_wire_compatible(&other.schema) {
            return Err(DataError::InvalidSchema(format!(
                "cannot copy {} into {}",
                other.schema.label(),
                self.schema.label()
            )));
        }
        let source = other.bytes()?;
        self.bytes_mut()?.copy_from_slice(source);
        self.timestamp = other.timestamp;
        self.extra = other.extra.clone();
        Ok(())
    }

    /// Replace the whole message state at once. The block length has
    /// already been validated by the caller.
    pub(crate) fn commit(
        &mut self,
        block: &[u8],
        timestamp: Option<DateTime<Utc>>,
        extra: Option<Extra>,
    ) -> DataResult<()> {
        self.bytes_mut()?.copy_from_slice(block);
        self.timestamp = timestamp;
        self.extra = extra;
        Ok(())
    }
}
