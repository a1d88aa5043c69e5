//! Wire encoding of a [`DataHolder`].
//!
//! One message is one blob block named after the schema:
//!
//! ```text
//! block(schema.name, schema.version)
//!     timestamp   i64   microseconds since the epoch, i64::MIN when unset
//!     fixed       u64 length + schema.size() bytes
//!     has_extra   u8    0 or 1
//!     [block(extra.name, extra.version) body = extra bytes]
//! ```
//!
//! Decoding validates every header before trusting the layout behind it and
//! only touches the target holder once the whole message has been accepted.

use crate::data::{BlobReader, BlobWriter, DataError, DataHolder, DataResult, Extra, ProtocolError};
use chrono::{DateTime, Utc};

const NO_TIMESTAMP: i64 = i64::MIN;

/// Serialize `holder` into one message.
pub fn encode(holder: &DataHolder) -> DataResult<Vec<u8>> {
    let schema = holder.schema();
    let block = holder.bytes()?;
    let extra_len = holder.extra().map_or(0, |e| e.bytes.len() + e.name.len() + 32);

    let mut w = BlobWriter::with_capacity(block.len() + extra_len + 64);
    w.begin(schema.name(), schema.version())?;
    w.put_i64(
        holder
            .timestamp()
            .map_or(NO_TIMESTAMP, |ts| ts.timestamp_micros()),
    );
    w.put_bytes(block);
    match holder.extra() {
        Some(extra) => {
            w.put_u8(1);
            w.begin(&extra.name, extra.version)?;
            w.put_raw(&extra.bytes);
            w.end()?;
        }
        None => w.put_u8(0),
    }
    w.end()?;
    Ok(w.finish()?)
}

/// Deserialize `bytes` into `holder`, which must be initialized.
///
/// On any error the holder is left exactly as it was.
pub fn decode_into(bytes: &[u8], holder: &mut DataHolder) -> DataResult<()> {
    if !holder.is_initialized() {
        return Err(DataError::NotInitialized(holder.name().to_string()));
    }
    let schema = holder.schema().clone();
    let mut r = BlobReader::new(bytes);

    let header = r.begin()?;
    if header.name != schema.name() || header.version != schema.version() {
        return Err(ProtocolError::SchemaMismatch {
            expected: schema.name().to_string(),
            expected_version: schema.version(),
            name: header.name,
            version: header.version,
        }
        .into());
    }

    let micros = r.get_i64()?;
    let timestamp = if micros == NO_TIMESTAMP {
        None
    } else {
        Some(
            DateTime::<Utc>::from_timestamp_micros(micros)
                .ok_or_else(|| ProtocolError::Malformed(format!("timestamp {} out of range", micros)))?,
        )
    };

    let block = r.get_bytes()?;
    if block.len() != schema.size() {
        return Err(ProtocolError::LengthMismatch {
            expected: schema.size(),
            actual: block.len(),
        }
        .into());
    }

    let extra = match r.get_u8()? {
        0 => None,
        1 => {
            let header = r.begin()?;
            match schema.extra() {
                None => {
                    return Err(ProtocolError::UnexpectedExtra {
                        name: header.name,
                        version: header.version,
                    }
                    .into())
                }
                Some(spec) if spec.name != header.name || spec.version != header.version => {
                    return Err(ProtocolError::ExtraMismatch {
                        expected: spec.name.clone(),
                        expected_version: spec.version,
                        name: header.name,
                        version: header.version,
                    }
                    .into())
                }
                Some(_) => {}
            }
            let body = r.get_raw(header.body_len)?;
            r.end()?;
            (!body.is_empty()).then(|| Extra {
                name: header.name,
                version: header.version,
                bytes: body.to_vec(),
            })
        }
        flag => return Err(ProtocolError::Malformed(format!("extra flag {}", flag)).into()),
    };

    r.end()?;
    r.finish()?;
    holder.commit(block, timestamp, extra)
}

/// Name and version announced by a message, without decoding it.
pub fn peek_schema(bytes: &[u8]) -> DataResult<(String, u32)> {
    let header = BlobReader::new(bytes).peek_header()?;
    Ok((header.name, header.version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FieldType, Schema};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn vector_schema(version: u32) -> Arc<Schema> {
        Schema::builder("vector", version)
            .field("values", FieldType::F64, 3)
            .extra("annotation", 1)
            .build()
            .unwrap()
    }

    fn filled(version: u32, values: &[f64]) -> DataHolder {
        let mut h = DataHolder::new("src", vector_schema(version));
        h.init();
        let id = h.field("values").unwrap();
        h.set_values(id, values).unwrap();
        h.touch();
        h
    }

    #[test]
    fn test_version_mismatch_leaves_target_untouched() {
        let bytes = encode(&filled(2, &[1.0, 2.0, 3.0])).unwrap();
        let mut target = DataHolder::new("dst", vector_schema(1));
        target.init();

        let err = decode_into(&bytes, &mut target).unwrap_err();
        assert!(matches!(
            err,
            DataError::Protocol(ProtocolError::SchemaMismatch { version: 2, expected_version: 1, .. })
        ));
        let id = target.field("values").unwrap();
        assert_eq!(target.values::<f64>(id).unwrap(), vec![0.0; 3]);
        assert!(target.timestamp().is_none());
    }

    #[test]
    fn test_unknown_extra_is_rejected() {
        let mut src = filled(1, &[1.0, 2.0, 3.0]);
        src.set_extra("annotation", 2, b"future".to_vec());
        let bytes = encode(&src).unwrap();

        let mut target = DataHolder::new("dst", vector_schema(1));
        target.init();
        assert!(matches!(
            decode_into(&bytes, &mut target),
            Err(DataError::Protocol(ProtocolError::ExtraMismatch { version: 2, .. }))
        ));
    }

    #[test]
    fn test_extra_on_schema_without_one() {
        let plain = Schema::builder("vector", 1)
            .field("values", FieldType::F64, 3)
            .build()
            .unwrap();
        let mut src = filled(1, &[0.0; 3]);
        src.set_extra("annotation", 1, b"note".to_vec());
        let bytes = encode(&src).unwrap();

        let mut target = DataHolder::new("dst", plain);
        target.init();
        assert!(matches!(
            decode_into(&bytes, &mut target),
            Err(DataError::Protocol(ProtocolError::UnexpectedExtra { .. }))
        ));
    }

    #[test]
    fn test_truncated_message() {
        let bytes = encode(&filled(1, &[1.0, 2.0, 3.0])).unwrap();
        let mut target = DataHolder::new("dst", vector_schema(1));
        target.init();
        assert!(matches!(
            decode_into(&bytes[..bytes.len() - 1], &mut target),
            Err(DataError::Protocol(ProtocolError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_decode_requires_init() {
        let bytes = encode(&filled(1, &[1.0, 2.0, 3.0])).unwrap();
        let mut target = DataHolder::new("dst", vector_schema(1));
        assert!(matches!(
            decode_into(&bytes, &mut target),
            Err(DataError::NotInitialized(_))
        ));
        assert_eq!(peek_schema(&bytes).unwrap(), ("vector".to_string(), 1));
    }

    fn field_type() -> impl Strategy<Value = FieldType> {
        prop_oneof![
            Just(FieldType::U8),
            Just(FieldType::I16),
            Just(FieldType::I32),
            Just(FieldType::I64),
            Just(FieldType::U32),
            Just(FieldType::U64),
            Just(FieldType::F32),
            Just(FieldType::F64),
            Just(FieldType::Complex32),
            Just(FieldType::Complex64),
        ]
    }

    proptest! {
        #[test]
        fn prop_roundtrip_any_schema(
            fields in prop::collection::vec((field_type(), 1usize..8), 1..6),
            seed in any::<u64>(),
            extra in prop::collection::vec(any::<u8>(), 0..64),
            micros in prop::option::of(0i64..4_000_000_000_000_000),
        ) {
            let mut builder = Schema::builder("any", 5).extra("tail", 3);
            for (i, (ty, count)) in fields.iter().enumerate() {
                builder = builder.field(format!("f{}", i), *ty, *count);
            }
            let schema = builder.build().unwrap();

            let mut src = DataHolder::new("src", schema.clone());
            src.init();
            for (i, byte) in src.bytes_mut().unwrap().iter_mut().enumerate() {
                *byte = (seed.rotate_left(i as u32 % 64) as u8).wrapping_add(i as u8);
            }
            if let Some(micros) = micros {
                src.set_timestamp(DateTime::<Utc>::from_timestamp_micros(micros).unwrap());
            }
            src.set_extra("tail", 3, extra.clone());

            let bytes = encode(&src).unwrap();
            let mut dst = DataHolder::new("dst", schema);
            dst.init();
            decode_into(&bytes, &mut dst).unwrap();

            prop_assert_eq!(dst.bytes().unwrap(), src.bytes().unwrap());
            prop_assert_eq!(dst.timestamp(), src.timestamp());
            prop_assert_eq!(dst.extra(), src.extra());
            prop_assert_eq!(dst.extra().is_none(), extra.is_empty());
        }
    }
}
