//! Element types storable in a schema field.

use crate::data::FieldType;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Complex number with `re`/`im` stored back to back.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

impl<T> Complex<T> {
    pub const fn new(re: T, im: T) -> Self {
        Self { re, im }
    }
}

pub type Complex32 = Complex<f32>;
pub type Complex64 = Complex<f64>;

/// A fixed-size value with a little-endian wire representation.
///
/// `read` and `write` receive a slice of exactly `Self::TYPE.size_bytes()`.
pub trait Element: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    const TYPE: FieldType;

    fn read(bytes: &[u8]) -> Self;

    fn write(self, bytes: &mut [u8]);
}

impl Element for u8 {
    const TYPE: FieldType = FieldType::U8;

    fn read(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn write(self, bytes: &mut [u8]) {
        bytes[0] = self;
    }
}

macro_rules! impl_element {
    ($ty:ty, $field:ident, $read:ident, $write:ident) => {
        impl Element for $ty {
            const TYPE: FieldType = FieldType::$field;

            fn read(bytes: &[u8]) -> Self {
                LittleEndian::$read(bytes)
            }

            fn write(self, bytes: &mut [u8]) {
                LittleEndian::$write(bytes, self)
            }
        }
    };
}

impl_element!(i16, I16, read_i16, write_i16);
impl_element!(i32, I32, read_i32, write_i32);
impl_element!(i64, I64, read_i64, write_i64);
impl_element!(u32, U32, read_u32, write_u32);
impl_element!(u64, U64, read_u64, write_u64);
impl_element!(f32, F32, read_f32, write_f32);
impl_element!(f64, F64, read_f64, write_f64);

impl Element for Complex32 {
    const TYPE: FieldType = FieldType::Complex32;

    fn read(bytes: &[u8]) -> Self {
        Complex::new(LittleEndian::read_f32(&bytes[..4]), LittleEndian::read_f32(&bytes[4..8]))
    }

    fn write(self, bytes: &mut [u8]) {
        LittleEndian::write_f32(&mut bytes[..4], self.re);
        LittleEndian::write_f32(&mut bytes[4..8], self.im);
    }
}

impl Element for Complex64 {
    const TYPE: FieldType = FieldType::Complex64;

    fn read(bytes: &[u8]) -> Self {
        Complex::new(LittleEndian::read_f64(&bytes[..8]), LittleEndian::read_f64(&bytes[8..16]))
    }

    fn write(self, bytes: &mut [u8]) {
        LittleEndian::write_f64(&mut bytes[..8], self.re);
        LittleEndian::write_f64(&mut bytes[8..16], self.im);
    }
}
