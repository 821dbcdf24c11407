//! encoded_value / encoded_annotation / encoded_array structures.
//!
//! These are the variable-width tagged values used by static-value arrays,
//! annotation elements and call-site definitions. The header byte packs the
//! value type in its low five bits and `size - 1` in the high three;
//! integers are stored in their minimal sign- or zero-extended byte count,
//! floats and doubles drop trailing zero bytes and are right-zero-extended
//! on read.

use serde::{Deserialize, Serialize};

use crate::dex_file::DexString;
use crate::error::DexError;
use crate::{read_u1, read_uleb128, write_u1, write_uleb128, write_x};

pub const VALUE_BYTE: u8 = 0x00;
pub const VALUE_SHORT: u8 = 0x02;
pub const VALUE_CHAR: u8 = 0x03;
pub const VALUE_INT: u8 = 0x04;
pub const VALUE_LONG: u8 = 0x06;
pub const VALUE_FLOAT: u8 = 0x10;
pub const VALUE_DOUBLE: u8 = 0x11;
pub const VALUE_METHOD_TYPE: u8 = 0x15;
pub const VALUE_METHOD_HANDLE: u8 = 0x16;
pub const VALUE_STRING: u8 = 0x17;
pub const VALUE_TYPE: u8 = 0x18;
pub const VALUE_FIELD: u8 = 0x19;
pub const VALUE_METHOD: u8 = 0x1a;
pub const VALUE_ENUM: u8 = 0x1b;
pub const VALUE_ARRAY: u8 = 0x1c;
pub const VALUE_ANNOTATION: u8 = 0x1d;
pub const VALUE_NULL: u8 = 0x1e;
pub const VALUE_BOOLEAN: u8 = 0x1f;

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct EncodedAnnotation {
    pub type_idx: u32,
    pub elements: Vec<AnnotationElement>,
}

impl EncodedAnnotation {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<EncodedAnnotation, DexError> {
        let type_idx = read_uleb128(bytes, ix)?;
        let size = read_uleb128(bytes, ix)? as usize;
        let mut elements = Vec::with_capacity(size);

        for _ in 0..size {
            elements.push(AnnotationElement::read(bytes, ix)?);
        }

        Ok(EncodedAnnotation { type_idx, elements })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        c += write_uleb128(bytes, self.type_idx);
        c += write_uleb128(bytes, self.elements.len() as u32);
        for element in &self.elements {
            c += element.write(bytes);
        }
        c
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AnnotationElement {
    pub name_idx: u32,
    pub value: EncodedValue,
}

impl AnnotationElement {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationElement, DexError> {
        let name_idx = read_uleb128(bytes, ix)?;
        let value = EncodedValue::read(bytes, ix)?;
        Ok(AnnotationElement { name_idx, value })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        c += write_uleb128(bytes, self.name_idx);
        c += self.value.write(bytes);
        c
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    MethodType(u32),
    MethodHandle(u32),
    String(u32),
    Type(u32),
    Field(u32),
    Method(u32),
    Enum(u32),
    Array(Vec<EncodedValue>),
    Annotation(EncodedAnnotation),
    Null,
    Boolean(bool),
}

impl EncodedValue {
    #[inline]
    pub fn as_annotation(&self) -> Option<&EncodedAnnotation> {
        match self {
            EncodedValue::Annotation(ann) => Some(ann),
            _ => None,
        }
    }

    pub fn to_string(&self, strings: &[DexString]) -> String {
        match self {
            EncodedValue::Byte(x) => format!("{}", x),
            EncodedValue::Short(x) => format!("{}", x),
            EncodedValue::Char(x) => format!("{}", x),
            EncodedValue::Int(x) => format!("{}", x),
            EncodedValue::Long(x) => format!("{}", x),
            EncodedValue::Float(x) => format!("{}", x),
            EncodedValue::Double(x) => format!("{}", x),
            EncodedValue::MethodType(x) => format!("proto@{}", x),
            EncodedValue::MethodHandle(x) => format!("handle@{}", x),
            EncodedValue::String(x) => match strings.get(*x as usize) {
                Some(DexString::Decoded(s)) => format!("\"{}\"", s),
                _ => format!("string@{}", x),
            },
            EncodedValue::Type(x) => format!("type@{}", x),
            EncodedValue::Field(x) => format!("field@{}", x),
            EncodedValue::Method(x) => format!("method@{}", x),
            EncodedValue::Enum(x) => format!("enum@{}", x),
            EncodedValue::Array(v) => {
                let mut s = "{ ".to_string();
                for i in v {
                    s.push_str(&i.to_string(strings));
                    s.push(',');
                }
                s.push_str(" }");
                s
            }
            EncodedValue::Annotation(ea) => format!("{:?}", ea),
            EncodedValue::Null => "null".to_string(),
            EncodedValue::Boolean(b) => {
                if *b { "true".to_string() } else { "false".to_string() }
            }
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<EncodedValue, DexError> {
        let header = read_u1(bytes, ix)?;
        let value_arg = header >> 5;
        let value_type = header & 0x1F;
        let size = (value_arg + 1) as usize;

        match value_type {
            VALUE_BYTE => Ok(EncodedValue::Byte(read_u1(bytes, ix)? as i8)),
            VALUE_SHORT => Ok(EncodedValue::Short(read_sign_extended(bytes, ix, size, 2)? as i16)),
            VALUE_CHAR => Ok(EncodedValue::Char(read_zero_extended(bytes, ix, size)? as u16)),
            VALUE_INT => Ok(EncodedValue::Int(read_sign_extended(bytes, ix, size, 4)? as i32)),
            VALUE_LONG => Ok(EncodedValue::Long(read_sign_extended(bytes, ix, size, 8)?)),
            VALUE_FLOAT => {
                let bits = read_right_zero_extended(bytes, ix, size, 4)? as u32;
                Ok(EncodedValue::Float(f32::from_bits(bits)))
            }
            VALUE_DOUBLE => {
                let bits = read_right_zero_extended(bytes, ix, size, 8)?;
                Ok(EncodedValue::Double(f64::from_bits(bits)))
            }
            VALUE_METHOD_TYPE => Ok(EncodedValue::MethodType(read_zero_extended(bytes, ix, size)? as u32)),
            VALUE_METHOD_HANDLE => Ok(EncodedValue::MethodHandle(read_zero_extended(bytes, ix, size)? as u32)),
            VALUE_STRING => Ok(EncodedValue::String(read_zero_extended(bytes, ix, size)? as u32)),
            VALUE_TYPE => Ok(EncodedValue::Type(read_zero_extended(bytes, ix, size)? as u32)),
            VALUE_FIELD => Ok(EncodedValue::Field(read_zero_extended(bytes, ix, size)? as u32)),
            VALUE_METHOD => Ok(EncodedValue::Method(read_zero_extended(bytes, ix, size)? as u32)),
            VALUE_ENUM => Ok(EncodedValue::Enum(read_zero_extended(bytes, ix, size)? as u32)),
            VALUE_ARRAY => Ok(EncodedValue::Array(read_encoded_array(bytes, ix)?)),
            VALUE_ANNOTATION => Ok(EncodedValue::Annotation(EncodedAnnotation::read(bytes, ix)?)),
            VALUE_NULL => Ok(EncodedValue::Null),
            VALUE_BOOLEAN => Ok(EncodedValue::Boolean(value_arg != 0)),
            other => Err(DexError::new(&format!(
                "Unknown encoded value type 0x{:02x} at index {}",
                other,
                *ix - 1
            ))),
        }
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;

        match self {
            EncodedValue::Byte(val) => {
                c += write_u1(bytes, VALUE_BYTE);
                c += write_u1(bytes, *val as u8);
            }
            EncodedValue::Short(val) => c += write_sign_extended(bytes, VALUE_SHORT, *val as i64),
            EncodedValue::Char(val) => c += write_zero_extended(bytes, VALUE_CHAR, *val as u64),
            EncodedValue::Int(val) => c += write_sign_extended(bytes, VALUE_INT, *val as i64),
            EncodedValue::Long(val) => c += write_sign_extended(bytes, VALUE_LONG, *val),
            EncodedValue::Float(val) => {
                c += write_right_zero_extended(bytes, VALUE_FLOAT, (val.to_bits() as u64) << 32, 4)
            }
            EncodedValue::Double(val) => {
                c += write_right_zero_extended(bytes, VALUE_DOUBLE, val.to_bits(), 8)
            }
            EncodedValue::MethodType(val) => c += write_zero_extended(bytes, VALUE_METHOD_TYPE, *val as u64),
            EncodedValue::MethodHandle(val) => c += write_zero_extended(bytes, VALUE_METHOD_HANDLE, *val as u64),
            EncodedValue::String(val) => c += write_zero_extended(bytes, VALUE_STRING, *val as u64),
            EncodedValue::Type(val) => c += write_zero_extended(bytes, VALUE_TYPE, *val as u64),
            EncodedValue::Field(val) => c += write_zero_extended(bytes, VALUE_FIELD, *val as u64),
            EncodedValue::Method(val) => c += write_zero_extended(bytes, VALUE_METHOD, *val as u64),
            EncodedValue::Enum(val) => c += write_zero_extended(bytes, VALUE_ENUM, *val as u64),
            EncodedValue::Array(values) => {
                c += write_u1(bytes, VALUE_ARRAY);
                c += write_encoded_array(values, bytes);
            }
            EncodedValue::Annotation(ann) => {
                c += write_u1(bytes, VALUE_ANNOTATION);
                c += ann.write(bytes);
            }
            EncodedValue::Null => c += write_u1(bytes, VALUE_NULL),
            EncodedValue::Boolean(val) => {
                let arg = if *val { 1 } else { 0 };
                c += write_u1(bytes, VALUE_BOOLEAN | (arg << 5));
            }
        }
        c
    }
}

// Minimal byte count that still round-trips the value under sign extension.
fn signed_byte_count(value: i64) -> usize {
    let mut count = 8;
    while count > 1 {
        let shifted = value >> ((count - 2) * 8 + 7);
        if shifted != 0 && shifted != -1 {
            break;
        }
        count -= 1;
    }
    count
}

fn unsigned_byte_count(value: u64) -> usize {
    let mut count = 1;
    while (value >> (count * 8)) != 0 && count < 8 {
        count += 1;
    }
    count
}

fn write_sign_extended(bytes: &mut Vec<u8>, value_type: u8, value: i64) -> usize {
    let count = signed_byte_count(value);
    let mut c = write_u1(bytes, value_type | (((count - 1) as u8) << 5));
    c += write_x(bytes, &value.to_le_bytes()[..count]);
    c
}

fn write_zero_extended(bytes: &mut Vec<u8>, value_type: u8, value: u64) -> usize {
    let count = unsigned_byte_count(value);
    let mut c = write_u1(bytes, value_type | (((count - 1) as u8) << 5));
    c += write_x(bytes, &value.to_le_bytes()[..count]);
    c
}

// Floats drop their trailing zero bytes: the value arrives left-aligned in a
// u64 and the low zero bytes are not stored.
fn write_right_zero_extended(bytes: &mut Vec<u8>, value_type: u8, bits: u64, max: usize) -> usize {
    let mut count = max;
    let mut shifted = bits >> ((8 - max) * 8);
    while count > 1 && (shifted & 0xff) == 0 {
        shifted >>= 8;
        count -= 1;
    }
    let mut c = write_u1(bytes, value_type | (((count - 1) as u8) << 5));
    c += write_x(bytes, &shifted.to_le_bytes()[..count]);
    c
}

fn read_raw(bytes: &[u8], ix: &mut usize, size: usize) -> Result<u64, DexError> {
    let mut result = 0u64;
    for i in 0..size {
        result |= (read_u1(bytes, ix)? as u64) << (8 * i);
    }
    Ok(result)
}

fn read_sign_extended(bytes: &[u8], ix: &mut usize, size: usize, max: usize) -> Result<i64, DexError> {
    if size > max {
        fail!("Encoded value of {} bytes exceeds its {}-byte type", size, max);
    }
    let raw = read_raw(bytes, ix, size)?;
    let shift = 64 - size * 8;
    Ok(((raw << shift) as i64) >> shift)
}

fn read_zero_extended(bytes: &[u8], ix: &mut usize, size: usize) -> Result<u64, DexError> {
    if size > 8 {
        fail!("Encoded value of {} bytes exceeds 8-byte range", size);
    }
    read_raw(bytes, ix, size)
}

fn read_right_zero_extended(bytes: &[u8], ix: &mut usize, size: usize, max: usize) -> Result<u64, DexError> {
    if size > max {
        fail!("Encoded value of {} bytes exceeds its {}-byte type", size, max);
    }
    let raw = read_raw(bytes, ix, size)?;
    Ok(raw << ((max - size) * 8))
}

pub fn write_encoded_array(encoded_array: &[EncodedValue], bytes: &mut Vec<u8>) -> usize {
    let mut c = 0;
    c += write_uleb128(bytes, encoded_array.len() as u32);
    for value in encoded_array {
        c += value.write(bytes);
    }
    c
}

pub fn read_encoded_array(bytes: &[u8], ix: &mut usize) -> Result<Vec<EncodedValue>, DexError> {
    let size = read_uleb128(bytes, ix)? as usize;
    let mut values = Vec::with_capacity(size.min(1024));
    for _ in 0..size {
        values.push(EncodedValue::read(bytes, ix)?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn roundtrip(value: EncodedValue) -> usize {
        let mut bytes = vec![];
        let written = value.write(&mut bytes);
        assert_eq!(written, bytes.len());
        let mut ix = 0;
        let decoded = EncodedValue::read(&bytes, &mut ix).expect("read failed");
        assert_eq!(ix, bytes.len());
        assert_eq!(decoded, value);
        written
    }

    #[test]
    fn test_minimal_int_widths() {
        assert_eq!(roundtrip(EncodedValue::Int(0)), 2);
        assert_eq!(roundtrip(EncodedValue::Int(-1)), 2);
        assert_eq!(roundtrip(EncodedValue::Int(127)), 2);
        assert_eq!(roundtrip(EncodedValue::Int(128)), 3);
        assert_eq!(roundtrip(EncodedValue::Int(-129)), 3);
        assert_eq!(roundtrip(EncodedValue::Int(i32::MAX)), 5);
        assert_eq!(roundtrip(EncodedValue::Long(i64::MIN)), 9);
    }

    #[test]
    fn test_minimal_float_widths() {
        // 2.0f is 0x40000000: only the leading byte is stored
        assert_eq!(roundtrip(EncodedValue::Float(2.0)), 2);
        assert_eq!(roundtrip(EncodedValue::Double(2.0)), 2);
        assert_eq!(roundtrip(EncodedValue::Float(0.0)), 2);
        roundtrip(EncodedValue::Float(3.14159));
        roundtrip(EncodedValue::Double(-1.0e-300));
    }

    #[test]
    fn test_char_is_zero_extended() {
        let mut bytes = vec![];
        EncodedValue::Char(0x80).write(&mut bytes);
        // 0x80 must not be treated as a sign bit
        assert_eq!(bytes, vec![VALUE_CHAR, 0x80]);
        let mut ix = 0;
        assert_eq!(EncodedValue::read(&bytes, &mut ix).unwrap(), EncodedValue::Char(0x80));
    }

    #[test]
    fn test_null_and_booleans() {
        let mut bytes = vec![];
        EncodedValue::Null.write(&mut bytes);
        EncodedValue::Boolean(true).write(&mut bytes);
        EncodedValue::Boolean(false).write(&mut bytes);
        assert_eq!(bytes, vec![VALUE_NULL, VALUE_BOOLEAN | 0x20, VALUE_BOOLEAN]);
    }

    #[test]
    fn test_array_and_annotation_roundtrip() {
        roundtrip(EncodedValue::Array(vec![
            EncodedValue::Boolean(true),
            EncodedValue::String(12),
            EncodedValue::Array(vec![EncodedValue::Null]),
        ]));

        roundtrip(EncodedValue::Annotation(EncodedAnnotation {
            type_idx: 1,
            elements: vec![
                AnnotationElement { name_idx: 2, value: EncodedValue::Boolean(true) },
                AnnotationElement { name_idx: 3, value: EncodedValue::Int(42) },
            ],
        }));
    }

    #[test]
    fn test_random_values() {
        let mut rng = rand::rng();

        for _ in 0..200 {
            roundtrip(EncodedValue::Byte(rng.random::<i8>()));
            roundtrip(EncodedValue::Short(rng.random::<i16>()));
            roundtrip(EncodedValue::Char(rng.random::<u16>()));
            roundtrip(EncodedValue::Int(rng.random::<i32>()));
            roundtrip(EncodedValue::Long(rng.random::<i64>()));
            roundtrip(EncodedValue::Float(f32::from_bits(rng.random::<u32>())));
            roundtrip(EncodedValue::Double(f64::from_bits(rng.random::<u64>())));
            roundtrip(EncodedValue::String(rng.random::<u32>() >> 8));
        }
    }

    #[test]
    fn test_encoded_array_roundtrip() {
        let values = vec![
            EncodedValue::Boolean(true),
            EncodedValue::Byte(127),
            EncodedValue::Int(-1),
        ];
        let mut bytes = vec![];
        write_encoded_array(&values, &mut bytes);
        let mut ix = 0;
        let decoded = read_encoded_array(&bytes, &mut ix).expect("read failed");
        assert_eq!(ix, bytes.len());
        assert_eq!(decoded, values);
    }
}
