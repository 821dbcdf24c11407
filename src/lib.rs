//! # dexfile
//!
//! A library for reading, building and writing Android DEX binary containers,
//! including the Dalvik instruction set encoded inside method bodies.
//!
//! Reading fully materialises a [`dex_file::DexFile`] from bytes; the mutation
//! API builds one programmatically; [`dex_file::DexFile::to_bytes`] serialises
//! it back through the section-pooling writer. The instruction codec lives in
//! [`insns`] with its opcode table in [`opcodes`].

#[macro_use]
pub mod error;

pub mod annotations;
pub mod dex_file;
pub mod encoded_values;
pub mod insns;
pub mod leb;
pub mod opcodes;
pub mod writer;

#[cfg(test)]
mod tests;

use crate::error::DexError;
use crate::leb::{
    decode_sleb128, decode_uleb128, decode_uleb128p1, encode_sleb128, encode_uleb128,
    encode_uleb128p1,
};

/// Declared byte order of a container. Fixed-width fields are stored
/// little-endian unless the header carries the reverse-endian tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

// Basic type reading and writing
pub(crate) fn read_u1(bytes: &[u8], ix: &mut usize) -> Result<u8, DexError>
{
    if bytes.len() < *ix + 1
    {
        fail!("Unexpected end of stream reading u1 at index {}", *ix);
    }
    let result = bytes[*ix];
    *ix += 1;
    Ok(result)
}

pub(crate) fn read_u2(bytes: &[u8], ix: &mut usize, en: Endian) -> Result<u16, DexError>
{
    if bytes.len() < *ix + 2
    {
        fail!("Unexpected end of stream reading u2 at index {}", *ix);
    }
    let raw = [bytes[*ix], bytes[*ix + 1]];
    *ix += 2;
    Ok(match en
    {
        Endian::Little => u16::from_le_bytes(raw),
        Endian::Big => u16::from_be_bytes(raw),
    })
}

pub(crate) fn read_u4(bytes: &[u8], ix: &mut usize, en: Endian) -> Result<u32, DexError>
{
    if bytes.len() < *ix + 4
    {
        fail!("Unexpected end of stream reading u4 at index {}", *ix);
    }
    let raw = [bytes[*ix], bytes[*ix + 1], bytes[*ix + 2], bytes[*ix + 3]];
    *ix += 4;
    Ok(match en
    {
        Endian::Little => u32::from_le_bytes(raw),
        Endian::Big => u32::from_be_bytes(raw),
    })
}

pub(crate) fn read_uleb128(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    if *ix >= bytes.len()
    {
        fail!("Unexpected end of stream reading uleb128 at index {}", *ix);
    }
    let (val, size) = decode_uleb128(&bytes[*ix..]);
    *ix += size;
    Ok(val)
}

pub(crate) fn read_sleb128(bytes: &[u8], ix: &mut usize) -> Result<i32, DexError>
{
    if *ix >= bytes.len()
    {
        fail!("Unexpected end of stream reading sleb128 at index {}", *ix);
    }
    let (val, size) = decode_sleb128(&bytes[*ix..]);
    *ix += size;
    Ok(val)
}

pub(crate) fn read_uleb128p1(bytes: &[u8], ix: &mut usize) -> Result<i32, DexError>
{
    if *ix >= bytes.len()
    {
        fail!("Unexpected end of stream reading uleb128p1 at index {}", *ix);
    }
    let (val, size) = decode_uleb128p1(&bytes[*ix..]);
    *ix += size;
    Ok(val)
}

pub(crate) fn read_x(bytes: &[u8], ix: &mut usize, length: usize) -> Result<Vec<u8>, DexError>
{
    if bytes.len() - *ix >= length
    {
        let mut v = Vec::with_capacity(length + 1);
        v.extend_from_slice(&bytes[*ix..*ix + length]);
        *ix += length;
        Ok(v)
    }
    else
    {
        Err(DexError::new("buffer too short for array read"))
    }
}

pub(crate) fn write_u1(buffer: &mut Vec<u8>, val: u8) -> usize
{
    buffer.push(val);
    1
}

pub(crate) fn write_u2(buffer: &mut Vec<u8>, val: u16) -> usize
{
    buffer.extend_from_slice(&val.to_le_bytes());
    2
}

pub(crate) fn write_u4(buffer: &mut Vec<u8>, val: u32) -> usize
{
    buffer.extend_from_slice(&val.to_le_bytes());
    4
}

pub(crate) fn write_uleb128(buffer: &mut Vec<u8>, val: u32) -> usize
{
    let encoded = encode_uleb128(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_sleb128(buffer: &mut Vec<u8>, val: i32) -> usize
{
    let encoded = encode_sleb128(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_uleb128p1(buffer: &mut Vec<u8>, val: i32) -> usize
{
    let encoded = encode_uleb128p1(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_x(buffer: &mut Vec<u8>, val: &[u8]) -> usize
{
    let len = val.len();
    buffer.extend(val);
    len
}

/// Round `value` up to the next multiple of `align` (a power of two, or 1).
pub(crate) fn align_to(value: u32, align: u32) -> u32
{
    if align <= 1 { value } else { value.div_ceil(align) * align }
}
