//! Bounds-checked little-endian field access
//!
//! On-disk structures are parsed straight out of byte slices. Every reader
//! here returns `None` when the field would run past the end of the slice,
//! so callers can turn a short structure into the error that fits them.

use byteorder::{ByteOrder, LittleEndian};

pub fn u8_at(data: &[u8], offset: usize) -> Option<u8> {
    data.get(offset).copied()
}

pub fn i8_at(data: &[u8], offset: usize) -> Option<i8> {
    u8_at(data, offset).map(|b| b as i8)
}

pub fn u16_at(data: &[u8], offset: usize) -> Option<u16> {
    slice_at(data, offset, 2).map(LittleEndian::read_u16)
}

pub fn u32_at(data: &[u8], offset: usize) -> Option<u32> {
    slice_at(data, offset, 4).map(LittleEndian::read_u32)
}

pub fn u64_at(data: &[u8], offset: usize) -> Option<u64> {
    slice_at(data, offset, 8).map(LittleEndian::read_u64)
}

pub fn slice_at(data: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    let end = offset.checked_add(len)?;
    data.get(offset..end)
}

/// Read `count` UTF-16LE code units starting at `offset`.
pub fn utf16_at(data: &[u8], offset: usize, count: usize) -> Option<Vec<u16>> {
    let raw = slice_at(data, offset, count.checked_mul(2)?)?;
    Some(raw.chunks_exact(2).map(LittleEndian::read_u16).collect())
}

/// Little-endian unsigned integer of 1..=8 bytes.
pub fn read_unsigned(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Little-endian two's complement integer of 1..=8 bytes.
pub fn read_signed(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let value = read_unsigned(bytes);
    let bits = bytes.len() * 8;
    if bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}
