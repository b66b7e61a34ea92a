//! LZNT1 decompression for compressed attribute units
//!
//! A compression unit is a sequence of chunks, each with a 16-bit header:
//! the low 12 bits hold the stored length minus one and bit 15 says whether
//! the chunk is compressed. Compressed chunks interleave tag bytes with
//! literals and back-reference tuples; the split between offset and length
//! bits in a tuple shifts as the chunk's output grows.

use crate::error::{NtfsError, NtfsResult};

const CHUNK_SIZE: usize = 4096;
const CHUNK_COMPRESSED: u16 = 0x8000;

/// Bits of a tuple used for the length, given the bytes already produced
/// in the current chunk.
fn split_for(produced: usize) -> u32 {
    let mut split = 12;
    let mut threshold = 16;
    while produced > threshold && split > 4 {
        split -= 1;
        threshold <<= 1;
    }
    split
}

pub fn decompress(compressed: &[u8], unit_size: usize) -> NtfsResult<Vec<u8>> {
    let mut out = Vec::new();
    out.try_reserve(unit_size)
        .map_err(|_| NtfsError::Allocation(unit_size))?;

    let mut pos = 0usize;
    while pos < compressed.len() {
        if pos + 1 == compressed.len() {
            if compressed[pos] == 0 {
                break;
            }
            return Err(NtfsError::Decompression(format!(
                "truncated chunk header at {}",
                pos
            )));
        }
        let header = u16::from_le_bytes([compressed[pos], compressed[pos + 1]]);
        if header == 0 {
            break;
        }
        pos += 2;

        let size = (header & 0x0FFF) as usize + 1;
        let end = pos + size;
        if end > compressed.len() {
            return Err(NtfsError::Decompression(format!(
                "chunk of {} bytes at {} runs past the compressed data",
                size,
                pos - 2
            )));
        }
        let chunk = &compressed[pos..end];
        if header & CHUNK_COMPRESSED == 0 {
            out.extend_from_slice(chunk);
        } else {
            decompress_chunk(chunk, &mut out)?;
        }
        if out.len() > unit_size {
            return Err(NtfsError::Decompression(format!(
                "output of {} bytes exceeds the {} byte unit",
                out.len(),
                unit_size
            )));
        }
        pos = end;
    }

    Ok(out)
}

fn decompress_chunk(chunk: &[u8], out: &mut Vec<u8>) -> NtfsResult<()> {
    let chunk_start = out.len();
    let mut i = 0usize;

    while i < chunk.len() {
        let tag = chunk[i];
        i += 1;

        for bit in 0..8 {
            if i >= chunk.len() {
                break;
            }
            if tag & (1 << bit) == 0 {
                out.push(chunk[i]);
                i += 1;
                continue;
            }

            if i + 1 >= chunk.len() {
                return Err(NtfsError::Decompression("truncated back-reference".to_string()));
            }
            let tuple = u16::from_le_bytes([chunk[i], chunk[i + 1]]);
            i += 2;

            let produced = out.len() - chunk_start;
            let split = split_for(produced);
            let length = (tuple & ((1u16 << split) - 1)) as usize + 3;
            let offset = (tuple >> split) as usize + 1;
            if offset > produced {
                return Err(NtfsError::Decompression(format!(
                    "back-reference {} bytes before a {} byte chunk start",
                    offset, produced
                )));
            }
            // Byte by byte: source and destination may overlap
            for _ in 0..length {
                let byte = out[out.len() - offset];
                out.push(byte);
            }
        }

        if out.len() - chunk_start > CHUNK_SIZE {
            return Err(NtfsError::Decompression(format!(
                "chunk expands to {} bytes",
                out.len() - chunk_start
            )));
        }
    }

    Ok(())
}

/// Greedy reference encoder used to build compressed test volumes.
#[cfg(test)]
pub(crate) fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in data.chunks(CHUNK_SIZE) {
        let body = compress_chunk(chunk);
        if body.len() < chunk.len() {
            out.extend_from_slice(&(0xB000 | (body.len() as u16 - 1)).to_le_bytes());
            out.extend_from_slice(&body);
        } else {
            out.extend_from_slice(&(0x3000 | (chunk.len() as u16 - 1)).to_le_bytes());
            out.extend_from_slice(chunk);
        }
    }
    out
}

#[cfg(test)]
fn compress_chunk(chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < chunk.len() {
        let tag_pos = out.len();
        out.push(0);
        let mut tag = 0u8;
        for bit in 0..8 {
            if pos >= chunk.len() {
                break;
            }
            let split = split_for(pos);
            let max_length = (1usize << split) + 2;
            let max_offset = 1usize << (16 - split);

            let mut best = (0usize, 0usize);
            for offset in 1..=pos.min(max_offset) {
                let mut length = 0;
                while length < max_length
                    && pos + length < chunk.len()
                    && chunk[pos + length - offset] == chunk[pos + length]
                {
                    length += 1;
                }
                if length > best.0 {
                    best = (length, offset);
                }
            }

            if best.0 >= 3 {
                let tuple = (((best.1 - 1) << split) | (best.0 - 3)) as u16;
                out.extend_from_slice(&tuple.to_le_bytes());
                tag |= 1 << bit;
                pos += best.0;
            } else {
                out.push(chunk[pos]);
                pos += 1;
            }
        }
        out[tag_pos] = tag;
    }
    out
}
