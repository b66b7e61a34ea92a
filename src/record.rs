//! MFT Record Module
//! Fixup, header validation and the attribute walk for FILE records

use crate::attribute::Attribute;
use crate::bytes::{u16_at, u32_at, u64_at};
use crate::error::{NtfsError, NtfsResult};
use crate::reference::MftReference;

pub const MFT_SIGNATURE: &[u8] = b"FILE";
pub const RECORD_FLAG_IN_USE: u16 = 0x0001;
pub const RECORD_FLAG_DIRECTORY: u16 = 0x0002;

const RECORD_HEADER_SIZE: usize = 0x30;

/// Apply the update sequence array of a multi-sector structure in place.
///
/// The last two bytes of every sector must hold the USA signature; they are
/// replaced by the saved original bytes. Nothing is patched unless every
/// sector checks out.
pub fn apply_fixup(data: &mut [u8], sector_size: usize) -> Result<(), String> {
    let usa_offset = u16_at(data, 4).ok_or("structure too short for a USA header")? as usize;
    let usa_count = u16_at(data, 6).ok_or("structure too short for a USA header")? as usize;

    if usa_count == 0 {
        return Err("empty update sequence array".to_string());
    }
    if usa_offset + usa_count * 2 > data.len() {
        return Err(format!(
            "update sequence array at {} ({} entries) out of bounds",
            usa_offset, usa_count
        ));
    }
    if (usa_count - 1) * sector_size > data.len() {
        return Err(format!(
            "{} protected sectors exceed structure of {} bytes",
            usa_count - 1,
            data.len()
        ));
    }

    let signature = [data[usa_offset], data[usa_offset + 1]];
    for i in 1..usa_count {
        let pos = i * sector_size - 2;
        if data[pos..pos + 2] != signature {
            return Err(format!(
                "sector {} signature {:02x}{:02x} does not match {:02x}{:02x}",
                i - 1,
                data[pos],
                data[pos + 1],
                signature[0],
                signature[1]
            ));
        }
    }
    for i in 1..usa_count {
        let pos = i * sector_size - 2;
        let saved = usa_offset + i * 2;
        data[pos] = data[saved];
        data[pos + 1] = data[saved + 1];
    }
    Ok(())
}

/// A FILE record after fixup. The buffer is owned and fixed-size.
#[derive(Debug, Clone)]
pub struct MftRecord {
    number: u64,
    data: Vec<u8>,
}

impl MftRecord {
    /// Validate raw record bytes read for record `number`.
    pub fn parse(number: u64, mut data: Vec<u8>, sector_size: usize) -> NtfsResult<Self> {
        if data.len() < RECORD_HEADER_SIZE {
            return Err(NtfsError::corrupt_record(number, "record shorter than its header"));
        }
        if &data[0..4] != MFT_SIGNATURE {
            return Err(NtfsError::corrupt_record(
                number,
                format!("bad signature {:?}", String::from_utf8_lossy(&data[0..4])),
            ));
        }
        if let Err(reason) = apply_fixup(&mut data, sector_size) {
            log::debug!(
                "record {} failed fixup, header: {}",
                number,
                hex::encode(&data[..data.len().min(64)])
            );
            return Err(NtfsError::corrupt_record(number, format!("fixup failed: {}", reason)));
        }

        let record = MftRecord { number, data };
        if !record.is_in_use() {
            return Err(NtfsError::corrupt_record(number, "record is not in use"));
        }
        if let Some(stored) = record.stored_record_number() {
            if u64::from(stored) != number & 0xFFFF_FFFF {
                return Err(NtfsError::corrupt_record(
                    number,
                    format!("record claims to be number {}", stored),
                ));
            }
        }
        let used = record.bytes_used() as usize;
        if used > record.data.len() || (record.first_attribute_offset() as usize) >= used {
            return Err(NtfsError::corrupt_record(
                number,
                format!(
                    "used size {} / first attribute {} inconsistent with {} byte record",
                    used,
                    record.first_attribute_offset(),
                    record.data.len()
                ),
            ));
        }
        Ok(record)
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn reference(&self) -> MftReference {
        MftReference::new(self.number, self.sequence_number())
    }

    pub fn usa_offset(&self) -> u16 {
        u16_at(&self.data, 4).unwrap_or(0)
    }

    pub fn usa_count(&self) -> u16 {
        u16_at(&self.data, 6).unwrap_or(0)
    }

    pub fn lsn(&self) -> u64 {
        u64_at(&self.data, 8).unwrap_or(0)
    }

    pub fn sequence_number(&self) -> u16 {
        u16_at(&self.data, 16).unwrap_or(0)
    }

    pub fn hard_link_count(&self) -> u16 {
        u16_at(&self.data, 18).unwrap_or(0)
    }

    pub fn first_attribute_offset(&self) -> u16 {
        u16_at(&self.data, 20).unwrap_or(0)
    }

    pub fn flags(&self) -> u16 {
        u16_at(&self.data, 22).unwrap_or(0)
    }

    pub fn is_in_use(&self) -> bool {
        self.flags() & RECORD_FLAG_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags() & RECORD_FLAG_DIRECTORY != 0
    }

    pub fn bytes_used(&self) -> u32 {
        u32_at(&self.data, 24).unwrap_or(0)
    }

    pub fn bytes_allocated(&self) -> u32 {
        u32_at(&self.data, 28).unwrap_or(0)
    }

    /// Zero for base records, otherwise the base record this one extends.
    pub fn base_reference(&self) -> MftReference {
        MftReference(u64_at(&self.data, 32).unwrap_or(0))
    }

    pub fn next_attribute_id(&self) -> u16 {
        u16_at(&self.data, 40).unwrap_or(0)
    }

    /// Only NTFS 3.1 headers (USA at 0x30 or later) carry the record number.
    pub fn stored_record_number(&self) -> Option<u32> {
        if (self.usa_offset() as usize) < RECORD_HEADER_SIZE {
            return None;
        }
        u32_at(&self.data, 44)
    }

    pub fn attribute_at(&self, offset: usize) -> NtfsResult<Option<Attribute>> {
        Attribute::parse(&self.data, offset, self.bytes_used() as usize, self.number)
    }

    pub fn attributes(&self) -> Attributes<'_> {
        Attributes {
            record: self,
            offset: self.first_attribute_offset() as usize,
            done: false,
        }
    }

    /// First attribute header, at or after `offset`, that satisfies `predicate`.
    pub fn find_from<F>(&self, offset: usize, mut predicate: F) -> NtfsResult<Option<Attribute>>
    where
        F: FnMut(&Attribute) -> bool,
    {
        let mut iter = Attributes {
            record: self,
            offset,
            done: false,
        };
        for attribute in &mut iter {
            let attribute = attribute?;
            if predicate(&attribute) {
                return Ok(Some(attribute));
            }
        }
        Ok(None)
    }
}

/// Walk of the attribute headers of one record, in stored order.
pub struct Attributes<'a> {
    record: &'a MftRecord,
    offset: usize,
    done: bool,
}

impl Iterator for Attributes<'_> {
    type Item = NtfsResult<Attribute>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.record.attribute_at(self.offset) {
            Ok(Some(attribute)) => {
                self.offset += attribute.length as usize;
                Some(Ok(attribute))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
