//! `$ATTRIBUTE_LIST` entries
//!
//! When a file's attributes do not fit in one record, the base record holds
//! a list naming every attribute extent and the record that stores it.

use serde::{Deserialize, Serialize};

use crate::bytes::{u16_at, u32_at, u64_at, u8_at, utf16_at};
use crate::error::{NtfsError, NtfsResult};
use crate::reference::MftReference;

const ENTRY_HEADER_SIZE: usize = 26;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AttributeListEntry {
    pub type_code: u32,
    pub length: u16,
    pub name: Vec<u16>,
    pub start_vcn: u64,
    pub reference: MftReference,
    pub attribute_id: u16,
}

impl AttributeListEntry {
    pub fn name_string(&self) -> String {
        String::from_utf16_lossy(&self.name)
    }
}

/// Parse a complete attribute list value, keeping the stored order.
pub fn parse_attribute_list(data: &[u8], record: u64) -> NtfsResult<Vec<AttributeListEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos + ENTRY_HEADER_SIZE <= data.len() {
        let type_code = u32_at(data, pos).unwrap_or(0);
        let length = u16_at(data, pos + 4).unwrap_or(0);
        // Lists are sometimes padded with zeroes after the last entry
        if type_code == 0 || length == 0 {
            break;
        }
        if pos + length as usize > data.len() || (length as usize) < ENTRY_HEADER_SIZE {
            return Err(NtfsError::corrupt_record(
                record,
                format!("attribute list entry at {} has length {}", pos, length),
            ));
        }

        let name_length = u8_at(data, pos + 6).unwrap_or(0) as usize;
        let name_offset = u8_at(data, pos + 7).unwrap_or(0) as usize;
        let name = if name_length == 0 {
            Vec::new()
        } else {
            let entry = &data[pos..pos + length as usize];
            utf16_at(entry, name_offset, name_length).ok_or_else(|| {
                NtfsError::corrupt_record(
                    record,
                    format!("attribute list entry name at {} out of bounds", pos),
                )
            })?
        };

        entries.push(AttributeListEntry {
            type_code,
            length,
            name,
            start_vcn: u64_at(data, pos + 8).unwrap_or(0),
            reference: MftReference(u64_at(data, pos + 16).unwrap_or(0)),
            attribute_id: u16_at(data, pos + 24).unwrap_or(0),
        });
        pos += length as usize;
    }

    Ok(entries)
}
