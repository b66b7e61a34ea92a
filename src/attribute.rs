//! MFT attribute headers
//!
//! Every attribute starts with a common header (type, length, name, flags,
//! id) followed by either a resident part (the value lives in the record)
//! or a non-resident part (VCN range, sizes and a run list).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

use crate::bytes::{slice_at, u16_at, u32_at, u64_at, u8_at, utf16_at};
use crate::error::{NtfsError, NtfsResult};
use crate::run_list::{decode_run_list, Run};

pub const ATTRIBUTE_END: u32 = 0xFFFF_FFFF;

pub const ATTR_FLAG_COMPRESSED: u16 = 0x0001;
pub const ATTR_FLAG_ENCRYPTED: u16 = 0x4000;
pub const ATTR_FLAG_SPARSE: u16 = 0x8000;

const COMMON_HEADER_SIZE: usize = 16;
const RESIDENT_HEADER_SIZE: usize = 24;
const NON_RESIDENT_HEADER_SIZE: usize = 64;
const COMPRESSED_HEADER_SIZE: usize = 72;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeType {
    StandardInformation,
    AttributeList,
    FileName,
    ObjectId,
    SecurityDescriptor,
    VolumeName,
    VolumeInformation,
    Data,
    IndexRoot,
    IndexAllocation,
    Bitmap,
    ReparsePoint,
    EaInformation,
    Ea,
    PropertySet,
    LoggedUtilityStream,
}

const ALL_TYPES: [AttributeType; 16] = [
    AttributeType::StandardInformation,
    AttributeType::AttributeList,
    AttributeType::FileName,
    AttributeType::ObjectId,
    AttributeType::SecurityDescriptor,
    AttributeType::VolumeName,
    AttributeType::VolumeInformation,
    AttributeType::Data,
    AttributeType::IndexRoot,
    AttributeType::IndexAllocation,
    AttributeType::Bitmap,
    AttributeType::ReparsePoint,
    AttributeType::EaInformation,
    AttributeType::Ea,
    AttributeType::PropertySet,
    AttributeType::LoggedUtilityStream,
];

impl AttributeType {
    /// Type codes run 0x10, 0x20, ... 0x100.
    pub fn from_code(code: u32) -> Option<Self> {
        if code & 0x0F != 0 || code == 0 {
            return None;
        }
        ALL_TYPES.get((code >> 4) as usize - 1).copied()
    }

    pub fn code(self) -> u32 {
        (self.index() as u32 + 1) << 4
    }

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            AttributeType::StandardInformation => "$STANDARD_INFORMATION",
            AttributeType::AttributeList => "$ATTRIBUTE_LIST",
            AttributeType::FileName => "$FILE_NAME",
            AttributeType::ObjectId => "$OBJECT_ID",
            AttributeType::SecurityDescriptor => "$SECURITY_DESCRIPTOR",
            AttributeType::VolumeName => "$VOLUME_NAME",
            AttributeType::VolumeInformation => "$VOLUME_INFORMATION",
            AttributeType::Data => "$DATA",
            AttributeType::IndexRoot => "$INDEX_ROOT",
            AttributeType::IndexAllocation => "$INDEX_ALLOCATION",
            AttributeType::Bitmap => "$BITMAP",
            AttributeType::ReparsePoint => "$REPARSE_POINT",
            AttributeType::EaInformation => "$EA_INFORMATION",
            AttributeType::Ea => "$EA",
            AttributeType::PropertySet => "$PROPERTY_SET",
            AttributeType::LoggedUtilityStream => "$LOGGED_UTILITY_STREAM",
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of attribute types, one bit per canonical type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeMask(u16);

impl AttributeMask {
    pub const ALL: AttributeMask = AttributeMask(0xFFFF);
    pub const NONE: AttributeMask = AttributeMask(0);

    pub fn of(kind: AttributeType) -> Self {
        AttributeMask(1 << kind.index())
    }

    /// Mask of a single raw type code; empty for non-canonical codes.
    pub fn from_code(code: u32) -> Self {
        AttributeType::from_code(code).map_or(AttributeMask::NONE, AttributeMask::of)
    }

    pub fn contains(self, kind: AttributeType) -> bool {
        self.0 & (1 << kind.index()) != 0
    }

    pub fn contains_code(self, code: u32) -> bool {
        AttributeType::from_code(code).is_some_and(|k| self.contains(k))
    }
}

impl From<AttributeType> for AttributeMask {
    fn from(kind: AttributeType) -> Self {
        AttributeMask::of(kind)
    }
}

impl BitOr for AttributeMask {
    type Output = AttributeMask;

    fn bitor(self, rhs: Self) -> Self {
        AttributeMask(self.0 | rhs.0)
    }
}

impl BitOr<AttributeType> for AttributeMask {
    type Output = AttributeMask;

    fn bitor(self, rhs: AttributeType) -> Self {
        self | AttributeMask::of(rhs)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum AttributeForm {
    Resident {
        value_length: u32,
        value_offset: u16,
        indexed: bool,
    },
    NonResident {
        start_vcn: u64,
        end_vcn: u64,
        run_list_offset: u16,
        compression_unit: u8,
        allocated_size: u64,
        real_size: u64,
        initialized_size: u64,
        compressed_size: Option<u64>,
    },
}

/// Where an attribute header was found, so catalog iteration can resume.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeLocation {
    pub record: u64,
    pub offset: usize,
    /// Index into the owning file's attribute list, if it has one.
    pub list_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub type_code: u32,
    pub length: u32,
    pub name: Vec<u16>,
    pub flags: u16,
    pub id: u16,
    pub form: AttributeForm,
    pub location: AttributeLocation,
    raw: Vec<u8>,
}

impl Attribute {
    /// Parse the attribute header at `offset`. Returns `Ok(None)` at the end marker.
    pub fn parse(
        record_data: &[u8],
        offset: usize,
        bytes_used: usize,
        record: u64,
    ) -> NtfsResult<Option<Attribute>> {
        let corrupt = |reason: String| NtfsError::corrupt_record(record, reason);
        let used = &record_data[..bytes_used.min(record_data.len())];

        let type_code = u32_at(used, offset)
            .ok_or_else(|| corrupt(format!("attribute at {} runs past used bytes", offset)))?;
        if type_code == ATTRIBUTE_END {
            return Ok(None);
        }

        let header = slice_at(used, offset, COMMON_HEADER_SIZE)
            .ok_or_else(|| corrupt(format!("truncated attribute header at {}", offset)))?;
        let length = u32_at(header, 4).unwrap_or(0);
        let non_resident = u8_at(header, 8).unwrap_or(0) != 0;
        let name_length = u8_at(header, 9).unwrap_or(0) as usize;
        let name_offset = u16_at(header, 10).unwrap_or(0) as usize;
        let flags = u16_at(header, 12).unwrap_or(0);
        let id = u16_at(header, 14).unwrap_or(0);

        let min_size = if non_resident {
            NON_RESIDENT_HEADER_SIZE
        } else {
            RESIDENT_HEADER_SIZE
        };
        if length as usize % 8 != 0 || (length as usize) < min_size {
            return Err(corrupt(format!(
                "attribute at {} has invalid length {}",
                offset, length
            )));
        }
        let raw = slice_at(used, offset, length as usize)
            .ok_or_else(|| {
                corrupt(format!(
                    "attribute at {} with length {} exceeds used bytes {}",
                    offset, length, bytes_used
                ))
            })?
            .to_vec();

        let name = if name_length == 0 {
            Vec::new()
        } else {
            utf16_at(&raw, name_offset, name_length)
                .ok_or_else(|| corrupt(format!("attribute name at {} out of bounds", offset)))?
        };

        let form = if non_resident {
            let run_list_offset = u16_at(&raw, 32).unwrap_or(0);
            let compressed_size = if flags & (ATTR_FLAG_COMPRESSED | ATTR_FLAG_SPARSE) != 0
                && run_list_offset as usize >= COMPRESSED_HEADER_SIZE
            {
                u64_at(&raw, 64)
            } else {
                None
            };
            if run_list_offset as usize > raw.len() {
                return Err(corrupt(format!(
                    "run list offset {} past attribute end",
                    run_list_offset
                )));
            }
            AttributeForm::NonResident {
                start_vcn: u64_at(&raw, 16).unwrap_or(0),
                end_vcn: u64_at(&raw, 24).unwrap_or(0),
                run_list_offset,
                compression_unit: u8_at(&raw, 34).unwrap_or(0),
                allocated_size: u64_at(&raw, 40).unwrap_or(0),
                real_size: u64_at(&raw, 48).unwrap_or(0),
                initialized_size: u64_at(&raw, 56).unwrap_or(0),
                compressed_size,
            }
        } else {
            let value_length = u32_at(&raw, 16).unwrap_or(0);
            let value_offset = u16_at(&raw, 20).unwrap_or(0);
            if slice_at(&raw, value_offset as usize, value_length as usize).is_none() {
                return Err(corrupt(format!(
                    "resident value at {} ({} bytes) past attribute end",
                    value_offset, value_length
                )));
            }
            AttributeForm::Resident {
                value_length,
                value_offset,
                indexed: u8_at(&raw, 22).unwrap_or(0) & 1 != 0,
            }
        };

        Ok(Some(Attribute {
            type_code,
            length,
            name,
            flags,
            id,
            form,
            location: AttributeLocation {
                record,
                offset,
                list_index: None,
            },
            raw,
        }))
    }

    pub fn kind(&self) -> Option<AttributeType> {
        AttributeType::from_code(self.type_code)
    }

    pub fn is(&self, kind: AttributeType) -> bool {
        self.type_code == kind.code()
    }

    pub fn type_name(&self) -> String {
        match self.kind() {
            Some(kind) => kind.name().to_string(),
            None => format!("$TYPE_{:X}", self.type_code),
        }
    }

    pub fn name_string(&self) -> String {
        String::from_utf16_lossy(&self.name)
    }

    /// Same type and name, so the two headers can be extents of one stream.
    pub fn same_stream(&self, other: &Attribute) -> bool {
        self.type_code == other.type_code && self.name == other.name
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.form, AttributeForm::Resident { .. })
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & ATTR_FLAG_COMPRESSED != 0
    }

    pub fn is_sparse(&self) -> bool {
        self.flags & ATTR_FLAG_SPARSE != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & ATTR_FLAG_ENCRYPTED != 0
    }

    pub fn resident_value(&self) -> Option<&[u8]> {
        match self.form {
            AttributeForm::Resident {
                value_length,
                value_offset,
                ..
            } => slice_at(&self.raw, value_offset as usize, value_length as usize),
            AttributeForm::NonResident { .. } => None,
        }
    }

    /// Byte length of the attribute value.
    pub fn value_length(&self) -> u64 {
        match self.form {
            AttributeForm::Resident { value_length, .. } => u64::from(value_length),
            AttributeForm::NonResident { real_size, .. } => real_size,
        }
    }

    pub fn start_vcn(&self) -> u64 {
        match self.form {
            AttributeForm::Resident { .. } => 0,
            AttributeForm::NonResident { start_vcn, .. } => start_vcn,
        }
    }

    /// Decoded runs of this extent; empty for resident attributes.
    pub fn runs(&self) -> NtfsResult<Vec<Run>> {
        match self.form {
            AttributeForm::Resident { .. } => Ok(Vec::new()),
            AttributeForm::NonResident {
                start_vcn,
                run_list_offset,
                ..
            } => decode_run_list(&self.raw[run_list_offset as usize..], start_vcn),
        }
    }
}
