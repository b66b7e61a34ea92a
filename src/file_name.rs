//! `$FILE_NAME` values and timestamp helpers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bytes::{u32_at, u64_at, u8_at, utf16_at};
use crate::reference::MftReference;

const FILE_NAME_HEADER_SIZE: usize = 66;

// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH: i64 = 11_644_473_600;

pub const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x0000_0400;
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x1000_0000;

const FILE_ATTRIBUTE_NAMES: [(u32, &str); 17] = [
    (0x0000_0001, "read_only"),
    (0x0000_0002, "hidden"),
    (0x0000_0004, "system"),
    (0x0000_0010, "directory"),
    (0x0000_0020, "archive"),
    (0x0000_0040, "device"),
    (0x0000_0080, "normal"),
    (0x0000_0100, "temporary"),
    (0x0000_0200, "sparse_file"),
    (0x0000_0400, "reparse_point"),
    (0x0000_0800, "compressed"),
    (0x0000_1000, "offline"),
    (0x0000_2000, "not_content_indexed"),
    (0x0000_4000, "encrypted"),
    (0x0001_0000, "integrity_stream"),
    (0x0002_0000, "virtual"),
    (0x1000_0000, "directory"),
];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Posix,
    Win32,
    Dos,
    Win32AndDos,
}

impl Namespace {
    pub fn from_byte(value: u8) -> Self {
        match value {
            1 => Namespace::Win32,
            2 => Namespace::Dos,
            3 => Namespace::Win32AndDos,
            _ => Namespace::Posix,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Namespace::Posix => "POSIX",
            Namespace::Win32 => "WIN32",
            Namespace::Dos => "DOS",
            Namespace::Win32AndDos => "WIN32+DOS",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileName {
    pub parent: MftReference,
    pub created: u64,
    pub modified: u64,
    pub mft_modified: u64,
    pub accessed: u64,
    pub allocated_size: u64,
    pub real_size: u64,
    pub flags: u32,
    pub reparse_tag: u32,
    pub namespace: Namespace,
    pub name: Vec<u16>,
}

impl FileName {
    pub fn parse(data: &[u8]) -> Option<FileName> {
        let name_length = u8_at(data, 64)? as usize;
        let name = utf16_at(data, FILE_NAME_HEADER_SIZE, name_length)?;
        Some(FileName {
            parent: MftReference(u64_at(data, 0)?),
            created: u64_at(data, 8)?,
            modified: u64_at(data, 16)?,
            mft_modified: u64_at(data, 24)?,
            accessed: u64_at(data, 32)?,
            allocated_size: u64_at(data, 40)?,
            real_size: u64_at(data, 48)?,
            flags: u32_at(data, 56)?,
            reparse_tag: u32_at(data, 60)?,
            namespace: Namespace::from_byte(u8_at(data, 65)?),
            name,
        })
    }

    pub fn name_string(&self) -> String {
        String::from_utf16_lossy(&self.name)
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FILE_ATTRIBUTE_DIRECTORY != 0
    }

    pub fn is_reparse_point(&self) -> bool {
        self.flags & FILE_ATTRIBUTE_REPARSE_POINT != 0
    }

    /// DOS-only names are 8.3 aliases of a long name stored elsewhere.
    pub fn is_dos_only(&self) -> bool {
        self.namespace == Namespace::Dos
    }
}

/// Convert a FILETIME (100ns ticks since 1601) to UTC.
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    let seconds = (filetime / 10_000_000) as i64 - FILETIME_UNIX_EPOCH;
    let nanos = ((filetime % 10_000_000) * 100) as u32;
    DateTime::from_timestamp(seconds, nanos)
}

pub fn format_filetime(filetime: u64) -> String {
    match filetime_to_datetime(filetime) {
        Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::new(),
    }
}

/// Names of the set file attribute flags.
pub fn describe_file_attributes(flags: u32) -> Vec<&'static str> {
    let mut names: Vec<&'static str> = FILE_ATTRIBUTE_NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    names.dedup();
    names
}
