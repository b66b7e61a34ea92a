//! Reparse point payloads (symbolic links and mount points)

use serde::{Deserialize, Serialize};

use crate::bytes::{u16_at, u32_at, utf16_at};

pub const IO_REPARSE_TAG_MOUNT_POINT: u32 = 0xA000_0003;
pub const IO_REPARSE_TAG_SYMLINK: u32 = 0xA000_000C;

const SYMLINK_FLAG_RELATIVE: u32 = 0x0000_0001;
const REPARSE_HEADER_SIZE: usize = 8;
const NT_PATH_PREFIX: &str = "\\??\\";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ReparseKind {
    SymbolicLink,
    MountPoint,
    Other,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReparsePoint {
    pub tag: u32,
    pub kind: ReparseKind,
    pub relative: bool,
    pub substitute_name: String,
    pub print_name: String,
}

impl ReparsePoint {
    /// Parse a `$REPARSE_POINT` value. Returns `None` for a malformed buffer.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let tag = u32_at(data, 0)?;
        let data_length = u16_at(data, 4)? as usize;
        let payload = data.get(REPARSE_HEADER_SIZE..REPARSE_HEADER_SIZE + data_length)?;

        let (kind, path_buffer, relative) = match tag {
            IO_REPARSE_TAG_SYMLINK => {
                let flags = u32_at(payload, 8)?;
                (ReparseKind::SymbolicLink, 12, flags & SYMLINK_FLAG_RELATIVE != 0)
            }
            IO_REPARSE_TAG_MOUNT_POINT => (ReparseKind::MountPoint, 8, false),
            _ => {
                return Some(ReparsePoint {
                    tag,
                    kind: ReparseKind::Other,
                    relative: false,
                    substitute_name: String::new(),
                    print_name: String::new(),
                })
            }
        };

        let name_at = |offset_field: usize, length_field: usize| -> Option<String> {
            let offset = u16_at(payload, offset_field)? as usize;
            let length = u16_at(payload, length_field)? as usize;
            let units = utf16_at(payload, path_buffer + offset, length / 2)?;
            Some(String::from_utf16_lossy(&units))
        };

        Some(ReparsePoint {
            tag,
            kind,
            relative,
            substitute_name: name_at(0, 2)?,
            print_name: name_at(4, 6)?,
        })
    }

    /// Substitute name with the NT object prefix removed.
    pub fn target(&self) -> &str {
        self.substitute_name
            .strip_prefix(NT_PATH_PREFIX)
            .unwrap_or(&self.substitute_name)
    }
}

pub fn is_link_tag(tag: u32) -> bool {
    tag == IO_REPARSE_TAG_SYMLINK || tag == IO_REPARSE_TAG_MOUNT_POINT
}
