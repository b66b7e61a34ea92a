//! Error types for the NTFS read engine

use thiserror::Error;

/// Everything that can go wrong while reading a volume.
///
/// Lookups that simply find nothing (a name absent from an index, a link
/// that cannot be followed) are not errors; they come back as `Ok(None)`
/// or as an undereferenced path step.
#[derive(Error, Debug)]
pub enum NtfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid boot sector: {0}")]
    InvalidBootSector(String),

    #[error("corrupt MFT record {record}: {reason}")]
    CorruptRecord { record: u64, reason: String },

    #[error("corrupt run list: {0}")]
    CorruptRunList(String),

    #[error("corrupt index in record {record}: {reason}")]
    CorruptIndex { record: u64, reason: String },

    #[error("record {record} has no {attribute} attribute")]
    MissingAttribute { record: u64, attribute: String },

    #[error("cannot follow reparse point at {0}")]
    UnresolvableLink(String),

    #[error("link resolution exceeded depth {0}")]
    LinkDepthExceeded(usize),

    #[error("LZNT1 decompression failed: {0}")]
    Decompression(String),

    #[error("read of {count} bytes at offset {offset} exceeds attribute length {length}")]
    OutOfRange { offset: u64, count: u64, length: u64 },

    #[error("could not allocate {0} bytes")]
    Allocation(usize),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl NtfsError {
    pub(crate) fn corrupt_record(record: u64, reason: impl Into<String>) -> Self {
        NtfsError::CorruptRecord {
            record,
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt_index(record: u64, reason: impl Into<String>) -> Self {
        NtfsError::CorruptIndex {
            record,
            reason: reason.into(),
        }
    }
}

pub type NtfsResult<T> = Result<T, NtfsError>;

/// Reserve a zeroed buffer, reporting allocation failure instead of aborting.
pub(crate) fn zeroed_buffer(len: usize) -> NtfsResult<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| NtfsError::Allocation(len))?;
    buffer.resize(len, 0);
    Ok(buffer)
}
