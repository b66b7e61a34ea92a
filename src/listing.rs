//! Directory listings
//!
//! Walks one directory index in collation order and reports every long
//! name. 8.3 aliases are left out since their long twin is also listed.

use serde::{Deserialize, Serialize};

use crate::error::{NtfsError, NtfsResult};
use crate::file_name::{describe_file_attributes, format_filetime};
use crate::index::{DirectoryIndex, IndexEntry};
use crate::ntfs::Ntfs;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    Brief,
    Full,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<EntryDetails>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EntryDetails {
    pub record: u64,
    pub sequence: u16,
    pub parent_record: u64,
    pub parent_sequence: u16,
    pub attributes: Vec<String>,
    pub created: String,
    pub mft_modified: String,
    pub accessed: String,
    pub allocated_size: u64,
    pub namespace: String,
    pub sub_node_vcn: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DirectoryListing {
    pub directory: String,
    pub record: u64,
    pub entries: Vec<ListingEntry>,
}

pub fn list_directory(ntfs: &mut Ntfs, path: &str, detail: DetailLevel) -> NtfsResult<DirectoryListing> {
    let mut resolved = ntfs
        .resolve(path)?
        .ok_or_else(|| NtfsError::NotFound(path.to_string()))?;
    if !resolved.target().is_directory() && resolved.depth() > 1 {
        // A file lists the directory that holds it
        ntfs.go_up(&mut resolved)?;
    }

    let mut directory = ntfs.open_file(resolved.reference())?;
    let index = DirectoryIndex::open(ntfs, &mut directory)?;
    let mut entries = Vec::new();
    for entry in index.iter() {
        if let Some(item) = listing_entry(entry?, detail) {
            entries.push(item);
        }
    }
    log::info!("{}: {} entries", resolved.display(), entries.len());

    Ok(DirectoryListing {
        directory: resolved.display(),
        record: directory.record_number(),
        entries,
    })
}

fn listing_entry(entry: &IndexEntry, detail: DetailLevel) -> Option<ListingEntry> {
    let name = entry.file_name.as_ref()?;
    if name.is_dos_only() {
        return None;
    }

    let details = match detail {
        DetailLevel::Brief => None,
        DetailLevel::Full => Some(EntryDetails {
            record: entry.reference.record_number(),
            sequence: entry.reference.sequence(),
            parent_record: name.parent.record_number(),
            parent_sequence: name.parent.sequence(),
            attributes: describe_file_attributes(name.flags)
                .into_iter()
                .map(str::to_string)
                .collect(),
            created: format_filetime(name.created),
            mft_modified: format_filetime(name.mft_modified),
            accessed: format_filetime(name.accessed),
            allocated_size: name.allocated_size,
            namespace: name.namespace.label().to_string(),
            sub_node_vcn: entry.sub_node,
        }),
    };

    Some(ListingEntry {
        name: name.name_string(),
        is_directory: name.is_directory(),
        size: name.real_size,
        modified: format_filetime(name.modified),
        details,
    })
}
