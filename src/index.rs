//! Directory index ($I30) engine
//!
//! A directory's names live in a B-tree: the root node sits in the resident
//! `$INDEX_ROOT`, further nodes are INDX blocks of `$INDEX_ALLOCATION`.
//! Entries within a node are in collation order and every node ends with an
//! END entry; an entry with a sub-node points at the block holding names
//! that sort before it.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::attribute::AttributeType;
use crate::bytes::{u16_at, u32_at, u64_at, u8_at};
use crate::catalog::MftFile;
use crate::content::AttributeReader;
use crate::error::{NtfsError, NtfsResult};
use crate::file_name::FileName;
use crate::ntfs::Ntfs;
use crate::record::apply_fixup;
use crate::reference::MftReference;
use crate::upcase::UpcaseTable;

pub const INDEX_NAME_I30: &str = "$I30";
pub const INDEX_BLOCK_SIGNATURE: &[u8] = b"INDX";

pub const INDEX_ENTRY_SUBNODE: u16 = 0x01;
pub const INDEX_ENTRY_END: u16 = 0x02;
pub const INDEX_HEADER_LARGE: u8 = 0x01;

const INDEX_ENTRY_HEADER_SIZE: usize = 16;
const INDEX_ROOT_HEADER_OFFSET: usize = 16;
const INDEX_BLOCK_HEADER_OFFSET: usize = 24;
/// INDX header plus the node header that follows it.
const MIN_INDEX_BLOCK_SIZE: usize = INDEX_BLOCK_HEADER_OFFSET + 16;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub reference: MftReference,
    pub size: u16,
    pub flags: u16,
    pub file_name: Option<FileName>,
    pub sub_node: Option<u64>,
}

impl IndexEntry {
    pub fn is_end(&self) -> bool {
        self.flags & INDEX_ENTRY_END != 0
    }

    pub fn name(&self) -> Option<&[u16]> {
        self.file_name.as_ref().map(|f| f.name.as_slice())
    }

    pub fn name_string(&self) -> String {
        self.file_name
            .as_ref()
            .map(FileName::name_string)
            .unwrap_or_default()
    }

    pub fn is_directory(&self) -> bool {
        self.file_name.as_ref().is_some_and(FileName::is_directory)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNode {
    pub flags: u8,
    /// Entries in stored order, END sentinel last.
    pub entries: Vec<IndexEntry>,
}

impl IndexNode {
    /// Parse the node whose index header starts at `header_offset` of `data`.
    pub fn parse(data: &[u8], header_offset: usize, record: u64) -> NtfsResult<Self> {
        let corrupt = |reason: String| NtfsError::corrupt_index(record, reason);

        let entries_offset = u32_at(data, header_offset)
            .ok_or_else(|| corrupt("truncated index header".to_string()))? as usize;
        let index_length = u32_at(data, header_offset + 4).unwrap_or(0) as usize;
        let flags = u8_at(data, header_offset + 12).unwrap_or(0);

        let start = header_offset + entries_offset;
        let end = header_offset + index_length;
        if end > data.len() || start > end {
            return Err(corrupt(format!(
                "entries {}..{} outside a {} byte node",
                start,
                end,
                data.len()
            )));
        }

        let mut entries = Vec::new();
        let mut pos = start;
        loop {
            if pos + INDEX_ENTRY_HEADER_SIZE > end {
                return Err(corrupt("node has no END entry".to_string()));
            }
            let entry = parse_entry(&data[pos..end], record)?;
            pos += entry.size as usize;
            let last = entry.is_end();
            entries.push(entry);
            if last {
                break;
            }
        }

        Ok(IndexNode { flags, entries })
    }
}

fn parse_entry(data: &[u8], record: u64) -> NtfsResult<IndexEntry> {
    let reference = MftReference(u64_at(data, 0).unwrap_or(0));
    let size = u16_at(data, 8).unwrap_or(0);
    let key_length = u16_at(data, 10).unwrap_or(0) as usize;
    let flags = u16_at(data, 12).unwrap_or(0);

    if (size as usize) < INDEX_ENTRY_HEADER_SIZE || size as usize > data.len() || size % 8 != 0 {
        return Err(NtfsError::corrupt_index(
            record,
            format!("index entry of size {}", size),
        ));
    }
    let entry = &data[..size as usize];

    let file_name = if flags & INDEX_ENTRY_END != 0 || key_length == 0 {
        None
    } else {
        let key = entry
            .get(INDEX_ENTRY_HEADER_SIZE..INDEX_ENTRY_HEADER_SIZE + key_length)
            .ok_or_else(|| NtfsError::corrupt_index(record, "index key past entry end"))?;
        Some(
            FileName::parse(key)
                .ok_or_else(|| NtfsError::corrupt_index(record, "malformed file name key"))?,
        )
    };

    let sub_node = if flags & INDEX_ENTRY_SUBNODE != 0 {
        if (size as usize) < INDEX_ENTRY_HEADER_SIZE + 8 {
            return Err(NtfsError::corrupt_index(record, "sub-node entry too short"));
        }
        u64_at(entry, size as usize - 8)
    } else {
        None
    };

    Ok(IndexEntry {
        reference,
        size,
        flags,
        file_name,
        sub_node,
    })
}

/// A directory's complete $I30 tree, blocks keyed by their declared VCN.
#[derive(Debug, Clone)]
pub struct DirectoryIndex {
    record: u64,
    block_size: u32,
    root: IndexNode,
    blocks: BTreeMap<u64, IndexNode>,
}

impl DirectoryIndex {
    pub fn open(ntfs: &mut Ntfs, file: &mut MftFile) -> NtfsResult<Self> {
        let record = file.record_number();
        let missing = |attribute: AttributeType| NtfsError::MissingAttribute {
            record,
            attribute: format!("{} {}", attribute.name(), INDEX_NAME_I30),
        };

        let root_attribute = file
            .find_named(ntfs, AttributeType::IndexRoot, INDEX_NAME_I30)?
            .ok_or_else(|| missing(AttributeType::IndexRoot))?;
        let root_value = root_attribute
            .resident_value()
            .ok_or_else(|| NtfsError::corrupt_index(record, "$INDEX_ROOT is not resident"))?
            .to_vec();

        let large = u8_at(&root_value, INDEX_ROOT_HEADER_OFFSET + 12).unwrap_or(0)
            & INDEX_HEADER_LARGE
            != 0;
        let allocation = if large {
            let attribute = file
                .find_named(ntfs, AttributeType::IndexAllocation, INDEX_NAME_I30)?
                .ok_or_else(|| missing(AttributeType::IndexAllocation))?;
            Some(AttributeReader::open(ntfs, file, &attribute)?.read_all(ntfs)?)
        } else {
            None
        };

        let sector_size = ntfs.geometry().bytes_per_sector as usize;
        let fallback_block_size = ntfs.geometry().index_block_size;
        DirectoryIndex::build(
            &root_value,
            allocation.as_deref(),
            sector_size,
            fallback_block_size,
            record,
        )
    }

    /// Build from a raw `$INDEX_ROOT` value and, for large directories, the
    /// `$INDEX_ALLOCATION` stream.
    pub fn from_parts(
        root_value: &[u8],
        allocation: Option<&[u8]>,
        sector_size: usize,
        record: u64,
    ) -> NtfsResult<Self> {
        DirectoryIndex::build(root_value, allocation, sector_size, 0, record)
    }

    fn build(
        root_value: &[u8],
        allocation: Option<&[u8]>,
        sector_size: usize,
        fallback_block_size: u32,
        record: u64,
    ) -> NtfsResult<Self> {
        let root = IndexNode::parse(root_value, INDEX_ROOT_HEADER_OFFSET, record)?;
        let block_size = match u32_at(root_value, 8) {
            Some(size) if size > 0 => size,
            _ => fallback_block_size,
        };

        let mut blocks = BTreeMap::new();
        if let Some(allocation) = allocation {
            let size = block_size as usize;
            if sector_size == 0 || size < MIN_INDEX_BLOCK_SIZE || size % sector_size != 0 {
                return Err(NtfsError::corrupt_index(
                    record,
                    format!("index block size {}", block_size),
                ));
            }
            for (position, chunk) in allocation.chunks_exact(size).enumerate() {
                if chunk.get(0..4) != Some(INDEX_BLOCK_SIGNATURE) {
                    log::trace!("record {}: index block {} unused", record, position);
                    continue;
                }
                let mut block = chunk.to_vec();
                let parsed = apply_fixup(&mut block, sector_size).and_then(|()| {
                    IndexNode::parse(&block, INDEX_BLOCK_HEADER_OFFSET, record).map_err(|e| e.to_string())
                });
                let node = match parsed {
                    Ok(node) => node,
                    Err(reason) => {
                        log::warn!(
                            "record {}: skipping index block {}: {}",
                            record,
                            position,
                            reason
                        );
                        continue;
                    }
                };
                let vcn = u64_at(&block, 16).unwrap_or(0);
                log::debug!(
                    "record {}: index block at VCN {} with {} entries",
                    record,
                    vcn,
                    node.entries.len()
                );
                blocks.insert(vcn, node);
            }
        }

        Ok(DirectoryIndex {
            record,
            block_size,
            root,
            blocks,
        })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn root(&self) -> &IndexNode {
        &self.root
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn child(&self, vcn: u64) -> NtfsResult<&IndexNode> {
        self.blocks.get(&vcn).ok_or_else(|| {
            NtfsError::corrupt_index(self.record, format!("no index block at VCN {}", vcn))
        })
    }

    /// Look up `name` with upper-case collation.
    pub fn find_name(&self, upcase: &UpcaseTable, name: &[u16]) -> NtfsResult<Option<IndexEntry>> {
        let mut node = &self.root;
        let mut depth = 0;

        loop {
            let entries = &node.entries;
            let (mut low, mut high) = (0, entries.len());
            while low < high {
                let mid = (low + high) / 2;
                let order = match entries[mid].name() {
                    Some(key) if !entries[mid].is_end() => upcase.compare(key, name),
                    _ => Ordering::Greater,
                };
                match order {
                    Ordering::Equal => return Ok(Some(entries[mid].clone())),
                    Ordering::Less => low = mid + 1,
                    Ordering::Greater => high = mid,
                }
            }

            let vcn = match entries.get(low).and_then(|e| e.sub_node) {
                Some(vcn) => vcn,
                None => return Ok(None),
            };
            depth += 1;
            if depth > self.blocks.len() + 1 {
                return Err(NtfsError::corrupt_index(self.record, "index tree contains a cycle"));
            }
            node = self.child(vcn)?;
        }
    }

    pub fn find(&self, upcase: &UpcaseTable, name: &str) -> NtfsResult<Option<IndexEntry>> {
        let units: Vec<u16> = name.encode_utf16().collect();
        self.find_name(upcase, &units)
    }

    /// All entries in collation order, END entries excluded.
    pub fn iter(&self) -> IndexIter<'_> {
        IndexIter {
            index: self,
            stack: vec![(&self.root, 0, false)],
            failed: false,
        }
    }
}

pub struct IndexIter<'a> {
    index: &'a DirectoryIndex,
    /// Node, next entry, whether that entry's sub-node was visited.
    stack: Vec<(&'a IndexNode, usize, bool)>,
    failed: bool,
}

impl<'a> Iterator for IndexIter<'a> {
    type Item = NtfsResult<&'a IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let top = self.stack.len().checked_sub(1)?;
            let (node, position, descended) = self.stack[top];
            let entry = match node.entries.get(position) {
                Some(entry) => entry,
                None => {
                    self.stack.pop();
                    continue;
                }
            };

            if !descended {
                self.stack[top].2 = true;
                if let Some(vcn) = entry.sub_node {
                    if self.stack.len() > self.index.blocks.len() + 1 {
                        self.failed = true;
                        return Some(Err(NtfsError::corrupt_index(
                            self.index.record,
                            "index tree contains a cycle",
                        )));
                    }
                    match self.index.child(vcn) {
                        Ok(child) => {
                            self.stack.push((child, 0, false));
                            continue;
                        }
                        Err(e) => {
                            self.failed = true;
                            return Some(Err(e));
                        }
                    }
                }
            }

            self.stack[top] = (node, position + 1, false);
            if !entry.is_end() {
                return Some(Ok(entry));
            }
        }
    }
}
