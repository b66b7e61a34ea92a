//! Synthetic NTFS volumes for tests
//!
//! Geometry: 512 byte sectors and clusters, 1024 byte file records, 1024
//! byte index blocks, a 64 record MFT at LCN 16. Files are described first
//! and the whole image is laid out when it is opened.

use std::collections::BTreeMap;
use std::io::Cursor;

use crate::attribute::tests::resident_bytes;
use crate::attribute::{ATTRIBUTE_END, ATTR_FLAG_COMPRESSED, ATTR_FLAG_SPARSE};
use crate::attribute_list::tests::entry_bytes;
use crate::file_name::tests::file_name_bytes;
use crate::file_name::{FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_REPARSE_POINT};
use crate::lznt1;
use crate::ntfs::{Ntfs, NtfsOptions};
use crate::record::{RECORD_FLAG_DIRECTORY, RECORD_FLAG_IN_USE};
use crate::reference::{MftReference, MFT_RECORD_MFT, MFT_RECORD_ROOT, MFT_RECORD_UPCASE};
use crate::reparse::tests::reparse_bytes;
use crate::reparse::IO_REPARSE_TAG_MOUNT_POINT;
use crate::upcase::UpcaseTable;
use crate::volume::DiskReader;

pub(crate) const CLUSTER: usize = 512;
pub(crate) const RECORD: usize = 1024;
pub(crate) const INDEX_BLOCK: usize = 1024;

const MFT_RECORDS: usize = 64;
const MFT_LCN: u64 = 16;
const FIRST_USER_RECORD: u64 = 16;
const FRAGMENT_SPLIT: usize = 20;
const MFT_EXTENSION_RECORD: u64 = 15;
const ROOT_INDEX_BUDGET: usize = 480;
const ENTRIES_PER_BLOCK: usize = 6;
const COMPRESSION_UNIT: u8 = 4;
const UNIT_BYTES: usize = CLUSTER << COMPRESSION_UNIT;
const USA_SIGNATURE: u16 = 0x0A0B;

#[derive(Debug, Clone)]
pub(crate) enum DataSpec {
    Resident(Vec<u8>),
    /// Contiguous non-resident clusters.
    Stored(Vec<u8>),
    /// Holes are (first cluster, cluster count).
    Sparse {
        data: Vec<u8>,
        holes: Vec<(u64, u64)>,
        initialized: u64,
    },
    Compressed(Vec<u8>),
    /// Non-resident data split over this many extension records.
    Extents(Vec<u8>, usize),
}

impl DataSpec {
    fn len(&self) -> usize {
        match self {
            DataSpec::Resident(d) | DataSpec::Stored(d) | DataSpec::Compressed(d) => d.len(),
            DataSpec::Sparse { data, .. } | DataSpec::Extents(data, _) => data.len(),
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    parent: u64,
    name: String,
    directory: bool,
    data: Option<DataSpec>,
    streams: Vec<(String, Vec<u8>)>,
    reparse: Option<(u32, Vec<u8>)>,
    aliases: Vec<(String, String)>,
    corrupt_list_type: Option<u32>,
    non_resident_list: bool,
    compression_unit: Option<u8>,
}

impl Node {
    fn new(parent: u64, name: &str, directory: bool) -> Self {
        Node {
            parent,
            name: name.to_string(),
            directory,
            data: None,
            streams: Vec::new(),
            reparse: None,
            aliases: Vec::new(),
            corrupt_list_type: None,
            non_resident_list: false,
            compression_unit: None,
        }
    }
}

pub(crate) struct ImageBuilder {
    nodes: BTreeMap<u64, Node>,
    next_record: u64,
    fragmented: bool,
    split_mft: bool,
}

impl ImageBuilder {
    pub(crate) fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(MFT_RECORD_MFT, Node::new(MFT_RECORD_ROOT, "$MFT", false));
        nodes.insert(MFT_RECORD_ROOT, Node::new(MFT_RECORD_ROOT, ".", true));
        nodes.insert(MFT_RECORD_UPCASE, Node::new(MFT_RECORD_ROOT, "$UpCase", false));
        ImageBuilder {
            nodes,
            next_record: FIRST_USER_RECORD,
            fragmented: false,
            split_mft: false,
        }
    }

    pub(crate) fn root(&self) -> u64 {
        MFT_RECORD_ROOT
    }

    /// Place the second part of the MFT away from the first.
    pub(crate) fn fragment_mft(&mut self) {
        self.fragmented = true;
    }

    /// Fragment the MFT and keep its second run in an extension record,
    /// reached through an attribute list in record 0.
    pub(crate) fn split_mft_data(&mut self) {
        self.fragmented = true;
        self.split_mft = true;
    }

    fn insert(&mut self, node: Node) -> u64 {
        let number = self.next_record;
        self.next_record += 1;
        self.nodes.insert(number, node);
        number
    }

    pub(crate) fn add_dir(&mut self, parent: u64, name: &str) -> u64 {
        self.insert(Node::new(parent, name, true))
    }

    pub(crate) fn add_file(&mut self, parent: u64, name: &str, data: DataSpec) -> u64 {
        let mut node = Node::new(parent, name, false);
        node.data = Some(data);
        self.insert(node)
    }

    /// Symbolic link (a file) or mount point (a directory).
    pub(crate) fn add_link(&mut self, parent: u64, name: &str, tag: u32, target: &str, relative: bool) -> u64 {
        let mut node = Node::new(parent, name, tag == IO_REPARSE_TAG_MOUNT_POINT);
        node.reparse = Some((tag, reparse_bytes(tag, target, target, relative)));
        self.insert(node)
    }

    pub(crate) fn add_named_stream(&mut self, file: u64, name: &str, data: Vec<u8>) {
        if let Some(node) = self.nodes.get_mut(&file) {
            node.streams.push((name.to_string(), data));
        }
    }

    /// Extra 8.3 index entry in `dir` for the child named `target`.
    pub(crate) fn add_dos_alias(&mut self, dir: u64, alias: &str, target: &str) {
        if let Some(node) = self.nodes.get_mut(&dir) {
            node.aliases.push((alias.to_string(), target.to_string()));
        }
    }

    /// Give the first attribute list entry of `type_code` an id no header has.
    pub(crate) fn corrupt_list_entry_id(&mut self, file: u64, type_code: u32) {
        if let Some(node) = self.nodes.get_mut(&file) {
            node.corrupt_list_type = Some(type_code);
        }
    }

    /// Store the attribute list of `file` in clusters instead of the record.
    pub(crate) fn non_resident_list(&mut self, file: u64) {
        if let Some(node) = self.nodes.get_mut(&file) {
            node.non_resident_list = true;
        }
    }

    /// Override the compression unit byte of a compressed `$DATA`.
    pub(crate) fn set_compression_unit(&mut self, file: u64, unit: u8) {
        if let Some(node) = self.nodes.get_mut(&file) {
            node.compression_unit = Some(unit);
        }
    }

    pub(crate) fn open(&self) -> Ntfs {
        self.open_with(NtfsOptions::default())
    }

    pub(crate) fn open_with(&self, options: NtfsOptions) -> Ntfs {
        let image = self.build();
        Ntfs::open(DiskReader::from_reader(Cursor::new(image), 0), options).unwrap()
    }

    fn data_len(&self, number: u64, node: &Node) -> u64 {
        match number {
            MFT_RECORD_MFT => (MFT_RECORDS * RECORD) as u64,
            MFT_RECORD_UPCASE => crate::upcase::UPCASE_TABLE_SIZE as u64,
            _ => node.data.as_ref().map_or(0, DataSpec::len) as u64,
        }
    }

    fn file_name_value(&self, number: u64, node: &Node, name: &str, namespace: u8) -> Vec<u8> {
        let mut flags = if node.directory {
            FILE_ATTRIBUTE_DIRECTORY
        } else {
            0x20
        };
        if node.reparse.is_some() {
            flags |= FILE_ATTRIBUTE_REPARSE_POINT;
        }
        let mut value = file_name_bytes(
            MftReference::new(node.parent, 1),
            name,
            flags,
            namespace,
            self.data_len(number, node),
        );
        if let Some((tag, _)) = &node.reparse {
            value[60..64].copy_from_slice(&tag.to_le_bytes());
        }
        value
    }

    fn index_entries(&self, dir: u64, names: &BTreeMap<u64, Vec<u8>>) -> Vec<EntrySpec> {
        let mut entries: Vec<EntrySpec> = self
            .nodes
            .iter()
            .filter(|(number, node)| node.parent == dir && (**number != dir || dir == MFT_RECORD_ROOT))
            .map(|(number, node)| EntrySpec::new(MftReference::new(*number, 1), &node.name, names[number].clone()))
            .collect();
        if let Some(node) = self.nodes.get(&dir) {
            for (alias, target) in &node.aliases {
                let found = self
                    .nodes
                    .iter()
                    .find(|(_, child)| child.parent == dir && &child.name == target);
                if let Some((number, child)) = found {
                    let key = self.file_name_value(*number, child, alias, 2);
                    entries.push(EntrySpec::new(MftReference::new(*number, 1), alias, key));
                }
            }
        }
        let upcase = UpcaseTable::ascii();
        entries.sort_by(|a, b| upcase.compare(&a.name, &b.name));
        entries
    }

    fn build(&self) -> Vec<u8> {
        let mut image = Image {
            bytes: vec![0u8; MFT_LCN as usize * CLUSTER],
            next_lcn: MFT_LCN,
        };

        let mft_clusters = (MFT_RECORDS * RECORD / CLUSTER) as u64;
        let mut mft_runs = Vec::new();
        if self.fragmented {
            let first = (FRAGMENT_SPLIT * RECORD / CLUSTER) as u64;
            mft_runs.push((first, Some(image.alloc(first))));
            image.alloc(8);
            mft_runs.push((mft_clusters - first, Some(image.alloc(mft_clusters - first))));
        } else {
            mft_runs.push((mft_clusters, Some(image.alloc(mft_clusters))));
        }

        let names: BTreeMap<u64, Vec<u8>> = self
            .nodes
            .iter()
            .map(|(number, node)| (*number, self.file_name_value(*number, node, &node.name, 3)))
            .collect();

        let mut records: Vec<(u64, Vec<u8>)> = Vec::new();
        let mut next_extension = self.next_record;

        for (&number, node) in &self.nodes {
            let mut base: Vec<Attr> = vec![
                Attr::resident(0x10, "", 0, &standard_information()),
                Attr::resident(0x30, "", 1, &names[&number]),
            ];
            let mut extents: Vec<Attr> = Vec::new();

            match number {
                MFT_RECORD_MFT if self.split_mft => {
                    let size = (MFT_RECORDS * RECORD) as u64;
                    let first = mft_runs[0].0;
                    base.push(Attr::non_resident(
                        0x80, "", 2, 0, first, &mft_runs[..1], [size, size, size], 0, 0,
                    ));
                    extents.push(Attr::non_resident(
                        0x80, "", 0, first, mft_clusters - first, &mft_runs[1..], [0, 0, 0], 0, 0,
                    ));
                }
                MFT_RECORD_MFT => {
                    let size = (MFT_RECORDS * RECORD) as u64;
                    base.push(Attr::non_resident(
                        0x80, "", 2, 0, mft_clusters, &mft_runs, [size, size, size], 0, 0,
                    ));
                }
                MFT_RECORD_UPCASE => {
                    let table = UpcaseTable::ascii().to_bytes();
                    base.push(image.stored(0x80, "", 2, &table));
                }
                _ => match &node.data {
                    Some(DataSpec::Resident(data)) => base.push(Attr::resident(0x80, "", 2, data)),
                    Some(DataSpec::Stored(data)) => base.push(image.stored(0x80, "", 2, data)),
                    Some(DataSpec::Sparse {
                        data,
                        holes,
                        initialized,
                    }) => base.push(image.sparse(data, holes, *initialized)),
                    Some(DataSpec::Compressed(data)) => {
                        let mut attr = image.compressed(data);
                        if let Some(unit) = node.compression_unit {
                            attr.bytes[34] = unit;
                        }
                        base.push(attr);
                    }
                    Some(DataSpec::Extents(data, count)) => extents = image.extents(data, *count),
                    None => {}
                },
            }

            for (i, (name, data)) in node.streams.iter().enumerate() {
                base.push(Attr::resident(0x80, name, 3 + i as u16, data));
            }

            if node.directory {
                let entries = self.index_entries(number, &names);
                let (root, blocks) = layout_index(entries);
                let large = !blocks.is_empty();
                base.push(Attr::resident(0x90, "$I30", 10, &index_root(&root, INDEX_BLOCK, large)));
                if large {
                    let vcn_step = (INDEX_BLOCK / CLUSTER) as u64;
                    let allocation = index_blocks(&blocks, INDEX_BLOCK, vcn_step);
                    base.push(image.stored(0xA0, "$I30", 11, &allocation));
                }
            }

            if let Some((_, payload)) = &node.reparse {
                base.push(Attr::resident(0xC0, "", 12, payload));
            }

            if !extents.is_empty() {
                let mut listed: Vec<(u32, String, u64, u64, u16)> = base
                    .iter()
                    .map(|a| (a.type_code, a.name.clone(), a.start_vcn, number, a.id))
                    .collect();
                for extent in &extents {
                    // The MFT's own extension must lie in its first run
                    let extension = if number == MFT_RECORD_MFT {
                        MFT_EXTENSION_RECORD
                    } else {
                        next_extension += 1;
                        next_extension - 1
                    };
                    listed.push((extent.type_code, extent.name.clone(), extent.start_vcn, extension, extent.id));
                    records.push((
                        extension,
                        record_bytes(extension, RECORD_FLAG_IN_USE, Some(number), &[extent.bytes.as_slice()]),
                    ));
                }
                listed.sort_by(|a, b| (a.0, &a.1, a.2).cmp(&(b.0, &b.1, b.2)));
                if let Some(corrupt) = node.corrupt_list_type {
                    if let Some(entry) = listed.iter_mut().find(|e| e.0 == corrupt) {
                        entry.4 = 99;
                    }
                }
                let list: Vec<u8> = listed
                    .iter()
                    .flat_map(|(type_code, name, vcn, record, id)| {
                        entry_bytes(*type_code, name, *vcn, MftReference::new(*record, 1), *id)
                    })
                    .collect();
                if node.non_resident_list {
                    base.push(image.stored(0x20, "", 13, &list));
                } else {
                    base.push(Attr::resident(0x20, "", 13, &list));
                }
            }

            base.sort_by_key(|a| a.type_code);
            let mut flags = RECORD_FLAG_IN_USE;
            if node.directory {
                flags |= RECORD_FLAG_DIRECTORY;
            }
            let attributes: Vec<&[u8]> = base.iter().map(|a| a.bytes.as_slice()).collect();
            records.push((number, record_bytes(number, flags, None, &attributes)));
        }

        assert!(next_extension as usize <= MFT_RECORDS, "test image MFT is full");
        for (number, mut record) in records {
            protect(&mut record, 0x30);
            let (lcn, index) = match (self.fragmented, number as usize) {
                (true, n) if n >= FRAGMENT_SPLIT => (mft_runs[1].1, n - FRAGMENT_SPLIT),
                (_, n) => (mft_runs[0].1, n),
            };
            let offset = lcn.unwrap_or(0) as usize * CLUSTER + index * RECORD;
            image.write_bytes(offset, &record);
        }

        let total_sectors = (image.bytes.len() / 512) as u64;
        let mut boot = vec![0u8; 512];
        boot[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
        boot[3..11].copy_from_slice(b"NTFS    ");
        boot[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
        boot[0x0D] = (CLUSTER / 512) as u8;
        boot[0x28..0x30].copy_from_slice(&total_sectors.to_le_bytes());
        boot[0x30..0x38].copy_from_slice(&mft_runs[0].1.unwrap_or(0).to_le_bytes());
        boot[0x38..0x40].copy_from_slice(&2u64.to_le_bytes());
        boot[0x40] = (-10i8) as u8;
        boot[0x44] = (INDEX_BLOCK / CLUSTER) as u8;
        boot[0x48..0x50].copy_from_slice(&0x00C0_FFEE_1234_5678u64.to_le_bytes());
        boot[510] = 0x55;
        boot[511] = 0xAA;
        image.write_bytes(0, &boot);

        image.bytes
    }
}

struct Attr {
    type_code: u32,
    name: String,
    id: u16,
    start_vcn: u64,
    bytes: Vec<u8>,
}

impl Attr {
    fn resident(type_code: u32, name: &str, id: u16, value: &[u8]) -> Self {
        Attr {
            type_code,
            name: name.to_string(),
            id,
            start_vcn: 0,
            bytes: resident_bytes(type_code, name, id, value),
        }
    }

    /// `sizes` is allocated, real, initialized.
    #[allow(clippy::too_many_arguments)]
    fn non_resident(
        type_code: u32,
        name: &str,
        id: u16,
        start_vcn: u64,
        clusters: u64,
        runs: &[(u64, Option<u64>)],
        sizes: [u64; 3],
        flags: u16,
        compressed_size: u64,
    ) -> Self {
        let units: Vec<u16> = name.encode_utf16().collect();
        let header = if flags & (ATTR_FLAG_COMPRESSED | ATTR_FLAG_SPARSE) != 0 {
            72
        } else {
            64
        };
        let encoded = encode_runs(runs);
        let runs_offset = align8(header + units.len() * 2);
        let length = align8(runs_offset + encoded.len());

        let mut raw = vec![0u8; length];
        raw[0..4].copy_from_slice(&type_code.to_le_bytes());
        raw[4..8].copy_from_slice(&(length as u32).to_le_bytes());
        raw[8] = 1;
        raw[9] = units.len() as u8;
        raw[10..12].copy_from_slice(&(header as u16).to_le_bytes());
        raw[12..14].copy_from_slice(&flags.to_le_bytes());
        raw[14..16].copy_from_slice(&id.to_le_bytes());
        raw[16..24].copy_from_slice(&start_vcn.to_le_bytes());
        raw[24..32].copy_from_slice(&(start_vcn + clusters).wrapping_sub(1).to_le_bytes());
        raw[32..34].copy_from_slice(&(runs_offset as u16).to_le_bytes());
        if flags & ATTR_FLAG_COMPRESSED != 0 {
            raw[34] = COMPRESSION_UNIT;
        }
        raw[40..48].copy_from_slice(&sizes[0].to_le_bytes());
        raw[48..56].copy_from_slice(&sizes[1].to_le_bytes());
        raw[56..64].copy_from_slice(&sizes[2].to_le_bytes());
        if header == 72 {
            raw[64..72].copy_from_slice(&compressed_size.to_le_bytes());
        }
        for (i, unit) in units.iter().enumerate() {
            let at = header + i * 2;
            raw[at..at + 2].copy_from_slice(&unit.to_le_bytes());
        }
        raw[runs_offset..runs_offset + encoded.len()].copy_from_slice(&encoded);

        Attr {
            type_code,
            name: name.to_string(),
            id,
            start_vcn,
            bytes: raw,
        }
    }
}

struct Image {
    bytes: Vec<u8>,
    next_lcn: u64,
}

impl Image {
    fn alloc(&mut self, clusters: u64) -> u64 {
        let lcn = self.next_lcn;
        self.next_lcn += clusters;
        let end = self.next_lcn as usize * CLUSTER;
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        lcn
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) {
        if self.bytes.len() < offset + data.len() {
            self.bytes.resize(offset + data.len(), 0);
        }
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    fn write(&mut self, lcn: u64, data: &[u8]) {
        self.write_bytes(lcn as usize * CLUSTER, data);
    }

    fn stored(&mut self, type_code: u32, name: &str, id: u16, data: &[u8]) -> Attr {
        let clusters = clusters_for(data.len());
        let mut runs = Vec::new();
        if clusters > 0 {
            let lcn = self.alloc(clusters);
            self.write(lcn, data);
            runs.push((clusters, Some(lcn)));
        }
        let size = data.len() as u64;
        Attr::non_resident(
            type_code,
            name,
            id,
            0,
            clusters,
            &runs,
            [clusters * CLUSTER as u64, size, size],
            0,
            0,
        )
    }

    fn sparse(&mut self, data: &[u8], holes: &[(u64, u64)], initialized: u64) -> Attr {
        let clusters = clusters_for(data.len());
        let mut holes = holes.to_vec();
        holes.sort();
        let mut runs = Vec::new();
        let mut real = 0u64;
        let mut vcn = 0u64;
        let mut ranges = Vec::new();
        for (start, count) in holes {
            if start > vcn {
                ranges.push((vcn, start - vcn, false));
            }
            ranges.push((start, count, true));
            vcn = start + count;
        }
        if vcn < clusters {
            ranges.push((vcn, clusters - vcn, false));
        }
        for (start, count, hole) in ranges {
            if hole {
                runs.push((count, None));
                continue;
            }
            let lcn = self.alloc(count);
            let from = start as usize * CLUSTER;
            let to = ((start + count) as usize * CLUSTER).min(data.len());
            self.write(lcn, &data[from..to]);
            runs.push((count, Some(lcn)));
            real += count;
        }
        let size = data.len() as u64;
        Attr::non_resident(
            0x80,
            "",
            2,
            0,
            clusters,
            &runs,
            [clusters * CLUSTER as u64, size, initialized],
            ATTR_FLAG_SPARSE,
            real * CLUSTER as u64,
        )
    }

    fn compressed(&mut self, data: &[u8]) -> Attr {
        let unit_clusters = (UNIT_BYTES / CLUSTER) as u64;
        let mut runs = Vec::new();
        let mut real = 0u64;
        let mut units = 0u64;
        for chunk in data.chunks(UNIT_BYTES) {
            units += 1;
            let packed = lznt1::compress(chunk);
            let packed_clusters = clusters_for(packed.len());
            if packed_clusters < unit_clusters {
                let lcn = self.alloc(packed_clusters);
                self.write(lcn, &packed);
                runs.push((packed_clusters, Some(lcn)));
                runs.push((unit_clusters - packed_clusters, None));
                real += packed_clusters;
            } else {
                let lcn = self.alloc(unit_clusters);
                self.write(lcn, chunk);
                runs.push((unit_clusters, Some(lcn)));
                real += unit_clusters;
            }
        }
        let size = data.len() as u64;
        Attr::non_resident(
            0x80,
            "",
            2,
            0,
            units * unit_clusters,
            &runs,
            [units * UNIT_BYTES as u64, size, size],
            ATTR_FLAG_COMPRESSED,
            real * CLUSTER as u64,
        )
    }

    /// One extent per part, each in its own cluster range.
    fn extents(&mut self, data: &[u8], parts: usize) -> Vec<Attr> {
        let clusters = clusters_for(data.len());
        let per = clusters.div_ceil(parts as u64).max(1);
        let size = data.len() as u64;
        let mut extents = Vec::new();
        let mut start = 0u64;
        while start < clusters {
            let end = (start + per).min(clusters);
            let lcn = self.alloc(end - start);
            let from = start as usize * CLUSTER;
            let to = (end as usize * CLUSTER).min(data.len());
            self.write(lcn, &data[from..to]);
            // Keep extents apart on disk
            self.alloc(1);
            let sizes = if start == 0 {
                [clusters * CLUSTER as u64, size, size]
            } else {
                [0, 0, 0]
            };
            extents.push(Attr::non_resident(
                0x80,
                "",
                0,
                start,
                end - start,
                &[(end - start, Some(lcn))],
                sizes,
                0,
                0,
            ));
            start = end;
        }
        extents
    }
}

fn clusters_for(len: usize) -> u64 {
    len.div_ceil(CLUSTER) as u64
}

fn align8(value: usize) -> usize {
    (value + 7) & !7
}

fn standard_information() -> Vec<u8> {
    let stamp: u64 = 132_223_104_000_000_000;
    let mut value = vec![0u8; 48];
    for at in [0, 8, 16, 24] {
        value[at..at + 8].copy_from_slice(&stamp.to_le_bytes());
    }
    value[32..36].copy_from_slice(&0x20u32.to_le_bytes());
    value
}

fn encode_runs(runs: &[(u64, Option<u64>)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut previous: i64 = 0;
    for &(length, lcn) in runs {
        let mut length_bytes = length.to_le_bytes().to_vec();
        while length_bytes.len() > 1 && length_bytes[length_bytes.len() - 1] == 0 {
            length_bytes.pop();
        }
        match lcn {
            Some(lcn) => {
                let delta = lcn as i64 - previous;
                let mut width = 1;
                while width < 8 {
                    let bound = 1i64 << (8 * width - 1);
                    if delta >= -bound && delta < bound {
                        break;
                    }
                    width += 1;
                }
                out.push(((width << 4) | length_bytes.len()) as u8);
                out.extend_from_slice(&length_bytes);
                out.extend_from_slice(&delta.to_le_bytes()[..width]);
                previous = lcn as i64;
            }
            None => {
                out.push(length_bytes.len() as u8);
                out.extend_from_slice(&length_bytes);
            }
        }
    }
    out.push(0);
    out
}

/// Write the USA: save each sector's last two bytes and stamp the signature.
fn protect(data: &mut [u8], usa_offset: usize) {
    let count = u16::from_le_bytes([data[6], data[7]]) as usize;
    data[usa_offset..usa_offset + 2].copy_from_slice(&USA_SIGNATURE.to_le_bytes());
    for i in 1..count {
        let pos = i * 512 - 2;
        let saved = usa_offset + i * 2;
        data[saved] = data[pos];
        data[saved + 1] = data[pos + 1];
        data[pos..pos + 2].copy_from_slice(&USA_SIGNATURE.to_le_bytes());
    }
}

fn record_bytes(number: u64, flags: u16, base: Option<u64>, attributes: &[&[u8]]) -> Vec<u8> {
    let mut data = vec![0u8; RECORD];
    data[0..4].copy_from_slice(b"FILE");
    data[4..6].copy_from_slice(&0x30u16.to_le_bytes());
    data[6..8].copy_from_slice(&((RECORD / 512 + 1) as u16).to_le_bytes());
    data[16..18].copy_from_slice(&1u16.to_le_bytes());
    data[18..20].copy_from_slice(&1u16.to_le_bytes());
    data[20..22].copy_from_slice(&0x38u16.to_le_bytes());
    data[22..24].copy_from_slice(&flags.to_le_bytes());
    data[28..32].copy_from_slice(&(RECORD as u32).to_le_bytes());
    if let Some(base) = base {
        data[32..40].copy_from_slice(&MftReference::new(base, 1).0.to_le_bytes());
    }
    data[40..42].copy_from_slice(&16u16.to_le_bytes());
    data[44..48].copy_from_slice(&(number as u32).to_le_bytes());

    let mut offset = 0x38;
    for attribute in attributes {
        assert!(
            offset + attribute.len() + 8 <= RECORD,
            "record {} overflows in the test image",
            number
        );
        data[offset..offset + attribute.len()].copy_from_slice(attribute);
        offset += attribute.len();
    }
    data[offset..offset + 4].copy_from_slice(&ATTRIBUTE_END.to_le_bytes());
    data[24..28].copy_from_slice(&((offset + 8) as u32).to_le_bytes());
    data
}

#[derive(Debug, Clone)]
pub(crate) struct EntrySpec {
    reference: MftReference,
    name: Vec<u16>,
    key: Vec<u8>,
    sub_node: Option<u64>,
}

impl EntrySpec {
    fn new(reference: MftReference, name: &str, key: Vec<u8>) -> Self {
        EntrySpec {
            reference,
            name: name.encode_utf16().collect(),
            key,
            sub_node: None,
        }
    }

    fn named(name: &str, record: u64, sub_node: Option<u64>) -> Self {
        let key = file_name_bytes(MftReference::new(MFT_RECORD_ROOT, 1), name, 0x20, 1, 0);
        let mut entry = EntrySpec::new(MftReference::new(record, 1), name, key);
        entry.sub_node = sub_node;
        entry
    }

    fn size(&self) -> usize {
        align8(16 + self.key.len()) + if self.sub_node.is_some() { 8 } else { 0 }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NodeSpec {
    entries: Vec<EntrySpec>,
    end_sub_node: Option<u64>,
}

impl NodeSpec {
    pub(crate) fn leaf(names: &[&str]) -> Self {
        NodeSpec {
            entries: names
                .iter()
                .enumerate()
                .map(|(i, name)| EntrySpec::named(name, 100 + i as u64, None))
                .collect(),
            end_sub_node: None,
        }
    }

    pub(crate) fn branch(entries: &[(&str, Option<u64>)], end_sub_node: Option<u64>) -> Self {
        NodeSpec {
            entries: entries
                .iter()
                .enumerate()
                .map(|(i, (name, sub))| EntrySpec::named(name, 200 + i as u64, *sub))
                .collect(),
            end_sub_node,
        }
    }

    fn has_children(&self) -> bool {
        self.end_sub_node.is_some() || self.entries.iter().any(|e| e.sub_node.is_some())
    }

    fn entry_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            let size = entry.size();
            let mut raw = vec![0u8; size];
            raw[0..8].copy_from_slice(&entry.reference.0.to_le_bytes());
            raw[8..10].copy_from_slice(&(size as u16).to_le_bytes());
            raw[10..12].copy_from_slice(&(entry.key.len() as u16).to_le_bytes());
            let flags: u16 = if entry.sub_node.is_some() { 1 } else { 0 };
            raw[12..14].copy_from_slice(&flags.to_le_bytes());
            raw[16..16 + entry.key.len()].copy_from_slice(&entry.key);
            if let Some(vcn) = entry.sub_node {
                raw[size - 8..].copy_from_slice(&vcn.to_le_bytes());
            }
            out.extend(raw);
        }
        let end_size = if self.end_sub_node.is_some() { 24 } else { 16 };
        let mut end = vec![0u8; end_size];
        end[8..10].copy_from_slice(&(end_size as u16).to_le_bytes());
        let flags: u16 = 2 | if self.end_sub_node.is_some() { 1 } else { 0 };
        end[12..14].copy_from_slice(&flags.to_le_bytes());
        if let Some(vcn) = self.end_sub_node {
            end[16..24].copy_from_slice(&vcn.to_le_bytes());
        }
        out.extend(end);
        out
    }
}

/// Small directories stay in the root; larger ones get one level of leaf
/// blocks with separators in the root.
fn layout_index(entries: Vec<EntrySpec>) -> (NodeSpec, Vec<NodeSpec>) {
    let total: usize = entries.iter().map(EntrySpec::size).sum::<usize>() + 16;
    if total <= ROOT_INDEX_BUDGET {
        return (
            NodeSpec {
                entries,
                end_sub_node: None,
            },
            Vec::new(),
        );
    }

    let vcn_step = (INDEX_BLOCK / CLUSTER) as u64;
    let mut blocks: Vec<NodeSpec> = Vec::new();
    let mut separators = Vec::new();
    let mut rest = entries.into_iter().peekable();
    loop {
        let leaf: Vec<EntrySpec> = rest.by_ref().take(ENTRIES_PER_BLOCK).collect();
        blocks.push(NodeSpec {
            entries: leaf,
            end_sub_node: None,
        });
        match rest.next() {
            Some(mut separator) => {
                if rest.peek().is_none() {
                    if let Some(last) = blocks.last_mut() {
                        last.entries.push(separator);
                    }
                    break;
                }
                separator.sub_node = Some((blocks.len() as u64 - 1) * vcn_step);
                separators.push(separator);
            }
            None => break,
        }
    }
    let root = NodeSpec {
        entries: separators,
        end_sub_node: Some((blocks.len() as u64 - 1) * vcn_step),
    };
    (root, blocks)
}

/// `$INDEX_ROOT` value holding `node`.
pub(crate) fn index_root(node: &NodeSpec, block_size: usize, large: bool) -> Vec<u8> {
    let entries = node.entry_bytes();
    let mut value = vec![0u8; 32];
    value[0..4].copy_from_slice(&0x30u32.to_le_bytes());
    value[4..8].copy_from_slice(&1u32.to_le_bytes());
    value[8..12].copy_from_slice(&(block_size as u32).to_le_bytes());
    value[12] = (block_size / CLUSTER).max(1) as u8;
    value[16..20].copy_from_slice(&16u32.to_le_bytes());
    value[20..24].copy_from_slice(&((16 + entries.len()) as u32).to_le_bytes());
    value[24..28].copy_from_slice(&((16 + entries.len()) as u32).to_le_bytes());
    value[28] = u8::from(large);
    value.extend(entries);
    value
}

/// `$INDEX_ALLOCATION` stream with block `i` declaring VCN `i`.
pub(crate) fn index_allocation(nodes: &[NodeSpec], block_size: usize) -> Vec<u8> {
    index_blocks(nodes, block_size, 1)
}

fn index_blocks(nodes: &[NodeSpec], block_size: usize, vcn_step: u64) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        let entries = node.entry_bytes();
        let mut block = vec![0u8; block_size];
        block[0..4].copy_from_slice(b"INDX");
        block[4..6].copy_from_slice(&0x28u16.to_le_bytes());
        block[6..8].copy_from_slice(&((block_size / 512 + 1) as u16).to_le_bytes());
        block[16..24].copy_from_slice(&(i as u64 * vcn_step).to_le_bytes());
        block[24..28].copy_from_slice(&0x28u32.to_le_bytes());
        block[28..32].copy_from_slice(&((0x28 + entries.len()) as u32).to_le_bytes());
        block[32..36].copy_from_slice(&((block_size - 0x18) as u32).to_le_bytes());
        block[36] = u8::from(node.has_children());
        assert!(0x40 + entries.len() <= block_size, "index block overflows");
        block[0x40..0x40 + entries.len()].copy_from_slice(&entries);
        protect(&mut block, 0x28);
        out.extend(block);
    }
    out
}
