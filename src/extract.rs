//! File extraction
//!
//! Every `$DATA` stream of a file is written to the sink, and optionally
//! every other attribute as a `.bin` blob. Streams are read in chunks so
//! large files never sit in memory whole.

use serde::{Deserialize, Serialize};

use crate::attribute::{Attribute, AttributeMask, AttributeType};
use crate::catalog::MftFile;
use crate::content::{AttributeReader, ReadOffset};
use crate::error::{NtfsError, NtfsResult};
use crate::ntfs::Ntfs;
use crate::reference::MftReference;
use crate::sink::DataSink;

const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Path(String),
    Reference(MftReference),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeSelector {
    DataOnly,
    All,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExtractedStream {
    pub output_name: String,
    pub attribute_type: String,
    pub attribute_name: String,
    pub bytes: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    pub record: u64,
    pub file_name: String,
    pub streams: Vec<ExtractedStream>,
    pub total_bytes: u64,
}

pub fn extract_file(
    ntfs: &mut Ntfs,
    target: &Target,
    selector: AttributeSelector,
    output_name: Option<&str>,
    sink: &mut dyn DataSink,
) -> NtfsResult<ExtractSummary> {
    let (reference, walked_name) = match target {
        Target::Path(path) => {
            let resolved = ntfs
                .resolve(path)?
                .ok_or_else(|| NtfsError::NotFound(path.clone()))?;
            let name = resolved.last().original.name_string();
            (resolved.reference(), Some(name))
        }
        Target::Reference(reference) => (*reference, None),
    };

    let mut file = ntfs.open_file(reference)?;
    let base_name = match (output_name.filter(|n| !n.is_empty()), walked_name) {
        (Some(name), _) => name.to_string(),
        (None, Some(name)) if name != "." => name,
        _ => match file.file_name(ntfs)? {
            Some(name) => name.name_string(),
            None => format!("record_{}", file.record_number()),
        },
    };
    log::info!("extracting record {} as {}", file.record_number(), base_name);

    let mut streams = Vec::new();
    let data_groups = groups(ntfs, &mut file, AttributeMask::of(AttributeType::Data))?;
    for first in &data_groups {
        let name = if first.name.is_empty() {
            base_name.clone()
        } else {
            format!("{}[ADS_{}]", base_name, first.name_string())
        };
        streams.push(copy_stream(ntfs, &mut file, first, &name, sink, true)?);
    }

    if selector == AttributeSelector::All {
        let record = file.record_number();
        let all = groups(ntfs, &mut file, AttributeMask::ALL)?;
        for kind in all.iter().filter_map(Attribute::kind).collect::<std::collections::BTreeSet<_>>() {
            if kind == AttributeType::Data {
                continue;
            }
            let of_kind: Vec<&Attribute> = all.iter().filter(|a| a.is(kind)).collect();
            for (n, first) in of_kind.iter().enumerate() {
                let mut parts = vec![base_name.clone(), record.to_string(), kind.name().to_string()];
                if !first.name.is_empty() {
                    parts.push(first.name_string());
                }
                if of_kind.len() > 1 {
                    parts.push((n + 1).to_string());
                }
                let name = format!("{}.bin", parts.join("_"));
                streams.push(copy_stream(ntfs, &mut file, first, &name, sink, false)?);
            }
        }
    }

    let total_bytes = streams.iter().map(|s| s.bytes).sum();
    Ok(ExtractSummary {
        record: file.record_number(),
        file_name: base_name,
        streams,
        total_bytes,
    })
}

/// First extents of the attributes matching `mask`, in stored order.
/// Later extents of a non-resident attribute belong to its first one.
fn groups(ntfs: &mut Ntfs, file: &mut MftFile, mask: AttributeMask) -> NtfsResult<Vec<Attribute>> {
    let mut firsts: Vec<Attribute> = Vec::new();
    for attribute in file.attributes(ntfs, mask)? {
        let continuation = !attribute.is_resident()
            && attribute.start_vcn() > 0
            && firsts.iter().any(|f| f.same_stream(&attribute));
        if !continuation {
            firsts.push(attribute);
        }
    }
    Ok(firsts)
}

fn copy_stream(
    ntfs: &mut Ntfs,
    file: &mut MftFile,
    first: &Attribute,
    output_name: &str,
    sink: &mut dyn DataSink,
    keep_empty: bool,
) -> NtfsResult<ExtractedStream> {
    let mut reader = AttributeReader::open(ntfs, file, first)?;
    let mut written = 0u64;

    if reader.is_empty() && keep_empty {
        sink.write_chunk(output_name, &[])?;
    }
    while written < reader.len() {
        let count = (reader.len() - written).min(CHUNK_SIZE as u64) as usize;
        let bytes = reader.read(ntfs, ReadOffset::Continue, count)?;
        if bytes.is_empty() {
            break;
        }
        sink.write_chunk(output_name, &bytes)?;
        written += bytes.len() as u64;
    }
    log::debug!("{}: {} bytes", output_name, written);

    Ok(ExtractedStream {
        output_name: output_name.to_string(),
        attribute_type: first.type_name(),
        attribute_name: first.name_string(),
        bytes: written,
    })
}
