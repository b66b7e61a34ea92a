//! Attribute catalog
//!
//! An `MftFile` is one file's view of its attributes. Small files keep all
//! headers in the base record; larger ones carry an `$ATTRIBUTE_LIST` that
//! spreads extents over extension records. Both look the same from here:
//! `first_attribute` / `next_attribute` walk the headers in stored order,
//! loading extension records on demand into a per-file cache.

use crate::attribute::{Attribute, AttributeMask, AttributeType};
use crate::attribute_list::{parse_attribute_list, AttributeListEntry};
use crate::content::AttributeReader;
use crate::error::{NtfsError, NtfsResult};
use crate::file_name::FileName;
use crate::ntfs::Ntfs;
use crate::record::MftRecord;
use crate::reference::MftReference;

pub struct MftFile {
    base: MftRecord,
    list: Option<Vec<AttributeListEntry>>,
    /// Extension records, sorted by record number.
    extensions: Vec<MftRecord>,
}

impl MftFile {
    pub fn load(ntfs: &mut Ntfs, reference: MftReference) -> NtfsResult<Self> {
        let base = ntfs.load_record(reference.record_number())?;
        MftFile::from_record(ntfs, base)
    }

    /// Build the catalog around an already loaded base record.
    pub fn from_record(ntfs: &mut Ntfs, base: MftRecord) -> NtfsResult<Self> {
        let mut file = MftFile {
            base,
            list: None,
            extensions: Vec::new(),
        };

        let list_attribute = file
            .base
            .find_from(file.base.first_attribute_offset() as usize, |a| {
                a.is(AttributeType::AttributeList)
            })?;
        if let Some(attribute) = list_attribute {
            let value = match attribute.resident_value() {
                Some(value) => value.to_vec(),
                None => AttributeReader::open(ntfs, &mut file, &attribute)?.read_all(ntfs)?,
            };
            let entries = parse_attribute_list(&value, file.base.number())?;
            log::debug!(
                "record {} has an attribute list with {} entries",
                file.base.number(),
                entries.len()
            );
            file.list = Some(entries);
        }
        Ok(file)
    }

    pub fn base(&self) -> &MftRecord {
        &self.base
    }

    pub fn record_number(&self) -> u64 {
        self.base.number()
    }

    pub fn reference(&self) -> MftReference {
        self.base.reference()
    }

    pub fn is_directory(&self) -> bool {
        self.base.is_directory()
    }

    pub fn attribute_list(&self) -> Option<&[AttributeListEntry]> {
        self.list.as_deref()
    }

    pub fn first_attribute(
        &mut self,
        ntfs: &mut Ntfs,
        mask: AttributeMask,
    ) -> NtfsResult<Option<Attribute>> {
        match self.list {
            None => self
                .base
                .find_from(self.base.first_attribute_offset() as usize, |a| {
                    mask.contains_code(a.type_code)
                }),
            Some(_) => self.scan_list(ntfs, 0, mask),
        }
    }

    pub fn next_attribute(
        &mut self,
        ntfs: &mut Ntfs,
        current: &Attribute,
        mask: AttributeMask,
    ) -> NtfsResult<Option<Attribute>> {
        match (&self.list, current.location.list_index) {
            (Some(_), Some(index)) => self.scan_list(ntfs, index + 1, mask),
            (Some(_), None) => Err(NtfsError::corrupt_record(
                self.base.number(),
                "attribute was not taken from the attribute list",
            )),
            (None, _) => {
                let next = current.location.offset + current.length as usize;
                self.base.find_from(next, |a| mask.contains_code(a.type_code))
            }
        }
    }

    /// Every attribute header matching `mask`, in stored order.
    pub fn attributes(
        &mut self,
        ntfs: &mut Ntfs,
        mask: AttributeMask,
    ) -> NtfsResult<Vec<Attribute>> {
        let mut found = Vec::new();
        let mut current = self.first_attribute(ntfs, mask)?;
        while let Some(attribute) = current {
            current = self.next_attribute(ntfs, &attribute, mask)?;
            found.push(attribute);
        }
        Ok(found)
    }

    /// First extent of the attribute with the given type and name.
    pub fn find_named(
        &mut self,
        ntfs: &mut Ntfs,
        kind: AttributeType,
        name: &str,
    ) -> NtfsResult<Option<Attribute>> {
        let name: Vec<u16> = name.encode_utf16().collect();
        let mask = AttributeMask::of(kind);
        let mut current = self.first_attribute(ntfs, mask)?;
        while let Some(attribute) = current {
            if attribute.name == name {
                return Ok(Some(attribute));
            }
            current = self.next_attribute(ntfs, &attribute, mask)?;
        }
        Ok(None)
    }

    /// The file's long name, falling back to whatever name it has.
    pub fn file_name(&mut self, ntfs: &mut Ntfs) -> NtfsResult<Option<FileName>> {
        let names: Vec<FileName> = self
            .attributes(ntfs, AttributeMask::of(AttributeType::FileName))?
            .iter()
            .filter_map(|a| a.resident_value().and_then(FileName::parse))
            .collect();
        let preferred = names.iter().position(|n| !n.is_dos_only()).unwrap_or(0);
        Ok(names.into_iter().nth(preferred))
    }

    fn scan_list(
        &mut self,
        ntfs: &mut Ntfs,
        start: usize,
        mask: AttributeMask,
    ) -> NtfsResult<Option<Attribute>> {
        let entries = match &self.list {
            Some(entries) => entries,
            None => return Ok(None),
        };
        let position = entries
            .iter()
            .skip(start)
            .position(|e| mask.contains_code(e.type_code));
        let index = match position {
            Some(p) => start + p,
            None => return Ok(None),
        };
        let entry = entries[index].clone();
        let record = self.record_for(ntfs, entry.reference)?;
        let attribute = record.find_from(record.first_attribute_offset() as usize, |a| {
            a.type_code == entry.type_code && a.name == entry.name && a.id == entry.attribute_id
        })?;
        match attribute {
            Some(mut attribute) => {
                attribute.location.list_index = Some(index);
                Ok(Some(attribute))
            }
            None => Err(NtfsError::corrupt_record(
                entry.reference.record_number(),
                format!(
                    "attribute list names type {:#x} id {} which the record does not hold",
                    entry.type_code, entry.attribute_id
                ),
            )),
        }
    }

    fn record_for(&mut self, ntfs: &mut Ntfs, reference: MftReference) -> NtfsResult<&MftRecord> {
        let number = reference.record_number();
        if number == self.base.number() {
            return Ok(&self.base);
        }
        let slot = match self
            .extensions
            .binary_search_by_key(&number, |r| r.number())
        {
            Ok(slot) => slot,
            Err(slot) => {
                log::trace!("loading extension record {} of {}", number, self.base.number());
                let record = ntfs.load_record(number)?;
                self.extensions.insert(slot, record);
                slot
            }
        };
        Ok(&self.extensions[slot])
    }
}
