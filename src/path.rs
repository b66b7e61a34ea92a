//! Path resolution with reparse point handling
//!
//! A resolved path is the list of index entries walked from the root. Steps
//! that are symbolic links or mount points also carry the entry the link
//! leads to; descending continues from that target.

use serde::{Deserialize, Serialize};

use crate::attribute::{AttributeMask, AttributeType};
use crate::content::AttributeReader;
use crate::error::{NtfsError, NtfsResult};
use crate::index::{DirectoryIndex, IndexEntry};
use crate::ntfs::Ntfs;
use crate::reference::{MftReference, MFT_RECORD_ROOT};
use crate::reparse::{is_link_tag, ReparseKind, ReparsePoint};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub original: IndexEntry,
    pub dereferenced: Option<IndexEntry>,
}

impl PathStep {
    pub fn target(&self) -> &IndexEntry {
        self.dereferenced.as_ref().unwrap_or(&self.original)
    }

    /// A symbolic link or mount point that could not be followed.
    pub fn is_unresolved_link(&self) -> bool {
        self.dereferenced.is_none()
            && self
                .original
                .file_name
                .as_ref()
                .is_some_and(|f| f.is_reparse_point() && is_link_tag(f.reparse_tag))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    steps: Vec<PathStep>,
}

impl ResolvedPath {
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    pub fn last(&self) -> &PathStep {
        // A resolved path always holds at least the root step
        &self.steps[self.steps.len() - 1]
    }

    pub fn target(&self) -> &IndexEntry {
        self.last().target()
    }

    pub fn reference(&self) -> MftReference {
        self.target().reference
    }

    /// Names below the root joined with backslashes, as originally walked.
    pub fn display(&self) -> String {
        let names: Vec<String> = self.steps[1..]
            .iter()
            .map(|s| s.original.name_string())
            .collect();
        format!("\\{}", names.join("\\"))
    }
}

/// Split a path on either separator, dropping a leading drive designator.
pub fn split_path(path: &str) -> (Option<char>, Vec<&str>) {
    let mut drive = None;
    let mut rest = path;
    let mut chars = path.chars();
    if let (Some(letter), Some(':')) = (chars.next(), chars.next()) {
        if letter.is_ascii_alphabetic() {
            drive = Some(letter.to_ascii_uppercase());
            rest = &path[2..];
        }
    }
    let components = rest
        .split(['\\', '/'])
        .filter(|c| !c.is_empty())
        .collect();
    (drive, components)
}

impl Ntfs {
    /// Path holding only the root directory, from its own "." entry.
    pub fn root_path(&mut self) -> NtfsResult<ResolvedPath> {
        let mut root = self.open_file(MftReference::new(MFT_RECORD_ROOT, 0))?;
        let index = DirectoryIndex::open(self, &mut root)?;
        let entry = index
            .find(self.upcase(), ".")?
            .ok_or_else(|| NtfsError::corrupt_index(MFT_RECORD_ROOT, "root has no \".\" entry"))?;
        Ok(ResolvedPath {
            steps: vec![PathStep {
                original: entry,
                dereferenced: None,
            }],
        })
    }

    /// Descend into `name`. Returns `Ok(false)` when the directory has no
    /// such entry.
    pub fn go_down(&mut self, path: &mut ResolvedPath, name: &str) -> NtfsResult<bool> {
        self.go_down_at(path, name, 0)
    }

    pub fn go_up(&mut self, path: &mut ResolvedPath) -> NtfsResult<()> {
        if path.steps.len() <= 1 {
            return Err(NtfsError::InvalidPath(
                "cannot go above the root directory".to_string(),
            ));
        }
        path.steps.pop();
        Ok(())
    }

    /// Resolve an absolute path. Returns `Ok(None)` when a component is missing.
    pub fn resolve(&mut self, path: &str) -> NtfsResult<Option<ResolvedPath>> {
        self.resolve_at(path, 0)
    }

    fn resolve_at(&mut self, path: &str, depth: usize) -> NtfsResult<Option<ResolvedPath>> {
        let (_, components) = split_path(path);
        let mut resolved = self.root_path()?;
        if self.walk(&mut resolved, &components, depth)? {
            Ok(Some(resolved))
        } else {
            Ok(None)
        }
    }

    fn walk(&mut self, path: &mut ResolvedPath, components: &[&str], depth: usize) -> NtfsResult<bool> {
        for component in components {
            match *component {
                "." => {}
                ".." => self.go_up(path)?,
                name => {
                    if !self.go_down_at(path, name, depth)? {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    fn go_down_at(&mut self, path: &mut ResolvedPath, name: &str, depth: usize) -> NtfsResult<bool> {
        let current = path.last();
        if current.is_unresolved_link() {
            return Err(NtfsError::UnresolvableLink(path.display()));
        }

        let mut directory = self.open_file(current.target().reference)?;
        let index = DirectoryIndex::open(self, &mut directory)?;
        let entry = match index.find(self.upcase(), name)? {
            Some(entry) => entry,
            None => return Ok(false),
        };

        let is_link = entry
            .file_name
            .as_ref()
            .is_some_and(|f| f.is_reparse_point() && is_link_tag(f.reparse_tag));
        let dereferenced = if is_link {
            self.dereference(path, &entry, depth)?
        } else {
            None
        };

        path.steps.push(PathStep {
            original: entry,
            dereferenced,
        });
        Ok(true)
    }

    /// Follow the link in `entry`, found in the directory `parent`.
    /// Unfollowable links log a warning and yield `None`.
    fn dereference(
        &mut self,
        parent: &ResolvedPath,
        entry: &IndexEntry,
        depth: usize,
    ) -> NtfsResult<Option<IndexEntry>> {
        let max_depth = self.options().max_link_depth;
        if depth >= max_depth {
            return Err(NtfsError::LinkDepthExceeded(max_depth));
        }
        let link_name = format!("{}\\{}", parent.display().trim_end_matches('\\'), entry.name_string());

        let point = match self.read_reparse_point(entry.reference)? {
            Some(point) => point,
            None => {
                log::warn!("{}: reparse data missing or malformed", link_name);
                return Ok(None);
            }
        };

        let outcome = match point.kind {
            ReparseKind::SymbolicLink if point.relative => {
                let mut copy = parent.clone();
                let (_, components) = split_path(point.target());
                match self.walk(&mut copy, &components, depth + 1) {
                    Ok(true) => Some(copy),
                    Ok(false) => None,
                    Err(NtfsError::InvalidPath(reason)) => {
                        log::warn!("{}: {}", link_name, reason);
                        None
                    }
                    Err(NtfsError::UnresolvableLink(at)) => {
                        log::warn!("{}: target passes through unresolved link {}", link_name, at);
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                }
            }
            ReparseKind::SymbolicLink | ReparseKind::MountPoint => {
                match self.absolute_target(&point, &link_name)? {
                    Some(target) => match self.resolve_at(&target, depth + 1) {
                        Ok(found) => found,
                        Err(NtfsError::UnresolvableLink(at)) => {
                            log::warn!("{}: target passes through unresolved link {}", link_name, at);
                            return Ok(None);
                        }
                        Err(e) => return Err(e),
                    },
                    None => return Ok(None),
                }
            }
            ReparseKind::Other => return Ok(None),
        };

        match outcome {
            Some(resolved) => {
                log::debug!("{} -> {}", link_name, resolved.display());
                Ok(Some(resolved.target().clone()))
            }
            None => {
                log::warn!("{}: link target {} not found", link_name, point.substitute_name);
                Ok(None)
            }
        }
    }

    /// Volume-relative path of an absolute link target, if it is on this volume.
    fn absolute_target(&self, point: &ReparsePoint, link_name: &str) -> NtfsResult<Option<String>> {
        let target = point.target();
        if target.starts_with("Volume{") {
            log::warn!("{}: volume GUID target {} is not followed", link_name, target);
            return Ok(None);
        }
        let (drive, _) = split_path(target);
        let configured = self.options().drive_letter.map(|d| d.to_ascii_uppercase());
        let accepted = match (point.kind.clone(), drive, configured) {
            (ReparseKind::MountPoint, Some(d), Some(c)) => d == c,
            (ReparseKind::MountPoint, _, _) => true,
            (_, Some(d), Some(c)) => d == c,
            _ => false,
        };
        if !accepted {
            log::warn!(
                "{}: absolute target {} is not on drive {:?}",
                link_name,
                target,
                configured
            );
            return Ok(None);
        }
        Ok(Some(target.to_string()))
    }

    fn read_reparse_point(&mut self, reference: MftReference) -> NtfsResult<Option<ReparsePoint>> {
        let mut file = self.open_file(reference)?;
        let attribute = match file.first_attribute(self, AttributeMask::of(AttributeType::ReparsePoint))? {
            Some(attribute) => attribute,
            None => return Ok(None),
        };
        let value = AttributeReader::open(self, &mut file, &attribute)?.read_all(self)?;
        Ok(ReparsePoint::parse(&value))
    }
}
