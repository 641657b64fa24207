//! In-memory model of a packed tree.
//!
//! [`Node`] is the File/Directory tagged union the encoder dispatches on.
//! A [`Directory`] can be encoded without touching the filesystem, decoded
//! back from an image, and extracted to disk.

use std::ffi::{OsStr, OsString};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use tracing::debug;

use crate::block::{BlockBuilder, EncodeError, EntryKind};
use crate::reader::{self, DecodeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    File(Vec<u8>),
    Directory(Directory),
}

impl Node {
    pub fn kind(&self) -> EntryKind {
        match self {
            Node::File(_)      => EntryKind::File,
            Node::Directory(_) => EntryKind::Directory,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: Vec<u8>,
    pub node: Node,
}

impl Entry {
    pub fn file(name: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), node: Node::File(data.into()) }
    }

    pub fn dir(name: impl Into<Vec<u8>>, dir: Directory) -> Self {
        Self { name: name.into(), node: Node::Directory(dir) }
    }

    pub fn kind(&self) -> EntryKind {
        self.node.kind()
    }
}

/// One directory's entries, in encode order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Directory {
    pub entries: Vec<Entry>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    pub fn with(mut self, entry: Entry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &[u8]) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Sort every level by name bytes.  Two trees holding the same entries
    /// compare equal after this regardless of listing order.
    pub fn sort_recursive(&mut self) {
        self.entries.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in &mut self.entries {
            if let Node::Directory(sub) = &mut entry.node {
                sub.sort_recursive();
            }
        }
    }

    /// Encode this directory as a DirectoryBlock.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut block = BlockBuilder::new();
        for entry in &self.entries {
            match &entry.node {
                Node::File(data) => block.push_entry(&entry.name, EntryKind::File, data)?,
                Node::Directory(sub) => {
                    let nested = sub.encode()?;
                    block.push_entry(&entry.name, EntryKind::Directory, &nested)?;
                }
            }
        }
        Ok(block.finish())
    }

    pub fn decode(image: &[u8]) -> Result<Self, DecodeError> {
        reader::decode(image)
    }

    /// Write the tree under `dest`, creating it if necessary.
    ///
    /// Names that would escape `dest` (`.`, `..`, anything containing `/`)
    /// are refused with `InvalidData`.  Existing directories are merged
    /// into, but an existing file or symlink at any target path fails with
    /// `AlreadyExists`; nothing is overwritten and no link is followed.
    pub fn extract_to<P: AsRef<Path>>(&self, dest: P) -> io::Result<()> {
        let dest = dest.as_ref();
        fs::create_dir_all(dest)?;
        let mut pending = vec![(self, dest.to_path_buf())];
        while let Some((dir, base)) = pending.pop() {
            for entry in &dir.entries {
                let target = base.join(safe_component(&entry.name)?);
                match &entry.node {
                    Node::File(data) => {
                        debug!(path = %target.display(), size = data.len(), "extract file");
                        OpenOptions::new()
                            .write(true)
                            .create_new(true)
                            .open(&target)
                            .and_then(|mut file| file.write_all(data))
                            .map_err(|e| with_path(&target, e))?;
                    }
                    Node::Directory(sub) => {
                        ensure_real_dir(&target)?;
                        pending.push((sub, target));
                    }
                }
            }
        }
        Ok(())
    }
}

fn ensure_real_dir(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(with_path(path, io::Error::new(io::ErrorKind::AlreadyExists, "exists and is not a directory"))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir(path).map_err(|e| with_path(path, e)),
        Err(e) => Err(with_path(path, e)),
    }
}

fn with_path(path: &Path, err: io::Error) -> io::Error {
    io::Error::new(err.kind(), format!("{}: {err}", path.display()))
}

fn safe_component(name: &[u8]) -> io::Result<OsString> {
    if name.is_empty() || name == b"." || name == b".." || name.contains(&b'/') || name.contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("refusing to extract entry named {:?}", String::from_utf8_lossy(name)),
        ));
    }
    name_to_os(name)
}

/// Raw name bytes as the platform sees them.
#[cfg(unix)]
pub fn os_to_name(name: &OsStr) -> io::Result<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    Ok(name.as_bytes().to_vec())
}

#[cfg(not(unix))]
pub fn os_to_name(name: &OsStr) -> io::Result<Vec<u8>> {
    name.to_str()
        .map(|s| s.as_bytes().to_vec())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("name {name:?} is not valid UTF-8")))
}

#[cfg(unix)]
pub fn name_to_os(name: &[u8]) -> io::Result<OsString> {
    use std::os::unix::ffi::OsStrExt;
    Ok(OsStr::from_bytes(name).to_os_string())
}

#[cfg(not(unix))]
pub fn name_to_os(name: &[u8]) -> io::Result<OsString> {
    std::str::from_utf8(name)
        .map(OsString::from)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
