//! [`DirectoryPacker`]: turn a host directory into a romfs image.
//!
//! ```no_run
//! use romfs::packer::{DirectoryPacker, PackOptions};
//!
//! let packer = DirectoryPacker::with_options(PackOptions { sort_entries: true });
//! let image = packer.pack("assets")?;
//! assert_eq!(image.len() % 4, 0);
//!
//! packer.pack_to_file("assets", "build/romfs.bin")?;
//! # Ok::<(), romfs::PackError>(())
//! ```
//!
//! Packing is depth-first.  Each directory is materialised into its own
//! buffer before the parent can write its SizeFlags, so the whole image is
//! resident in memory until it is written out.  Any error aborts the whole
//! pack; there is no partial image.

use std::fs::{self, DirEntry};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::block::{self, BlockBuilder, EncodeError, EntryKind};
use crate::tree::os_to_name;

#[derive(Error, Debug)]
pub enum PackError {
    #[error("{}: name is {len} bytes long (maximum 255)", .path.display())]
    NameTooLong { path: PathBuf, len: usize },
    #[error("{}: name is empty", .path.display())]
    EmptyName { path: PathBuf },
    #[error("{}: not a regular file or directory", .path.display())]
    UnsupportedEntryKind { path: PathBuf },
    #[error("{}: not a directory", .path.display())]
    NotADirectory { path: PathBuf },
    #[error("{}: payload is {len} bytes long (maximum 33554431)", .path.display())]
    PayloadTooLarge { path: PathBuf, len: u64 },
    #[error("{}: {source}", .path.display())]
    Io { path: PathBuf, #[source] source: io::Error },
}

impl PackError {
    fn encode(path: PathBuf, err: EncodeError) -> Self {
        match err {
            EncodeError::NameTooLong(len)     => PackError::NameTooLong { path, len },
            EncodeError::EmptyName            => PackError::EmptyName { path },
            EncodeError::PayloadTooLarge(len) => PackError::PayloadTooLarge { path, len: len as u64 },
        }
    }

    /// The filesystem path the error refers to.
    pub fn path(&self) -> &Path {
        match self {
            PackError::NameTooLong { path, .. }
            | PackError::EmptyName { path }
            | PackError::UnsupportedEntryKind { path }
            | PackError::NotADirectory { path }
            | PackError::PayloadTooLarge { path, .. }
            | PackError::Io { path, .. } => path,
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> PackError + '_ {
    move |source| PackError::Io { path: path.to_path_buf(), source }
}

// ── PackOptions ─────────────────────────────────────────────────────────────

/// Configuration for [`DirectoryPacker`].
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// Encode each directory's children in byte-wise name order instead of
    /// listing order, so the same tree always yields the same image.
    pub sort_entries: bool,
}

// ── DirectoryPacker ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DirectoryPacker {
    options: PackOptions,
}

impl DirectoryPacker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: PackOptions) -> Self {
        Self { options }
    }

    /// Pack the directory at `path` into a root DirectoryBlock.
    pub fn pack<P: AsRef<Path>>(&self, path: P) -> Result<Vec<u8>, PackError> {
        let root = path.as_ref();
        let meta = fs::metadata(root).map_err(io_err(root))?;
        if !meta.is_dir() {
            return Err(PackError::NotADirectory { path: root.to_path_buf() });
        }
        let image = self.pack_dir(root)?;
        info!(root = %root.display(), size = image.len(), "packed image");
        Ok(image)
    }

    /// Pack `src` and write the image verbatim to `dst`.
    ///
    /// The image goes to a temporary file next to `dst` that is renamed
    /// into place only once fully written, so a failed pack never leaves a
    /// truncated image behind.  Returns the image length.
    pub fn pack_to_file<P: AsRef<Path>, Q: AsRef<Path>>(&self, src: P, dst: Q) -> Result<usize, PackError> {
        let dst = dst.as_ref();
        let image = self.pack(src)?;
        write_atomic(dst, &image).map_err(io_err(dst))?;
        info!(dst = %dst.display(), size = image.len(), "wrote image");
        Ok(image.len())
    }

    fn pack_dir(&self, dir: &Path) -> Result<Vec<u8>, PackError> {
        let mut children = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err(dir))? {
            let entry = entry.map_err(io_err(dir))?;
            let name = os_to_name(&entry.file_name()).map_err(io_err(&entry.path()))?;
            children.push((name, entry));
        }
        if self.options.sort_entries {
            children.sort_by(|a, b| a.0.cmp(&b.0));
        }

        let mut block = BlockBuilder::new();
        for (name, entry) in children {
            let path = entry.path();
            block::check_name(&name).map_err(|e| PackError::encode(path.clone(), e))?;

            let kind = classify(&entry, &path)?;
            let payload = match kind {
                EntryKind::Directory => self.pack_dir(&path)?,
                EntryKind::File      => read_file(&entry, &path)?,
            };
            debug!(path = %path.display(), kind = kind.name(), size = payload.len(), "entry");

            block.push_entry(&name, kind, &payload)
                .map_err(|e| PackError::encode(path, e))?;
        }
        Ok(block.finish())
    }
}

/// Pack `path` with default options.
pub fn pack<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, PackError> {
    DirectoryPacker::new().pack(path)
}

/// Symlinks are not followed; they classify as unsupported.
fn classify(entry: &DirEntry, path: &Path) -> Result<EntryKind, PackError> {
    let file_type = entry.file_type().map_err(io_err(path))?;
    if file_type.is_dir() {
        Ok(EntryKind::Directory)
    } else if file_type.is_file() {
        Ok(EntryKind::File)
    } else {
        Err(PackError::UnsupportedEntryKind { path: path.to_path_buf() })
    }
}

fn read_file(entry: &DirEntry, path: &Path) -> Result<Vec<u8>, PackError> {
    let len = entry.metadata().map_err(io_err(path))?.len();
    if len > block::MAX_PAYLOAD_LEN as u64 {
        return Err(PackError::PayloadTooLarge { path: path.to_path_buf(), len });
    }
    fs::read(path).map_err(io_err(path))
}

fn write_atomic(dst: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match dst.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dst).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pack_reference_scenario() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), "hi").unwrap();
        let image = pack(tmp.path()).unwrap();
        assert_eq!(image, vec![
            5, b'a', b'.', b't', b'x', b't', 0, 0,
            2, 0, 0, 0,
            b'h', b'i', 0, 0,
            0, 0, 0, 0,
        ]);
    }

    #[test]
    fn test_pack_empty_directory() {
        let tmp = tempdir().unwrap();
        assert_eq!(pack(tmp.path()).unwrap(), vec![0u8; 4]);
    }

    #[test]
    fn test_pack_root_must_be_directory() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("plain");
        fs::write(&file, "x").unwrap();
        assert!(matches!(pack(&file), Err(PackError::NotADirectory { .. })));
        assert!(matches!(pack(tmp.path().join("nope")), Err(PackError::Io { .. })));
    }

    #[test]
    fn test_sorted_entries_are_in_name_order() {
        let tmp = tempdir().unwrap();
        for name in ["c", "a", "b"] {
            fs::write(tmp.path().join(name), name).unwrap();
        }
        let packer = DirectoryPacker::with_options(PackOptions { sort_entries: true });
        let image = packer.pack(tmp.path()).unwrap();
        // each entry: [1, name, 0, 0] [1, 0, 0, 0] [name, 0, 0, 0]
        assert_eq!(image[1], b'a');
        assert_eq!(image[13], b'b');
        assert_eq!(image[25], b'c');
    }

    #[test]
    fn test_error_path_accessor() {
        let err = PackError::encode(PathBuf::from("x/y"), EncodeError::NameTooLong(300));
        assert_eq!(err.path(), Path::new("x/y"));
        assert!(err.to_string().contains("300 bytes"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_is_rejected() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("target"), "data").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("target"), tmp.path().join("link")).unwrap();
        match pack(tmp.path()) {
            Err(PackError::UnsupportedEntryKind { path }) => assert!(path.ends_with("link")),
            other => panic!("expected UnsupportedEntryKind, got {other:?}"),
        }
    }
}
