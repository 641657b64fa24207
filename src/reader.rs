//! Decoding side: walk a packed image without copying it.
//!
//! # Raw entries
//! [`BlockReader`] iterates the entries of one DirectoryBlock and stops at
//! the terminator.  Every structural field is checked as it is read:
//! truncation, reserved SizeFlags bits, non-zero padding and a malformed
//! terminator are all hard errors.  Offsets in errors are absolute within
//! the image the reader was started on.
//!
//! # Strict decode
//! [`decode`] rebuilds a [`Directory`] tree and additionally requires every
//! block, the root included, to end exactly at its terminator.  Trees
//! nested deeper than [`MAX_DECODE_DEPTH`] are refused with
//! [`DecodeError::TooDeep`]; the zero-copy walkers have no such limit.
//!
//! # Path lookup
//! [`RomFs`] resolves `/`-separated paths against the root block the same
//! way firmware reads files out of ROM, handing back a [`RomFile`] that
//! borrows the image.

use std::io::{self, Read, Seek, SeekFrom};
use std::str::{self, Utf8Error};

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::block::{align_up, EntryKind, SizeFlags, SIZE_FLAGS_LEN, TERMINATOR};
use crate::tree::{Directory, Entry, Node};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("image truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error("size field at offset {offset} has reserved bits set ({value:#010x})")]
    ReservedBits { offset: usize, value: u32 },
    #[error("non-zero padding byte at offset {offset}")]
    NonZeroPadding { offset: usize },
    #[error("malformed terminator at offset {offset}")]
    BadTerminator { offset: usize },
    #[error("{len} trailing byte(s) after terminator at offset {offset}")]
    TrailingData { offset: usize, len: usize },
    #[error("directory at offset {offset} nested deeper than 1024 levels")]
    TooDeep { offset: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    IsFile,
    #[error("is a directory")]
    IsDir,
    #[error("corrupt image: {0}")]
    Corrupt(#[from] DecodeError),
}

// ── RawEntry ────────────────────────────────────────────────────────────────

/// One entry as it sits in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEntry<'a> {
    pub name:           &'a [u8],
    pub flags:          SizeFlags,
    pub payload:        &'a [u8],
    /// Absolute offset of the NameLen byte.
    pub offset:         usize,
    /// Absolute offset of the first payload byte.
    pub payload_offset: usize,
    /// Zero bytes consumed after the name and after the payload.
    pub padding:        usize,
}

impl<'a> RawEntry<'a> {
    pub fn kind(&self) -> EntryKind {
        self.flags.kind()
    }

    /// Reader over the nested block, or `None` for a file.
    pub fn children(&self) -> Option<BlockReader<'a>> {
        match self.kind() {
            EntryKind::Directory => Some(BlockReader::with_base(self.payload, self.payload_offset)),
            EntryKind::File      => None,
        }
    }
}

// ── BlockReader ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BlockReader<'a> {
    block:    &'a [u8],
    base:     usize,
    pos:      usize,
    finished: bool,
}

impl<'a> BlockReader<'a> {
    pub fn new(block: &'a [u8]) -> Self {
        Self::with_base(block, 0)
    }

    /// `base` is the absolute offset of `block` inside the whole image.
    pub fn with_base(block: &'a [u8], base: usize) -> Self {
        Self { block, base, pos: 0, finished: false }
    }

    /// Block-relative position of the next unread byte.  After the iterator
    /// is exhausted this is the length of the block including terminator.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Require the block to end exactly at its terminator.
    pub fn finish(mut self) -> Result<(), DecodeError> {
        while let Some(entry) = self.next() {
            entry?;
        }
        if self.pos != self.block.len() {
            return Err(DecodeError::TrailingData {
                offset: self.base + self.pos,
                len:    self.block.len() - self.pos,
            });
        }
        Ok(())
    }

    fn slice(&self, start: usize, len: usize) -> Result<&'a [u8], DecodeError> {
        let block: &'a [u8] = self.block;
        start.checked_add(len)
            .and_then(|end| block.get(start..end))
            .ok_or(DecodeError::Truncated { offset: self.base + block.len().min(start) })
    }

    fn check_padding(&self, start: usize, end: usize) -> Result<(), DecodeError> {
        let pad = self.slice(start, end - start)?;
        match pad.iter().position(|&b| b != 0) {
            Some(i) => Err(DecodeError::NonZeroPadding { offset: self.base + start + i }),
            None    => Ok(()),
        }
    }

    fn read_entry(&mut self) -> Result<Option<RawEntry<'a>>, DecodeError> {
        let start = self.pos;
        let name_len = self.slice(start, 1)?[0] as usize;

        if name_len == 0 {
            let term = self.slice(start, TERMINATOR.len())?;
            if term != TERMINATOR {
                return Err(DecodeError::BadTerminator { offset: self.base + start });
            }
            self.pos = start + TERMINATOR.len();
            return Ok(None);
        }

        let name_end = start + 1 + name_len;
        let name = self.slice(start + 1, name_len)?;
        let flags_at = align_up(name_end);
        self.check_padding(name_end, flags_at)?;

        let value = LittleEndian::read_u32(self.slice(flags_at, SIZE_FLAGS_LEN)?);
        let flags = SizeFlags::unpack(value)
            .ok_or(DecodeError::ReservedBits { offset: self.base + flags_at, value })?;

        let payload_at = flags_at + SIZE_FLAGS_LEN;
        let payload = self.slice(payload_at, flags.len())?;
        let payload_end = payload_at + flags.len();
        let next = align_up(payload_end);
        self.check_padding(payload_end, next)?;

        self.pos = next;
        Ok(Some(RawEntry {
            name,
            flags,
            payload,
            offset:         self.base + start,
            payload_offset: self.base + payload_at,
            padding:        (flags_at - name_end) + (next - payload_end),
        }))
    }
}

impl<'a> Iterator for BlockReader<'a> {
    type Item = Result<RawEntry<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

// ── Strict decode ───────────────────────────────────────────────────────────

/// Deepest directory nesting [`decode`] will rebuild.  A directory in the
/// root block is at depth 1.
pub const MAX_DECODE_DEPTH: usize = 1024;

/// Rebuild the tree encoded in `image`.
pub fn decode(image: &[u8]) -> Result<Directory, DecodeError> {
    decode_block(BlockReader::new(image), 0)
}

fn decode_block(mut reader: BlockReader<'_>, depth: usize) -> Result<Directory, DecodeError> {
    let mut dir = Directory::new();
    for raw in reader.by_ref() {
        let raw = raw?;
        let node = match raw.children() {
            Some(_) if depth >= MAX_DECODE_DEPTH => {
                return Err(DecodeError::TooDeep { offset: raw.offset });
            }
            Some(children) => Node::Directory(decode_block(children, depth + 1)?),
            None           => Node::File(raw.payload.to_vec()),
        };
        dir.push(Entry { name: raw.name.to_vec(), node });
    }
    reader.finish()?;
    Ok(dir)
}

// ── RomFs ───────────────────────────────────────────────────────────────────

enum Located<'a> {
    File(&'a [u8]),
    Dir(BlockReader<'a>),
}

/// Read-only path lookup over a packed image.
#[derive(Debug, Clone, Copy)]
pub struct RomFs<'a> {
    image: &'a [u8],
}

impl<'a> RomFs<'a> {
    pub fn new(image: &'a [u8]) -> Self {
        Self { image }
    }

    pub fn root(&self) -> BlockReader<'a> {
        BlockReader::new(self.image)
    }

    pub fn open(&self, path: &str) -> Result<RomFile<'a>, OpenError> {
        self.open_bytes(path.as_bytes())
    }

    pub fn open_bytes(&self, path: &[u8]) -> Result<RomFile<'a>, OpenError> {
        match self.lookup(path)? {
            Located::File(data) => Ok(RomFile::new(data)),
            Located::Dir(_)     => Err(OpenError::IsDir),
        }
    }

    /// Entries of the directory at `path`; `""` and `"/"` name the root.
    pub fn read_dir(&self, path: &str) -> Result<BlockReader<'a>, OpenError> {
        match self.lookup(path.as_bytes())? {
            Located::Dir(reader) => Ok(reader),
            Located::File(_)     => Err(OpenError::IsFile),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lookup(path.as_bytes()).is_ok()
    }

    // Leading, doubled and trailing slashes are ignored, except that a
    // trailing slash after a file is IsFile.
    fn lookup(&self, path: &[u8]) -> Result<Located<'a>, OpenError> {
        let mut current = Located::Dir(self.root());
        for component in path.split(|&b| b == b'/').filter(|c| !c.is_empty()) {
            let dir = match current {
                Located::Dir(reader) => reader,
                Located::File(_)     => return Err(OpenError::IsFile),
            };
            let mut found = None;
            for raw in dir {
                let raw = raw?;
                if raw.name == component {
                    found = Some(raw);
                    break;
                }
            }
            let raw = found.ok_or(OpenError::NotFound)?;
            current = match raw.children() {
                Some(children) => Located::Dir(children),
                None           => Located::File(raw.payload),
            };
        }
        if let Located::File(_) = current {
            if path.last() == Some(&b'/') {
                return Err(OpenError::IsFile);
            }
        }
        Ok(current)
    }
}

// ── RomFile ─────────────────────────────────────────────────────────────────

/// A file's payload plus a cursor.  Never copies out of the image.
#[derive(Debug, Clone)]
pub struct RomFile<'a> {
    data:   &'a [u8],
    offset: u64,
}

impl<'a> RomFile<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Remaining bytes from the cursor on.
    pub fn as_bytes(&self) -> &'a [u8] {
        let start = (self.offset as usize).min(self.data.len());
        &self.data[start..]
    }

    pub fn as_str(&self) -> Result<&'a str, Utf8Error> {
        str::from_utf8(self.as_bytes())
    }
}

impl Read for RomFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.as_bytes();
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.offset += n as u64;
        Ok(n)
    }
}

impl Seek for RomFile<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n)   => Some(n),
            SeekFrom::End(d)     => (self.data.len() as u64).checked_add_signed(d),
            SeekFrom::Current(d) => self.offset.checked_add_signed(d),
        };
        match target {
            Some(n) => {
                self.offset = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}
