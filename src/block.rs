//! On-image layout primitives: constants, the SizeFlags field, alignment
//! padding, and [`BlockBuilder`], the per-directory encode buffer.
//!
//! # Layout
//!
//! ```text
//! DirectoryBlock := Entry* Terminator
//! Entry          := NameLen(1) Name(NameLen) Pad0 SizeFlags(4, LE) Payload Pad0
//! Terminator     := 00 00 00 00
//! ```
//!
//! `Pad0` zero-fills to the next 4-byte boundary measured from the start of
//! the enclosing block.  Padding is never counted in any length field.
//!
//! # Endianness
//! SizeFlags is strictly little-endian.  There is no magic, no version and
//! no header around the root block.

use std::io::{self, Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use thiserror::Error;

/// Every name, SizeFlags field, entry and terminator starts on this boundary.
pub const ALIGNMENT:       usize = 4;
/// Low 25 bits of SizeFlags: unpadded payload length.
pub const LEN_MASK:        u32   = 0x01FF_FFFF;
/// Bit 25 of SizeFlags: payload is a nested DirectoryBlock.
pub const DIR_FLAG:        u32   = 0x0200_0000;
/// Bits that must be zero in every SizeFlags field.
pub const RESERVED_MASK:   u32   = !(LEN_MASK | DIR_FLAG);
/// Byte width of the SizeFlags field.
pub const SIZE_FLAGS_LEN:  usize = 4;
/// Name lengths are stored in a single byte.
pub const MAX_NAME_LEN:    usize = u8::MAX as usize;
/// Largest payload the 25-bit length field can describe (32 MiB - 1).
pub const MAX_PAYLOAD_LEN: usize = LEN_MASK as usize;
/// End-of-directory sentinel.
pub const TERMINATOR:      [u8; 4] = [0; 4];

// ── EntryKind ───────────────────────────────────────────────────────────────

/// The two object kinds an image can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn name(self) -> &'static str {
        match self {
            EntryKind::File      => "file",
            EntryKind::Directory => "dir",
        }
    }
}

// ── EncodeError ─────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("name is {0} bytes long (maximum 255)")]
    NameTooLong(usize),
    #[error("name is empty")]
    EmptyName,
    #[error("payload is {0} bytes long (maximum 33554431)")]
    PayloadTooLarge(usize),
}

// ── SizeFlags ───────────────────────────────────────────────────────────────

/// The 4-byte field preceding every payload: 25-bit length plus a
/// directory flag in bit 25.  All other bits are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeFlags {
    len:  u32,
    kind: EntryKind,
}

impl SizeFlags {
    /// Fails with [`EncodeError::PayloadTooLarge`] rather than letting the
    /// length spill into the flag bit.
    pub fn new(len: usize, kind: EntryKind) -> Result<Self, EncodeError> {
        check_payload_len(len)?;
        Ok(Self { len: len as u32, kind })
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn pack(&self) -> u32 {
        match self.kind {
            EntryKind::Directory => self.len | DIR_FLAG,
            EntryKind::File      => self.len,
        }
    }

    /// Returns `None` when any reserved bit is set.
    pub fn unpack(raw: u32) -> Option<Self> {
        if raw & RESERVED_MASK != 0 {
            return None;
        }
        let kind = if raw & DIR_FLAG != 0 { EntryKind::Directory } else { EntryKind::File };
        Some(Self { len: raw & LEN_MASK, kind })
    }

    pub fn to_bytes(&self) -> [u8; SIZE_FLAGS_LEN] {
        let mut field = [0u8; SIZE_FLAGS_LEN];
        LittleEndian::write_u32(&mut field, self.pack());
        field
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.pack())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let raw = reader.read_u32::<LittleEndian>()?;
        Self::unpack(raw).ok_or_else(|| io::Error::new(
            io::ErrorKind::InvalidData,
            format!("reserved bits set in size field {raw:#010x}"),
        ))
    }
}

pub fn check_name(name: &[u8]) -> Result<(), EncodeError> {
    match name.len() {
        0                      => Err(EncodeError::EmptyName),
        n if n > MAX_NAME_LEN  => Err(EncodeError::NameTooLong(n)),
        _                      => Ok(()),
    }
}

pub fn check_payload_len(len: usize) -> Result<(), EncodeError> {
    if len > MAX_PAYLOAD_LEN {
        return Err(EncodeError::PayloadTooLarge(len));
    }
    Ok(())
}

// ── Alignment ───────────────────────────────────────────────────────────────

/// Round `offset` up to the next multiple of [`ALIGNMENT`].
pub fn align_up(offset: usize) -> usize {
    (offset + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Zero-fill `buf` to the next 4-byte boundary; returns the pad length.
pub fn pad_to_alignment(buf: &mut Vec<u8>) -> usize {
    let before = buf.len();
    buf.resize(align_up(before), 0);
    buf.len() - before
}

// ── BlockBuilder ────────────────────────────────────────────────────────────

/// Accumulates one directory's entries.  Each recursion frame owns its
/// builder; the finished block becomes the payload of the parent's entry.
#[derive(Debug, Default)]
pub struct BlockBuilder {
    buf:     Vec<u8>,
    entries: usize,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry.  On error nothing is written.
    pub fn push_entry(&mut self, name: &[u8], kind: EntryKind, payload: &[u8]) -> Result<(), EncodeError> {
        check_name(name)?;
        let flags = SizeFlags::new(payload.len(), kind)?;

        self.buf.push(name.len() as u8);
        self.buf.extend_from_slice(name);
        pad_to_alignment(&mut self.buf);
        self.buf.extend_from_slice(&flags.to_bytes());
        self.buf.extend_from_slice(payload);
        pad_to_alignment(&mut self.buf);

        self.entries += 1;
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.entries
    }

    /// Bytes written so far, terminator excluded.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Append the terminator and hand back the finished block.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf.extend_from_slice(&TERMINATOR);
        self.buf
    }
}
