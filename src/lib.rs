pub mod block;
pub mod tree;
pub mod packer;
pub mod reader;
pub mod inspect;
pub mod logging;

pub use block::{BlockBuilder, EncodeError, EntryKind, SizeFlags};
pub use tree::{Directory, Entry, Node};
pub use packer::{pack, DirectoryPacker, PackError, PackOptions};
pub use reader::{decode, BlockReader, DecodeError, OpenError, RawEntry, RomFile, RomFs};
pub use inspect::{manifest, ImageReport, ManifestEntry};
