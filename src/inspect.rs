//! Image inspection: aggregate statistics and a flat manifest.
//!
//! Both walk the image with [`BlockReader`] and apply the same structural
//! checks as [`crate::reader::decode`], without copying any payload.

use serde::Serialize;

use crate::block::EntryKind;
use crate::reader::{BlockReader, DecodeError, RawEntry};

/// Summary produced by [`ImageReport::from_image`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageReport {
    /// Total image length in bytes.
    pub image_size:    usize,
    pub files:         usize,
    pub directories:   usize,
    /// Sum of file payload lengths (nested blocks excluded).
    pub file_bytes:    u64,
    /// Alignment padding across all blocks.
    pub padding_bytes: usize,
    /// Deepest directory nesting; a directory in the root counts as 1.
    pub max_depth:     usize,
    /// Longest entry name in bytes.
    pub longest_name:  usize,
    /// BLAKE3 of the whole image, hex encoded.
    pub digest:        String,
}

impl ImageReport {
    pub fn from_image(image: &[u8]) -> Result<Self, DecodeError> {
        let mut report = ImageReport {
            image_size: image.len(),
            digest:     hex::encode(blake3::hash(image).as_bytes()),
            ..Default::default()
        };
        walk(BlockReader::new(image), |path, raw| {
            report.padding_bytes += raw.padding;
            report.longest_name = report.longest_name.max(raw.name.len());
            match raw.kind() {
                EntryKind::File => {
                    report.files += 1;
                    report.file_bytes += raw.payload.len() as u64;
                }
                EntryKind::Directory => {
                    report.directories += 1;
                    report.max_depth = report.max_depth.max(path.len());
                }
            }
        })?;
        Ok(report)
    }

    /// Total bytes spent on names, SizeFlags fields and terminators.
    pub fn metadata_bytes(&self) -> usize {
        // nested block payloads are counted inside image_size once already
        self.image_size - self.file_bytes as usize - self.padding_bytes
    }

    pub fn summary(&self) -> String {
        format!(
            "{} bytes: {} file(s), {} dir(s), {} payload B, {} metadata B, {} padding B, depth {}, blake3 {}",
            self.image_size,
            self.files,
            self.directories,
            self.file_bytes,
            self.metadata_bytes(),
            self.padding_bytes,
            self.max_depth,
            self.digest.get(..16).unwrap_or(&self.digest),
        )
    }
}

/// One row of [`manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    /// `/`-joined path from the root, lossily converted to UTF-8.
    pub path: String,
    pub kind: EntryKind,
    /// Payload length as recorded in SizeFlags.
    pub size: usize,
}

/// Every entry in depth-first image order.
pub fn manifest(image: &[u8]) -> Result<Vec<ManifestEntry>, DecodeError> {
    let mut rows = Vec::new();
    walk(BlockReader::new(image), |path, raw| {
        let joined: Vec<String> = path.iter().map(|c| String::from_utf8_lossy(c).into_owned()).collect();
        rows.push(ManifestEntry {
            path: joined.join("/"),
            kind: raw.kind(),
            size: raw.flags.len(),
        });
    })?;
    Ok(rows)
}

// Depth-first with an explicit reader stack, so nesting depth is bounded
// only by the image size.  `path` passed to `visit` holds the components
// down to and including the visited entry.
fn walk<'a, F>(root: BlockReader<'a>, mut visit: F) -> Result<(), DecodeError>
where
    F: FnMut(&[&'a [u8]], &RawEntry<'a>),
{
    let mut stack = vec![root];
    let mut path: Vec<&'a [u8]> = Vec::new();
    while let Some(reader) = stack.last_mut() {
        let next = reader.next();
        match next {
            Some(raw) => {
                let raw = raw?;
                path.push(raw.name);
                visit(&path, &raw);
                match raw.children() {
                    Some(children) => stack.push(children),
                    None => {
                        path.pop();
                    }
                }
            }
            None => {
                if let Some(done) = stack.pop() {
                    done.finish()?;
                }
                path.pop();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Directory, Entry};

    fn image() -> Vec<u8> {
        Directory::new()
            .with(Entry::file("a.txt", "hi"))
            .with(Entry::dir("sub", Directory::new()
                .with(Entry::dir("inner", Directory::new().with(Entry::file("x", vec![7u8; 9]))))))
            .encode()
            .unwrap()
    }

    #[test]
    fn test_report_counts() {
        let img = image();
        let report = ImageReport::from_image(&img).unwrap();
        assert_eq!(report.image_size, img.len());
        assert_eq!(report.files, 2);
        assert_eq!(report.directories, 2);
        assert_eq!(report.file_bytes, 11);
        assert_eq!(report.max_depth, 2);
        assert_eq!(report.longest_name, 5);
        assert_eq!(report.digest.len(), 64);
        assert!(report.summary().starts_with(&format!("{} bytes", img.len())));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = ImageReport::from_image(&image()).unwrap();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["files"], 2);
        assert_eq!(value["max_depth"], 2);
        assert_eq!(value["digest"], report.digest.as_str());
        assert_eq!(value["image_size"], report.image_size);
    }

    #[test]
    fn test_report_padding_for_reference_scenario() {
        let img = Directory::new().with(Entry::file("a.txt", "hi")).encode().unwrap();
        let report = ImageReport::from_image(&img).unwrap();
        // 2 after the name, 2 after the payload
        assert_eq!(report.padding_bytes, 4);
        // name len byte + name + flags + terminator
        assert_eq!(report.metadata_bytes(), 1 + 5 + 4 + 4);
    }

    #[test]
    fn test_report_of_empty_image() {
        let report = ImageReport::from_image(&[0, 0, 0, 0]).unwrap();
        assert_eq!(report.files, 0);
        assert_eq!(report.directories, 0);
        assert_eq!(report.max_depth, 0);
    }

    #[test]
    fn test_manifest_paths() {
        let rows = manifest(&image()).unwrap();
        let paths: Vec<&str> = rows.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "sub", "sub/inner", "sub/inner/x"]);
        assert_eq!(rows[3].size, 9);
        assert_eq!(rows[1].kind, EntryKind::Directory);
    }

    #[test]
    fn test_manifest_serializes_kind_lowercase() {
        let rows = manifest(&image()).unwrap();
        let json = serde_json::to_string(&rows[0]).unwrap();
        assert_eq!(json, r#"{"path":"a.txt","kind":"file","size":2}"#);
    }

    #[test]
    fn test_corrupt_image_is_reported() {
        let mut img = image();
        img.truncate(img.len() - 4);
        assert!(ImageReport::from_image(&img).is_err());
        assert!(manifest(&img).is_err());
    }
}
