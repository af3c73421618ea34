//! Archive reading and writing for batch inputs and outputs.

use bytes::Bytes;
use std::collections::HashSet;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::converter::{format_of, ConverterError};

/// Format extension treated as an archive.
pub const ARCHIVE_FORMAT: &str = ".zip";

/// One file inside an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Bytes,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Normalized format of the entry's name.
    pub fn format(&self) -> String {
        format_of(&self.name)
    }
}

/// Renames entries whose name is already taken to `stem (n).ext`.
///
/// The first entry with a given name keeps it. Zip archives reject
/// duplicate names, so entries are passed through this before packing.
pub fn dedupe_names(entries: &mut [ArchiveEntry]) {
    let mut taken: HashSet<String> = entries.iter().map(|e| e.name.clone()).collect();
    let mut seen = HashSet::new();
    for entry in entries.iter_mut() {
        if seen.insert(entry.name.clone()) {
            continue;
        }
        let (stem, ext) = split_extension(&entry.name);
        let renamed = (1..)
            .map(|n| format!("{} ({}){}", stem, n, ext))
            .find(|candidate| !taken.contains(candidate))
            .unwrap_or_default();
        taken.insert(renamed.clone());
        seen.insert(renamed.clone());
        entry.name = renamed;
    }
}

/// Splits `dir/name.ext` into `("dir/name", ".ext")`.
fn split_extension(name: &str) -> (&str, &str) {
    let base = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[base..].rfind('.') {
        Some(i) if i > 0 => name.split_at(base + i),
        _ => (name, ""),
    }
}

/// Packs and unpacks archives.
pub trait ArchiveCodec: Send + Sync {
    /// Whether a file with this normalized format is an archive.
    fn is_archive(&self, format: &str) -> bool;

    /// Lists the files in an archive, skipping directories.
    fn extract(&self, data: &[u8]) -> Result<Vec<ArchiveEntry>, ConverterError>;

    /// Builds an archive from the given entries.
    fn create(&self, entries: &[ArchiveEntry]) -> Result<Bytes, ConverterError>;
}

/// Zip archives, deflate compressed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipCodec;

impl ArchiveCodec for ZipCodec {
    fn is_archive(&self, format: &str) -> bool {
        format == ARCHIVE_FORMAT
    }

    fn extract(&self, data: &[u8]) -> Result<Vec<ArchiveEntry>, ConverterError> {
        let mut archive =
            ZipArchive::new(Cursor::new(data)).map_err(|e| ConverterError::Archive(e.to_string()))?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| ConverterError::Archive(e.to_string()))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            // the declared size is untrusted input
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            entries.push(ArchiveEntry::new(name, buf));
        }
        Ok(entries)
    }

    fn create(&self, entries: &[ArchiveEntry]) -> Result<Bytes, ConverterError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for entry in entries {
            writer
                .start_file(entry.name.as_str(), options)
                .map_err(|e| ConverterError::Archive(e.to_string()))?;
            writer.write_all(&entry.data)?;
        }

        let cursor = writer
            .finish()
            .map_err(|e| ConverterError::Archive(e.to_string()))?;
        Ok(Bytes::from(cursor.into_inner()))
    }
}
