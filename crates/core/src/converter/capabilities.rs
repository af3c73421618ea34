//! Format descriptors advertised by backends.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

use super::error::FormatError;

/// Normalizes a format string to a lowercase extension with a leading dot.
///
/// `"PNG"`, `"png"` and `".png"` all become `".png"`.
pub fn normalize_format(format: &str) -> String {
    let trimmed = format.trim().trim_start_matches('.');
    format!(".{}", trimmed.to_lowercase())
}

/// Derives the normalized format of a file name from its extension.
///
/// Names without an extension yield an empty string.
pub fn format_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|ext| normalize_format(&ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Returns the file name with its final extension removed.
pub fn file_stem(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[..idx].to_string(),
        _ => name.to_string(),
    }
}

/// A single format a backend can read and/or write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    extension: String,
    from_supported: bool,
    to_supported: bool,
    is_native: bool,
}

impl FormatDescriptor {
    /// Builds a descriptor, rejecting formats usable in neither direction.
    pub fn new(
        extension: &str,
        from_supported: bool,
        to_supported: bool,
        is_native: bool,
    ) -> Result<Self, FormatError> {
        let extension = normalize_format(extension);
        if extension == "." {
            return Err(FormatError::EmptyExtension);
        }
        if !from_supported && !to_supported {
            return Err(FormatError::NoDirection { extension });
        }
        Ok(Self {
            extension,
            from_supported,
            to_supported,
            is_native,
        })
    }

    /// Readable and writable, handled natively.
    pub fn both(extension: &str) -> Result<Self, FormatError> {
        Self::new(extension, true, true, true)
    }

    /// Normalized extension including the leading dot.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn from_supported(&self) -> bool {
        self.from_supported
    }

    pub fn to_supported(&self) -> bool {
        self.to_supported
    }

    pub fn is_native(&self) -> bool {
        self.is_native
    }
}

/// Builds a catalog from `(extension, from, to, native)` rows.
///
/// Rows are static tables, so an invalid row is skipped with an error log
/// instead of failing backend construction.
pub(crate) fn catalog(rows: &[(&str, bool, bool, bool)]) -> Vec<FormatDescriptor> {
    rows.iter()
        .filter_map(|(ext, from, to, native)| {
            FormatDescriptor::new(ext, *from, *to, *native)
                .map_err(|e| tracing::error!("Invalid format descriptor: {}", e))
                .ok()
        })
        .collect()
}

/// Orders descriptors so native handling of `format` comes first.
///
/// Formats missing from a catalog sort with the non-native ones.
pub fn native_first(a: Option<&FormatDescriptor>, b: Option<&FormatDescriptor>) -> Ordering {
    let a_native = a.map(|f| f.is_native()).unwrap_or(false);
    let b_native = b.map(|f| f.is_native()).unwrap_or(false);
    b_native.cmp(&a_native)
}
