use crate::error::{Result, VfsError};
use crate::file_system::{fold_name, normalize_path};

/// A named byte range inside one archive.
///
/// `name` keeps the case stored in the archive for display; lookups go
/// through `folded_name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveEntry {
    /// The normalized name as stored in the archive.
    pub name: String,
    /// The lower-cased lookup key.
    pub folded_name: String,
    /// Offset of the entry data from the start of the archive.
    pub offset: u64,
    /// Length of the entry data in bytes.
    pub length: u64,
}

impl ArchiveEntry {
    /// Creates an entry, normalizing the stored name.
    ///
    /// Fails for names that are empty after normalization or that would
    /// escape the search root.
    pub fn new(name: &str, offset: u64, length: u64) -> Result<Self> {
        let name = normalize_path(name)?;
        if name.is_empty() {
            return Err(VfsError::InvalidPath("empty entry name".to_string()));
        }
        Ok(Self {
            folded_name: fold_name(&name),
            name,
            offset,
            length,
        })
    }

    /// One past the last byte of the entry.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}
