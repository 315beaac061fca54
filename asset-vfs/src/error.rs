use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Represents all possible errors that can occur in the virtual file system.
///
/// Parse failures are scoped: a `BadFormat` or `OpenFailed` drops one archive,
/// a `CorruptArchive` drops one directory record and a `Truncated` aborts one
/// asset decode. None of them stop resolution against other sources.
#[derive(Error, Debug)]
pub enum VfsError {
    /// The asset is not present in any search path or archive.
    #[error("Asset not found: {0}")]
    NotFound(String),

    /// The file signature or header is invalid; the whole container is unusable.
    #[error("Bad format in {}: {reason}", path.display())]
    BadFormat { path: PathBuf, reason: String },

    /// A single directory record points outside the mapped file.
    #[error("Corrupt record '{entry}' in {}: {reason}", path.display())]
    CorruptArchive {
        path: PathBuf,
        entry: String,
        reason: String,
    },

    /// The OS could not open or map the file.
    #[error("Failed to open {}: {source}", path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A decode read ran past the end of the available bytes.
    #[error("Truncated {what}: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        what: String,
        offset: u64,
        needed: u64,
        available: u64,
    },

    /// The asset name is absolute or escapes the search root.
    #[error("Invalid asset path: {0}")]
    InvalidPath(String),

    /// The configuration file contains an unusable value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Any other I/O failure while reading a file or directory.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VfsError {
    /// Returns true for the expected, non-fatal "asset does not exist" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VfsError::NotFound(_))
    }

    pub(crate) fn truncated(what: impl Into<String>, offset: u64, needed: u64, available: u64) -> Self {
        VfsError::Truncated {
            what: what.into(),
            offset,
            needed,
            available,
        }
    }
}

pub type Result<T> = std::result::Result<T, VfsError>;
