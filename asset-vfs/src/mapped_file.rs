//! Read-only memory mapping of files on disk.
//!
//! A [`MappedRegion`] is an immutable `[begin, end)` window over a mapping.
//! Sub-regions share the mapping of their parent, and the mapping is released
//! when the last region referencing it is dropped.

use crate::error::{Result, VfsError};
use crate::mapped_stream::MappedStream;
use memmap2::{Mmap, MmapOptions};
use std::fmt;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Storage behind a mapping.
enum Backing {
    Mapped(Mmap),
    /// Zero-length files cannot be mapped on every platform.
    Empty,
    /// In-memory data, used for containers that were not read from disk.
    Owned(Box<[u8]>),
}

/// An open, mapped file. Never exposed directly; always reached through a [`MappedRegion`].
struct MappedFile {
    path: PathBuf,
    backing: Backing,
}

impl MappedFile {
    fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(mmap) => mmap,
            Backing::Empty => &[],
            Backing::Owned(data) => data,
        }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if let Backing::Mapped(mmap) = &self.backing {
            debug!("Unmapping {:?} ({} bytes)", self.path, mmap.len());
        }
    }
}

/// An immutable byte range backed by a memory-mapped file.
///
/// Cloning a region is cheap and never copies file data.
#[derive(Clone)]
pub struct MappedRegion {
    file: Arc<MappedFile>,
    start: usize,
    end: usize,
}

impl MappedRegion {
    /// Maps the whole file at `path` read-only.
    ///
    /// Any failure to open, stat or map the file is reported as
    /// [`VfsError::OpenFailed`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let open_failed = |source| VfsError::OpenFailed {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(open_failed)?;
        let size = file.metadata().map_err(open_failed)?.len();
        let size = usize::try_from(size).map_err(|_| {
            open_failed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "file too large to map",
            ))
        })?;

        let backing = if size == 0 {
            Backing::Empty
        } else {
            // SAFETY: the mapping is read-only. Game data is not expected to be
            // modified while the editor holds it open.
            let mmap = unsafe { MmapOptions::new().len(size).map(&file) }.map_err(open_failed)?;
            Backing::Mapped(mmap)
        };

        debug!("Mapped {:?} ({} bytes)", path, size);
        Ok(Self::with_backing(path.to_path_buf(), backing))
    }

    /// Wraps in-memory data as a region so it can be parsed like a file.
    pub fn from_vec<P: Into<PathBuf>>(path: P, data: Vec<u8>) -> Self {
        Self::with_backing(path.into(), Backing::Owned(data.into_boxed_slice()))
    }

    fn with_backing(path: PathBuf, backing: Backing) -> Self {
        let file = Arc::new(MappedFile { path, backing });
        let end = file.bytes().len();
        Self {
            file,
            start: 0,
            end,
        }
    }

    /// The path of the file this region belongs to.
    pub fn path(&self) -> &Path {
        &self.file.path
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Offset of this region within its file.
    pub fn file_offset(&self) -> u64 {
        self.start as u64
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.file.bytes()[self.start..self.end]
    }

    /// Returns `length` bytes starting at `offset`, relative to this region.
    pub fn bytes_at(&self, offset: u64, length: u64) -> Result<&[u8]> {
        let (start, end) = self.checked_range(offset, length)?;
        Ok(&self.as_slice()[start..end])
    }

    /// Returns a region over `length` bytes at `offset`, sharing this mapping.
    pub fn sub_region(&self, offset: u64, length: u64) -> Result<MappedRegion> {
        let (start, end) = self.checked_range(offset, length)?;
        Ok(MappedRegion {
            file: Arc::clone(&self.file),
            start: self.start + start,
            end: self.start + end,
        })
    }

    /// Opens a stream positioned at the start of this region.
    pub fn stream(&self) -> MappedStream {
        MappedStream::new(self.clone())
    }

    /// Returns true when both regions are views into the same mapping.
    pub fn shares_mapping(&self, other: &MappedRegion) -> bool {
        Arc::ptr_eq(&self.file, &other.file)
    }

    fn checked_range(&self, offset: u64, length: u64) -> Result<(usize, usize)> {
        let available = self.len() as u64;
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= available)
            .ok_or_else(|| {
                VfsError::truncated(
                    self.file.path.display().to_string(),
                    offset,
                    length,
                    available.saturating_sub(offset),
                )
            })?;
        Ok((offset as usize, end as usize))
    }
}

impl Deref for MappedRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for MappedRegion {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("path", &self.file.path)
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}
