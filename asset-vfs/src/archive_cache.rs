//! Per-directory cache of parsed PAK archives.

use crate::file_system::FileSystem;
use crate::pak_archive::PakArchive;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The archives of one directory, in load order: the last archive has the
/// highest priority.
pub type ArchiveList = Arc<[Arc<PakArchive>]>;

/// Builds and remembers the archive list of each search directory.
///
/// A directory is listed and its archives parsed on the first request only;
/// later requests return the same list until [`ArchiveCache::invalidate`].
/// Concurrent first requests may each parse the directory, but only the
/// first list inserted is kept. A list built across an invalidation is
/// returned to its caller and never cached.
pub struct ArchiveCache {
    file_system: Arc<dyn FileSystem>,
    extensions: RwLock<Vec<String>>,
    directories: RwLock<HashMap<PathBuf, ArchiveList>>,
    /// Bumped by every invalidation, under the `directories` write lock.
    generation: AtomicU64,
    directory_scans: AtomicUsize,
    archives_parsed: AtomicUsize,
    archives_skipped: AtomicUsize,
}

/// Counters describing the work the cache has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveCacheStats {
    /// Number of times a directory was listed from disk.
    pub directory_scans: usize,
    /// Archives parsed successfully.
    pub archives_parsed: usize,
    /// Archives dropped because they could not be opened or had a bad header.
    pub archives_skipped: usize,
    /// Directories currently cached.
    pub cached_directories: usize,
}

impl ArchiveCache {
    pub fn new(file_system: Arc<dyn FileSystem>, extensions: Vec<String>) -> Self {
        Self {
            file_system,
            extensions: RwLock::new(extensions),
            directories: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            directory_scans: AtomicUsize::new(0),
            archives_parsed: AtomicUsize::new(0),
            archives_skipped: AtomicUsize::new(0),
        }
    }

    /// Returns the archives in `directory`, sorted by file name.
    pub fn archives_for(&self, directory: &Path) -> ArchiveList {
        let generation = {
            let directories = self.directories.read();
            if let Some(list) = directories.get(directory) {
                return Arc::clone(list);
            }
            self.generation.load(Ordering::Acquire)
        };

        let list = self.load_directory(directory);
        let mut directories = self.directories.write();
        if self.generation.load(Ordering::Acquire) != generation {
            debug!("Cache invalidated while scanning {:?}, not caching", directory);
            return list;
        }
        Arc::clone(
            directories
                .entry(directory.to_path_buf())
                .or_insert(list),
        )
    }

    fn load_directory(&self, directory: &Path) -> ArchiveList {
        self.directory_scans.fetch_add(1, Ordering::Relaxed);

        if !self.file_system.is_directory(directory) {
            debug!("Search path {:?} is not a directory", directory);
            return Arc::from(Vec::new());
        }

        let extensions = self.extensions.read().clone();
        let files = match self.file_system.list_files(directory, &extensions) {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list archives in {:?}: {}", directory, e);
                return Arc::from(Vec::new());
            }
        };

        let mut archives = Vec::with_capacity(files.len());
        for path in files {
            match self
                .file_system
                .map_file(&path)
                .and_then(PakArchive::parse)
            {
                Ok(archive) => {
                    self.archives_parsed.fetch_add(1, Ordering::Relaxed);
                    archives.push(Arc::new(archive));
                }
                Err(e) => {
                    self.archives_skipped.fetch_add(1, Ordering::Relaxed);
                    warn!("Skipping archive {:?}: {}", path, e);
                }
            }
        }

        archives.sort_by_cached_key(|a| {
            let name = a.file_name();
            (name.to_lowercase(), name)
        });
        debug!(
            "Loaded {} archives from {:?}: {:?}",
            archives.len(),
            directory,
            archives.iter().map(|a| a.file_name()).collect::<Vec<_>>()
        );
        Arc::from(archives)
    }

    /// Drops every cached directory. Archives still referenced by open
    /// streams stay mapped until those streams are dropped.
    pub fn invalidate(&self) {
        let mut directories = self.directories.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        if !directories.is_empty() {
            info!("Invalidating {} cached archive directories", directories.len());
        }
        directories.clear();
    }

    pub fn invalidate_directory(&self, directory: &Path) {
        let mut directories = self.directories.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        if directories.remove(directory).is_some() {
            debug!("Invalidated archive cache for {:?}", directory);
        }
    }

    /// Replaces the archive extensions and drops the cache.
    pub fn set_extensions(&self, extensions: Vec<String>) {
        *self.extensions.write() = extensions;
        self.invalidate();
    }

    pub fn stats(&self) -> ArchiveCacheStats {
        ArchiveCacheStats {
            directory_scans: self.directory_scans.load(Ordering::Relaxed),
            archives_parsed: self.archives_parsed.load(Ordering::Relaxed),
            archives_skipped: self.archives_skipped.load(Ordering::Relaxed),
            cached_directories: self.directories.read().len(),
        }
    }
}
