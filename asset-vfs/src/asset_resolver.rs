//! Resolution of asset names against ordered search paths.
//!
//! Priority, highest first:
//!
//! 1. the last search path over earlier ones;
//! 2. within one search path, a loose file over any archive;
//! 3. among the archives of one search path, the last in sorted order.
//!
//! The first source in that order that holds the name is returned, so a
//! lookup never ties.

use crate::archive_cache::{ArchiveCache, ArchiveCacheStats, ArchiveList};
use crate::error::{Result, VfsError};
use crate::file_system::{
    find_case_insensitive, fold_name, has_extension, join_asset, normalize_path, DiskFileSystem,
    FileSystem,
};
use crate::mapped_stream::MappedStream;
use crate::pak_archive::PakArchive;
use crate::vfs_config::VfsConfig;
use crate::wad_file::{TextureImage, WadFile};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Loose directories deeper than this are not listed.
const MAX_LIST_DEPTH: usize = 32;

/// A lookup as seen by the caches: the folded asset name plus the exact
/// search paths it was resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey {
    pub name: String,
    pub search_paths: Vec<PathBuf>,
}

/// Where a resolved asset lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    /// A file on disk inside a search path.
    Loose(PathBuf),
    /// An entry of a PAK archive.
    Archive { archive: PathBuf, entry: String },
}

enum Found {
    Loose(PathBuf),
    Archive(Arc<PakArchive>, String),
}

/// Counters describing resolver activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Calls that reached the lookup stage.
    pub lookups: usize,
    /// Lookups answered by a loose file.
    pub loose_hits: usize,
    /// Lookups answered by an archive entry.
    pub archive_hits: usize,
    /// Lookups answered by the negative cache.
    pub negative_hits: usize,
    /// Individual archive indexes probed.
    pub archive_scans: usize,
    /// Texture containers parsed.
    pub containers_parsed: usize,
    /// Directories read for case-insensitive loose lookups.
    pub directory_listings: usize,
    pub archive_cache: ArchiveCacheStats,
}

/// Resolves asset names to byte streams across loose files and PAK archives.
///
/// One resolver is created at startup and shared by every loader; it is
/// `Send + Sync` and all caches are internally synchronized. Results computed
/// while [`AssetResolver::invalidate`] runs are returned but not cached.
pub struct AssetResolver {
    file_system: Arc<dyn FileSystem>,
    config: RwLock<VfsConfig>,
    archives: ArchiveCache,
    misses: Mutex<LruCache<LookupKey, ()>>,
    containers: RwLock<HashMap<LookupKey, Arc<WadFile>>>,
    /// Directory entries used by case-insensitive loose lookups.
    listings: RwLock<HashMap<PathBuf, Arc<[PathBuf]>>>,
    /// Bumped by every invalidation while holding all cache locks.
    generation: AtomicU64,
    lookups: AtomicUsize,
    loose_hits: AtomicUsize,
    archive_hits: AtomicUsize,
    negative_hits: AtomicUsize,
    archive_scans: AtomicUsize,
    containers_parsed: AtomicUsize,
    directory_listings: AtomicUsize,
}

impl AssetResolver {
    /// Creates a resolver reading from the local disk.
    pub fn new(config: VfsConfig) -> Self {
        Self::with_file_system(config, Arc::new(DiskFileSystem))
    }

    pub fn with_file_system(config: VfsConfig, file_system: Arc<dyn FileSystem>) -> Self {
        let archives = ArchiveCache::new(
            Arc::clone(&file_system),
            config.archive_extensions.clone(),
        );
        let misses = LruCache::new(negative_capacity(&config));
        Self {
            file_system,
            config: RwLock::new(config),
            archives,
            misses: Mutex::new(misses),
            containers: RwLock::new(HashMap::new()),
            listings: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            lookups: AtomicUsize::new(0),
            loose_hits: AtomicUsize::new(0),
            archive_hits: AtomicUsize::new(0),
            negative_hits: AtomicUsize::new(0),
            archive_scans: AtomicUsize::new(0),
            containers_parsed: AtomicUsize::new(0),
            directory_listings: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> VfsConfig {
        self.config.read().clone()
    }

    /// The configured search paths, lowest priority first.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.config.read().search_paths()
    }

    /// Switches to a new game path or mod set and drops every cache.
    pub fn set_config(&self, config: VfsConfig) {
        info!("Search paths changed to {:?}", config.search_paths());
        self.misses.lock().resize(negative_capacity(&config));
        self.archives.set_extensions(config.archive_extensions.clone());
        *self.config.write() = config;
        self.invalidate();
    }

    /// Forgets every parsed archive, texture container, directory listing
    /// and recorded miss.
    pub fn invalidate(&self) {
        self.archives.invalidate();
        let mut misses = self.misses.lock();
        let mut containers = self.containers.write();
        let mut listings = self.listings.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        misses.clear();
        containers.clear();
        listings.clear();
    }

    /// Opens `name` from the highest-priority source in `search_paths`.
    ///
    /// Returns [`VfsError::NotFound`] when no loose file or archive entry
    /// matches; that outcome is remembered until the next invalidation.
    pub fn resolve(&self, name: &str, search_paths: &[PathBuf]) -> Result<MappedStream> {
        match self.find(name, search_paths)? {
            Found::Loose(path) => Ok(self.file_system.map_file(&path)?.stream()),
            Found::Archive(archive, folded) => {
                let entry = archive
                    .find_folded(&folded)
                    .ok_or_else(|| VfsError::NotFound(name.to_string()))?;
                Ok(archive.entry_region(entry)?.stream())
            }
        }
    }

    /// Resolves `name` against the configured search paths.
    pub fn open(&self, name: &str) -> Result<MappedStream> {
        self.resolve(name, &self.search_paths())
    }

    /// Reports which source `resolve` would read `name` from.
    pub fn locate(&self, name: &str, search_paths: &[PathBuf]) -> Result<AssetSource> {
        Ok(match self.find(name, search_paths)? {
            Found::Loose(path) => AssetSource::Loose(path),
            Found::Archive(archive, folded) => AssetSource::Archive {
                archive: archive.path().to_path_buf(),
                entry: archive
                    .find_folded(&folded)
                    .map(|e| e.name.clone())
                    .unwrap_or(folded),
            },
        })
    }

    pub fn exists(&self, name: &str, search_paths: &[PathBuf]) -> bool {
        self.find(name, search_paths).is_ok()
    }

    fn find(&self, name: &str, search_paths: &[PathBuf]) -> Result<Found> {
        let normalized = normalize_path(name)?;
        if normalized.is_empty() {
            return Err(VfsError::InvalidPath(name.to_string()));
        }
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let generation = self.generation.load(Ordering::Acquire);

        let key = LookupKey {
            name: fold_name(&normalized),
            search_paths: search_paths.to_vec(),
        };
        if self.misses.lock().get(&key).is_some() {
            self.negative_hits.fetch_add(1, Ordering::Relaxed);
            debug!("'{}' is a known miss", name);
            return Err(VfsError::NotFound(name.to_string()));
        }

        for directory in search_paths.iter().rev() {
            if let Some(path) = self.find_loose(directory, &normalized, generation) {
                self.loose_hits.fetch_add(1, Ordering::Relaxed);
                debug!("Resolved '{}' to loose file {:?}", name, path);
                return Ok(Found::Loose(path));
            }

            for archive in self.archives.archives_for(directory).iter().rev() {
                self.archive_scans.fetch_add(1, Ordering::Relaxed);
                if archive.find_folded(&key.name).is_some() {
                    self.archive_hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Resolved '{}' in archive {:?}", name, archive.path());
                    return Ok(Found::Archive(Arc::clone(archive), key.name));
                }
            }
        }

        debug!("'{}' not found in {} search paths", name, search_paths.len());
        let mut misses = self.misses.lock();
        if self.generation.load(Ordering::Acquire) == generation {
            misses.put(key, ());
        }
        Err(VfsError::NotFound(name.to_string()))
    }

    fn find_loose(&self, directory: &Path, normalized: &str, generation: u64) -> Option<PathBuf> {
        let candidate = join_asset(directory, normalized);
        if self.file_system.exists(&candidate) {
            return (!self.file_system.is_directory(&candidate)).then_some(candidate);
        }
        if !self.config.read().case_insensitive_paths {
            return None;
        }
        find_case_insensitive(directory, normalized, |dir| {
            Some(self.directory_listing(dir, generation))
        })
        .filter(|path| !self.file_system.is_directory(path))
    }

    /// Returns the sorted entries of `dir`, reading it at most once per
    /// generation. An unreadable directory lists as empty.
    fn directory_listing(&self, dir: &Path, generation: u64) -> Arc<[PathBuf]> {
        if let Some(entries) = self.listings.read().get(dir) {
            return Arc::clone(entries);
        }

        self.directory_listings.fetch_add(1, Ordering::Relaxed);
        let entries: Arc<[PathBuf]> = match self.file_system.read_dir(dir) {
            Ok(entries) => Arc::from(entries),
            Err(e) => {
                debug!("Cannot list {:?}: {}", dir, e);
                Arc::from(Vec::new())
            }
        };

        let mut listings = self.listings.write();
        if self.generation.load(Ordering::Acquire) != generation {
            return entries;
        }
        Arc::clone(listings.entry(dir.to_path_buf()).or_insert(entries))
    }

    /// Lists every asset below `prefix` across all search paths.
    ///
    /// Loose files and archive entries are merged; a name present in several
    /// sources is reported once, with the spelling of its highest-priority
    /// source. The result is sorted by folded name.
    pub fn list(&self, prefix: &str, search_paths: &[PathBuf]) -> Result<Vec<String>> {
        let prefix = normalize_path(prefix)?;
        let folded_prefix = match fold_name(&prefix) {
            p if p.is_empty() => p,
            p => format!("{p}/"),
        };

        let mut found: BTreeMap<String, String> = BTreeMap::new();
        for directory in search_paths.iter().rev() {
            let mut loose = Vec::new();
            if let Some((root, relative)) = self.find_loose_directory(directory, &prefix) {
                self.collect_loose(&root, &relative, 0, &mut loose);
            }
            for name in loose {
                found.entry(fold_name(&name)).or_insert(name);
            }

            for archive in self.archives.archives_for(directory).iter().rev() {
                for entry in archive.visible_entries() {
                    if entry.folded_name.starts_with(&folded_prefix) {
                        found
                            .entry(entry.folded_name.clone())
                            .or_insert_with(|| entry.name.clone());
                    }
                }
            }
        }
        Ok(found.into_values().collect())
    }

    /// Finds the directory `prefix` below `directory` and returns it with its
    /// on-disk spelling relative to `directory`.
    fn find_loose_directory(&self, directory: &Path, prefix: &str) -> Option<(PathBuf, String)> {
        let candidate = join_asset(directory, prefix);
        let found = if self.file_system.is_directory(&candidate) {
            candidate
        } else if self.config.read().case_insensitive_paths {
            let generation = self.generation.load(Ordering::Acquire);
            find_case_insensitive(directory, prefix, |dir| {
                Some(self.directory_listing(dir, generation))
            })
            .filter(|path| self.file_system.is_directory(path))?
        } else {
            return None;
        };
        let relative = found
            .strip_prefix(directory)
            .ok()?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        Some((found, relative))
    }

    fn collect_loose(&self, directory: &Path, relative: &str, depth: usize, out: &mut Vec<String>) {
        if depth > MAX_LIST_DEPTH || !self.file_system.is_directory(directory) {
            return;
        }
        let entries = match self.file_system.read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list {:?}: {}", directory, e);
                return;
            }
        };
        for path in entries {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let name = if relative.is_empty() {
                file_name.to_string()
            } else {
                format!("{relative}/{file_name}")
            };
            if self.file_system.is_directory(&path) {
                self.collect_loose(&path, &name, depth + 1, out);
            } else {
                out.push(name);
            }
        }
    }

    /// Lists the texture containers visible in `search_paths`.
    pub fn texture_containers(&self, search_paths: &[PathBuf]) -> Result<Vec<String>> {
        let extensions = self.config.read().texture_extensions.clone();
        Ok(self
            .list("", search_paths)?
            .into_iter()
            .filter(|name| has_extension(name, &extensions))
            .collect())
    }

    /// Resolves and parses a texture container, reusing an earlier parse.
    pub fn texture_container(
        &self,
        container_name: &str,
        search_paths: &[PathBuf],
    ) -> Result<Arc<WadFile>> {
        let key = LookupKey {
            name: fold_name(&normalize_path(container_name)?),
            search_paths: search_paths.to_vec(),
        };
        let generation = {
            let containers = self.containers.read();
            if let Some(wad) = containers.get(&key) {
                return Ok(Arc::clone(wad));
            }
            self.generation.load(Ordering::Acquire)
        };

        let stream = self.resolve(container_name, search_paths)?;
        let wad = Arc::new(WadFile::parse(stream.into_region())?);
        self.containers_parsed.fetch_add(1, Ordering::Relaxed);

        let mut containers = self.containers.write();
        if self.generation.load(Ordering::Acquire) != generation {
            return Ok(wad);
        }
        Ok(Arc::clone(containers.entry(key).or_insert(wad)))
    }

    /// Decodes `texture_name` from the texture container `container_name`.
    ///
    /// `NotFound` covers both a missing container and a missing texture;
    /// callers substitute a placeholder in either case.
    pub fn load_texture_image(
        &self,
        container_name: &str,
        texture_name: &str,
        search_paths: &[PathBuf],
    ) -> Result<TextureImage> {
        self.texture_container(container_name, search_paths)?
            .decode_texture(texture_name)
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            loose_hits: self.loose_hits.load(Ordering::Relaxed),
            archive_hits: self.archive_hits.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            archive_scans: self.archive_scans.load(Ordering::Relaxed),
            containers_parsed: self.containers_parsed.load(Ordering::Relaxed),
            directory_listings: self.directory_listings.load(Ordering::Relaxed),
            archive_cache: self.archives.stats(),
        }
    }

    /// The archives of one search directory, in load order.
    pub fn archives_for(&self, directory: &Path) -> ArchiveList {
        self.archives.archives_for(directory)
    }
}

fn negative_capacity(config: &VfsConfig) -> NonZeroUsize {
    NonZeroUsize::new(config.negative_cache_capacity).unwrap_or(NonZeroUsize::MIN)
}
