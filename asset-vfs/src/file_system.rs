//! The file system facade the resolver reads search paths through, plus the
//! path helpers shared by every lookup.

use crate::error::{Result, VfsError};
use crate::mapped_file::MappedRegion;
use glob::{glob_with, MatchOptions, Pattern};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Directory access used by the archive cache and the asset resolver.
///
/// [`DiskFileSystem`] is the production implementation; tests wrap it to
/// count accesses or to inject failures.
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn is_directory(&self, path: &Path) -> bool;

    /// Lists the regular files in `dir` whose extension matches one of
    /// `extensions`, ignoring case. The result is sorted.
    fn list_files(&self, dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>>;

    /// Lists every entry of `dir`, sorted by path.
    fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Maps a file for reading.
    fn map_file(&self, path: &Path) -> Result<MappedRegion> {
        MappedRegion::open(path)
    }
}

/// Reads search paths straight from the local disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskFileSystem;

impl FileSystem for DiskFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_directory(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_files(&self, dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let dir_pattern = Pattern::escape(&dir.to_string_lossy());

        let mut files = Vec::new();
        for extension in extensions {
            let pattern = format!("{dir_pattern}/*.{}", Pattern::escape(extension));
            let paths = glob_with(&pattern, options)
                .map_err(|e| VfsError::InvalidPath(format!("{pattern}: {e}")))?;
            for path in paths {
                match path {
                    Ok(path) if path.is_file() => files.push(path),
                    Ok(_) => {}
                    Err(e) => debug!("Skipping unreadable entry while listing {:?}: {}", dir, e),
                }
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect::<Vec<_>>();
        entries.sort();
        Ok(entries)
    }
}

/// Normalizes an asset name to `/`-separated relative form.
///
/// Backslashes become `/`, empty and `.` components are dropped and `..`
/// pops the previous component. A `..` that would leave the search root, or
/// a drive-qualified name, is rejected. An empty name normalizes to `""`.
pub fn normalize_path(name: &str) -> Result<String> {
    let unified = name.replace('\\', "/");
    let mut components: Vec<&str> = Vec::new();
    for component in unified.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if components.pop().is_none() {
                    return Err(VfsError::InvalidPath(name.to_string()));
                }
            }
            c if c.contains(':') => return Err(VfsError::InvalidPath(name.to_string())),
            c => components.push(c),
        }
    }
    Ok(components.join("/"))
}

/// The case-folded lookup key for a normalized name.
pub fn fold_name(name: &str) -> String {
    name.to_lowercase()
}

/// Joins a normalized asset name onto a directory.
pub fn join_asset(dir: &Path, name: &str) -> PathBuf {
    name.split('/')
        .filter(|c| !c.is_empty())
        .fold(dir.to_path_buf(), |path, c| path.join(c))
}

/// Returns true when the extension of `path` is one of `extensions`, ignoring case.
pub fn has_extension(path: &str, extensions: &[String]) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Finds `relative` below `root`, matching each component without regard to case.
///
/// `list_dir` supplies the sorted entries of a directory, or `None` when it
/// cannot be read. An exact match is preferred at every level. When several
/// entries differ only in case, the first in sorted order is used.
pub fn find_case_insensitive<F>(root: &Path, relative: &str, mut list_dir: F) -> Option<PathBuf>
where
    F: FnMut(&Path) -> Option<Arc<[PathBuf]>>,
{
    let mut current = root.to_path_buf();
    for component in relative.split('/').filter(|c| !c.is_empty()) {
        let entries = list_dir(&current)?;
        let wanted = fold_name(component);
        let found = entries
            .iter()
            .find(|p| entry_name(p) == Some(component))
            .or_else(|| {
                entries
                    .iter()
                    .find(|p| entry_name(p).is_some_and(|n| fold_name(n) == wanted))
            })?;
        current = found.clone();
    }
    Some(current)
}

fn entry_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}
