use crate::error::{Result, VfsError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

pub const DEFAULT_NEGATIVE_CACHE_CAPACITY: usize = 4096;

/// Game location and lookup settings for an [`crate::AssetResolver`].
///
/// Search paths are derived from the game path, the base directory and the
/// mods, in that order; later entries have higher priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsConfig {
    /// Root directory of the game installation.
    pub game_path: PathBuf,
    /// Directory under `game_path` holding the base game data.
    pub base_dir: String,
    /// Mod directories under `game_path`, lowest priority first.
    pub mods: Vec<String>,
    /// Extensions of archive files scanned in every search path.
    pub archive_extensions: Vec<String>,
    /// Extensions of texture containers.
    pub texture_extensions: Vec<String>,
    /// Maximum number of remembered failed lookups.
    pub negative_cache_capacity: usize,
    /// Match loose file names without regard to case.
    pub case_insensitive_paths: bool,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            game_path: PathBuf::new(),
            base_dir: "id1".to_string(),
            mods: Vec::new(),
            archive_extensions: vec!["pak".to_string()],
            texture_extensions: vec!["wad".to_string()],
            negative_cache_capacity: DEFAULT_NEGATIVE_CACHE_CAPACITY,
            case_insensitive_paths: true,
        }
    }
}

impl VfsConfig {
    /// Creates a configuration for the game installed at `game_path`.
    pub fn new<P: Into<PathBuf>>(game_path: P) -> Self {
        Self {
            game_path: game_path.into(),
            ..Self::default()
        }
    }

    pub fn with_base_dir(mut self, base_dir: &str) -> Self {
        self.base_dir = base_dir.to_string();
        self
    }

    pub fn with_mods<I, S>(mut self, mods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mods = mods.into_iter().map(Into::into).collect();
        self
    }

    /// The ordered search paths: base directory first, then each mod.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        std::iter::once(&self.base_dir)
            .chain(self.mods.iter())
            .filter(|dir| !dir.is_empty())
            .map(|dir| self.game_path.join(dir))
            .collect()
    }

    /// Loads configuration variables from a file.
    ///
    /// A relative `game-path` is resolved against the directory holding the file.
    ///
    /// # Arguments
    ///
    /// * `file_name` - The path to the configuration file.
    pub fn load<P: AsRef<Path>>(file_name: P) -> Result<Self> {
        let file_name = file_name.as_ref();
        let file = File::open(file_name).map_err(|source| VfsError::OpenFailed {
            path: file_name.to_path_buf(),
            source,
        })?;
        let mut config = Self::read(file)?;
        if config.game_path.is_relative() {
            if let Some(parent) = file_name.parent() {
                config.game_path = parent.join(&config.game_path);
            }
        }
        Ok(config)
    }

    /// Parses `key = value ...` lines. Blank lines and `#` comments are
    /// ignored, as are unknown keys.
    pub fn read<R: Read>(reader: R) -> Result<Self> {
        let mut variables: HashMap<String, String> = HashMap::new();
        for line in BufReader::new(reader).lines() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((name, value)) = line.split_once('=') {
                variables.insert(name.trim().to_string(), value.trim().to_string());
            }
        }

        let mut config = Self::default();
        for (name, value) in variables {
            match name.as_str() {
                "game-path" => config.game_path = PathBuf::from(value),
                "base-dir" => config.base_dir = value,
                "mods" => config.mods = split_values(&value),
                "archive-extensions" => config.archive_extensions = split_values(&value),
                "texture-extensions" => config.texture_extensions = split_values(&value),
                "negative-cache-capacity" => {
                    config.negative_cache_capacity = value.parse().map_err(|_| {
                        VfsError::InvalidConfig(format!("negative-cache-capacity: '{value}'"))
                    })?
                }
                "case-insensitive-paths" => {
                    config.case_insensitive_paths = parse_bool(&value).ok_or_else(|| {
                        VfsError::InvalidConfig(format!("case-insensitive-paths: '{value}'"))
                    })?
                }
                other => tracing::debug!("Ignoring unknown config key '{}'", other),
            }
        }
        Ok(config)
    }
}

fn split_values(value: &str) -> Vec<String> {
    value.split_whitespace().map(|v| v.to_string()).collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_config_text() {
        let text = "\
# Quake
game-path = /games/quake
base-dir = id1
mods = hipnotic   mymod
archive-extensions = pak pk3
negative-cache-capacity = 16
case-insensitive-paths = no
colour = blue
";
        let config = VfsConfig::read(text.as_bytes()).unwrap();
        assert_eq!(config.game_path, PathBuf::from("/games/quake"));
        assert_eq!(config.mods, vec!["hipnotic", "mymod"]);
        assert_eq!(config.archive_extensions, vec!["pak", "pk3"]);
        assert_eq!(config.texture_extensions, vec!["wad"]);
        assert_eq!(config.negative_cache_capacity, 16);
        assert!(!config.case_insensitive_paths);
        assert_eq!(
            config.search_paths(),
            vec![
                PathBuf::from("/games/quake/id1"),
                PathBuf::from("/games/quake/hipnotic"),
                PathBuf::from("/games/quake/mymod"),
            ]
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            VfsConfig::read("negative-cache-capacity = lots".as_bytes()),
            Err(VfsError::InvalidConfig(_))
        ));
        assert!(matches!(
            VfsConfig::read("case-insensitive-paths = maybe".as_bytes()),
            Err(VfsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn load_resolves_relative_game_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("vfs.cfg");
        std::fs::write(&file, "game-path = quake\nmods = ad\n").unwrap();

        let config = VfsConfig::load(&file).unwrap();
        assert_eq!(config.game_path, dir.path().join("quake"));
        assert_eq!(
            config.search_paths(),
            vec![dir.path().join("quake/id1"), dir.path().join("quake/ad")]
        );
    }

    #[test]
    fn builder_sets_mods() {
        let config = VfsConfig::new("/q").with_base_dir("valve").with_mods(["cstrike"]);
        assert_eq!(
            config.search_paths(),
            vec![PathBuf::from("/q/valve"), PathBuf::from("/q/cstrike")]
        );
    }
}
