//! # asset-vfs
//!
//! `asset-vfs` is a read-only virtual file system for Quake-style game data.
//! It resolves asset names (maps, models, textures) against an ordered list of
//! search directories, falling back from loose files to PAK archives, and
//! decodes textures from WAD containers.
//!
//! ## Features
//! - Zero-copy access: archives are memory-mapped and entries are served as
//!   views into the mapping
//! - Deterministic override order across search paths and archives
//! - Case-insensitive lookups for archive entries and loose files
//! - Cached archive directories and a bounded cache of failed lookups
//! - Malformed archives are reported and skipped, never fatal
//!
//! ### Example: Resolving an Asset
//! ```no_run
//! use asset_vfs::{AssetResolver, VfsConfig};
//! use std::io::Read;
//!
//! // Base game in /games/quake/id1, a mod in /games/quake/mymod
//! let resolver = AssetResolver::new(VfsConfig::new("/games/quake").with_mods(["mymod"]));
//!
//! let mut stream = resolver.open("progs/player.mdl").unwrap();
//! let mut header = [0u8; 4];
//! stream.read_exact(&mut header).unwrap();
//!
//! let texture = resolver
//!     .load_texture_image("gfx/base.wad", "brick1", &resolver.search_paths())
//!     .unwrap();
//! println!("{}x{}", texture.width, texture.height);
//! ```

pub mod archive_cache;
pub mod archive_entry;
pub mod asset_resolver;
pub mod error;
mod ext;
pub mod file_system;
pub mod mapped_file;
pub mod mapped_stream;
pub mod pak_archive;
pub mod vfs_config;
pub mod wad_file;

pub use archive_cache::{ArchiveCache, ArchiveCacheStats, ArchiveList};
pub use archive_entry::ArchiveEntry;
pub use asset_resolver::{AssetResolver, AssetSource, LookupKey, ResolverStats};
pub use error::{Result, VfsError};
pub use file_system::{DiskFileSystem, FileSystem};
pub use mapped_file::MappedRegion;
pub use mapped_stream::MappedStream;
pub use pak_archive::{PakArchive, PakHeader};
pub use vfs_config::VfsConfig;
pub use wad_file::{TextureImage, WadEntry, WadEntryType, WadFile, WadHeader, WadVersion};
