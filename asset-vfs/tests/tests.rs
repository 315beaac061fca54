use asset_vfs::{
    AssetResolver, AssetSource, DiskFileSystem, FileSystem, MappedRegion, PakArchive, Result,
    VfsConfig, VfsError,
};
use byteorder::{LittleEndian, WriteBytesExt};
use pretty_assertions::assert_eq;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;

fn pak_raw(data: &[u8], records: &[(&str, u32, u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_all(b"PACK").unwrap();
    out.write_u32::<LittleEndian>(12 + data.len() as u32).unwrap();
    out.write_u32::<LittleEndian>(records.len() as u32 * 64).unwrap();
    out.write_all(data).unwrap();
    for (name, offset, length) in records {
        let mut field = [0u8; 56];
        field[..name.len()].copy_from_slice(name.as_bytes());
        out.write_all(&field).unwrap();
        out.write_u32::<LittleEndian>(*offset).unwrap();
        out.write_u32::<LittleEndian>(*length).unwrap();
    }
    out
}

fn pak(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut data = Vec::new();
    let mut records = Vec::new();
    for (name, contents) in files {
        records.push((*name, 12 + data.len() as u32, contents.len() as u32));
        data.extend_from_slice(contents);
    }
    pak_raw(&data, &records)
}

fn write(root: &Path, relative: &str, data: &[u8]) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, data).unwrap();
    path
}

fn read_all(resolver: &AssetResolver, name: &str, paths: &[PathBuf]) -> Vec<u8> {
    let mut out = Vec::new();
    resolver
        .resolve(name, paths)
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    out
}

/// Counts directory listings and file mappings on top of the real disk.
#[derive(Default)]
struct CountingFileSystem {
    listings: AtomicUsize,
    mappings: AtomicUsize,
}

impl FileSystem for CountingFileSystem {
    fn exists(&self, path: &Path) -> bool {
        DiskFileSystem.exists(path)
    }

    fn is_directory(&self, path: &Path) -> bool {
        DiskFileSystem.is_directory(path)
    }

    fn list_files(&self, dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        DiskFileSystem.list_files(dir, extensions)
    }

    fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        DiskFileSystem.read_dir(dir)
    }

    fn map_file(&self, path: &Path) -> Result<MappedRegion> {
        self.mappings.fetch_add(1, Ordering::SeqCst);
        MappedRegion::open(path)
    }
}

/// Drops a new archive into the game directory and invalidates the resolver
/// while the first archive listing is still in flight.
#[derive(Default)]
struct RacingFileSystem {
    resolver: OnceLock<Weak<AssetResolver>>,
    late_archive: Mutex<Option<(PathBuf, Vec<u8>)>>,
}

impl FileSystem for RacingFileSystem {
    fn exists(&self, path: &Path) -> bool {
        DiskFileSystem.exists(path)
    }

    fn is_directory(&self, path: &Path) -> bool {
        DiskFileSystem.is_directory(path)
    }

    fn list_files(&self, dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
        let files = DiskFileSystem.list_files(dir, extensions)?;
        if let Some((path, data)) = self.late_archive.lock().unwrap().take() {
            fs::write(path, data).unwrap();
            if let Some(resolver) = self.resolver.get().and_then(Weak::upgrade) {
                resolver.invalidate();
            }
        }
        Ok(files)
    }

    fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        DiskFileSystem.read_dir(dir)
    }
}

#[test]
fn test_lookup_ignores_case() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "pak0.pak",
        &pak(&[("maps/E1M1.bsp", b"bsp"), ("progs/player.mdl", b"mdl")]),
    );
    let archive = PakArchive::open(&path).unwrap();

    let stored = archive.find("maps/E1M1.bsp").unwrap();
    for variant in ["maps/e1m1.bsp", "MAPS/E1M1.BSP", "Maps\\e1M1.Bsp"] {
        let found = archive.find(variant).unwrap();
        assert_eq!((found.offset, found.length), (stored.offset, stored.length));
        assert_eq!(
            archive.entry_bytes(variant).unwrap().as_ptr(),
            archive.entry_bytes("maps/E1M1.bsp").unwrap().as_ptr()
        );
    }
}

#[test]
fn test_corrupt_record_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "pak0.pak",
        &pak_raw(
            b"goodbad",
            &[("good.txt", 12, 4), ("bad.txt", 16, 1_000_000), ("tail.txt", 16, 3)],
        ),
    );

    let archive = PakArchive::open(&path).unwrap();
    assert_eq!(archive.len(), 2);
    assert_eq!(archive.skipped_records(), 1);
    assert!(archive.find("bad.txt").is_none());
    assert_eq!(archive.entry_bytes("good.txt"), Some(&b"good"[..]));
    assert_eq!(archive.entry_bytes("tail.txt"), Some(&b"bad"[..]));
}

#[test]
fn test_mod_archive_beats_base_loose_file() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("game/base");
    let modded = dir.path().join("game/mod");
    write(&base, "door.mdl", b"base loose");
    write(&modded, "pak0.pak", &pak(&[("door.mdl", b"mod archive")]));

    let resolver = AssetResolver::new(VfsConfig::new(dir.path()));
    let paths = vec![base, modded.clone()];
    assert_eq!(read_all(&resolver, "door.mdl", &paths), b"mod archive");
    assert_eq!(
        resolver.locate("door.mdl", &paths).unwrap(),
        AssetSource::Archive {
            archive: modded.join("pak0.pak"),
            entry: "door.mdl".to_string(),
        }
    );
}

#[test]
fn test_loose_file_beats_archive_in_same_directory() {
    let dir = tempfile::tempdir().unwrap();
    let game = dir.path().join("id1");
    let loose = write(&game, "tex1.png", b"loose");
    write(&game, "pak0.pak", &pak(&[("tex1.png", b"archived")]));

    let resolver = AssetResolver::new(VfsConfig::new(dir.path()));
    let paths = vec![game];
    assert_eq!(read_all(&resolver, "tex1.png", &paths), b"loose");
    assert_eq!(
        resolver.locate("tex1.png", &paths).unwrap(),
        AssetSource::Loose(loose)
    );
}

#[test]
fn test_archives_for_reads_directory_once() {
    let dir = tempfile::tempdir().unwrap();
    let game = dir.path().join("id1");
    write(&game, "pak1.pak", &pak(&[("b", b"b")]));
    write(&game, "pak0.pak", &pak(&[("a", b"a")]));

    let file_system = Arc::new(CountingFileSystem::default());
    let resolver = AssetResolver::with_file_system(VfsConfig::new(dir.path()), file_system.clone());

    let first = resolver.archives_for(&game);
    for _ in 0..10 {
        let again = resolver.archives_for(&game);
        let names: Vec<_> = again.iter().map(|a| a.file_name()).collect();
        assert_eq!(names, vec!["pak0.pak", "pak1.pak"]);
        assert!(Arc::ptr_eq(&first, &again));
    }
    assert_eq!(file_system.listings.load(Ordering::SeqCst), 1);
    assert_eq!(file_system.mappings.load(Ordering::SeqCst), 2);
    assert_eq!(resolver.stats().archive_cache.directory_scans, 1);
}

#[test]
fn test_repeated_miss_hits_negative_cache() {
    let dir = tempfile::tempdir().unwrap();
    let game = dir.path().join("id1");
    write(&game, "pak0.pak", &pak(&[("progs/player.mdl", b"mdl")]));

    let resolver = AssetResolver::new(VfsConfig::new(dir.path()));
    let paths = vec![game];

    let first = resolver.resolve("progs/missing.mdl", &paths).unwrap_err();
    assert!(first.is_not_found());
    assert_eq!(resolver.stats().archive_scans, 1);

    let second = resolver.resolve("PROGS/MISSING.MDL", &paths).unwrap_err();
    assert!(second.is_not_found());
    let stats = resolver.stats();
    assert_eq!(stats.archive_scans, 1);
    assert_eq!(stats.negative_hits, 1);

    resolver.invalidate();
    assert!(resolver.resolve("progs/missing.mdl", &paths).is_err());
    assert_eq!(resolver.stats().archive_scans, 2);
}

#[test]
fn test_bad_archive_does_not_block_other_sources() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("id1");
    let modded = dir.path().join("mod");
    write(&base, "pak0.pak", &pak(&[("maps/start.bsp", b"start")]));
    write(&modded, "pak0.pak", b"JUNKJUNKJUNKJUNK");

    let resolver = AssetResolver::new(VfsConfig::new(dir.path()));
    let paths = vec![base, modded];
    assert_eq!(read_all(&resolver, "maps/start.bsp", &paths), b"start");
    assert_eq!(resolver.stats().archive_cache.archives_skipped, 1);
}

#[test]
fn test_streams_outlive_invalidation() {
    let dir = tempfile::tempdir().unwrap();
    let game = dir.path().join("id1");
    write(&game, "pak0.pak", &pak(&[("gfx/palette.lmp", b"palette")]));

    let resolver = AssetResolver::new(VfsConfig::new(dir.path()));
    let mut stream = resolver.resolve("gfx/palette.lmp", &[game]).unwrap();
    resolver.invalidate();

    let mut out = String::new();
    stream.read_to_string(&mut out).unwrap();
    assert_eq!(out, "palette");
}

#[test]
fn test_concurrent_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let game = dir.path().join("id1");
    write(&game, "pak0.pak", &pak(&[("a.txt", b"alpha"), ("b.txt", b"beta")]));
    write(&game, "pak1.pak", &pak(&[("b.txt", b"BETA")]));

    let resolver = Arc::new(AssetResolver::new(VfsConfig::new(dir.path())));
    let paths = vec![game];

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let resolver = Arc::clone(&resolver);
            let paths = paths.clone();
            thread::spawn(move || {
                let name = if i % 2 == 0 { "a.txt" } else { "B.TXT" };
                let missing = resolver.resolve("c.txt", &paths);
                assert!(matches!(missing, Err(VfsError::NotFound(_))));
                read_all(&resolver, name, &paths)
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let data = handle.join().unwrap();
        let expected: &[u8] = if i % 2 == 0 { b"alpha" } else { b"BETA" };
        assert_eq!(data, expected);
    }
    assert_eq!(resolver.stats().archive_cache.cached_directories, 1);
}

#[test]
fn test_open_uses_configured_search_paths() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "id1/pak0.pak", &pak(&[("progs/player.mdl", b"base")]));
    write(dir.path(), "ad/progs/player.mdl", b"arcane");
    let config_file = write(dir.path(), "vfs.cfg", b"game-path = .\nmods = ad\n");

    let resolver = AssetResolver::new(VfsConfig::load(&config_file).unwrap());
    assert_eq!(resolver.open("progs/player.mdl").unwrap().to_vec(), b"arcane");
}

#[test]
fn test_lookup_racing_invalidate_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let game = dir.path().join("id1");
    write(&game, "pak0.pak", &pak(&[("progs/player.mdl", b"player")]));

    let file_system = Arc::new(RacingFileSystem::default());
    *file_system.late_archive.lock().unwrap() =
        Some((game.join("pak1.pak"), pak(&[("progs/new.mdl", b"new")])));
    let resolver = Arc::new(AssetResolver::with_file_system(
        VfsConfig::new(dir.path()),
        file_system.clone(),
    ));
    file_system.resolver.set(Arc::downgrade(&resolver)).ok();
    let paths = vec![game.clone()];

    // The scan in flight predates pak1.pak, so this lookup misses...
    assert!(resolver.resolve("progs/new.mdl", &paths).unwrap_err().is_not_found());
    // ...but neither the archive list nor the miss outlives the invalidation.
    let names: Vec<_> = resolver.archives_for(&game).iter().map(|a| a.file_name()).collect();
    assert_eq!(names, vec!["pak0.pak", "pak1.pak"]);
    assert_eq!(read_all(&resolver, "progs/new.mdl", &paths), b"new");

    let stats = resolver.stats();
    assert_eq!(stats.negative_hits, 0);
    assert_eq!(stats.archive_cache.directory_scans, 2);
}
