//! Parser for PAK archives: an uncompressed, directory-indexed container.
//!
//! Layout (all integers little-endian):
//!
//! | offset | size | field            |
//! |--------|------|------------------|
//! | 0x00   | 4    | magic `PACK`     |
//! | 0x04   | 4    | directory offset |
//! | 0x08   | 4    | directory size   |
//!
//! The directory is a run of 64-byte records: a 56-byte null-padded name,
//! then the entry offset and entry length.

use crate::archive_entry::ArchiveEntry;
use crate::error::{Result, VfsError};
use crate::ext::io_ext::NameReadExt;
use crate::file_system::{fold_name, normalize_path};
use crate::mapped_file::MappedRegion;
use crate::mapped_stream::MappedStream;
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::path::Path;
use tracing::{debug, warn};

pub const PAK_MAGIC: [u8; 4] = *b"PACK";
pub const PAK_HEADER_SIZE: u64 = 12;
pub const PAK_RECORD_SIZE: u64 = 64;
pub const PAK_NAME_LENGTH: usize = 56;

/// The fixed header at the start of every PAK file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PakHeader {
    pub magic: [u8; 4],
    pub directory_offset: u32,
    pub directory_size: u32,
}

impl PakHeader {
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        Ok(Self {
            magic,
            directory_offset: reader.read_u32::<LittleEndian>()?,
            directory_size: reader.read_u32::<LittleEndian>()?,
        })
    }

    /// Number of whole records in the directory. A trailing partial record is ignored.
    pub fn entry_count(&self) -> u64 {
        self.directory_size as u64 / PAK_RECORD_SIZE
    }
}

/// A parsed PAK archive over its own mapping.
///
/// The mapping lives as long as the archive, or as long as any stream opened
/// from it.
#[derive(Debug)]
pub struct PakArchive {
    region: MappedRegion,
    header: PakHeader,
    /// Valid records in file order.
    entries: Vec<ArchiveEntry>,
    /// Folded name to position in `entries`. Later records replace earlier ones.
    index: HashMap<String, usize>,
    skipped_records: usize,
}

impl PakArchive {
    /// Maps and parses the archive at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::parse(MappedRegion::open(path)?)
    }

    /// Parses an archive from an already mapped region.
    ///
    /// Only a missing or invalid header fails the whole archive. Records that
    /// point outside the region are logged and left out of the index.
    pub fn parse(region: MappedRegion) -> Result<Self> {
        let path = region.path().to_path_buf();
        let file_size = region.len() as u64;

        if file_size < PAK_HEADER_SIZE {
            return Err(VfsError::BadFormat {
                path,
                reason: format!("{file_size} bytes is too small for a PAK header"),
            });
        }
        let header = PakHeader::read(&mut Cursor::new(region.as_slice()))?;
        if header.magic != PAK_MAGIC {
            return Err(VfsError::BadFormat {
                path,
                reason: format!("invalid magic 0x{}", hex::encode(header.magic)),
            });
        }

        let directory_offset = header.directory_offset as u64;
        let entry_count = header.entry_count();
        if header.directory_size as u64 % PAK_RECORD_SIZE != 0 {
            debug!(
                "{:?}: ignoring {} trailing directory bytes",
                path,
                header.directory_size as u64 % PAK_RECORD_SIZE
            );
        }

        let mut entries = Vec::with_capacity(entry_count.min(file_size / PAK_RECORD_SIZE) as usize);
        let mut index = HashMap::new();
        let mut skipped_records = 0usize;

        for i in 0..entry_count {
            let record_offset = directory_offset + i * PAK_RECORD_SIZE;
            let record = match region.bytes_at(record_offset, PAK_RECORD_SIZE) {
                Ok(record) => record,
                Err(_) => {
                    let dropped = (entry_count - i) as usize;
                    warn!(
                        "{:?}: directory runs past the end of the file, dropping {} records",
                        path, dropped
                    );
                    skipped_records += dropped;
                    break;
                }
            };

            match Self::parse_record(&path, record, file_size) {
                Ok(entry) => {
                    let position = entries.len();
                    if let Some(previous) = index.insert(entry.folded_name.clone(), position) {
                        let previous: &ArchiveEntry = &entries[previous];
                        debug!(
                            "{:?}: '{}' repeats '{}', the later record wins",
                            path, entry.name, previous.name
                        );
                    }
                    entries.push(entry);
                }
                Err(e) => {
                    warn!("{}", e);
                    skipped_records += 1;
                }
            }
        }

        debug!(
            "Parsed {:?}: {} entries, {} records skipped",
            path,
            index.len(),
            skipped_records
        );

        Ok(Self {
            region,
            header,
            entries,
            index,
            skipped_records,
        })
    }

    fn parse_record(path: &Path, record: &[u8], file_size: u64) -> Result<ArchiveEntry> {
        let mut reader = Cursor::new(record);
        let raw_name = reader.read_fixed_name(PAK_NAME_LENGTH)?;
        let offset = reader.read_u32::<LittleEndian>()? as u64;
        let length = reader.read_u32::<LittleEndian>()? as u64;

        let corrupt = |reason: String| VfsError::CorruptArchive {
            path: path.to_path_buf(),
            entry: raw_name.clone(),
            reason,
        };

        if offset + length > file_size {
            return Err(corrupt(format!(
                "range {offset}+{length} exceeds file size {file_size}"
            )));
        }
        ArchiveEntry::new(&raw_name, offset, length).map_err(|e| corrupt(e.to_string()))
    }

    /// Path of the archive file.
    pub fn path(&self) -> &Path {
        self.region.path()
    }

    /// The archive's file name, used for load-order sorting.
    pub fn file_name(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn header(&self) -> &PakHeader {
        &self.header
    }

    /// Number of distinct (case-folded) names in the index.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Records dropped while parsing because they were corrupt.
    pub fn skipped_records(&self) -> usize {
        self.skipped_records
    }

    /// Every valid record, in file order, including shadowed duplicates.
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter()
    }

    /// The entries reachable by name, in file order.
    pub fn visible_entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(i, e)| self.index.get(&e.folded_name) == Some(i))
            .map(|(_, e)| e)
    }

    /// Looks up an entry by name, ignoring case.
    pub fn find(&self, name: &str) -> Option<&ArchiveEntry> {
        let name = normalize_path(name).ok()?;
        self.find_folded(&fold_name(&name))
    }

    /// Looks up an entry by an already normalized and folded key.
    pub fn find_folded(&self, folded_name: &str) -> Option<&ArchiveEntry> {
        self.index.get(folded_name).map(|i| &self.entries[*i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Borrows the bytes of an entry straight from the mapping.
    pub fn entry_bytes(&self, name: &str) -> Option<&[u8]> {
        let entry = self.find(name)?;
        self.region.bytes_at(entry.offset, entry.length).ok()
    }

    /// Returns a region over one entry that shares the archive's mapping.
    pub fn entry_region(&self, entry: &ArchiveEntry) -> Result<MappedRegion> {
        self.region.sub_region(entry.offset, entry.length)
    }

    /// Opens a stream over the named entry.
    pub fn open_entry(&self, name: &str) -> Result<MappedStream> {
        let entry = self
            .find(name)
            .ok_or_else(|| VfsError::NotFound(name.to_string()))?;
        Ok(self.entry_region(entry)?.stream())
    }

    /// The mapping of the whole archive file.
    pub fn region(&self) -> &MappedRegion {
        &self.region
    }
}
