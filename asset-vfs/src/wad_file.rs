//! Parser for WAD texture containers (WAD2 and WAD3).
//!
//! A WAD holds a 12-byte header (`magic`, entry count, directory offset)
//! and a directory of 32-byte records. Texture records point at a miptex
//! block: a 16-byte name, width, height and four mip level offsets relative
//! to the block. Only the full-resolution level is decoded here.

use crate::error::{Result, VfsError};
use crate::ext::io_ext::{NameReadExt, SeekExt};
use crate::file_system::fold_name;
use crate::mapped_file::MappedRegion;
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::path::Path;
use tracing::{debug, warn};

pub const WAD2_MAGIC: [u8; 4] = *b"WAD2";
pub const WAD3_MAGIC: [u8; 4] = *b"WAD3";
pub const WAD_HEADER_SIZE: u64 = 12;
pub const WAD_RECORD_SIZE: u64 = 32;
pub const WAD_NAME_LENGTH: usize = 16;
/// Name, width, height and four mip offsets.
pub const MIPTEX_HEADER_SIZE: u64 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WadVersion {
    /// Quake.
    Wad2,
    /// Half-Life; textures carry their own palette.
    Wad3,
}

/// The content type tag of a directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WadEntryType {
    Palette,
    /// Status bar picture (`qpic`).
    Picture,
    /// Mip-mapped texture. Tagged `D` in WAD2 and `C` in WAD3.
    MipTexture,
    ConsolePicture,
    Font,
    /// Unknown or unsupported type, stores the raw byte value.
    Unknown(u8),
}

impl From<u8> for WadEntryType {
    fn from(byte: u8) -> Self {
        match byte {
            0x40 => WadEntryType::Palette,
            0x42 => WadEntryType::Picture,
            0x43 | 0x44 => WadEntryType::MipTexture,
            0x45 => WadEntryType::ConsolePicture,
            0x46 => WadEntryType::Font,
            other => WadEntryType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WadHeader {
    pub magic: [u8; 4],
    pub entry_count: i32,
    pub directory_offset: i32,
}

impl WadHeader {
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        Ok(Self {
            magic,
            entry_count: reader.read_i32::<LittleEndian>()?,
            directory_offset: reader.read_i32::<LittleEndian>()?,
        })
    }
}

/// One directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WadEntry {
    pub name: String,
    pub folded_name: String,
    pub offset: u64,
    pub disk_size: u64,
    pub size: u64,
    pub entry_type: WadEntryType,
    pub compression: u8,
}

/// A decoded texture: the full-resolution level as palette indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureImage {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// `width * height` palette indices, row-major.
    pub indexed_pixels: Vec<u8>,
    /// RGB triples of the embedded palette (WAD3 only).
    pub palette: Option<Vec<u8>>,
}

/// A parsed WAD container.
#[derive(Debug)]
pub struct WadFile {
    region: MappedRegion,
    version: WadVersion,
    entries: Vec<WadEntry>,
    index: HashMap<String, usize>,
    skipped_records: usize,
}

impl WadFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::parse(MappedRegion::open(path)?)
    }

    /// Parses the directory of a WAD. Textures are decoded on demand.
    pub fn parse(region: MappedRegion) -> Result<Self> {
        let path = region.path().to_path_buf();
        let file_size = region.len() as u64;
        let bad_format = |reason: String| VfsError::BadFormat {
            path: path.clone(),
            reason,
        };

        if file_size < WAD_HEADER_SIZE {
            return Err(bad_format(format!(
                "{file_size} bytes is too small for a WAD header"
            )));
        }
        let header = WadHeader::read(&mut Cursor::new(region.as_slice()))?;
        let version = match header.magic {
            WAD2_MAGIC => WadVersion::Wad2,
            WAD3_MAGIC => WadVersion::Wad3,
            other => {
                return Err(bad_format(format!(
                    "invalid magic 0x{}",
                    hex::encode(other)
                )))
            }
        };
        let (entry_count, directory_offset) = match (
            u64::try_from(header.entry_count),
            u64::try_from(header.directory_offset),
        ) {
            (Ok(count), Ok(offset)) => (count, offset),
            _ => {
                return Err(bad_format(format!(
                    "negative entry count {} or directory offset {}",
                    header.entry_count, header.directory_offset
                )))
            }
        };

        let mut entries = Vec::with_capacity(entry_count.min(file_size / WAD_RECORD_SIZE) as usize);
        let mut index = HashMap::new();
        let mut skipped_records = 0usize;

        for i in 0..entry_count {
            let record = match region.bytes_at(directory_offset + i * WAD_RECORD_SIZE, WAD_RECORD_SIZE)
            {
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
                    index.insert(entry.folded_name.clone(), entries.len());
                    entries.push(entry);
                }
                Err(e) => {
                    warn!("{}", e);
                    skipped_records += 1;
                }
            }
        }

        debug!(
            "Parsed {:?} ({:?}): {} entries, {} records skipped",
            path,
            version,
            index.len(),
            skipped_records
        );

        Ok(Self {
            region,
            version,
            entries,
            index,
            skipped_records,
        })
    }

    fn parse_record(path: &Path, record: &[u8], file_size: u64) -> Result<WadEntry> {
        let mut reader = Cursor::new(record);
        let offset = reader.read_i32::<LittleEndian>()?;
        let disk_size = reader.read_i32::<LittleEndian>()?;
        let size = reader.read_i32::<LittleEndian>()?;
        let entry_type = WadEntryType::from(reader.read_u8()?);
        let compression = reader.read_u8()?;
        reader.skip(2u8)?;
        let name = reader.read_fixed_name(WAD_NAME_LENGTH)?;

        let corrupt = |reason: String| VfsError::CorruptArchive {
            path: path.to_path_buf(),
            entry: name.clone(),
            reason,
        };

        let (offset, disk_size) = match (u64::try_from(offset), u64::try_from(disk_size)) {
            (Ok(offset), Ok(disk_size)) => (offset, disk_size),
            _ => return Err(corrupt(format!("negative range {offset}+{disk_size}"))),
        };
        if offset + disk_size > file_size {
            return Err(corrupt(format!(
                "range {offset}+{disk_size} exceeds file size {file_size}"
            )));
        }
        if name.is_empty() {
            return Err(corrupt("empty name".to_string()));
        }

        Ok(WadEntry {
            folded_name: fold_name(&name),
            name,
            offset,
            disk_size,
            size: u64::try_from(size).unwrap_or(0),
            entry_type,
            compression,
        })
    }

    pub fn path(&self) -> &Path {
        self.region.path()
    }

    pub fn version(&self) -> WadVersion {
        self.version
    }

    pub fn entries(&self) -> &[WadEntry] {
        &self.entries
    }

    pub fn skipped_records(&self) -> usize {
        self.skipped_records
    }

    /// Looks up a record of any type by name, ignoring case.
    pub fn find(&self, name: &str) -> Option<&WadEntry> {
        self.index.get(&fold_name(name)).map(|i| &self.entries[*i])
    }

    /// Names of all texture records, in original case and file order.
    pub fn texture_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.entry_type == WadEntryType::MipTexture)
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Decodes the full-resolution image of the named texture.
    ///
    /// Returns [`VfsError::NotFound`] when no texture record has that name,
    /// [`VfsError::BadFormat`] when the record is compressed and
    /// [`VfsError::Truncated`] when the texture data runs past the file.
    pub fn decode_texture(&self, name: &str) -> Result<TextureImage> {
        let entry = self
            .find(name)
            .filter(|e| e.entry_type == WadEntryType::MipTexture)
            .ok_or_else(|| VfsError::NotFound(name.to_string()))?;
        if entry.compression != 0 {
            return Err(VfsError::BadFormat {
                path: self.path().to_path_buf(),
                reason: format!(
                    "texture '{}' uses unsupported compression {}",
                    entry.name, entry.compression
                ),
            });
        }

        let truncated = |offset: u64, needed: u64| {
            VfsError::truncated(
                format!("texture '{}' in {}", entry.name, self.path().display()),
                offset,
                needed,
                (self.region.len() as u64).saturating_sub(offset),
            )
        };

        let miptex = self
            .region
            .bytes_at(entry.offset, MIPTEX_HEADER_SIZE)
            .map_err(|_| truncated(entry.offset, MIPTEX_HEADER_SIZE))?;
        let mut reader = Cursor::new(miptex);
        reader.skip(WAD_NAME_LENGTH)?;
        let width = reader.read_u32::<LittleEndian>()?;
        let height = reader.read_u32::<LittleEndian>()?;
        let mut mip_offsets = [0u32; 4];
        reader.read_u32_into::<LittleEndian>(&mut mip_offsets)?;

        let pixel_count = width as u64 * height as u64;
        let pixel_offset = entry.offset + mip_offsets[0] as u64;
        let indexed_pixels = self
            .region
            .bytes_at(pixel_offset, pixel_count)
            .map_err(|_| truncated(pixel_offset, pixel_count))?
            .to_vec();

        let palette = match self.version {
            WadVersion::Wad2 => None,
            WadVersion::Wad3 => self.read_palette(entry, width, height, mip_offsets[3]),
        };

        Ok(TextureImage {
            name: entry.name.clone(),
            width,
            height,
            indexed_pixels,
            palette,
        })
    }

    /// Reads the palette stored after the smallest mip level of a WAD3 texture.
    fn read_palette(&self, entry: &WadEntry, width: u32, height: u32, last_mip: u32) -> Option<Vec<u8>> {
        let smallest = (width as u64 / 8) * (height as u64 / 8);
        let count_offset = entry.offset + last_mip as u64 + smallest;
        let palette = self
            .region
            .bytes_at(count_offset, 2)
            .map(|count| u16::from_le_bytes([count[0], count[1]]) as u64)
            .and_then(|count| self.region.bytes_at(count_offset + 2, count * 3));
        match palette {
            Ok(palette) => Some(palette.to_vec()),
            Err(e) => {
                warn!("Texture '{}' has no usable palette: {}", entry.name, e);
                None
            }
        }
    }
}
