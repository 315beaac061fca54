use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;

/// Reads the fixed-width, null-padded name fields used by PAK and WAD directories.
pub trait NameReadExt: Read {
    /// Reads exactly `width` bytes and returns the text before the first NUL.
    ///
    /// Bytes that are not valid UTF-8 are replaced, so hostile names never fail
    /// the read itself.
    fn read_fixed_name(&mut self, width: usize) -> io::Result<String>;
}

impl<T> NameReadExt for T
where
    T: Read,
{
    fn read_fixed_name(&mut self, width: usize) -> io::Result<String> {
        let mut buf = vec![0u8; width];
        self.read_exact(&mut buf)?;
        Ok(fixed_name(&buf))
    }
}

/// Decodes a null-padded name field.
pub(crate) fn fixed_name(field: &[u8]) -> String {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Utility methods for working with seekable streams.
pub trait SeekExt: Seek {
    /// Skips over the given number of bytes from the current position.
    fn skip<P: Copy + 'static>(&mut self, size: P) -> io::Result<u64>
    where
        u64: TryFrom<P>;
}

impl<T> SeekExt for T
where
    T: Seek,
{
    fn skip<P: Copy + 'static>(&mut self, size: P) -> io::Result<u64>
    where
        u64: TryFrom<P>,
    {
        let size = u64::try_from(size).map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?;
        let size = i64::try_from(size).map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?;

        self.seek(SeekFrom::Current(size))
    }
}
