use crate::error::Result;
use crate::mapped_file::MappedRegion;
use std::io::{self, BufRead, Error, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

/// A seekable reader over a [`MappedRegion`].
///
/// Reads are slice copies out of the mapping; no read issues a syscall.
/// Positions past the end are allowed, reads there return 0 bytes.
#[derive(Debug, Clone)]
pub struct MappedStream {
    /// The bytes this stream reads from.
    region: MappedRegion,
    /// The current read position within the region.
    position: u64,
}

impl MappedStream {
    pub(crate) fn new(region: MappedRegion) -> Self {
        MappedStream {
            region,
            position: 0,
        }
    }

    /// Returns the total size of the stream.
    pub fn size(&self) -> u64 {
        self.region.len() as u64
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes left between the current position and the end.
    pub fn remaining(&self) -> u64 {
        self.size().saturating_sub(self.position)
    }

    pub fn is_eof(&self) -> bool {
        self.remaining() == 0
    }

    /// The path of the file backing this stream (the archive for archive entries).
    pub fn source_path(&self) -> &Path {
        self.region.path()
    }

    pub fn region(&self) -> &MappedRegion {
        &self.region
    }

    pub fn into_region(self) -> MappedRegion {
        self.region
    }

    /// Returns the next `count` bytes without advancing.
    pub fn peek(&self, count: u64) -> Result<&[u8]> {
        self.region.bytes_at(self.position, count)
    }

    pub fn peek_byte(&self) -> Result<u8> {
        Ok(self.peek(1)?[0])
    }

    /// Returns the next `count` bytes and advances past them.
    ///
    /// Fails with [`crate::VfsError::Truncated`] and leaves the position unchanged if
    /// fewer than `count` bytes remain.
    pub fn read_bytes(&mut self, count: u64) -> Result<&[u8]> {
        let bytes = self.region.bytes_at(self.position, count)?;
        self.position += count;
        Ok(bytes)
    }

    /// Copies the whole stream into a vector, regardless of the current position.
    pub fn to_vec(&self) -> Vec<u8> {
        self.region.as_slice().to_vec()
    }

    fn rest(&self) -> &[u8] {
        let start = self.position.min(self.size()) as usize;
        &self.region.as_slice()[start..]
    }
}

impl Read for MappedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let rest = self.rest();
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl BufRead for MappedStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        Ok(self.rest())
    }

    fn consume(&mut self, amt: usize) {
        self.position += amt as u64;
    }
}

impl Seek for MappedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (base, offset) = match pos {
            SeekFrom::Start(offset) => {
                self.position = offset;
                return Ok(offset);
            }
            SeekFrom::Current(offset) => (self.position, offset),
            SeekFrom::End(offset) => (self.size(), offset),
        };
        match base.checked_add_signed(offset) {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(Error::new(
                ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

impl From<MappedRegion> for MappedStream {
    fn from(region: MappedRegion) -> Self {
        MappedStream::new(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VfsError;

    fn stream(data: &[u8]) -> MappedStream {
        MappedRegion::from_vec("mem", data.to_vec()).stream()
    }

    #[test]
    fn reads_and_seeks() {
        let mut s = stream(b"abcdefgh");
        let mut buf = [0u8; 3];
        s.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");

        assert_eq!(s.seek(SeekFrom::Current(2)).unwrap(), 5);
        s.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"fgh");
        assert!(s.is_eof());

        assert_eq!(s.seek(SeekFrom::End(-2)).unwrap(), 6);
        assert_eq!(s.read_bytes(2).unwrap(), b"gh");
        assert_eq!(s.seek(SeekFrom::Start(1)).unwrap(), 1);
        assert_eq!(s.peek(2).unwrap(), b"bc");
        assert_eq!(s.position(), 1);
    }

    #[test]
    fn eof_is_explicit() {
        let mut s = stream(b"xy");
        assert!(matches!(s.read_bytes(3), Err(VfsError::Truncated { .. })));
        assert_eq!(s.position(), 0);

        s.seek(SeekFrom::Start(10)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(s.read(&mut buf).unwrap(), 0);
        assert!(s.peek_byte().is_err());
        assert!(s.seek(SeekFrom::Current(-11)).is_err());
    }

    #[test]
    fn buf_read_lines() {
        let mut s = stream(b"one\ntwo\n");
        let mut line = String::new();
        s.read_line(&mut line).unwrap();
        assert_eq!(line, "one\n");
        line.clear();
        s.read_line(&mut line).unwrap();
        assert_eq!(line, "two\n");
        assert!(s.fill_buf().unwrap().is_empty());
    }
}
