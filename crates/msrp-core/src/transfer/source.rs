//! Payload sources read lazily by [`ChunkSender`](super::ChunkSender).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Random-access byte source of known length
pub trait PayloadSource {
    /// Total size in bytes
    fn len(&self) -> u64;

    /// Whether the payload is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `buf.len()` bytes at `offset` (0-based).
    ///
    /// # Errors
    /// Returns the underlying I/O error.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
}

impl PayloadSource for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?
            .min(self.as_slice().len());
        let n = buf.len().min(self.as_slice().len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

/// File on disk, size fixed when opened
#[derive(Debug)]
pub struct FileSource {
    file: File,
    len: u64,
}

impl FileSource {
    /// Open `path` for reading.
    ///
    /// # Errors
    /// Returns the I/O error from opening or inspecting the file.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl PayloadSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_vec_source_reads_window() {
        let mut source = b"ABCDEFGHIJ".to_vec();
        let mut buf = [0u8; 4];
        assert_eq!(PayloadSource::len(&source), 10);
        assert_eq!(source.read_at(3, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"DEFG");
        assert_eq!(source.read_at(8, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"IJ");
        assert_eq!(source.read_at(20, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_file_source() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello file source").unwrap();
        tmp.flush().unwrap();

        let mut source = FileSource::open(tmp.path()).unwrap();
        assert_eq!(source.len(), 17);
        let mut buf = [0u8; 6];
        assert_eq!(source.read_at(6, &mut buf).unwrap(), 6);
        assert_eq!(&buf, b"file s");
    }
}
