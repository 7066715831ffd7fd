//! C1 — the `Stream` collaborator (spec §6, consumed not owned).
//!
//! A random-access byte source with a fixed size. Unlike a `std::fs::File`,
//! reads take an explicit position instead of mutating a cursor, which lets
//! `Archive`/`FileHandle` share a `Stream` through a plain `&self` borrow:
//! no internal mutability, no locking, and sector reads never fight over a
//! seek position (spec §5: "Stream: borrowed exclusively by the
//! SectorReader for the duration of a single compressed-range read").

use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

pub trait Stream {
    /// Reads exactly `buf.len()` bytes starting at `pos`, or fewer at EOF.
    /// Returns the number of bytes actually read.
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total size of the stream in bytes.
    fn size(&self) -> u64;
}

/// A `Stream` backed by an open filesystem file.
///
/// `std::fs::File` only exposes a stateful `Seek + Read` pair, so the
/// position-taking `read_at` is implemented with a mutex-guarded seek+read;
/// cheap enough since the core never issues concurrent reads against one
/// handle (spec §5).
pub struct FileStream {
    file: Mutex<fs::File>,
    size: u64,
}

impl FileStream {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        let size = file.metadata()?.len();
        Ok(FileStream {
            file: Mutex::new(file),
            size,
        })
    }
}

impl Stream for FileStream {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.lock().expect("file stream mutex poisoned");
        file.seek(SeekFrom::Start(pos))?;
        read_partial(&mut *file, buf)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

fn read_partial<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// An in-memory `Stream`, used throughout the test suite to build synthetic
/// archives without touching the filesystem.
pub struct MemoryStream {
    data: Vec<u8>,
}

impl MemoryStream {
    pub fn new(data: Vec<u8>) -> Self {
        MemoryStream { data }
    }
}

impl Stream for MemoryStream {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        let pos = pos as usize;
        if pos >= self.data.len() {
            return Ok(0);
        }
        let available = &self.data[pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stream_reads_in_range() {
        let s = MemoryStream::new(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 3];
        assert_eq!(s.read_at(1, &mut buf).unwrap(), 3);
        assert_eq!(buf, [2, 3, 4]);
    }

    #[test]
    fn memory_stream_clamps_short_tail_read() {
        let s = MemoryStream::new(vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(s.read_at(1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[2, 3]);
    }

    #[test]
    fn memory_stream_out_of_range_reads_zero() {
        let s = MemoryStream::new(vec![1, 2, 3]);
        let mut buf = [0u8; 4];
        assert_eq!(s.read_at(10, &mut buf).unwrap(), 0);
    }
}
