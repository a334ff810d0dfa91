//! Byte sources and zero-copy views.
//!
//! Every item the engine touches, whether a file on disk, an entry inside an
//! archive inside a disk image, or a buffer produced by a decompressor, is
//! exposed as a [`ByteSource`]: a length plus a positioned read. Sources carry
//! no cursor of their own, so any number of views can share one underlying
//! handle. Callers that need `Read + Seek` wrap a source in a [`SourceReader`],
//! which owns its cursor privately.
//!
//! ```text
//! FileSource (Mutex<File>)
//!   └── BoundedView [0x400..0x9000)        partition
//!         └── BoundedView [0x200..0x1200)  archive entry
//! ```

pub mod endian;
mod view;

pub use view::{BoundedView, ConcatenatedView};

use bytes::Bytes;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};

/// A random-access, read-only byte source.
pub trait ByteSource: Send + Sync + fmt::Debug {
    /// Total length in bytes
    fn len(&self) -> u64;

    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read; `0` means `offset` is at or past the end.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Returns true if the source holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reference-counted source shared between views and workers
pub type SharedSource = Arc<dyn ByteSource>;

/// Fills `buf` completely from `offset`, failing with `UnexpectedEof` on a short source.
pub fn read_exact_at(source: &dyn ByteSource, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match source.read_at(offset, buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "byte source ended before buffer was filled",
                ))
            }
            Ok(n) => {
                offset += n as u64;
                buf = &mut buf[n..];
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Reads at most `max` bytes from the start of the source.
pub fn read_prefix(source: &dyn ByteSource, max: usize) -> io::Result<Vec<u8>> {
    let want = source.len().min(max as u64) as usize;
    let mut buf = vec![0u8; want];
    read_exact_at(source, 0, &mut buf)?;
    Ok(buf)
}

/// Materializes the whole source into memory.
pub fn read_all(source: &dyn ByteSource) -> io::Result<Bytes> {
    let len = usize::try_from(source.len())
        .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "source too large for memory"))?;
    let mut buf = vec![0u8; len];
    read_exact_at(source, 0, &mut buf)?;
    Ok(Bytes::from(buf))
}

/// An on-disk file shared by any number of views.
///
/// The OS handle has a single cursor, so each positioned read performs
/// seek-then-read while holding the handle's lock.
pub struct FileSource {
    path: PathBuf,
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    /// Opens a file for shared positioned reads
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::file_read(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| Error::file_read(path, e))?
            .len();
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            len,
        })
    }

    /// Path the source was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let max = (self.len - offset).min(buf.len() as u64) as usize;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset))?;
        file.read(&mut buf[..max])
    }
}

/// An owned in-memory buffer.
#[derive(Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    /// Wraps a buffer
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Returns the backing buffer
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("len", &self.data.len())
            .finish()
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}

/// `Read + Seek` adapter with a private cursor over a shared source.
#[derive(Debug, Clone)]
pub struct SourceReader {
    source: SharedSource,
    pos: u64,
}

impl SourceReader {
    /// Creates a reader positioned at offset 0
    pub fn new(source: SharedSource) -> Self {
        Self { source, pos: 0 }
    }

    /// Current cursor position
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.source.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SourceReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.source.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(target) => {
                self.pos = target;
                Ok(target)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}
