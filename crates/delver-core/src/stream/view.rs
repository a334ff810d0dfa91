use std::fmt;
use std::io;
use std::sync::Arc;

use super::{ByteSource, SharedSource};

/// A window `[start, start + len)` into another source.
#[derive(Clone)]
pub struct BoundedView {
    inner: SharedSource,
    start: u64,
    len: u64,
}

impl BoundedView {
    /// Creates a view, failing if the window does not fit inside `inner`.
    pub fn new(inner: SharedSource, start: u64, len: u64) -> io::Result<Self> {
        let end = start
            .checked_add(len)
            .filter(|&end| end <= inner.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "view {start}+{len} exceeds source length {}",
                        inner.len()
                    ),
                )
            })?;
        debug_assert!(end >= start);
        Ok(Self { inner, start, len })
    }

    /// Same as [`BoundedView::new`] but returns a shared handle
    pub fn shared(inner: SharedSource, start: u64, len: u64) -> io::Result<SharedSource> {
        Ok(Arc::new(Self::new(inner, start, len)?))
    }

    /// Offset of the window inside its parent
    pub fn start(&self) -> u64 {
        self.start
    }
}

impl fmt::Debug for BoundedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedView")
            .field("start", &self.start)
            .field("len", &self.len)
            .field("inner", &self.inner)
            .finish()
    }
}

impl ByteSource for BoundedView {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let max = (self.len - offset).min(buf.len() as u64) as usize;
        self.inner.read_at(self.start + offset, &mut buf[..max])
    }
}

/// Several sources presented back to back as one.
pub struct ConcatenatedView {
    parts: Vec<SharedSource>,
    // ends[i] is the exclusive end offset of parts[i]
    ends: Vec<u64>,
}

impl ConcatenatedView {
    /// Joins `parts` in order
    pub fn new(parts: Vec<SharedSource>) -> Self {
        let mut total = 0u64;
        let ends = parts
            .iter()
            .map(|p| {
                total = total.saturating_add(p.len());
                total
            })
            .collect();
        Self { parts, ends }
    }

    /// Number of joined parts
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }
}

impl fmt::Debug for ConcatenatedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcatenatedView")
            .field("parts", &self.parts.len())
            .field("len", &self.len())
            .finish()
    }
}

impl ByteSource for ConcatenatedView {
    fn len(&self) -> u64 {
        self.ends.last().copied().unwrap_or(0)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0usize;
        let mut pos = offset;
        let mut idx = self.ends.partition_point(|&end| end <= pos);

        while filled < buf.len() && idx < self.parts.len() {
            let part_start = if idx == 0 { 0 } else { self.ends[idx - 1] };
            let n = self.parts[idx].read_at(pos - part_start, &mut buf[filled..])?;
            if n == 0 {
                // part shorter than it advertised
                break;
            }
            filled += n;
            pos += n as u64;
            while idx < self.ends.len() && self.ends[idx] <= pos {
                idx += 1;
            }
        }
        Ok(filled)
    }
}
