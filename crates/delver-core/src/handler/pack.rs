//! The PACK container.
//!
//! A small little-endian archive format:
//!
//! ```text
//! offset  size  field
//! 0       4     magic "PACK"
//! 4       2     version (1 = inline data, 2 = data in a sibling file)
//! 6       2     entry count
//! 8       4     declared container size
//! 12      ..    v2 only: sibling file name (u8 length + bytes)
//! ..      ..    entries: name (u8 length + bytes), extent count (u8),
//!               extents (offset u32, length u32) * count
//! ```
//!
//! An entry's data is the concatenation of its extents. Version 1 extents
//! point into the container itself, after the entry table and before the
//! declared size; version 2 extents point into the sibling. Extents never
//! overlap, so nested entries always shrink.

use std::sync::Arc;

use tracing::trace;

use super::{ArchiveNode, ContainerHandler, SiblingResolver};
use crate::error::{Error, Result};
use crate::stream::endian::{Endian, EndianReader, EndianWriter};
use crate::stream::{read_prefix, BoundedView, ByteSource, ConcatenatedView, SharedSource};

/// Leading magic of every PACK container
pub const PACK_MAGIC: &[u8; 4] = b"PACK";

const VERSION_INLINE: u16 = 1;
const VERSION_SIBLING: u16 = 2;

/// Largest entry table read while opening
const MAX_TABLE_SIZE: usize = 4 << 20;

/// One entry as declared in the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    /// Declared name
    pub name: String,
    /// `(offset, length)` extents in data order
    pub extents: Vec<(u32, u32)>,
}

impl PackEntry {
    /// Total entry length
    pub fn len(&self) -> u64 {
        self.extents.iter().map(|&(_, len)| len as u64).sum()
    }

    /// Returns true for entries without data
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parses PACK containers
#[derive(Debug, Default)]
pub struct PackHandler {
    entries: Vec<PackEntry>,
    declared_len: Option<u64>,
}

impl PackHandler {
    /// Creates a handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries parsed by the last open
    pub fn entries(&self) -> &[PackEntry] {
        &self.entries
    }

    fn parse_table(&mut self, table: &[u8], available: u64) -> Result<(usize, Option<String>)> {
        let mut reader = EndianReader::new(table, Endian::Little);
        if reader.read_bytes(4)? != PACK_MAGIC {
            return Err(Error::corrupt("pack", "missing PACK magic"));
        }
        let version = reader.read_u16()?;
        let count = reader.read_u16()?;
        let declared = reader.read_u32()? as u64;

        if declared > available {
            return Err(Error::corrupt(
                "pack",
                format!("declared size {declared} exceeds available {available} bytes"),
            ));
        }

        let sibling = match version {
            VERSION_INLINE => None,
            VERSION_SIBLING => Some(reader.read_short_string()?),
            other => {
                return Err(Error::corrupt("pack", format!("unsupported version {other}")))
            }
        };

        self.entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = reader.read_short_string()?;
            let extent_count = reader.read_u8()?;
            let mut extents = Vec::with_capacity(extent_count as usize);
            for _ in 0..extent_count {
                extents.push((reader.read_u32()?, reader.read_u32()?));
            }
            self.entries.push(PackEntry { name, extents });
        }

        let table_end = reader.position();
        if (table_end as u64) > declared {
            return Err(Error::corrupt(
                "pack",
                format!("entry table ends at {table_end}, past declared size {declared}"),
            ));
        }
        self.declared_len = Some(declared);
        Ok((table_end, sibling))
    }

    /// Verifies every extent lies in `[data_start, data_end)` and none overlap.
    fn check_extents(&self, data_start: u64, data_end: u64) -> Result<()> {
        let mut spans: Vec<(u64, u64)> = self
            .entries
            .iter()
            .flat_map(|e| e.extents.iter())
            .filter(|&&(_, len)| len > 0)
            .map(|&(offset, len)| (offset as u64, offset as u64 + len as u64))
            .collect();
        spans.sort_unstable();

        let mut cursor = data_start;
        for (start, end) in spans {
            if start < cursor || end > data_end {
                return Err(Error::corrupt(
                    "pack",
                    format!("extent {start}..{end} overlaps or leaves data area {data_start}..{data_end}"),
                ));
            }
            cursor = end;
        }
        Ok(())
    }
}

impl ContainerHandler for PackHandler {
    fn open(&mut self, source: SharedSource, siblings: &dyn SiblingResolver) -> Result<ArchiveNode> {
        let table = read_prefix(source.as_ref(), MAX_TABLE_SIZE)?;
        let (table_end, sibling) = self.parse_table(&table, source.len())?;
        let declared = self.declared_len.unwrap_or(0);

        let data: SharedSource = match &sibling {
            Some(name) => {
                trace!(sibling = %name, "pack data lives in sibling");
                let data = siblings.resolve(name)?;
                self.check_extents(0, data.len())?;
                data
            }
            None => {
                self.check_extents(table_end as u64, declared)?;
                source
            }
        };

        let mut children = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let mut parts = Vec::with_capacity(entry.extents.len());
            for &(offset, len) in &entry.extents {
                parts.push(BoundedView::shared(data.clone(), offset as u64, len as u64)?);
            }
            let entry_source: SharedSource = if parts.len() == 1 {
                parts.remove(0)
            } else {
                Arc::new(ConcatenatedView::new(parts))
            };
            children.push((entry.name.clone(), entry_source));
        }
        Ok(ArchiveNode::from_paths(children))
    }

    fn logical_len(&self) -> Option<u64> {
        self.declared_len
    }
}

/// Builds PACK containers
#[derive(Debug, Default, Clone)]
pub struct PackWriter {
    entries: Vec<(String, Vec<u8>, usize)>,
}

impl PackWriter {
    /// Creates an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry stored as one extent
    pub fn add(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> &mut Self {
        self.add_split(name, data, 1)
    }

    /// Adds an entry stored as `parts` extents, laid out in reverse order
    pub fn add_split(
        &mut self,
        name: impl Into<String>,
        data: impl Into<Vec<u8>>,
        parts: usize,
    ) -> &mut Self {
        self.entries.push((name.into(), data.into(), parts.clamp(1, 255)));
        self
    }

    fn encode(&self, sibling: Option<&str>) -> Result<(Vec<u8>, Vec<u8>)> {
        let pieces: Vec<Vec<&[u8]>> = self
            .entries
            .iter()
            .map(|(_, bytes, parts)| {
                let chunk = bytes.len().div_ceil(*parts).max(1);
                bytes.chunks(chunk).collect()
            })
            .collect();
        let table_len = 12
            + sibling.map_or(0, |s| 1 + short_len(s))
            + self
                .entries
                .iter()
                .zip(&pieces)
                .map(|((name, _, _), p)| 1 + short_len(name) + 1 + p.len() * 8)
                .sum::<usize>();
        let data_base = if sibling.is_some() { 0 } else { table_len };

        // lay out data first so the table can reference it
        let mut data = Vec::new();
        let mut extents = Vec::with_capacity(pieces.len());
        for chunks in &pieces {
            let mut placed = vec![(0u32, 0u32); chunks.len()];
            for (i, piece) in chunks.iter().enumerate().rev() {
                let offset = u32::try_from(data_base + data.len())
                    .map_err(|_| Error::internal("pack exceeds 4 GiB"))?;
                placed[i] = (offset, piece.len() as u32);
                data.extend_from_slice(piece);
            }
            extents.push(placed);
        }

        let mut writer = EndianWriter::new(Endian::Little);
        let version = if sibling.is_some() { VERSION_SIBLING } else { VERSION_INLINE };
        writer
            .write_bytes(PACK_MAGIC)
            .write_u16(version)
            .write_u16(self.entries.len() as u16)
            .write_u32(0);
        if let Some(name) = sibling {
            write_short_string(&mut writer, name);
        }
        for ((name, _, _), placed) in self.entries.iter().zip(&extents) {
            write_short_string(&mut writer, name);
            writer.write_u8(placed.len() as u8);
            for &(offset, len) in placed {
                writer.write_u32(offset).write_u32(len);
            }
        }
        debug_assert_eq!(writer.len(), table_len);
        Ok((writer.into_inner(), data))
    }

    /// Encodes a self-contained (version 1) container
    pub fn finish(&self) -> Result<Vec<u8>> {
        let (table, data) = self.encode(None)?;
        let total = u32::try_from(table.len() + data.len())
            .map_err(|_| Error::internal("pack exceeds 4 GiB"))?;
        let mut writer = EndianWriter::new(Endian::Little);
        writer.write_bytes(&table).write_bytes(&data);
        writer.patch_u32(8, total)?;
        Ok(writer.into_inner())
    }

    /// Encodes a version 2 index plus the sibling data file it references
    pub fn finish_with_sibling(&self, sibling: &str) -> Result<(Vec<u8>, Vec<u8>)> {
        let (table, data) = self.encode(Some(sibling))?;
        let mut writer = EndianWriter::new(Endian::Little);
        writer.write_bytes(&table);
        writer.patch_u32(8, table.len() as u32)?;
        Ok((writer.into_inner(), data))
    }
}

/// Encoded length of a name, cut to 255 bytes on a char boundary
fn short_len(value: &str) -> usize {
    let mut end = value.len().min(255);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    end
}

fn write_short_string(writer: &mut EndianWriter, value: &str) {
    let end = short_len(value);
    writer.write_u8(end as u8).write_bytes(&value.as_bytes()[..end]);
}
