use tracing::trace;

use super::{ArchiveNode, ContainerHandler, SiblingResolver};
use crate::error::{Error, Result};
use crate::stream::endian::{Endian, EndianReader};
use crate::stream::{read_exact_at, BoundedView, ByteSource, SharedSource};

const SECTOR: u64 = 512;
const TABLE_OFFSET: usize = 446;
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// Disk images partitioned with a classic MBR table.
///
/// Each non-empty primary partition becomes one entry. Partitions must start
/// after the boot sector and end inside the image.
#[derive(Debug, Default)]
pub struct MbrHandler {
    end: Option<u64>,
}

impl MbrHandler {
    /// Creates a handler
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContainerHandler for MbrHandler {
    fn open(&mut self, source: SharedSource, _siblings: &dyn SiblingResolver) -> Result<ArchiveNode> {
        let mut sector = [0u8; SECTOR as usize];
        read_exact_at(source.as_ref(), 0, &mut sector)
            .map_err(|_| Error::truncated(0, SECTOR as usize, source.len() as usize))?;
        if sector[510..] != BOOT_SIGNATURE {
            return Err(Error::corrupt("mbr", "missing boot signature"));
        }

        let mut reader = EndianReader::new(&sector, Endian::Little);
        reader.seek(TABLE_OFFSET)?;

        let mut children = Vec::new();
        let mut end = SECTOR;
        for index in 0..4 {
            let _status = reader.read_u8()?;
            reader.skip(3)?;
            let kind = reader.read_u8()?;
            reader.skip(3)?;
            let first_lba = reader.read_u32()? as u64;
            let sectors = reader.read_u32()? as u64;

            if kind == 0 || sectors == 0 {
                continue;
            }
            if first_lba == 0 {
                return Err(Error::corrupt(
                    "mbr",
                    format!("partition {index} overlaps the boot sector"),
                ));
            }

            let start = first_lba * SECTOR;
            let len = sectors * SECTOR;
            if start + len > source.len() {
                return Err(Error::corrupt(
                    "mbr",
                    format!(
                        "partition {index} ends at {} past image size {}",
                        start + len,
                        source.len()
                    ),
                ));
            }
            trace!(index, kind, start, len, "mbr partition");
            end = end.max(start + len);
            children.push(ArchiveNode::file(
                format!("partition{index}_{kind:02x}"),
                BoundedView::shared(source.clone(), start, len)?,
            ));
        }

        self.end = Some(end);
        Ok(ArchiveNode::root(children))
    }

    fn logical_len(&self) -> Option<u64> {
        self.end
    }
}
