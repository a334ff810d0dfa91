use ::zip::result::ZipError;
use ::zip::ZipArchive;
use std::io::Read;
use std::sync::Arc;
use tracing::debug;

use super::{ArchiveNode, ContainerHandler, SiblingResolver};
use crate::error::{Error, Result};
use crate::stream::{MemorySource, SharedSource, SourceReader};

/// Entry size ceiling used by [`ZipHandler::new`]
pub const DEFAULT_ENTRY_LIMIT: u64 = 256 * 1024 * 1024;

/// ZIP archives via the `zip` crate.
///
/// Entries are inflated into memory while opening; entries using an
/// unsupported method or failing their CRC are skipped, not fatal. An entry
/// inflating past the limit fails the whole archive.
#[derive(Debug)]
pub struct ZipHandler {
    limit: u64,
    skipped: usize,
}

impl Default for ZipHandler {
    fn default() -> Self {
        Self::with_limit(DEFAULT_ENTRY_LIMIT)
    }
}

impl ZipHandler {
    /// Creates a handler with the default entry limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler refusing entries larger than `limit` bytes
    pub fn with_limit(limit: u64) -> Self {
        Self { limit, skipped: 0 }
    }

    /// Entries skipped during the last open
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl ContainerHandler for ZipHandler {
    fn open(&mut self, source: SharedSource, _siblings: &dyn SiblingResolver) -> Result<ArchiveNode> {
        let mut archive = ZipArchive::new(SourceReader::new(source))?;
        let mut entries = Vec::with_capacity(archive.len());
        self.skipped = 0;

        for index in 0..archive.len() {
            let mut file = match archive.by_index(index) {
                Ok(file) => file,
                Err(ZipError::UnsupportedArchive(reason)) => {
                    debug!(index, reason, "skipping unsupported zip entry");
                    self.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if file.is_dir() {
                continue;
            }

            let name = file.name().to_string();
            if file.size() > self.limit {
                return Err(Error::DecompressLimit { limit: self.limit });
            }
            let mut data = Vec::with_capacity(file.size() as usize);
            let read = file
                .by_ref()
                .take(self.limit.saturating_add(1))
                .read_to_end(&mut data);
            if let Err(e) = read {
                debug!(entry = %name, error = %e, "skipping unreadable zip entry");
                self.skipped += 1;
                continue;
            }
            if data.len() as u64 > self.limit {
                return Err(Error::DecompressLimit { limit: self.limit });
            }
            entries.push((name, Arc::new(MemorySource::new(data)) as SharedSource));
        }

        if entries.is_empty() && self.skipped > 0 {
            return Err(Error::corrupt("zip", "no readable entries"));
        }
        Ok(ArchiveNode::from_paths(entries))
    }
}
