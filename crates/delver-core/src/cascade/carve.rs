use memchr::memmem::Finder;
use std::borrow::Cow;
use std::collections::BTreeMap;
use tracing::trace;

use crate::catalog::{FormatCatalog, FormatDescriptor};
use crate::error::Result;
use crate::stream::{read_exact_at, ByteSource};

/// Bytes examined per read while searching for signatures
const WINDOW: usize = 1 << 20;

/// Extension given to data preceding the first anchor
const LEADING_EXTENSION: &str = "bin";

/// A sub-region located inside raw data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarvedRegion {
    /// Start offset in the source
    pub offset: u64,
    /// Length in bytes
    pub len: u64,
    /// Extension of the signature that anchored the region
    pub extension: Cow<'static, str>,
}

/// Splits raw data into sub-regions at detected boundaries
pub trait Carver: Send + Sync {
    /// Locates sub-regions in `source`; an empty result means nothing was found.
    fn carve(&self, source: &dyn ByteSource) -> Result<Vec<CarvedRegion>>;
}

#[derive(Debug, Clone)]
struct Anchor {
    offset: u64,
    finder: Finder<'static>,
    extension: Cow<'static, str>,
}

/// Cuts data at every occurrence of a set of multi-byte signatures.
///
/// Each region runs from one anchor to the next, the last to the end of the
/// source. Data before the first anchor becomes a leading `bin` region, and
/// a single region spanning the whole source is not reported.
#[derive(Debug, Clone)]
pub struct SignatureCarver {
    anchors: Vec<Anchor>,
    window: usize,
}

impl SignatureCarver {
    /// Uses every catalog entry marked carvable
    pub fn from_catalog(catalog: &FormatCatalog) -> Self {
        let anchors = catalog
            .entries()
            .iter()
            .filter(|e| e.carve)
            .filter_map(|e| {
                let sig = e.signature.as_ref().filter(|sig| !sig.magic.is_empty())?;
                Some(Anchor {
                    offset: sig.offset,
                    finder: Finder::new(&*sig.magic).into_owned(),
                    extension: e.extension.clone(),
                })
            })
            .collect();
        Self {
            anchors,
            window: WINDOW,
        }
    }

    /// Carves at a single format's signature only
    pub fn for_format(format: &FormatDescriptor) -> Self {
        Self::from_catalog(&FormatCatalog::new(vec![format.clone().carvable()]))
    }

    /// Overrides the read window, mainly for tests
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    fn overlap(&self) -> usize {
        self.anchors
            .iter()
            .map(|a| a.finder.needle().len())
            .max()
            .unwrap_or(1)
            .saturating_sub(1)
    }
}

impl Carver for SignatureCarver {
    fn carve(&self, source: &dyn ByteSource) -> Result<Vec<CarvedRegion>> {
        let total = source.len();
        let mut starts: BTreeMap<u64, Cow<'static, str>> = BTreeMap::new();
        let mut buf = vec![0u8; self.window + self.overlap()];
        let mut base = 0u64;

        while base < total {
            let take = (total - base).min(buf.len() as u64) as usize;
            let chunk = &mut buf[..take];
            read_exact_at(source, base, chunk)?;
            for anchor in &self.anchors {
                for pos in anchor.finder.find_iter(chunk) {
                    if let Some(start) = (base + pos as u64).checked_sub(anchor.offset) {
                        starts.entry(start).or_insert_with(|| anchor.extension.clone());
                    }
                }
            }
            base += self.window as u64;
        }

        if let Some(&first) = starts.keys().next() {
            if first > 0 {
                starts.insert(0, Cow::Borrowed(LEADING_EXTENSION));
            }
        }

        let bounds: Vec<u64> = starts.keys().copied().chain(std::iter::once(total)).collect();
        let regions: Vec<CarvedRegion> = starts
            .into_iter()
            .zip(bounds.windows(2))
            .map(|((offset, extension), pair)| CarvedRegion {
                offset,
                len: pair[1] - pair[0],
                extension,
            })
            .filter(|r| !(r.offset == 0 && r.len == total))
            .collect();

        trace!(regions = regions.len(), "signature carve complete");
        Ok(regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemorySource;
    use pretty_assertions::assert_eq;

    const GZ: &[u8] = b"\x1f\x8b\x08";

    fn carver() -> SignatureCarver {
        SignatureCarver::from_catalog(&FormatCatalog::shared())
    }

    #[test]
    fn test_repeated_anchor() {
        let mut data = vec![0u8; 4];
        for _ in 0..3 {
            data.extend_from_slice(GZ);
            data.extend_from_slice(&[9u8; 5]);
        }
        let offsets: Vec<u64> = carver()
            .carve(&MemorySource::new(data))
            .unwrap()
            .into_iter()
            .map(|r| r.offset)
            .collect();
        assert_eq!(offsets, vec![0, 4, 12, 20]);
    }

    #[test]
    fn test_cuts_between_anchors() {
        let mut data = vec![0xEEu8; 10];
        data.extend_from_slice(GZ);
        data.extend_from_slice(&[1u8; 7]);
        data.extend_from_slice(b"PK\x03\x04");
        data.extend_from_slice(&[2u8; 6]);

        let regions = carver().carve(&MemorySource::new(data)).unwrap();
        assert_eq!(
            regions,
            vec![
                CarvedRegion { offset: 0, len: 10, extension: "bin".into() },
                CarvedRegion { offset: 10, len: 10, extension: "gz".into() },
                CarvedRegion { offset: 20, len: 10, extension: "zip".into() },
            ]
        );
    }

    #[test]
    fn test_anchor_across_window_boundary() {
        let mut data = vec![0u8; 30];
        data[6..9].copy_from_slice(GZ);
        let regions = carver()
            .with_window(8)
            .carve(&MemorySource::new(data))
            .unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!((regions[0].offset, regions[0].len), (0, 6));
        assert_eq!((regions[1].offset, regions[1].len), (6, 24));
    }

    #[test]
    fn test_whole_source_region_dropped() {
        let mut data = GZ.to_vec();
        data.extend_from_slice(&[0u8; 16]);
        assert!(carver().carve(&MemorySource::new(data)).unwrap().is_empty());
    }

    #[test]
    fn test_nothing_found() {
        let data = vec![0x41u8; 64];
        assert!(carver().carve(&MemorySource::new(data)).unwrap().is_empty());
    }
}
