use bytes::Bytes;
use flate2::read::{MultiGzDecoder, ZlibDecoder};
use std::io::Read;

use super::CompressionHandler;
use crate::error::{Error, Result};
use crate::stream::{SharedSource, SourceReader};

/// Inflates `reader` into memory, enforcing `limit`.
fn inflate(format: &'static str, reader: impl Read, limit: u64) -> Result<Bytes> {
    let mut out = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| Error::decompress(format, e))?;
    if out.len() as u64 > limit {
        return Err(Error::DecompressLimit { limit });
    }
    if out.is_empty() {
        return Err(Error::corrupt(format, "stream decompressed to nothing"));
    }
    Ok(Bytes::from(out))
}

/// gzip streams, including concatenated members
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipHandler;

impl CompressionHandler for GzipHandler {
    fn decompress(&self, source: SharedSource, limit: u64) -> Result<Bytes> {
        inflate("gzip", MultiGzDecoder::new(SourceReader::new(source)), limit)
    }
}

/// Raw zlib streams
#[derive(Debug, Clone, Copy, Default)]
pub struct ZlibHandler;

impl CompressionHandler for ZlibHandler {
    fn decompress(&self, source: SharedSource, limit: u64) -> Result<Bytes> {
        inflate("zlib", ZlibDecoder::new(SourceReader::new(source)), limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemorySource;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;
    use std::sync::Arc;

    fn gzip(data: &[u8]) -> SharedSource {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        Arc::new(MemorySource::new(enc.finish().unwrap()))
    }

    #[test]
    fn test_gzip_roundtrip() {
        let out = GzipHandler.decompress(gzip(b"texture payload"), 1024).unwrap();
        assert_eq!(&out[..], b"texture payload");
    }

    #[test]
    fn test_zlib_stream() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::best());
        enc.write_all(&[7u8; 300]).unwrap();
        let src: SharedSource = Arc::new(MemorySource::new(enc.finish().unwrap()));
        let out = ZlibHandler.decompress(src, 300).unwrap();
        assert_eq!(out.len(), 300);
    }

    #[test]
    fn test_limit_enforced() {
        let err = GzipHandler.decompress(gzip(&[0u8; 4096]), 100).unwrap_err();
        assert!(matches!(err, Error::DecompressLimit { limit: 100 }));
    }

    #[test]
    fn test_garbage_rejected() {
        let src: SharedSource = Arc::new(MemorySource::new(&b"definitely not deflate"[..]));
        assert!(GzipHandler.decompress(src.clone(), 1024).is_err());
        assert!(ZlibHandler.decompress(src, 1024).is_err());
    }

    #[test]
    fn test_truncated_stream() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&[1u8; 2048]).unwrap();
        let mut data = enc.finish().unwrap();
        data.truncate(data.len() / 2);
        let src: SharedSource = Arc::new(MemorySource::new(data));
        assert!(GzipHandler.decompress(src, 1 << 20).unwrap_err().is_corrupt());
    }
}
