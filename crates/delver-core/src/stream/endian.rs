//! Endianness-aware decoding and encoding of fixed-layout fields.
//!
//! Container headers are parsed field by field from a byte slice; every read
//! is bounds-checked and reports the offset it failed at, so a truncated or
//! hostile header surfaces as [`Error::Truncated`] instead of a panic.

use crate::error::{Error, Result};

/// Byte order of multi-byte fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

/// Cursor over a byte slice that decodes integers in a fixed byte order.
#[derive(Debug, Clone)]
pub struct EndianReader<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endian,
}

impl<'a> EndianReader<'a> {
    /// Creates a reader at offset 0
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self {
            data,
            pos: 0,
            endian,
        }
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Moves the cursor to an absolute offset
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::truncated(pos, 0, self.data.len()));
        }
        self.pos = pos;
        Ok(())
    }

    /// Advances the cursor by `n` bytes
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// Borrows the next `n` bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::truncated(self.pos, n, self.remaining()));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Reads one byte
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Reads a 16-bit unsigned integer
    pub fn read_u16(&mut self) -> Result<u16> {
        let raw = self.read_array()?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(raw),
            Endian::Big => u16::from_be_bytes(raw),
        })
    }

    /// Reads a 32-bit unsigned integer
    pub fn read_u32(&mut self) -> Result<u32> {
        let raw = self.read_array()?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        })
    }

    /// Reads a 64-bit unsigned integer
    pub fn read_u64(&mut self) -> Result<u64> {
        let raw = self.read_array()?;
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(raw),
            Endian::Big => u64::from_be_bytes(raw),
        })
    }

    /// Reads a `u8`-length-prefixed string, replacing invalid UTF-8
    pub fn read_short_string(&mut self) -> Result<String> {
        let len = self.read_u8()? as usize;
        let raw = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

/// Growable buffer that encodes integers in a fixed byte order.
#[derive(Debug, Clone)]
pub struct EndianWriter {
    buf: Vec<u8>,
    endian: Endian,
}

impl EndianWriter {
    /// Creates an empty writer
    pub fn new(endian: Endian) -> Self {
        Self {
            buf: Vec::new(),
            endian,
        }
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Appends raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Appends one byte
    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    /// Appends a 16-bit unsigned integer
    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        match self.endian {
            Endian::Little => self.write_bytes(&value.to_le_bytes()),
            Endian::Big => self.write_bytes(&value.to_be_bytes()),
        }
    }

    /// Appends a 32-bit unsigned integer
    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        match self.endian {
            Endian::Little => self.write_bytes(&value.to_le_bytes()),
            Endian::Big => self.write_bytes(&value.to_be_bytes()),
        }
    }

    /// Appends a 64-bit unsigned integer
    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        match self.endian {
            Endian::Little => self.write_bytes(&value.to_le_bytes()),
            Endian::Big => self.write_bytes(&value.to_be_bytes()),
        }
    }

    /// Overwrites a previously written 32-bit field at `offset`
    pub fn patch_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        let raw = match self.endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        let available = self.buf.len().saturating_sub(offset);
        let slot = self
            .buf
            .get_mut(offset..offset + 4)
            .ok_or_else(|| Error::truncated(offset, 4, available))?;
        slot.copy_from_slice(&raw);
        Ok(())
    }

    /// Consumes the writer, returning the encoded bytes
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_mixed_endian() {
        let data = [0x34, 0x12, 0x12, 0x34, 0x78, 0x56, 0x34, 0x12];
        let mut le = EndianReader::new(&data, Endian::Little);
        assert_eq!(le.read_u16().unwrap(), 0x1234);
        let mut be = EndianReader::new(&data[2..], Endian::Big);
        assert_eq!(be.read_u16().unwrap(), 0x1234);
        le.seek(4).unwrap();
        assert_eq!(le.read_u32().unwrap(), 0x1234_5678);
        assert_eq!(le.remaining(), 0);
    }

    #[test]
    fn test_truncated_read_reports_offset() {
        let data = [1u8, 2, 3];
        let mut reader = EndianReader::new(&data, Endian::Little);
        reader.skip(2).unwrap();
        match reader.read_u32() {
            Err(Error::Truncated {
                offset,
                needed,
                available,
            }) => {
                assert_eq!((offset, needed, available), (2, 4, 1));
            }
            other => panic!("expected truncation, got {other:?}"),
        }
        // a failed read leaves the cursor untouched
        assert_eq!(reader.position(), 2);
    }

    #[test]
    fn test_short_string() {
        let data = [3u8, b'a', b'b', b'c', 9];
        let mut reader = EndianReader::new(&data, Endian::Big);
        assert_eq!(reader.read_short_string().unwrap(), "abc");
        assert_eq!(reader.read_u8().unwrap(), 9);
    }

    #[test]
    fn test_writer_patch() {
        let mut writer = EndianWriter::new(Endian::Big);
        writer.write_u8(0xAA).write_u32(0).write_u64(1);
        writer.patch_u32(1, 0xDEAD_BEEF).unwrap();
        assert!(writer.patch_u32(11, 1).is_err());

        let bytes = writer.into_inner();
        let mut reader = EndianReader::new(&bytes, Endian::Big);
        assert_eq!(reader.read_u8().unwrap(), 0xAA);
        assert_eq!(reader.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.read_u64().unwrap(), 1);
    }
}
