//! Format identification.
//!
//! The catalog is an ordered table of [`FormatDescriptor`]s built once per
//! process. Identification walks the table in declaration order:
//!
//! 1. Entries carrying a [`Signature`] are tried first; the first whose magic
//!    bytes appear at their offset wins.
//! 2. Entries without a signature are matched on file extension.
//! 3. Otherwise a descriptor is synthesized by [`sniff`]ing the leading bytes.
//!
//! A signature-bound entry is never selected by extension alone, so a ZIP
//! named `texture.tga` still identifies as ZIP.

mod sniff;
mod table;

pub use sniff::{sniff, sniff_tag, SNIFF_CAP};

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, OnceLock};

use tracing::trace;

use crate::handler::HandlerId;
use crate::stream::{read_exact_at, ByteSource, MemorySource};

/// Broad class of a format, driving how strategies treat a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Multi-entry archive
    Archive,
    /// Single compressed stream
    Compressed,
    /// Disk or partition image
    Disk,
    /// Image or texture payload
    Texture,
    /// Sound or music payload
    Audio,
    /// 3D model or scene payload
    Model,
    /// Human-readable text
    Text,
    /// Native executable or library
    Executable,
    /// Ad-hoc signature derived by sniffing unrecognized data
    Generic,
    /// Nothing could be derived
    Unknown,
}

impl Category {
    /// Returns true for categories whose entries the engine descends into
    pub fn is_container(self) -> bool {
        matches!(self, Self::Archive | Self::Disk)
    }

    /// Returns true if the catalog recognized the data
    pub fn is_identified(self) -> bool {
        !matches!(self, Self::Generic | Self::Unknown)
    }

    /// Returns true if concurrent random access to entries should be avoided
    pub fn prefers_sequential(self) -> bool {
        matches!(self, Self::Disk)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Archive => "archive",
            Self::Compressed => "compressed",
            Self::Disk => "disk",
            Self::Texture => "texture",
            Self::Audio => "audio",
            Self::Model => "model",
            Self::Text => "text",
            Self::Executable => "executable",
            Self::Generic => "generic",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Magic bytes expected at a fixed offset
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Offset of the magic from the start of the data
    pub offset: u64,
    /// Expected bytes
    pub magic: Cow<'static, [u8]>,
}

impl Signature {
    /// Creates a signature over static magic bytes
    pub fn new(offset: u64, magic: &'static [u8]) -> Self {
        Self {
            offset,
            magic: Cow::Borrowed(magic),
        }
    }

    /// Number of leading bytes needed to test this signature
    pub fn probe_len(&self) -> u64 {
        self.offset + self.magic.len() as u64
    }

    /// Tests the signature against a source
    pub fn matches(&self, source: &dyn ByteSource) -> bool {
        if self.magic.is_empty() || source.len() < self.probe_len() {
            return false;
        }
        let mut buf = vec![0u8; self.magic.len()];
        read_exact_at(source, self.offset, &mut buf).is_ok() && buf[..] == self.magic[..]
    }
}

/// Identified format metadata for a unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormatDescriptor {
    /// Canonical extension, lowercase without the dot
    pub extension: Cow<'static, str>,
    /// Optional magic; when present it is the only way to select this entry
    pub signature: Option<Signature>,
    /// Broad class
    pub category: Category,
    /// Handler bound to this format, if any
    pub handler: Option<HandlerId>,
    /// Whether the signature is used to cut sub-regions out of unknown data
    pub carve: bool,
}

impl FormatDescriptor {
    /// Descriptor selected by magic bytes
    pub fn signed(
        extension: &'static str,
        offset: u64,
        magic: &'static [u8],
        category: Category,
    ) -> Self {
        Self {
            extension: Cow::Borrowed(extension),
            signature: Some(Signature::new(offset, magic)),
            category,
            handler: None,
            carve: false,
        }
    }

    /// Descriptor selected by file extension only
    pub fn by_extension(extension: &'static str, category: Category) -> Self {
        Self {
            extension: Cow::Borrowed(extension),
            signature: None,
            category,
            handler: None,
            carve: false,
        }
    }

    /// The descriptor for data nothing could be derived from
    pub fn unknown() -> Self {
        Self::by_extension("", Category::Unknown)
    }

    /// Binds a handler
    pub fn with_handler(mut self, handler: HandlerId) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Marks the signature as a carving anchor
    pub fn carvable(mut self) -> Self {
        self.carve = true;
        self
    }

    /// Returns true if the extension matches, ignoring ASCII case
    pub fn matches_extension(&self, extension: &str) -> bool {
        !self.extension.is_empty() && self.extension.eq_ignore_ascii_case(extension)
    }

    /// Short label for logs and reports
    pub fn label(&self) -> String {
        if self.extension.is_empty() {
            self.category.to_string()
        } else {
            format!("{} ({})", self.extension, self.category)
        }
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Ordered, read-only table of known formats
#[derive(Debug, Clone)]
pub struct FormatCatalog {
    entries: Vec<FormatDescriptor>,
    probe_len: u64,
}

static BUILTIN: OnceLock<Arc<FormatCatalog>> = OnceLock::new();

impl FormatCatalog {
    /// Creates a catalog from entries in priority order
    pub fn new(entries: Vec<FormatDescriptor>) -> Self {
        let probe_len = entries
            .iter()
            .filter_map(|e| e.signature.as_ref())
            .map(Signature::probe_len)
            .max()
            .unwrap_or(0)
            .max(SNIFF_CAP as u64);
        Self { entries, probe_len }
    }

    /// The process-wide built-in catalog
    pub fn shared() -> Arc<FormatCatalog> {
        BUILTIN
            .get_or_init(|| Arc::new(FormatCatalog::new(table::builtin_entries())))
            .clone()
    }

    /// Entries in priority order
    pub fn entries(&self) -> &[FormatDescriptor] {
        &self.entries
    }

    /// Leading bytes needed to evaluate every signature
    pub fn probe_len(&self) -> u64 {
        self.probe_len
    }

    /// Looks up an entry by extension
    pub fn by_extension(&self, extension: &str) -> Option<&FormatDescriptor> {
        self.entries.iter().find(|e| e.matches_extension(extension))
    }

    /// Identifies a source; `name` supplies the extension fallback.
    pub fn identify(&self, source: &dyn ByteSource, name: &str) -> FormatDescriptor {
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.signature.as_ref().is_some_and(|s| s.matches(source)))
        {
            trace!(name, format = %entry, "identified by signature");
            return entry.clone();
        }

        if let Some(ext) = extension_of(name) {
            if let Some(entry) = self
                .entries
                .iter()
                .find(|e| e.signature.is_none() && e.matches_extension(ext))
            {
                trace!(name, format = %entry, "identified by extension");
                return entry.clone();
            }
        }

        sniff(source)
    }

    /// Identifies a seekable stream, restoring its position before returning.
    pub fn identify_reader<R: Read + Seek>(
        &self,
        reader: &mut R,
        name: &str,
    ) -> io::Result<FormatDescriptor> {
        let origin = reader.stream_position()?;
        reader.seek(SeekFrom::Start(0))?;

        let mut prefix = Vec::new();
        let read = Read::by_ref(reader)
            .take(self.probe_len)
            .read_to_end(&mut prefix);
        reader.seek(SeekFrom::Start(origin))?;
        read?;

        Ok(self.identify(&MemorySource::new(prefix), name))
    }
}

/// Extension of the last path component, without the dot
pub fn extension_of(name: &str) -> Option<&str> {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn mem(data: &[u8]) -> MemorySource {
        MemorySource::new(data.to_vec())
    }

    #[test]
    fn test_png_is_texture() {
        let catalog = FormatCatalog::shared();
        let png = mem(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR");
        let format = catalog.identify(&png, "ui/button.png");
        assert_eq!(format.extension, "png");
        assert_eq!(format.category, Category::Texture);
    }

    #[test]
    fn test_signature_beats_extension() {
        let catalog = FormatCatalog::shared();
        let zip = mem(b"PK\x03\x04\x14\0\0\0\x08\0");
        let format = catalog.identify(&zip, "texture.tga");
        assert_eq!(format.extension, "zip");
        assert_eq!(format.handler, Some(HandlerId::ZIP));
    }

    #[test]
    fn test_extension_fallback() {
        let catalog = FormatCatalog::shared();
        let tga = mem(&[0u8, 0, 2, 0, 0, 0, 0, 0]);
        let format = catalog.identify(&tga, "dir/SKIN.TGA");
        assert_eq!(format.extension, "tga");
        assert_eq!(format.category, Category::Texture);
    }

    #[test]
    fn test_signed_entry_not_selected_by_extension() {
        let catalog = FormatCatalog::shared();
        let junk = mem(&[0u8; 32]);
        let format = catalog.identify(&junk, "fake.png");
        assert_ne!(format.extension, "png");
        assert_eq!(format.category, Category::Unknown);
    }

    #[test]
    fn test_identify_is_deterministic() {
        let catalog = FormatCatalog::shared();
        let data = mem(b"FORMxxxxILBMBMHD");
        let first = catalog.identify(&data, "a.bin");
        for _ in 0..3 {
            assert_eq!(catalog.identify(&data, "a.bin"), first);
        }
    }

    #[test]
    fn test_identify_reader_restores_position() {
        let catalog = FormatCatalog::shared();
        let mut cursor = Cursor::new(b"\x1f\x8b\x08\0\0\0\0\0\0\x03".to_vec());
        cursor.set_position(5);
        let format = catalog.identify_reader(&mut cursor, "blob").unwrap();
        assert_eq!(format.extension, "gz");
        assert_eq!(cursor.position(), 5);
    }

    #[test]
    fn test_signature_offset() {
        let mut disk = vec![0u8; 512];
        disk[510] = 0x55;
        disk[511] = 0xAA;
        let format = FormatCatalog::shared().identify(&mem(&disk), "disk.img");
        assert_eq!(format.category, Category::Disk);
        assert_eq!(format.handler, Some(HandlerId::MBR));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a/b/c.tar.gz"), Some("gz"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of(".hidden"), None);
        assert_eq!(extension_of("dir.d\\file"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn test_probe_len_covers_signatures() {
        let catalog = FormatCatalog::shared();
        assert!(catalog.probe_len() >= 512);
    }
}
