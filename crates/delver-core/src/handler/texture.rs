use bytes::Bytes;

use crate::error::Result;
use crate::result::Action;
use crate::unit::ScanUnit;

/// A named output produced from a recognized leaf
#[derive(Debug, Clone)]
pub struct Artifact {
    /// File name relative to the unit's directory
    pub name: String,
    /// Output bytes
    pub data: Bytes,
    /// How the artifact was derived
    pub action: Action,
}

impl Artifact {
    /// An artifact emitted as-is
    pub fn extracted(name: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            data,
            action: Action::Extract,
        }
    }
}

/// Turns a texture leaf's payload into output artifacts.
///
/// Decoders for proprietary pixel formats, image optimizers and channel-split
/// recombiners plug in here. Returning no artifacts marks the unit unsupported.
pub trait TextureHandler: Send + Sync {
    /// Produces artifacts for `unit` from its raw `data`
    fn artifacts(&self, unit: &ScanUnit, data: Bytes) -> Result<Vec<Artifact>>;
}

/// Emits every texture unchanged, adding the format's extension when missing
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTextures;

impl TextureHandler for PassthroughTextures {
    fn artifacts(&self, unit: &ScanUnit, data: Bytes) -> Result<Vec<Artifact>> {
        let mut name = unit.file_name().to_string();
        let ext = &unit.format().extension;
        let has_ext = crate::catalog::extension_of(&name).is_some_and(|e| e.eq_ignore_ascii_case(ext));
        if !ext.is_empty() && !has_ext {
            name.push('.');
            name.push_str(ext);
        }
        Ok(vec![Artifact::extracted(name, data)])
    }
}
