//! Strategies decide what happens to each unit.
//!
//! The engine owns traversal, identification, accounting and error
//! containment; a [`ScanStrategy`] only answers "what do I do with this one
//! unit" and calls back into the engine to emit, descend or run the
//! extraction cascade.

use tracing::debug;

use super::emit::ALTERNATIVES_DIR;
use super::Engine;
use crate::cascade::Cascaded;
use crate::catalog::Category;
use crate::error::Result;
use crate::handler::{Artifact, PassthroughTextures, TextureHandler};
use crate::result::Action;
use crate::stream::read_all;
use crate::unit::{join_path, ScanUnit};

/// What a strategy did with a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Action recorded in the run log
    pub action: Action,
    /// Diagnostic text
    pub detail: String,
}

impl Verdict {
    /// Creates a verdict
    pub fn new(action: Action, detail: impl Into<String>) -> Self {
        Self {
            action,
            detail: detail.into(),
        }
    }

    /// Verdict for a unit nothing could be done with
    pub fn unresolved(unit: &ScanUnit, detail: impl Into<String>) -> Self {
        let action = if unit.format().category.is_identified() {
            Action::Unsupported
        } else {
            Action::Unknown
        };
        Self::new(action, detail)
    }
}

/// Per-unit behavior plugged into the [`Engine`]
pub trait ScanStrategy: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Handles one unit; errors are contained by the engine
    fn handle(&self, engine: &Engine, unit: &ScanUnit) -> Result<Verdict>;
}

/// Unpacks containers and compressed streams, extracts textures, and
/// optionally passes everything else through unchanged.
pub struct ExtractStrategy {
    textures: Box<dyn TextureHandler>,
}

impl Default for ExtractStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractStrategy {
    /// Uses the pass-through texture handler
    pub fn new() -> Self {
        Self::with_textures(PassthroughTextures)
    }

    /// Uses a custom texture handler
    pub fn with_textures(textures: impl TextureHandler + 'static) -> Self {
        Self {
            textures: Box::new(textures),
        }
    }

    fn extract_texture(&self, engine: &Engine, unit: &ScanUnit) -> Result<Verdict> {
        let data = read_all(unit.source().as_ref())?;
        let artifacts = self.textures.artifacts(unit, data)?;
        if artifacts.is_empty() {
            return Ok(Verdict::new(Action::Unsupported, "texture handler produced no output"));
        }

        let mut action = Action::Duplicate;
        for artifact in &artifacts {
            let rel = join_path(unit.parent_path(), &artifact.name);
            let emitted = engine.emit_artifact(artifact, &rel)?;
            if action == Action::Duplicate {
                action = emitted;
            }
        }
        Ok(Verdict::new(action, format!("{} artifact(s)", artifacts.len())))
    }

    fn passthrough(&self, engine: &Engine, unit: &ScanUnit) -> Result<Verdict> {
        let data = read_all(unit.source().as_ref())?;
        let artifact = Artifact::extracted(unit.file_name(), data);
        let action = engine.emit_artifact(&artifact, unit.path())?;
        Ok(Verdict::new(action, "raw pass-through"))
    }
}

impl ScanStrategy for ExtractStrategy {
    fn name(&self) -> &'static str {
        "extract"
    }

    fn handle(&self, engine: &Engine, unit: &ScanUnit) -> Result<Verdict> {
        match unit.format().category {
            Category::Texture => self.extract_texture(engine, unit),
            Category::Archive
            | Category::Compressed
            | Category::Disk
            | Category::Generic
            | Category::Unknown => match engine.cascade(unit)? {
                Cascaded::Handled(verdict) => Ok(verdict),
                Cascaded::Unresolved if engine.options().raw_passthrough => {
                    let rel = format!("{ALTERNATIVES_DIR}/{}", unit.path());
                    engine.emit(unit.source(), &rel)?;
                    Ok(Verdict::unresolved(unit, format!("copied to {ALTERNATIVES_DIR}")))
                }
                Cascaded::Unresolved => Ok(Verdict::unresolved(unit, "no structure found")),
            },
            _ if engine.options().raw_passthrough => self.passthrough(engine, unit),
            category => {
                debug!(%category, "no handler for category");
                Ok(Verdict::new(Action::Unsupported, format!("no handler for {category}")))
            }
        }
    }
}

/// Cuts every leaf at embedded signatures and copies what cannot be cut.
#[derive(Debug, Clone, Copy, Default)]
pub struct CutStrategy;

impl ScanStrategy for CutStrategy {
    fn name(&self) -> &'static str {
        "cut"
    }

    fn handle(&self, engine: &Engine, unit: &ScanUnit) -> Result<Verdict> {
        let category = unit.format().category;
        let cascaded = if category.is_container() || category == Category::Compressed {
            engine.cascade(unit)?
        } else {
            engine.try_cut(unit)?
        };
        if let Cascaded::Handled(verdict) = cascaded {
            return Ok(verdict);
        }

        let data = read_all(unit.source().as_ref())?;
        let artifact = Artifact::extracted(unit.file_name(), data);
        let action = engine.emit_artifact(&artifact, unit.path())?;
        Ok(Verdict::new(action, "copied verbatim"))
    }
}
