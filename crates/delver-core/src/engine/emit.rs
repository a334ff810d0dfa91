use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::stream::{SharedSource, SourceReader};
use crate::unit::sanitize_component;

/// Repeated artifacts
pub const DUPLICATES_DIR: &str = "~Duplicates";
/// Units that failed with a structural error
pub const CORRUPT_DIR: &str = "~Corrupt";
/// Units that failed for any other reason
pub const EXCEPTION_DIR: &str = "~Exception";
/// Unresolved units copied verbatim
pub const ALTERNATIVES_DIR: &str = "~Alternatives";

/// OS metadata files never written to the output tree
const DENY_LIST: &[&str] = &["thumbs.db", "desktop.ini", ".ds_store"];

/// Suffix given to a plain file moved out of the way of a directory
const FILE_ASIDE_SUFFIX: &str = ".~file";

/// Result of an emit request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitStatus {
    /// Bytes written
    Written(u64),
    /// Dry run, nothing written
    DryRun,
    /// Destination already existed and was left alone
    Exists,
    /// Destination name is on the deny-list
    Denied,
}

/// Writes byte regions below an output root
#[derive(Debug, Clone)]
pub struct Emitter {
    root: PathBuf,
    dry_run: bool,
}

impl Emitter {
    /// Creates an emitter rooted at `root`
    pub fn new(root: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            root: root.into(),
            dry_run,
        }
    }

    /// Output root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a slash-separated logical path below the root.
    ///
    /// Parent references and absolute paths are rejected.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let mut out = self.root.clone();
        let mut depth = 0usize;
        for part in rel.split(['/', '\\']) {
            if part.is_empty() || part == "." {
                continue;
            }
            if part == ".." {
                return Err(Error::path_traversal(rel));
            }
            let part = sanitize_component(part);
            if part.is_empty() {
                continue;
            }
            let piece = Path::new(&part);
            if !matches!(piece.components().next(), Some(Component::Normal(_))) {
                return Err(Error::path_traversal(rel));
            }
            out.push(piece);
            depth += 1;
        }
        if depth == 0 {
            return Err(Error::path_traversal(rel));
        }
        Ok(out)
    }

    /// Writes `source` to `rel` below the root.
    ///
    /// Existing files are never overwritten. Missing parent directories are
    /// created; a plain file standing where a directory is needed is renamed
    /// aside first.
    pub fn emit(&self, source: &SharedSource, rel: &str) -> Result<EmitStatus> {
        let path = self.resolve(rel)?;
        let denied = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| DENY_LIST.iter().any(|d| d.eq_ignore_ascii_case(n)));
        if denied {
            debug!(path = rel, "skipping deny-listed name");
            return Ok(EmitStatus::Denied);
        }
        if self.dry_run {
            trace!(path = rel, "dry run");
            return Ok(EmitStatus::DryRun);
        }

        if let Some(parent) = path.parent() {
            self.prepare_dirs(parent)?;
        }

        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "destination exists");
                return Ok(EmitStatus::Exists);
            }
            Err(e) => return Err(Error::file_write(&path, e)),
        };

        let mut writer = BufWriter::new(file);
        let written = io::copy(&mut SourceReader::new(source.clone()), &mut writer)
            .and_then(|n| writer.flush().map(|()| n))
            .map_err(|e| Error::file_write(&path, e))?;
        trace!(path = %path.display(), bytes = written, "wrote artifact");
        Ok(EmitStatus::Written(written))
    }

    fn prepare_dirs(&self, dir: &Path) -> Result<()> {
        if dir.is_dir() {
            return Ok(());
        }
        let rel = dir.strip_prefix(&self.root).unwrap_or(dir);
        let mut current = self.root.clone();
        for component in rel.components() {
            current.push(component);
            if current.is_file() {
                let mut aside = current.clone().into_os_string();
                aside.push(FILE_ASIDE_SUFFIX);
                debug!(path = %current.display(), "moving file out of the way of a directory");
                fs::rename(&current, &aside).map_err(|e| Error::directory_create(&current, e))?;
            }
        }
        fs::create_dir_all(dir).map_err(|e| Error::directory_create(dir, e))
    }
}
