//! The item flowing through the engine.
//!
//! A [`ScanUnit`] pairs a byte source with its logical path, nesting depth
//! and identified format. Depth is explicit data so limits and per-depth
//! scheduling do not depend on call-stack shape.
//!
//! Each unit also carries a progress budget: the number of bytes it may
//! credit to the run's processed-byte counter. When the engine descends into
//! a container it hands slices of the parent's budget to the entries, and
//! the parent credits only what it kept. Nested bytes are therefore never
//! counted twice.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::catalog::FormatDescriptor;
use crate::handler::{DirectorySiblings, EntrySiblings, NoSiblings, SiblingResolver};
use crate::stream::{read_prefix, ByteSource, SharedSource};

/// Where a unit came from, used to resolve sibling references
#[derive(Debug, Clone)]
pub enum Origin {
    /// A file on disk
    File(PathBuf),
    /// An entry of an opened container, with the container's other entries
    Entry(Arc<EntrySiblings>),
    /// Bytes produced by decompression or carving
    Derived,
}

/// One item being scanned
#[derive(Debug)]
pub struct ScanUnit {
    source: SharedSource,
    path: String,
    depth: u32,
    format: FormatDescriptor,
    origin: Origin,
    budget: u64,
    delegated: AtomicU64,
}

impl ScanUnit {
    /// Creates a unit with an explicit progress budget
    pub fn new(
        source: SharedSource,
        path: impl Into<String>,
        depth: u32,
        format: FormatDescriptor,
        origin: Origin,
        budget: u64,
    ) -> Self {
        Self {
            source,
            path: path.into(),
            depth,
            format,
            origin,
            budget,
            delegated: AtomicU64::new(0),
        }
    }

    /// A depth-0 unit for a file on disk; its budget is the whole file
    pub fn top_level(
        source: SharedSource,
        path: impl Into<String>,
        file: impl Into<PathBuf>,
        format: FormatDescriptor,
    ) -> Self {
        let budget = source.len();
        Self::new(source, path, 0, format, Origin::File(file.into()), budget)
    }

    /// A unit with no siblings and no progress budget
    pub fn derived(
        source: SharedSource,
        path: impl Into<String>,
        depth: u32,
        format: FormatDescriptor,
    ) -> Self {
        Self::new(source, path, depth, format, Origin::Derived, 0)
    }

    /// Byte source
    pub fn source(&self) -> &SharedSource {
        &self.source
    }

    /// Logical slash-joined path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Nesting depth, 0 for filesystem entries
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Identified format
    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    /// Provenance
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Length of the source in bytes
    pub fn len(&self) -> u64 {
        self.source.len()
    }

    /// Returns true if the source is empty
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Last path component
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Directory part of the path, empty at the root
    pub fn parent_path(&self) -> &str {
        self.path.rsplit_once('/').map_or("", |(dir, _)| dir)
    }

    /// Progress bytes this unit may credit in total
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Hands up to `want` bytes of budget to a child; returns the granted amount.
    pub fn claim(&self, want: u64) -> u64 {
        let mut granted = 0;
        let _ = self
            .delegated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                granted = want.min(self.budget.saturating_sub(used));
                Some(used + granted)
            });
        granted
    }

    /// Hands all remaining budget to a child
    pub fn claim_rest(&self) -> u64 {
        self.claim(u64::MAX)
    }

    /// Budget not yet handed to children
    pub fn unclaimed(&self) -> u64 {
        self.budget
            .saturating_sub(self.delegated.load(Ordering::Acquire))
    }

    /// Hex dump of up to `max` leading bytes, for diagnostics
    pub fn excerpt(&self, max: usize) -> String {
        match read_prefix(self.source.as_ref(), max) {
            Ok(bytes) => {
                let mut out = String::with_capacity(bytes.len() * 3);
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    let _ = write!(out, "{b:02X}");
                }
                out
            }
            Err(e) => format!("<unreadable: {e}>"),
        }
    }

    /// Resolver for files this unit's container may reference by name
    pub fn sibling_resolver(&self) -> Box<dyn SiblingResolver> {
        match &self.origin {
            Origin::File(path) => match path.parent() {
                Some(dir) => Box::new(DirectorySiblings::new(dir)),
                None => Box::new(DirectorySiblings::new(Path::new("."))),
            },
            Origin::Entry(siblings) => Box::new(ArcSiblings(siblings.clone())),
            Origin::Derived => Box::new(NoSiblings),
        }
    }
}

struct ArcSiblings(Arc<EntrySiblings>);

impl SiblingResolver for ArcSiblings {
    fn resolve(&self, name: &str) -> crate::Result<SharedSource> {
        self.0.resolve(name)
    }
}

/// Replaces characters that are illegal in file names on common filesystems.
///
/// Returns an empty string for components that must be dropped (`.`, `..`,
/// all-dot or all-blank names).
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim_end_matches(['.', ' ']).to_string()
}

/// Appends a container-declared path to a logical parent path.
pub fn join_path(parent: &str, child: &str) -> String {
    let mut out = parent.trim_end_matches('/').to_string();
    for part in child.split(['/', '\\']) {
        let part = sanitize_component(part);
        if part.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&part);
    }
    out
}
