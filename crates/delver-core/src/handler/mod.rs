//! Pluggable format handlers.
//!
//! A handler exposes exactly one capability:
//!
//! - **container**: [`ContainerHandler::open`] parses a source into an
//!   [`ArchiveNode`] tree whose leaves are views onto the entries;
//! - **compression**: [`CompressionHandler::decompress`] inflates a whole
//!   source into memory.
//!
//! Handlers are created through a [`HandlerRegistry`], an explicit table of
//! factories keyed by [`HandlerId`] and populated at startup. The engine
//! never depends on a format's internal layout beyond these two traits.

mod deflate;
mod mbr;
mod pack;
mod texture;
mod zip;

pub use deflate::{GzipHandler, ZlibHandler};
pub use mbr::MbrHandler;
pub use pack::{PackEntry, PackHandler, PackWriter, PACK_MAGIC};
pub use texture::{Artifact, PassthroughTextures, TextureHandler};
pub use self::zip::{ZipHandler, DEFAULT_ENTRY_LIMIT};

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::stream::{FileSource, SharedSource};
use crate::unit::sanitize_component;

/// Stable identity of a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub &'static str);

impl HandlerId {
    /// ZIP archives
    pub const ZIP: HandlerId = HandlerId("zip");
    /// Native PACK archives
    pub const PACK: HandlerId = HandlerId("pack");
    /// MBR-partitioned disk images
    pub const MBR: HandlerId = HandlerId("mbr");
    /// gzip streams
    pub const GZIP: HandlerId = HandlerId("gzip");
    /// zlib streams
    pub const ZLIB: HandlerId = HandlerId("zlib");
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A directory or file inside an opened container
#[derive(Debug, Clone)]
pub enum ArchiveNode {
    /// Directory with child nodes
    Directory {
        /// Declared name
        name: String,
        /// Children in container order
        children: Vec<ArchiveNode>,
    },
    /// Leaf entry
    File {
        /// Declared name
        name: String,
        /// Raw entry data
        source: SharedSource,
    },
}

impl ArchiveNode {
    /// Creates a leaf
    pub fn file(name: impl Into<String>, source: SharedSource) -> Self {
        Self::File {
            name: name.into(),
            source,
        }
    }

    /// Creates an unnamed root directory
    pub fn root(children: Vec<ArchiveNode>) -> Self {
        Self::Directory {
            name: String::new(),
            children,
        }
    }

    /// Builds a tree from slash-separated entry paths.
    ///
    /// Intermediate directories are created on demand; empty path components
    /// are ignored.
    pub fn from_paths(entries: impl IntoIterator<Item = (String, SharedSource)>) -> Self {
        #[derive(Default)]
        struct Dir {
            dirs: BTreeMap<String, Dir>,
            files: Vec<ArchiveNode>,
        }

        fn build(name: String, dir: Dir) -> ArchiveNode {
            let mut children: Vec<ArchiveNode> =
                dir.dirs.into_iter().map(|(n, d)| build(n, d)).collect();
            children.extend(dir.files);
            ArchiveNode::Directory { name, children }
        }

        let mut top = Dir::default();
        for (path, source) in entries {
            let mut parts: Vec<&str> = path
                .split(['/', '\\'])
                .filter(|p| !p.is_empty())
                .collect();
            let Some(leaf) = parts.pop() else {
                continue;
            };
            let mut dir = &mut top;
            for part in parts {
                dir = dir.dirs.entry(part.to_string()).or_default();
            }
            dir.files.push(ArchiveNode::file(leaf, source));
        }
        build(String::new(), top)
    }

    /// Declared name
    pub fn name(&self) -> &str {
        match self {
            Self::Directory { name, .. } | Self::File { name, .. } => name,
        }
    }

    /// Returns true for file nodes
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::File { .. })
    }

    /// Flattens the tree into `(relative path, source)` pairs.
    ///
    /// The node's own name is not part of the returned paths.
    pub fn leaves(&self) -> Vec<(String, SharedSource)> {
        fn walk(node: &ArchiveNode, prefix: &str, out: &mut Vec<(String, SharedSource)>) {
            let path = if prefix.is_empty() {
                node.name().to_string()
            } else {
                format!("{prefix}/{}", node.name())
            };
            match node {
                ArchiveNode::File { source, .. } => out.push((path, source.clone())),
                ArchiveNode::Directory { children, .. } => {
                    for child in children {
                        walk(child, &path, out);
                    }
                }
            }
        }

        let mut out = Vec::new();
        match self {
            Self::File { name, source } => out.push((name.clone(), source.clone())),
            Self::Directory { children, .. } => {
                for child in children {
                    walk(child, "", &mut out);
                }
            }
        }
        out
    }
}

/// Resolves files a container references by name
pub trait SiblingResolver: Send + Sync {
    /// Opens the sibling called `name`
    fn resolve(&self, name: &str) -> Result<SharedSource>;
}

/// Resolver for units that have no siblings
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSiblings;

impl SiblingResolver for NoSiblings {
    fn resolve(&self, name: &str) -> Result<SharedSource> {
        Err(Error::sibling_missing(name))
    }
}

/// Resolves siblings next to a file on disk
#[derive(Debug, Clone)]
pub struct DirectorySiblings {
    dir: PathBuf,
}

impl DirectorySiblings {
    /// Resolves names relative to `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory names are resolved in
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SiblingResolver for DirectorySiblings {
    fn resolve(&self, name: &str) -> Result<SharedSource> {
        let component = sanitize_component(name);
        if component.is_empty() {
            return Err(Error::sibling_missing(name));
        }
        match FileSource::open(self.dir.join(component)) {
            Ok(source) => Ok(Arc::new(source)),
            Err(_) => Err(Error::sibling_missing(name)),
        }
    }
}

/// Resolves siblings among the other entries of the same container
#[derive(Debug, Clone, Default)]
pub struct EntrySiblings {
    by_name: HashMap<String, SharedSource>,
}

impl EntrySiblings {
    /// Indexes entries by full relative path and by bare file name, case-insensitively
    pub fn new(entries: &[(String, SharedSource)]) -> Self {
        let mut by_name = HashMap::with_capacity(entries.len() * 2);
        for (path, source) in entries {
            let path = path.to_ascii_lowercase();
            if let Some((_, file)) = path.rsplit_once('/') {
                by_name.entry(file.to_string()).or_insert_with(|| source.clone());
            }
            by_name.insert(path, source.clone());
        }
        Self { by_name }
    }
}

impl SiblingResolver for EntrySiblings {
    fn resolve(&self, name: &str) -> Result<SharedSource> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| Error::sibling_missing(name))
    }
}

/// Capability of parsing a source into an entry tree
pub trait ContainerHandler: Send {
    /// Parses `source`; `siblings` resolves files referenced by name.
    fn open(&mut self, source: SharedSource, siblings: &dyn SiblingResolver) -> Result<ArchiveNode>;

    /// Declared size of the container, known after a successful [`open`](Self::open).
    ///
    /// Bytes past this point are scanned for hidden embedded copies.
    fn logical_len(&self) -> Option<u64> {
        None
    }
}

/// Capability of inflating a whole source
pub trait CompressionHandler: Send + Sync {
    /// Decompresses `source`, failing once the output would exceed `limit` bytes
    fn decompress(&self, source: SharedSource, limit: u64) -> Result<Bytes>;
}

/// What a handler can do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Opens into an entry tree
    Container,
    /// Inflates into a single buffer
    Compression,
}

/// An instantiated handler
pub enum Handler {
    /// Container capability
    Container(Box<dyn ContainerHandler>),
    /// Compression capability
    Compression(Box<dyn CompressionHandler>),
}

impl Handler {
    /// The capability this handler exposes
    pub fn capability(&self) -> Capability {
        match self {
            Self::Container(_) => Capability::Container,
            Self::Compression(_) => Capability::Compression,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.capability()).finish()
    }
}

/// Creates a fresh handler instance
pub type HandlerFactory = Arc<dyn Fn() -> Result<Handler> + Send + Sync>;

/// Static table mapping handler identities to factories
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<HandlerId, HandlerFactory>,
    probes: Vec<HandlerId>,
}

impl HandlerRegistry {
    /// A registry with no handlers
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in handlers; gzip and zlib double as generic probes
    pub fn builtin() -> Self {
        Self::builtin_with_limit(self::zip::DEFAULT_ENTRY_LIMIT)
    }

    /// The built-in handlers, with containers that inflate entries in memory
    /// refusing any entry larger than `limit` bytes
    pub fn builtin_with_limit(limit: u64) -> Self {
        let mut registry = Self::empty();
        registry
            .register(HandlerId::ZIP, move || {
                Ok(Handler::Container(Box::new(ZipHandler::with_limit(limit))))
            })
            .register(HandlerId::PACK, || {
                Ok(Handler::Container(Box::new(PackHandler::new())))
            })
            .register(HandlerId::MBR, || {
                Ok(Handler::Container(Box::new(MbrHandler::new())))
            })
            .register(HandlerId::GZIP, || Ok(Handler::Compression(Box::new(GzipHandler))))
            .register(HandlerId::ZLIB, || Ok(Handler::Compression(Box::new(ZlibHandler))))
            .register_probe(HandlerId::GZIP)
            .register_probe(HandlerId::ZLIB);
        registry
    }

    /// Adds or replaces a factory
    pub fn register<F>(&mut self, id: HandlerId, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Handler> + Send + Sync + 'static,
    {
        self.factories.insert(id, Arc::new(factory));
        self
    }

    /// Marks a compression handler as a generic decompression probe
    pub fn register_probe(&mut self, id: HandlerId) -> &mut Self {
        if !self.probes.contains(&id) {
            self.probes.push(id);
        }
        self
    }

    /// Returns true if a factory exists for `id`
    pub fn contains(&self, id: HandlerId) -> bool {
        self.factories.contains_key(&id)
    }

    /// Instantiates the handler registered for `id`
    pub fn instantiate(&self, id: HandlerId) -> Result<Handler> {
        let factory = self.factories.get(&id).ok_or(Error::HandlerMissing(id))?;
        factory()
    }

    /// Instantiates every registered probe that has the compression capability
    pub fn probes(&self) -> Vec<(HandlerId, Box<dyn CompressionHandler>)> {
        self.probes
            .iter()
            .filter_map(|&id| match self.instantiate(id) {
                Ok(Handler::Compression(handler)) => Some((id, handler)),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &ids)
            .field("probes", &self.probes)
            .finish()
    }
}
