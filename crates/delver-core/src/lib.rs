//! # delver-core
//!
//! A recursive, format-aware scanning and extraction engine.
//!
//! Given a file or directory tree, delver identifies every item by signature,
//! extension or sniffing, opens containers and compressed streams into their
//! entries, recurses into those, and emits recognized payloads to an output
//! tree. Data no parser understands is carved at embedded signatures.
//!
//! ## Architecture
//!
//! - [`stream`]: zero-copy byte sources and views ([`BoundedView`],
//!   [`ConcatenatedView`]) plus an endian-aware reader/writer
//! - [`catalog`]: the static [`FormatCatalog`] and the sniffer
//! - [`handler`]: container and compression handlers behind a [`HandlerRegistry`]
//! - [`unit`]: the [`ScanUnit`] flowing through the engine
//! - [`result`]: the run-wide [`RunResult`] with its dedup index
//! - [`cascade`]: extract, force, cut
//! - [`engine`]: traversal, worker pools, emission and [`ScanStrategy`]
//! - [`error`]: error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use delver_core::{scan, ScanOptions};
//!
//! let summary = scan("./game", "./out", ScanOptions::new().max_depth(8))?;
//! println!("{summary}");
//! # Ok::<(), delver_core::Error>(())
//! ```
//!
//! ## Extensibility
//!
//! - [`ScanStrategy`]: decide what happens to each unit
//! - [`ContainerHandler`] / [`CompressionHandler`]: add formats to a [`HandlerRegistry`]
//! - [`TextureHandler`]: turn recognized leaves into output artifacts
//! - [`Carver`]: replace the signature-carving fallback

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod cascade;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod handler;
pub mod result;
pub mod stream;
pub mod unit;

use std::path::Path;

// Re-export primary types for convenience
pub use cascade::{BadFormatCache, Cascaded, Carver, SignatureCarver};
pub use catalog::{Category, FormatCatalog, FormatDescriptor};
pub use engine::{CutStrategy, Engine, ExtractStrategy, ScanOptions, ScanStrategy, Verdict};
pub use error::{Error, Result};
pub use handler::{CompressionHandler, ContainerHandler, HandlerRegistry, TextureHandler};
pub use result::{Action, Outcome, RunResult, RunSummary};
pub use stream::{BoundedView, ByteSource, ConcatenatedView, SharedSource};
pub use unit::ScanUnit;

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Scans `source` into `dest` with the default extraction strategy.
pub fn scan(
    source: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    options: ScanOptions,
) -> Result<RunSummary> {
    Engine::builder(dest.as_ref())
        .options(options)
        .build()?
        .run(source.as_ref())
}
