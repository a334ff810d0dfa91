//! The extraction cascade.
//!
//! Given a unit the strategy could not handle directly, the cascade tries in
//! order:
//!
//! 1. [`Engine::try_extract`]: the handler bound to the unit's format, either
//!    opening it as a container or inflating it as a compressed stream;
//! 2. [`Engine::try_force`]: every registered decompression probe, for units
//!    without a bound handler or when forced recovery is enabled;
//! 3. [`Engine::try_cut`]: signature carving, gated by the [`BadFormatCache`].
//!
//! Each successful step re-enters the engine one level deeper, so the
//! nesting ceiling, the bounded decompression output and the carving cutoff
//! together guarantee termination on adversarial input.

mod bad_format;
mod carve;

pub use bad_format::{BadFormatCache, BAD_FORMAT_THRESHOLD};
pub use carve::{CarvedRegion, Carver, SignatureCarver};

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::catalog::extension_of;
use crate::engine::{Engine, Verdict};
use crate::error::Result;
use crate::handler::Handler;
use crate::result::Action;
use crate::stream::{BoundedView, MemorySource, SharedSource};
use crate::unit::{Origin, ScanUnit};

/// Outcome of a cascade step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cascaded {
    /// The unit was handled
    Handled(Verdict),
    /// Nothing applied
    Unresolved,
}

impl Engine {
    /// Runs extract, force and cut in order until one handles the unit.
    ///
    /// A failing bound handler ends the cascade with its error unless forced
    /// recovery is enabled. In that case force and cut still run, and the
    /// handler's error is returned only if neither of them succeeds.
    pub fn cascade(&self, unit: &ScanUnit) -> Result<Cascaded> {
        let failure = match self.try_extract(unit) {
            Ok(handled @ Cascaded::Handled(_)) => return Ok(handled),
            Ok(Cascaded::Unresolved) => None,
            Err(e) if self.options.force_recovery && e.is_recoverable() => {
                debug!(error = %e, "bound handler failed, forcing recovery");
                Some(e)
            }
            Err(e) => return Err(e),
        };
        if let handled @ Cascaded::Handled(_) = self.try_force(unit)? {
            return Ok(handled);
        }
        match (self.try_cut(unit)?, failure) {
            (handled @ Cascaded::Handled(_), _) => Ok(handled),
            (Cascaded::Unresolved, Some(e)) => Err(e),
            (Cascaded::Unresolved, None) => Ok(Cascaded::Unresolved),
        }
    }

    /// Uses the handler bound to the unit's format.
    ///
    /// Falls through when no handler is bound or it cannot be constructed.
    /// Parse and decompression errors propagate.
    pub fn try_extract(&self, unit: &ScanUnit) -> Result<Cascaded> {
        let Some(id) = unit.format().handler else {
            return Ok(Cascaded::Unresolved);
        };
        let handler = match self.registry.instantiate(id) {
            Ok(handler) => handler,
            Err(e) => {
                debug!(handler = %id, error = %e, "handler unavailable");
                return Ok(Cascaded::Unresolved);
            }
        };

        match handler {
            Handler::Container(mut container) => {
                let siblings = unit.sibling_resolver();
                let root = container.open(unit.source().clone(), siblings.as_ref())?;
                let entries = root.leaves().len();
                self.descend(unit, &root);
                let hidden = self.scan_hidden(unit, container.logical_len());
                let mut detail = format!("{entries} entries");
                if hidden > 0 {
                    detail.push_str(&format!(", {hidden} hidden"));
                }
                Ok(Cascaded::Handled(Verdict::new(Action::Unpack, detail)))
            }
            Handler::Compression(codec) => {
                let data = codec.decompress(unit.source().clone(), self.options.decompress_limit)?;
                let len = data.len();
                self.reenter(unit, data);
                Ok(Cascaded::Handled(Verdict::new(
                    Action::Unpack,
                    format!("{id}: {len} bytes"),
                )))
            }
        }
    }

    /// Tries every generic decompression probe on small enough sources
    pub fn try_force(&self, unit: &ScanUnit) -> Result<Cascaded> {
        if unit.format().handler.is_some() && !self.options.force_recovery {
            return Ok(Cascaded::Unresolved);
        }
        let len = unit.len();
        if len == 0 || len > self.options.force_size_ceiling {
            trace!(len, "outside probe size range");
            return Ok(Cascaded::Unresolved);
        }

        for (id, probe) in self.registry.probes() {
            match probe.decompress(unit.source().clone(), self.options.decompress_limit) {
                Ok(data) => {
                    debug!(probe = %id, bytes = data.len(), "probe recovered data");
                    let detail = format!("recovered by {id} probe: {} bytes", data.len());
                    self.reenter(unit, data);
                    return Ok(Cascaded::Handled(Verdict::new(Action::Unpack, detail)));
                }
                Err(e) => trace!(probe = %id, error = %e, "probe failed"),
            }
        }
        Ok(Cascaded::Unresolved)
    }

    /// Carves the unit at embedded signatures
    pub fn try_cut(&self, unit: &ScanUnit) -> Result<Cascaded> {
        let format = unit.format();
        if self.bad_formats.should_skip(format) {
            trace!("format keeps failing to carve, skipping");
            return Ok(Cascaded::Unresolved);
        }

        let regions: Vec<CarvedRegion> = self
            .carver
            .carve(unit.source().as_ref())?
            .into_iter()
            .filter(|r| r.len > 0)
            .collect();
        if regions.is_empty() {
            self.bad_formats.record_failure(format);
            return Ok(Cascaded::Unresolved);
        }
        self.bad_formats.record_success(format);

        let leaves = region_leaves(unit.source(), &regions, "")?;
        debug!(regions = leaves.len(), "carved");
        let count = leaves.len();
        self.descend_leaves(unit, leaves);
        Ok(Cascaded::Handled(Verdict::new(
            Action::Split,
            format!("{count} regions"),
        )))
    }

    /// Descends into copies of the container's own signature found past its
    /// declared end. Returns the number of regions found.
    ///
    /// Only carvable formats are searched; weak magics such as the MBR boot
    /// signature match random trailing data far too often.
    fn scan_hidden(&self, unit: &ScanUnit, logical_len: Option<u64>) -> usize {
        let Some(end) = logical_len.filter(|&end| end < unit.len()) else {
            return 0;
        };
        if !unit.format().carve || unit.format().signature.is_none() {
            return 0;
        }

        let carver = SignatureCarver::for_format(unit.format());
        let regions: Vec<CarvedRegion> = match carver.carve(unit.source().as_ref()) {
            Ok(regions) => regions.into_iter().filter(|r| r.offset >= end).collect(),
            Err(e) => {
                debug!(error = %e, "hidden data scan failed");
                return 0;
            }
        };
        if regions.is_empty() {
            return 0;
        }

        match region_leaves(unit.source(), &regions, "~hidden/") {
            Ok(leaves) => {
                let count = leaves.len();
                debug!(count, after = end, "found hidden data");
                self.descend_leaves(unit, leaves);
                count
            }
            Err(e) => {
                debug!(error = %e, "hidden data unreadable");
                0
            }
        }
    }

    /// Processes decompressed bytes as the unit's only child
    fn reenter(&self, unit: &ScanUnit, data: Bytes) {
        let path = unpacked_name(unit);
        let source: SharedSource = Arc::new(MemorySource::new(data));
        let format = self.catalog.identify(source.as_ref(), &path);
        let budget = unit.claim_rest();
        let child = ScanUnit::new(source, path, unit.depth() + 1, format, Origin::Derived, budget);
        self.process_unit(&child);
    }
}

fn region_leaves(
    source: &SharedSource,
    regions: &[CarvedRegion],
    prefix: &str,
) -> Result<Vec<(String, SharedSource)>> {
    regions
        .iter()
        .map(|r| -> Result<(String, SharedSource)> {
            let view = BoundedView::shared(source.clone(), r.offset, r.len)?;
            Ok((format!("{prefix}{:08X}.{}", r.offset, r.extension), view))
        })
        .collect()
}

/// `foo.gz` becomes `foo`; anything else gets a `~unpacked` suffix
fn unpacked_name(unit: &ScanUnit) -> String {
    let path = unit.path();
    match extension_of(path) {
        Some(ext) if unit.format().matches_extension(ext) => {
            path[..path.len() - ext.len() - 1].to_string()
        }
        _ => format!("{path}~unpacked"),
    }
}
