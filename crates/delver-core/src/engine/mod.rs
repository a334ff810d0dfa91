//! The scan engine.
//!
//! [`Engine::run`] enumerates the input, wraps every file in a depth-0
//! [`ScanUnit`] and hands it to [`Engine::process_unit`], the single
//! boundary where per-unit failures are contained. What happens to a unit is
//! decided by the configured [`ScanStrategy`], which may call back into
//! [`Engine::descend`], [`Engine::cascade`] and [`Engine::emit_artifact`].
//!
//! Top-level files run on one worker pool and container entries on a
//! second, smaller one, so deeply nested containers cannot multiply fan-out.

mod emit;
mod options;
mod strategy;

pub use emit::{EmitStatus, Emitter, ALTERNATIVES_DIR, CORRUPT_DIR, DUPLICATES_DIR, EXCEPTION_DIR};
pub use options::{ScanOptions, NESTING_CEILING};
pub use strategy::{CutStrategy, ExtractStrategy, ScanStrategy, Verdict};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, debug_span, info, info_span, warn, Span};
use walkdir::WalkDir;

use crate::cascade::{BadFormatCache, Carver, SignatureCarver};
use crate::catalog::FormatCatalog;
use crate::error::{Error, Result};
use crate::handler::{ArchiveNode, Artifact, EntrySiblings, HandlerRegistry};
use crate::result::{Action, Fingerprint, Outcome, RunResult, RunSummary};
use crate::stream::{FileSource, MemorySource, SharedSource};
use crate::unit::{join_path, Origin, ScanUnit};

/// Leading bytes included in failure logs
const EXCERPT_LEN: usize = 16;

/// Orchestrates traversal, identification and per-unit handling
pub struct Engine {
    pub(crate) catalog: Arc<FormatCatalog>,
    pub(crate) registry: HandlerRegistry,
    pub(crate) strategy: Box<dyn ScanStrategy>,
    pub(crate) carver: Box<dyn Carver>,
    pub(crate) options: ScanOptions,
    pub(crate) emitter: Emitter,
    pub(crate) result: RunResult,
    pub(crate) bad_formats: BadFormatCache,
    top_pool: Option<ThreadPool>,
    sub_pool: Option<ThreadPool>,
    span: Span,
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    dest: PathBuf,
    catalog: Option<Arc<FormatCatalog>>,
    registry: Option<HandlerRegistry>,
    strategy: Option<Box<dyn ScanStrategy>>,
    carver: Option<Box<dyn Carver>>,
    options: ScanOptions,
    span: Option<Span>,
}

impl EngineBuilder {
    /// Replaces the format catalog
    pub fn catalog(mut self, catalog: Arc<FormatCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Replaces the handler registry
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the per-unit strategy
    pub fn strategy(mut self, strategy: impl ScanStrategy + 'static) -> Self {
        self.strategy = Some(Box::new(strategy));
        self
    }

    /// Sets the carving fallback
    pub fn carver(mut self, carver: impl Carver + 'static) -> Self {
        self.carver = Some(Box::new(carver));
        self
    }

    /// Sets run options
    pub fn options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    /// Parent span for every log event of the run
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Builds the engine and its worker pools
    pub fn build(self) -> Result<Engine> {
        let catalog = self.catalog.unwrap_or_else(FormatCatalog::shared);
        let carver = match self.carver {
            Some(carver) => carver,
            None => Box::new(SignatureCarver::from_catalog(&catalog)),
        };
        let strategy = self
            .strategy
            .unwrap_or_else(|| Box::new(ExtractStrategy::new()));
        let span = self.span.unwrap_or_else(|| {
            info_span!("run", strategy = strategy.name(), dest = %self.dest.display())
        });
        let limit = self.options.decompress_limit;

        Ok(Engine {
            registry: self
                .registry
                .unwrap_or_else(|| HandlerRegistry::builtin_with_limit(limit)),
            top_pool: build_pool(self.options.top_parallelism, "delver-top")?,
            sub_pool: build_pool(self.options.sub_parallelism, "delver-sub")?,
            emitter: Emitter::new(self.dest, self.options.dry_run),
            result: RunResult::new(),
            bad_formats: BadFormatCache::new(),
            options: self.options,
            catalog,
            strategy,
            carver,
            span,
        })
    }
}

fn build_pool(workers: usize, name: &'static str) -> Result<Option<ThreadPool>> {
    if workers <= 1 {
        return Ok(None);
    }
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(move |i| format!("{name}-{i}"))
        .build()?;
    Ok(Some(pool))
}

impl Engine {
    /// Starts building an engine writing below `dest`
    pub fn builder(dest: impl Into<PathBuf>) -> EngineBuilder {
        EngineBuilder {
            dest: dest.into(),
            catalog: None,
            registry: None,
            strategy: None,
            carver: None,
            options: ScanOptions::default(),
            span: None,
        }
    }

    /// Run options
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Format catalog
    pub fn catalog(&self) -> &FormatCatalog {
        &self.catalog
    }

    /// Handler registry
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Shared run state
    pub fn result(&self) -> &RunResult {
        &self.result
    }

    /// Scans a file or directory tree.
    ///
    /// Directories are enumerated in full before processing starts so the
    /// total byte count is known up front. A path that is neither a file nor
    /// a directory is a configuration error.
    pub fn run(&self, path: &Path) -> Result<RunSummary> {
        let _enter = self.span.enter();
        self.result.restart_clock();
        let meta = fs::metadata(path).map_err(|e| Error::configuration(path, e.to_string()))?;

        if meta.is_dir() {
            let files = collect_files(path);
            let total: u64 = files.iter().map(|f| f.size).sum();
            self.result.add_total_bytes(total);
            info!(files = files.len(), bytes = total, "discovered input");

            let process = |file: &InputFile| self.process_file(&file.path, &file.rel, file.size);
            match &self.top_pool {
                Some(pool) => pool.install(|| files.par_iter().for_each(process)),
                None => files.iter().for_each(process),
            }
        } else if meta.is_file() {
            let rel = path
                .file_name()
                .map(|n| join_path("", &n.to_string_lossy()))
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "input".to_string());
            self.result.add_total_bytes(meta.len());
            self.process_file(path, &rel, meta.len());
        } else {
            return Err(Error::configuration(path, "not a regular file or directory"));
        }

        let summary = self.result.summary();
        info!(
            items = summary.counters.items,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "run complete"
        );
        Ok(summary)
    }

    fn process_file(&self, file: &Path, rel: &str, size: u64) {
        let source: SharedSource = match FileSource::open(file) {
            Ok(source) => Arc::new(source),
            Err(e) => {
                warn!(path = rel, depth = 0, error = %e, "cannot open input");
                self.result.add_processed_bytes(size);
                self.result
                    .record(Outcome::new(rel, "", Action::Unsupported, e.to_string()));
                return;
            }
        };
        let format = self.catalog.identify(source.as_ref(), rel);
        let unit = ScanUnit::top_level(source, rel, file, format);
        self.process_unit(&unit);
    }

    /// Handles one unit and records exactly one outcome for it.
    ///
    /// Errors and panics raised by the strategy are logged with an excerpt of
    /// the unit's leading bytes and recorded; they never propagate.
    pub fn process_unit(&self, unit: &ScanUnit) {
        let span = debug_span!(
            parent: &self.span,
            "unit",
            path = unit.path(),
            depth = unit.depth(),
            format = %unit.format()
        );
        let _enter = span.enter();

        let verdict = if !self.options.allows_depth(unit.depth()) {
            debug!("depth limit reached");
            Verdict::unresolved(unit, format!("depth {} exceeds limit", unit.depth()))
        } else {
            match panic::catch_unwind(AssertUnwindSafe(|| self.strategy.handle(self, unit))) {
                Ok(Ok(verdict)) => verdict,
                Ok(Err(e)) => self.contain(unit, &e),
                Err(payload) => {
                    let e = Error::internal(format!("handler panicked: {}", panic_message(&*payload)));
                    self.contain(unit, &e)
                }
            }
        };

        debug!(action = %verdict.action, detail = %verdict.detail, "unit done");
        self.result.add_processed_bytes(unit.unclaimed());
        self.result.record(Outcome::new(
            unit.path(),
            unit.format().label(),
            verdict.action,
            verdict.detail,
        ));
    }

    fn contain(&self, unit: &ScanUnit, error: &Error) -> Verdict {
        warn!(
            path = unit.path(),
            depth = unit.depth(),
            error = %error,
            head = %unit.excerpt(EXCERPT_LEN),
            "failed to handle unit"
        );
        if self.options.quarantine {
            let dir = if error.is_corrupt() { CORRUPT_DIR } else { EXCEPTION_DIR };
            let rel = format!("{dir}/{}", unit.path());
            if let Err(e) = self.emitter.emit(unit.source(), &rel) {
                warn!(path = %rel, error = %e, "quarantine copy failed");
            }
        }
        Verdict::unresolved(unit, error.to_string())
    }

    /// Processes the leaves of an opened container one level deeper
    pub fn descend(&self, parent: &ScanUnit, root: &ArchiveNode) {
        self.descend_leaves(parent, root.leaves());
    }

    /// Processes `(relative path, source)` pairs as children of `parent`.
    ///
    /// Recognized entries run before unrecognized ones. Each child takes its
    /// own length out of the parent's progress budget.
    pub fn descend_leaves(&self, parent: &ScanUnit, leaves: Vec<(String, SharedSource)>) {
        if leaves.is_empty() {
            return;
        }
        let siblings = Arc::new(EntrySiblings::new(&leaves));
        let depth = parent.depth() + 1;

        let (recognized, unrecognized): (Vec<ScanUnit>, Vec<ScanUnit>) = leaves
            .into_iter()
            .enumerate()
            .map(|(index, (name, source))| {
                let mut path = join_path(parent.path(), &name);
                if path.len() <= parent.path().len() {
                    path = join_path(parent.path(), &format!("{index:04}"));
                }
                let format = self.catalog.identify(source.as_ref(), &path);
                let budget = parent.claim(source.len());
                ScanUnit::new(source, path, depth, format, Origin::Entry(siblings.clone()), budget)
            })
            .partition(|unit| unit.format().category.is_identified());

        debug!(
            recognized = recognized.len(),
            unrecognized = unrecognized.len(),
            "descending"
        );
        let sequential = parent.format().category.prefers_sequential();
        self.process_group(&recognized, sequential);
        self.process_group(&unrecognized, sequential);
    }

    fn process_group(&self, units: &[ScanUnit], sequential: bool) {
        match &self.sub_pool {
            Some(pool) if !sequential && units.len() > 1 => {
                pool.install(|| units.par_iter().for_each(|unit| self.process_unit(unit)))
            }
            _ => units.iter().for_each(|unit| self.process_unit(unit)),
        }
    }

    /// Writes `source` below the output root
    pub fn emit(&self, source: &SharedSource, rel: &str) -> Result<EmitStatus> {
        self.emitter.emit(source, rel)
    }

    /// Emits an artifact once per run.
    ///
    /// The first artifact with a given fingerprint goes to `rel`; repeats go
    /// under `~Duplicates/` and yield [`Action::Duplicate`].
    pub fn emit_artifact(&self, artifact: &Artifact, rel: &str) -> Result<Action> {
        let fingerprint = Fingerprint::of_artifact(&artifact.name, &artifact.data);
        let source: SharedSource = Arc::new(MemorySource::new(artifact.data.clone()));

        if !self.result.add_if_new(fingerprint) {
            debug!(?fingerprint, "duplicate artifact");
            self.emitter
                .emit(&source, &format!("{DUPLICATES_DIR}/{rel}"))?;
            return Ok(Action::Duplicate);
        }

        match self.emitter.emit(&source, rel)? {
            EmitStatus::Denied => Ok(Action::Unsupported),
            EmitStatus::Exists => {
                debug!(path = rel, "output already exists, not overwritten");
                Ok(Action::Duplicate)
            }
            EmitStatus::Written(_) | EmitStatus::DryRun => Ok(artifact.action),
        }
    }
}

struct InputFile {
    path: PathBuf,
    rel: String,
    size: u64,
}

fn collect_files(root: &Path) -> Vec<InputFile> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(root).ok()?;
            let rel = join_path("", &rel.to_string_lossy());
            if rel.is_empty() {
                return None;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            Some(InputFile {
                path: entry.into_path(),
                rel,
                size,
            })
        })
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FormatDescriptor;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Panicking;

    impl ScanStrategy for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn handle(&self, _engine: &Engine, _unit: &ScanUnit) -> Result<Verdict> {
            panic!("malformed input");
        }
    }

    fn engine(dest: &Path) -> Engine {
        Engine::builder(dest)
            .options(ScanOptions::new().sequential())
            .build()
            .unwrap()
    }

    #[test]
    fn test_run_rejects_missing_path() {
        let dir = TempDir::new().unwrap();
        let err = engine(dir.path())
            .run(&dir.path().join("missing"))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_panic_is_contained() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        std::fs::write(src.path().join("a.bin"), b"whatever").unwrap();
        std::fs::write(src.path().join("b.bin"), b"whatever else").unwrap();

        let engine = Engine::builder(dest.path())
            .options(ScanOptions::new().sequential())
            .strategy(Panicking)
            .build()
            .unwrap();
        let summary = engine.run(src.path()).unwrap();
        assert_eq!(summary.counters.items, 2);
        assert!(summary.outcomes[0].detail.contains("malformed input"));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failure_log_names_the_unit() {
        let dest = TempDir::new().unwrap();
        let engine = Engine::builder(dest.path())
            .options(ScanOptions::new().sequential())
            .strategy(Panicking)
            .build()
            .unwrap();
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let source: SharedSource = Arc::new(MemorySource::new(&b"PACK\x01\x00"[..]));
        let unit = ScanUnit::derived(source, "game/broken_unit.pack", 3, FormatDescriptor::unknown());
        tracing::subscriber::with_default(subscriber, || engine.process_unit(&unit));

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("failed to handle unit"), "{output}");
        assert!(output.contains("game/broken_unit.pack"), "{output}");
        assert!(output.contains("depth=3"), "{output}");
        assert!(output.contains("50 41 43 4B"), "{output}");
    }

    #[test]
    fn test_depth_limit_stops_descent() {
        let dest = TempDir::new().unwrap();
        let engine = Engine::builder(dest.path())
            .options(ScanOptions::new().sequential().max_depth(1))
            .build()
            .unwrap();
        let source: SharedSource = Arc::new(MemorySource::new(&b"deep bytes"[..]));
        let unit = ScanUnit::derived(source, "x/y/z", 2, FormatDescriptor::unknown());
        engine.process_unit(&unit);

        let summary = engine.result().summary();
        assert_eq!(summary.outcomes[0].action, Action::Unknown);
        assert!(summary.outcomes[0].detail.contains("depth 2"));
    }

    #[test]
    fn test_emit_artifact_dedup() {
        let dest = TempDir::new().unwrap();
        let engine = engine(dest.path());
        let artifact = Artifact::extracted("logo.png", bytes::Bytes::from_static(b"png"));

        assert_eq!(engine.emit_artifact(&artifact, "a/logo.png").unwrap(), Action::Extract);
        assert_eq!(engine.emit_artifact(&artifact, "b/logo.png").unwrap(), Action::Duplicate);
        assert!(dest.path().join("a/logo.png").is_file());
        assert!(dest.path().join("~Duplicates/b/logo.png").is_file());
        assert!(!dest.path().join("b/logo.png").exists());
    }

    #[test]
    fn test_existing_output_is_not_counted_as_extracted() {
        let dest = TempDir::new().unwrap();
        std::fs::write(dest.path().join("logo.png"), b"older").unwrap();
        let engine = engine(dest.path());
        let artifact = Artifact::extracted("logo.png", bytes::Bytes::from_static(b"newer"));

        assert_eq!(engine.emit_artifact(&artifact, "logo.png").unwrap(), Action::Duplicate);
        assert_eq!(std::fs::read(dest.path().join("logo.png")).unwrap(), b"older");
    }

    #[test]
    fn test_elapsed_measured_from_run() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        std::fs::write(src.path().join("a.txt"), b"text").unwrap();
        let engine = engine(dest.path());
        std::thread::sleep(std::time::Duration::from_millis(300));

        let summary = engine.run(src.path()).unwrap();
        assert!(summary.elapsed < std::time::Duration::from_millis(300));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");
    }
}
