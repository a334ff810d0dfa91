use std::num::NonZeroUsize;
use std::thread;

/// Structural nesting ceiling applied even when `max_depth` is unlimited
pub const NESTING_CEILING: u32 = 32;

/// Configuration for a scan run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Suppress all writes
    pub dry_run: bool,
    /// Deepest nesting level processed (0 = unlimited)
    pub max_depth: u32,
    /// Workers for top-level files (1 = sequential)
    pub top_parallelism: usize,
    /// Workers for container entries (1 = sequential)
    pub sub_parallelism: usize,
    /// Run generic decompression probes even when a handler is bound
    pub force_recovery: bool,
    /// Copy recognized-but-unhandled leaves unmodified
    pub raw_passthrough: bool,
    /// Largest source eligible for decompression probes
    pub force_size_ceiling: u64,
    /// Largest output a single decompression may produce
    pub decompress_limit: u64,
    /// Copy failing units under `~Corrupt/` or `~Exception/`
    pub quarantine: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_depth: 0,
            top_parallelism: thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            sub_parallelism: 2,
            force_recovery: false,
            raw_passthrough: false,
            force_size_ceiling: 32 * 1024 * 1024, // 32 MiB
            decompress_limit: 256 * 1024 * 1024,  // 256 MiB
            quarantine: false,
        }
    }
}

impl ScanOptions {
    /// Creates options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets dry-run mode
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Sets the maximum nesting depth
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets top-level parallelism
    pub fn top_parallelism(mut self, workers: usize) -> Self {
        self.top_parallelism = workers.max(1);
        self
    }

    /// Sets container-entry parallelism
    pub fn sub_parallelism(mut self, workers: usize) -> Self {
        self.sub_parallelism = workers.max(1);
        self
    }

    /// Both pools sequential, for deterministic runs
    pub fn sequential(self) -> Self {
        self.top_parallelism(1).sub_parallelism(1)
    }

    /// Enables decompression probes regardless of bound handlers
    pub fn force_recovery(mut self, enabled: bool) -> Self {
        self.force_recovery = enabled;
        self
    }

    /// Enables raw pass-through of unhandled leaves
    pub fn raw_passthrough(mut self, enabled: bool) -> Self {
        self.raw_passthrough = enabled;
        self
    }

    /// Sets the probe size ceiling
    pub fn force_size_ceiling(mut self, bytes: u64) -> Self {
        self.force_size_ceiling = bytes;
        self
    }

    /// Sets the decompression output limit
    pub fn decompress_limit(mut self, bytes: u64) -> Self {
        self.decompress_limit = bytes;
        self
    }

    /// Enables quarantine copies of failing units
    pub fn quarantine(mut self, enabled: bool) -> Self {
        self.quarantine = enabled;
        self
    }

    /// Returns true if a unit at `depth` may still be processed
    pub fn allows_depth(&self, depth: u32) -> bool {
        depth <= NESTING_CEILING && (self.max_depth == 0 || depth <= self.max_depth)
    }
}
