//! Run-wide outcome aggregation and deduplication.

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// What the engine did with a unit or artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Emitted as-is
    Extract,
    /// Opened or decompressed and descended into
    Unpack,
    /// Emitted after re-encoding
    Optimize,
    /// Cut into sub-regions
    Split,
    /// Identical artifact already emitted this run
    Duplicate,
    /// Recognized but nothing could be done
    Unsupported,
    /// Not recognized
    Unknown,
}

impl Action {
    /// Name used in the run log
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "Extract",
            Self::Unpack => "Unpack",
            Self::Optimize => "Optimize",
            Self::Split => "Split",
            Self::Duplicate => "Duplicate",
            Self::Unsupported => "Unsupported",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the run log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Logical path of the unit
    pub path: String,
    /// Format label
    pub format: String,
    /// Action taken
    pub action: Action,
    /// Free-form diagnostic text
    pub detail: String,
}

impl Outcome {
    /// Creates an outcome
    pub fn new(
        path: impl Into<String>,
        format: impl Into<String>,
        action: Action,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            format: format.into(),
            action,
            detail: detail.into(),
        }
    }
}

/// Identity of an emitted artifact
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hashes an artifact's file name together with its bytes.
    ///
    /// Two artifacts with equal content but different names are distinct.
    pub fn of_artifact(name: &str, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        hasher.update(data);
        Self(*hasher.finalize().as_bytes())
    }

    /// Lowercase hex of the full digest
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

/// Aggregate counters of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Units processed
    pub items: u64,
    /// Bytes discovered up front
    pub bytes_total: u64,
    /// Bytes accounted for so far
    pub bytes_processed: u64,
    /// Units emitted, directly or after re-encoding
    pub extracted: u64,
    /// Units opened or decompressed
    pub unpacked: u64,
    /// Units cut into regions
    pub split: u64,
    /// Units whose artifacts were all duplicates
    pub duplicates: u64,
    /// Recognized units that could not be handled
    pub unsupported: u64,
    /// Unrecognized units
    pub unknown: u64,
}

#[derive(Debug, Default)]
struct RunState {
    counters: Counters,
    outcomes: Vec<Outcome>,
}

/// Shared, thread-safe run state
#[derive(Debug)]
pub struct RunResult {
    started: Mutex<Instant>,
    state: Mutex<RunState>,
    fingerprints: Mutex<HashSet<Fingerprint>>,
}

impl Default for RunResult {
    fn default() -> Self {
        Self::new()
    }
}

impl RunResult {
    /// Starts the clock
    pub fn new() -> Self {
        Self {
            started: Mutex::new(Instant::now()),
            state: Mutex::new(RunState::default()),
            fingerprints: Mutex::new(HashSet::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the outcome of one unit
    pub fn record(&self, outcome: Outcome) {
        let mut state = self.state();
        let counters = &mut state.counters;
        counters.items += 1;
        match outcome.action {
            Action::Extract | Action::Optimize => counters.extracted += 1,
            Action::Unpack => counters.unpacked += 1,
            Action::Split => counters.split += 1,
            Action::Duplicate => counters.duplicates += 1,
            Action::Unsupported => counters.unsupported += 1,
            Action::Unknown => counters.unknown += 1,
        }
        state.outcomes.push(outcome);
    }

    /// Inserts `fingerprint`; returns false if it was already present.
    pub fn add_if_new(&self, fingerprint: Fingerprint) -> bool {
        self.fingerprints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fingerprint)
    }

    /// Number of distinct fingerprints seen
    pub fn fingerprint_count(&self) -> usize {
        self.fingerprints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Adds discovered input bytes
    pub fn add_total_bytes(&self, bytes: u64) {
        self.state().counters.bytes_total += bytes;
    }

    /// Credits bytes a unit accounted for
    pub fn add_processed_bytes(&self, bytes: u64) {
        self.state().counters.bytes_processed += bytes;
    }

    /// Snapshot of the counters
    pub fn counters(&self) -> Counters {
        self.state().counters
    }

    /// Restarts the clock, for runs that start after construction
    pub fn restart_clock(&self) {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Elapsed time since the run started
    pub fn elapsed(&self) -> Duration {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Snapshot of counters, timing and the outcome log
    pub fn summary(&self) -> RunSummary {
        let state = self.state();
        RunSummary {
            counters: state.counters,
            elapsed: self.elapsed(),
            outcomes: state.outcomes.clone(),
        }
    }
}

/// Final report of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Aggregate counters
    pub counters: Counters,
    /// Wall-clock duration
    pub elapsed: Duration,
    /// Per-unit log in completion order
    pub outcomes: Vec<Outcome>,
}

impl RunSummary {
    /// Outcomes for a logical path
    pub fn outcomes_for<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Outcome> + 'a {
        self.outcomes.iter().filter(move |o| o.path == path)
    }

    /// Writes the tab-separated run log followed by the summary
    pub fn write_log<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, "path\tformat\taction\tdetail")?;
        for outcome in &self.outcomes {
            writeln!(
                out,
                "{}\t{}\t{}\t{}",
                outcome.path,
                outcome.format,
                outcome.action,
                outcome.detail.replace(['\t', '\n'], " ")
            )?;
        }
        writeln!(out)?;
        writeln!(out, "{self}")
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        writeln!(
            f,
            "{} items: {} extracted, {} unpacked, {} split, {} duplicates, {} unsupported, {} unknown",
            c.items, c.extracted, c.unpacked, c.split, c.duplicates, c.unsupported, c.unknown
        )?;
        write!(
            f,
            "{} of {} bytes processed in {:.2}s",
            c.bytes_processed,
            c.bytes_total,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_restart_clock() {
        let result = RunResult::new();
        thread::sleep(Duration::from_millis(200));
        assert!(result.elapsed() >= Duration::from_millis(200));
        result.restart_clock();
        assert!(result.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_add_if_new_is_idempotent() {
        let result = RunResult::new();
        let fp = Fingerprint::of_artifact("a.png", b"pixels");
        assert!(result.add_if_new(fp));
        assert!(!result.add_if_new(fp));
        assert_eq!(result.fingerprint_count(), 1);
    }

    #[test]
    fn test_fingerprint_includes_name() {
        assert_ne!(
            Fingerprint::of_artifact("a.png", b"x"),
            Fingerprint::of_artifact("b.png", b"x")
        );
        assert_eq!(
            Fingerprint::of_artifact("a.png", b"x"),
            Fingerprint::of_artifact("a.png", b"x")
        );
        assert_ne!(
            Fingerprint::of_artifact("ab", b"c"),
            Fingerprint::of_artifact("a", b"bc")
        );
    }

    #[test]
    fn test_record_counts_actions() {
        let result = RunResult::new();
        result.record(Outcome::new("a", "png", Action::Extract, ""));
        result.record(Outcome::new("b", "zip", Action::Unpack, ""));
        result.record(Outcome::new("c", "bin", Action::Unknown, "no signature"));
        result.add_total_bytes(100);
        result.add_processed_bytes(60);

        let summary = result.summary();
        assert_eq!(
            summary.counters,
            Counters {
                items: 3,
                bytes_total: 100,
                bytes_processed: 60,
                extracted: 1,
                unpacked: 1,
                unknown: 1,
                ..Counters::default()
            }
        );
        assert_eq!(summary.outcomes_for("c").count(), 1);
    }

    #[test]
    fn test_concurrent_dedup() {
        let result = Arc::new(RunResult::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let result = Arc::clone(&result);
                thread::spawn(move || {
                    let mut fresh = 0;
                    for i in 0..100 {
                        let fp = Fingerprint::of_artifact(&format!("f{}", i % 25), b"data");
                        if result.add_if_new(fp) {
                            fresh += 1;
                        }
                        result.record(Outcome::new(
                            format!("w{worker}/{i}"),
                            "bin",
                            Action::Extract,
                            "",
                        ));
                    }
                    fresh
                })
            })
            .collect();
        let fresh: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(fresh, 25);
        assert_eq!(result.fingerprint_count(), 25);
        assert_eq!(result.counters().items, 800);
    }

    #[test]
    fn test_log_format() {
        let result = RunResult::new();
        result.record(Outcome::new("x/y.bin", "bin (generic)", Action::Unknown, "tab\there"));
        let mut out = Vec::new();
        result.summary().write_log(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("path\tformat\taction\tdetail"));
        assert_eq!(lines.next(), Some("x/y.bin\tbin (generic)\tUnknown\ttab here"));
        assert!(text.contains("1 items:"));
    }
}
