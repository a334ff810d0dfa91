use std::sync::{Mutex, PoisonError};

use crate::catalog::FormatDescriptor;

/// Consecutive carving failures after which a format is skipped
pub const BAD_FORMAT_THRESHOLD: u32 = 4;

/// Remembers the last format that failed carving and how often in a row.
///
/// A single slot is enough: junk tends to arrive in long runs of one shape,
/// and a different failing format resets the count.
#[derive(Debug, Default)]
pub struct BadFormatCache {
    slot: Mutex<Option<(FormatDescriptor, u32)>>,
}

impl BadFormatCache {
    /// Creates an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once `format` has failed the threshold number of times in a row
    pub fn should_skip(&self, format: &FormatDescriptor) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(&*slot, Some((last, count)) if last == format && *count >= BAD_FORMAT_THRESHOLD)
    }

    /// Counts a failure, resetting the count if the format changed
    pub fn record_failure(&self, format: &FormatDescriptor) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *slot {
            Some((last, count)) if last == format => *count = count.saturating_add(1),
            _ => *slot = Some((format.clone(), 1)),
        }
    }

    /// Clears the slot if it holds `format`
    pub fn record_success(&self, format: &FormatDescriptor) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(&*slot, Some((last, _)) if last == format) {
            *slot = None;
        }
    }

    /// Current failure count for `format`
    pub fn failures(&self, format: &FormatDescriptor) -> u32 {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match &*slot {
            Some((last, count)) if last == format => *count,
            _ => 0,
        }
    }
}
