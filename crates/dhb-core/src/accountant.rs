use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::DEFAULT_MEMORY_CAP;
use crate::pipeline::CopyFlag;

/// How long a blocked reservation sleeps before re-checking the counter.
const RESERVE_BACKOFF: Duration = Duration::from_millis(10);

/// Process-wide ledger of chunk bytes currently buffered in pipeline
/// channels, capped at `cap`. Readers reserve before enqueueing a chunk;
/// writers release once the chunk is written or skipped, so the counter
/// returns to its prior value when every pipeline has joined.
///
/// Held behind an `Arc` and handed to each pipeline; tests construct a
/// fresh instance per case.
#[derive(Debug)]
pub struct MemoryAccountant {
    in_flight: AtomicU64,
    peak: AtomicU64,
    cap: u64,
}

impl MemoryAccountant {
    pub fn new(cap: u64) -> Self {
        Self {
            in_flight: AtomicU64::new(0),
            peak: AtomicU64::new(0),
            cap,
        }
    }

    pub fn with_default_cap() -> Self {
        Self::new(DEFAULT_MEMORY_CAP)
    }

    /// Bytes currently reserved across all pipelines.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest in-flight value observed so far.
    pub fn peak_in_flight(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }

    /// Block until `n` more bytes fit under the cap, then take them.
    ///
    /// Returns `false` without reserving if `flag` flips to Abort while
    /// waiting. A request larger than the whole cap is admitted once the
    /// counter is empty, so a single oversized chunk cannot wedge forever.
    #[must_use]
    pub fn reserve(&self, n: u64, flag: &CopyFlag) -> bool {
        loop {
            let current = self.in_flight.load(Ordering::Acquire);
            let fits = current + n <= self.cap || (current == 0 && n > self.cap);
            if fits {
                if self
                    .in_flight
                    .compare_exchange(current, current + n, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.peak.fetch_max(current + n, Ordering::Relaxed);
                    return true;
                }
                // Lost the race; retry immediately.
                continue;
            }
            if flag.is_abort() {
                return false;
            }
            std::thread::sleep(RESERVE_BACKOFF);
        }
    }

    /// Give `n` bytes back. Every successful [`reserve`] is paired with
    /// exactly one release of the same amount, even on cancellation.
    pub fn release(&self, n: u64) {
        let before = self.in_flight.fetch_sub(n, Ordering::AcqRel);
        debug_assert!(before >= n, "released {n} bytes with only {before} in flight");
    }
}
