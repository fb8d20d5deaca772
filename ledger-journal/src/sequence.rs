//! Per-stream monotonic sequence allocation (spec §2, R9): sequence numbers
//! never repeat within a stream and never go backward, but gaps are allowed
//! when a transaction that reserved one later aborts.

use std::collections::HashMap;

use tokio::sync::Mutex;

/// Allocates sequence numbers for a keyed set of append-only streams. A
/// ledger's journal is one stream; the whole-event-store chain is another.
/// Mirrors `lock_period`'s single-mutex-over-a-map shape: one lock per
/// allocator, held only for the duration of the increment.
#[derive(Default)]
pub struct SequenceAllocator {
    counters: Mutex<HashMap<String, u64>>,
}

impl SequenceAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves and returns the next sequence number for `stream_key`,
    /// starting at 1. The caller must hold this value only under the same
    /// storage transaction that records it, or a gap results.
    pub async fn next(&self, stream_key: &str) -> u64 {
        let mut guard = self.counters.lock().await;
        let counter = guard.entry(stream_key.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Returns the last sequence number issued for `stream_key`, or 0 if
    /// none has been issued yet.
    pub async fn last(&self, stream_key: &str) -> u64 {
        let guard = self.counters.lock().await;
        guard.get(stream_key).copied().unwrap_or(0)
    }
}
