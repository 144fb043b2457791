//! Time-ordered entity key allocation.
//!
//! A single-process variant of a snowflake ID. No worker or datacenter bits
//! are needed because there is exactly one writer, which frees up room to
//! keep the whole key under 2^53 — the largest integer span that survives a
//! round trip through storage layers that hand numbers back as IEEE doubles.
//!
//! ```text
//!  53 bit strictly positive integer
//!   48 bits           + 5 bits = 53 bits
//! +------------------------------------------------+-----+
//! |              timestamp (unix millis)           | seq |
//! +------------------------------------------------+-----+
//! ```
//!
//! Five sequence bits allow 32 allocations per millisecond. When a
//! millisecond's sequence space is exhausted the allocator blocks until the
//! clock advances instead of overflowing into the timestamp field, so
//! callers must tolerate sub-millisecond blocking.

use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::now_millis;

/// A 53-bit time-ordered entity key.
pub type Snowflake = i64;

const SEQ_BITS: u32 = 5;
const SEQ_PER_MILLI: i64 = 1 << SEQ_BITS;

/// Largest representable key (exclusive): 2^53.
pub const KEY_LIMIT: i64 = 1 << 53;

#[derive(Debug, Default)]
struct GenState {
    last_timestamp: i64,
    sequence: i64,
}

/// Snowflake allocator with an in-process monotonic counter.
///
/// Explicit state rather than a global so independent pipelines (and tests)
/// can each run their own.
#[derive(Debug, Default)]
pub struct SnowflakeGen {
    state: Mutex<GenState>,
}

impl SnowflakeGen {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next key. Strictly increasing within this generator.
    pub fn next_id(&self) -> Snowflake {
        loop {
            if let Some(id) = self.next_at(now_millis()) {
                return id;
            }
            // sequence space exhausted, wait out the remainder of the
            // millisecond rather than borrowing timestamp bits
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn next_at(&self, now: i64) -> Option<Snowflake> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        // never re-issue an earlier millisecond: a backwards clock step
        // (NTP correction) keeps allocating against the high-water mark
        // until the clock catches up
        let ts = now.max(state.last_timestamp);
        if state.last_timestamp != ts {
            state.last_timestamp = ts;
            state.sequence = 0;
        } else if state.sequence == SEQ_PER_MILLI {
            return None;
        }

        let seq = state.sequence;
        state.sequence += 1;
        Some(pack(ts, seq))
    }

    /// Build a backdated key at `timestamp` with the given sequence slot.
    ///
    /// Used when entities created from back-filled history should sort at
    /// their original time. Uniqueness is the caller's problem: retry with
    /// an incrementing `sequence` until a free key is found.
    #[must_use]
    pub fn with_timestamp(&self, timestamp: i64, sequence: i64) -> Snowflake {
        pack(timestamp + sequence / SEQ_PER_MILLI, sequence % SEQ_PER_MILLI)
    }
}

fn pack(timestamp: i64, sequence: i64) -> Snowflake {
    debug_assert!(timestamp >= 0 && sequence < SEQ_PER_MILLI);
    (timestamp << SEQ_BITS) | sequence
}

/// Invert a key back to its unix-millis timestamp, for display.
#[must_use]
pub const fn timestamp_of(id: Snowflake) -> i64 {
    id >> SEQ_BITS
}
