//! Per-stream counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a stream's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    /// Frames accepted by the engine.
    pub submitted: u64,
    /// Results stored for a caller.
    pub delivered: u64,
    /// Results handed to a caller.
    pub claimed: u64,
    /// Entries given up by their caller (timeout or explicit drop).
    pub abandoned: u64,
    /// Results that arrived with nobody left to receive them.
    pub discarded: u64,
    /// Indexed results dropped because a queue was full.
    pub overflowed: u64,
    /// Entries removed by the maintenance sweep.
    pub expired: u64,
    /// Results or entries currently held.
    pub pending: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StreamCounters {
    submitted: AtomicU64,
    delivered: AtomicU64,
    claimed: AtomicU64,
    abandoned: AtomicU64,
    discarded: AtomicU64,
    overflowed: AtomicU64,
    expired: AtomicU64,
}

macro_rules! bump {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            #[inline]
            pub fn $name(&self, n: u64) {
                self.$field.fetch_add(n, Ordering::Relaxed);
            }
        )*
    };
}

impl StreamCounters {
    bump! {
        add_submitted => submitted,
        add_delivered => delivered,
        add_claimed => claimed,
        add_abandoned => abandoned,
        add_discarded => discarded,
        add_overflowed => overflowed,
        add_expired => expired,
    }

    pub fn snapshot(&self, pending: u64) -> StreamStats {
        StreamStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            claimed: self.claimed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            pending,
        }
    }
}
