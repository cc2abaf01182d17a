//! Correlation of asynchronously delivered results with their submissions.
//!
//! Every correlated send inserts a pending entry keyed by its unique id
//! before the frame reaches the engine. Sink callbacks fill the entry's
//! slots; waiters block on a single condition variable until the entry is
//! ready or their deadline passes.
//!
//! An entry leaves the table exactly once, under the table lock: claimed by
//! a waiter, abandoned by a waiter whose deadline passed, dropped on request,
//! swept after the retention period, or cleared on close. Whichever of a
//! late delivery and an abandoning waiter takes the lock first wins; a
//! delivery for an id that is no longer present is discarded and never
//! recreates the entry.

use crate::config::PartialPolicy;
use crate::data::{DataOutput, MultiResult, SinkSlot};
use crate::error::{EngineError, Result, StreamError};
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

type SlotValue = std::result::Result<DataOutput, EngineError>;

/// Why a delivery was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Claimed, abandoned, dropped, or never issued.
    UnknownId,
    /// The slot already holds a result.
    DuplicateSlot,
    SlotOutOfRange,
    Closed,
}

/// Outcome of [`CorrelationTable::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverOutcome {
    /// Stored; the entry still waits for other slots.
    Stored,
    /// Stored; every slot of the entry is now filled.
    Completed,
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryStatus {
    Pending,
    Ready,
}

struct Entry {
    status: EntryStatus,
    slots: Vec<Option<SlotValue>>,
    filled: usize,
    created: Instant,
    first_arrival: Option<Instant>,
    waiters: usize,
}

impl Entry {
    fn new(slots: usize) -> Self {
        Self {
            status: EntryStatus::Pending,
            slots: vec![None; slots],
            filled: 0,
            created: Instant::now(),
            first_arrival: None,
            waiters: 0,
        }
    }

    /// End of the completion window, if one is running and representable.
    fn window_end(&self, window: Option<Duration>) -> Option<Instant> {
        self.first_arrival?.checked_add(window?)
    }
}

struct TableState {
    entries: HashMap<u64, Entry>,
    closed: bool,
}

enum Step {
    Claim,
    Abandon,
    /// Sleep until notified, or at most this long.
    Wait(Option<Duration>),
}

/// Slots taken out of a claimed or abandoned entry.
struct Claimed {
    slots: Vec<Option<SlotValue>>,
    filled: usize,
}

/// Pending results keyed by unique id.
pub struct CorrelationTable {
    slots_per_entry: usize,
    completion_window: Option<Duration>,
    policy: PartialPolicy,
    state: Mutex<TableState>,
    arrived: Condvar,
}

impl CorrelationTable {
    /// Table with one slot per entry.
    pub fn single() -> Self {
        Self::with_slots(1, None, PartialPolicy::Fail)
    }

    /// Table with `sinks` slots per entry.
    ///
    /// With a `completion_window`, an entry becomes ready once that much time
    /// has passed since its first delivery, even if slots are still empty.
    pub fn multi(sinks: usize, completion_window: Option<Duration>, policy: PartialPolicy) -> Self {
        Self::with_slots(sinks, completion_window, policy)
    }

    fn with_slots(slots: usize, completion_window: Option<Duration>, policy: PartialPolicy) -> Self {
        Self {
            slots_per_entry: slots.max(1),
            completion_window,
            policy,
            state: Mutex::new(TableState {
                entries: HashMap::new(),
                closed: false,
            }),
            arrived: Condvar::new(),
        }
    }

    /// Insert a pending entry.
    ///
    /// # Panics
    /// If an entry for `id` already exists.
    pub fn insert(&self, id: u64) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(StreamError::InstanceDestroyed);
        }
        if state.entries.contains_key(&id) {
            panic!("correlation id {} inserted twice", id);
        }
        state.entries.insert(id, Entry::new(self.slots_per_entry));
        Ok(())
    }

    /// Remove an entry without waiting. Returns whether it existed.
    pub fn remove(&self, id: u64) -> bool {
        let removed = self.lock().entries.remove(&id).is_some();
        if removed {
            self.arrived.notify_all();
        }
        removed
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().entries.contains_key(&id)
    }

    /// Store a result in slot `slot` of entry `id` and wake waiters.
    pub fn deliver(&self, id: u64, slot: usize, value: SlotValue) -> DeliverOutcome {
        let mut state = self.lock();
        if state.closed {
            return DeliverOutcome::Discarded(DiscardReason::Closed);
        }
        let Some(entry) = state.entries.get_mut(&id) else {
            return DeliverOutcome::Discarded(DiscardReason::UnknownId);
        };
        let Some(target) = entry.slots.get_mut(slot) else {
            return DeliverOutcome::Discarded(DiscardReason::SlotOutOfRange);
        };
        if target.is_some() {
            return DeliverOutcome::Discarded(DiscardReason::DuplicateSlot);
        }

        *target = Some(value);
        entry.filled += 1;
        entry.first_arrival.get_or_insert_with(Instant::now);
        let outcome = if entry.filled == entry.slots.len() {
            entry.status = EntryStatus::Ready;
            DeliverOutcome::Completed
        } else {
            DeliverOutcome::Stored
        };
        drop(state);

        self.arrived.notify_all();
        outcome
    }

    /// Wait for the single result of `id` and claim it.
    ///
    /// An engine failure delivered for the entry is returned as
    /// [`StreamError::EngineFailure`].
    pub fn wait_single(&self, id: u64, timeout: Duration) -> Result<DataOutput> {
        let claimed = self.wait_claim(id, timeout)?;
        match claimed.slots.into_iter().next().flatten() {
            Some(Ok(output)) => Ok(output),
            Some(Err(err)) => Err(StreamError::EngineFailure(err)),
            None => Err(StreamError::Timeout { waited: timeout }),
        }
    }

    /// Wait for every slot of `id` and claim the entry.
    ///
    /// If the deadline or the completion window ends with only some slots
    /// filled, the partial set is returned under
    /// [`PartialPolicy::ReturnPartial`] and reported as a timeout under
    /// [`PartialPolicy::Fail`].
    pub fn wait_multi(&self, id: u64, timeout: Duration) -> Result<MultiResult> {
        let claimed = self.wait_claim(id, timeout)?;
        if claimed.filled < claimed.slots.len() && self.policy == PartialPolicy::Fail {
            return Err(StreamError::Timeout { waited: timeout });
        }

        let slots = claimed
            .slots
            .into_iter()
            .map(|slot| match slot {
                Some(Ok(output)) => SinkSlot::Delivered(output),
                Some(Err(err)) => SinkSlot::Failed(err),
                None => SinkSlot::Missing,
            })
            .collect();
        Ok(MultiResult {
            unique_id: id,
            slots,
        })
    }

    /// Block until entry `id` is ready, then remove and return it.
    ///
    /// When the deadline passes first the entry is removed as abandoned; its
    /// slots are returned if any were filled, otherwise the wait times out.
    /// A timeout too large to represent as a deadline never expires.
    fn wait_claim(&self, id: u64, timeout: Duration) -> Result<Claimed> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(StreamError::InstanceDestroyed);
            }

            let now = Instant::now();
            let step = match state.entries.get(&id) {
                None => return Err(StreamError::ResultNotFound(id)),
                Some(entry) if entry.status == EntryStatus::Ready => Step::Claim,
                Some(entry) => {
                    let window_end = entry.window_end(self.completion_window);
                    if window_end.is_some_and(|end| now >= end) {
                        Step::Claim
                    } else if deadline.is_some_and(|end| now >= end) {
                        Step::Abandon
                    } else {
                        let wake_at = match (window_end, deadline) {
                            (Some(a), Some(b)) => Some(a.min(b)),
                            (a, b) => a.or(b),
                        };
                        Step::Wait(wake_at.map(|at| at - now))
                    }
                }
            };

            match step {
                Step::Wait(wait) => {
                    if let Some(entry) = state.entries.get_mut(&id) {
                        entry.waiters += 1;
                    }
                    state = match wait {
                        Some(wait) => self
                            .arrived
                            .wait_timeout(state, wait)
                            .map(|(guard, _)| guard)
                            .unwrap_or_else(|e| e.into_inner().0),
                        None => self.arrived.wait(state).unwrap_or_else(|e| e.into_inner()),
                    };
                    if let Some(entry) = state.entries.get_mut(&id) {
                        entry.waiters = entry.waiters.saturating_sub(1);
                    }
                }
                Step::Claim | Step::Abandon => {
                    let Some(entry) = state.entries.remove(&id) else {
                        return Err(StreamError::ResultNotFound(id));
                    };
                    if matches!(step, Step::Abandon) {
                        tracing::debug!(id, filled = entry.filled, "correlation entry abandoned");
                        if entry.filled == 0 {
                            return Err(StreamError::Timeout { waited: timeout });
                        }
                    }
                    return Ok(Claimed {
                        slots: entry.slots,
                        filled: entry.filled,
                    });
                }
            }
        }
    }

    /// Remove entries nobody waits on that are older than `retention`.
    pub fn sweep(&self, retention: Duration) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| entry.waiters > 0 || entry.created.elapsed() < retention);
        before - state.entries.len()
    }

    /// Drop every entry and wake all waiters with `InstanceDestroyed`.
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let dropped = state.entries.len();
        state.entries.clear();
        drop(state);
        self.arrived.notify_all();
        dropped
    }

    /// Number of entries not yet claimed or abandoned.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn slots_per_entry(&self) -> usize {
        self.slots_per_entry
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
