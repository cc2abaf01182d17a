//! Transmission modes and the state each one owns.

use super::correlation::CorrelationTable;
use super::queue::{BlockingResultQueue, PushOutcome};
use crate::config::RuntimeConfig;
use crate::data::DataOutput;
use crate::engine::GraphTopology;
use crate::error::{EngineError, Result, StreamError};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How results are matched back to submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransmissionMode {
    /// Not fixed yet.
    Default,
    /// Anonymous FIFO per exit point.
    Indexed,
    /// One result per unique id.
    Correlated,
    /// One result per exit point per unique id.
    CorrelatedMulti,
}

impl fmt::Display for TransmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransmissionMode::Default => "default",
            TransmissionMode::Indexed => "indexed",
            TransmissionMode::Correlated => "correlated",
            TransmissionMode::CorrelatedMulti => "correlated-multi",
        };
        f.write_str(name)
    }
}

/// A result waiting in an indexed queue.
#[derive(Debug, Clone)]
pub(crate) struct IndexedItem {
    pub origin: Option<usize>,
    pub output: std::result::Result<DataOutput, EngineError>,
}

/// Indexed-mode state: a queue per sink and unmatched-send accounting per source.
pub(crate) struct IndexedState {
    queues: Vec<BlockingResultQueue<IndexedItem>>,
    /// Results still expected per source.
    outstanding: Mutex<Vec<u64>>,
    /// Sinks each source feeds.
    fan_out: Vec<u64>,
    max_outstanding: u64,
}

impl IndexedState {
    fn new(topology: &GraphTopology, config: &RuntimeConfig) -> Self {
        Self {
            queues: (0..topology.sink_count())
                .map(|sink| BlockingResultQueue::new(sink, config.queue_capacity))
                .collect(),
            outstanding: Mutex::new(vec![0; topology.source_count()]),
            fan_out: (0..topology.source_count())
                .map(|source| topology.sinks_fed_by(source).len() as u64)
                .collect(),
            max_outstanding: u64::from(config.max_outstanding_per_source.max(1)),
        }
    }

    /// Account for a send to `source`, or refuse it if too many are unmatched.
    pub fn reserve(&self, source: usize) -> Result<()> {
        let fan_out = self.fan_out.get(source).copied().unwrap_or(0);
        if fan_out == 0 {
            return Ok(());
        }
        let mut outstanding = self.lock_outstanding();
        let Some(pending) = outstanding.get_mut(source) else {
            return Ok(());
        };
        if *pending >= self.max_outstanding * fan_out {
            return Err(StreamError::Busy {
                entry_point: source,
                outstanding: pending.div_ceil(fan_out),
            });
        }
        *pending += fan_out;
        Ok(())
    }

    /// Undo a reservation whose submission failed.
    pub fn cancel(&self, source: usize) {
        let fan_out = self.fan_out.get(source).copied().unwrap_or(0);
        self.release(Some(source), fan_out);
    }

    fn release(&self, origin: Option<usize>, results: u64) {
        let Some(origin) = origin else { return };
        if let Some(pending) = self.lock_outstanding().get_mut(origin) {
            *pending = pending.saturating_sub(results);
        }
    }

    pub fn push(&self, sink: usize, item: IndexedItem) -> Option<PushOutcome> {
        let queue = self.queues.get(sink)?;
        let origin = item.origin;
        let outcome = queue.push(item);
        if outcome != PushOutcome::Queued {
            self.release(origin, 1);
        }
        Some(outcome)
    }

    pub fn pop(&self, sink: usize, timeout: Duration) -> Result<DataOutput> {
        let queue = self.queues.get(sink).ok_or_else(|| {
            StreamError::InvalidLink(format!("sink index {} out of range", sink))
        })?;
        let item = queue.pop(timeout)?;
        self.release(item.origin, 1);
        item.output.map_err(StreamError::EngineFailure)
    }

    pub fn pending(&self) -> usize {
        self.queues.iter().map(BlockingResultQueue::len).sum()
    }

    fn close(&self) -> usize {
        self.queues.iter().map(BlockingResultQueue::close).sum()
    }

    fn lock_outstanding(&self) -> MutexGuard<'_, Vec<u64>> {
        self.outstanding.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// State of a stream once its mode is latched.
pub(crate) enum ModeSlot {
    Indexed(IndexedState),
    Correlated(CorrelationTable),
    CorrelatedMulti(CorrelationTable),
    /// Latched by teardown before any send or get.
    Detached,
}

impl ModeSlot {
    pub fn new(mode: TransmissionMode, topology: &GraphTopology, config: &RuntimeConfig) -> Self {
        match mode {
            TransmissionMode::Default => ModeSlot::Detached,
            TransmissionMode::Indexed => ModeSlot::Indexed(IndexedState::new(topology, config)),
            TransmissionMode::Correlated => ModeSlot::Correlated(CorrelationTable::single()),
            TransmissionMode::CorrelatedMulti => ModeSlot::CorrelatedMulti(CorrelationTable::multi(
                topology.sink_count(),
                config.sink_completion_timeout(),
                config.partial_policy,
            )),
        }
    }

    pub fn mode(&self) -> TransmissionMode {
        match self {
            ModeSlot::Indexed(_) => TransmissionMode::Indexed,
            ModeSlot::Correlated(_) => TransmissionMode::Correlated,
            ModeSlot::CorrelatedMulti(_) => TransmissionMode::CorrelatedMulti,
            ModeSlot::Detached => TransmissionMode::Default,
        }
    }

    pub fn table(&self) -> Option<&CorrelationTable> {
        match self {
            ModeSlot::Correlated(table) | ModeSlot::CorrelatedMulti(table) => Some(table),
            _ => None,
        }
    }

    pub fn pending(&self) -> usize {
        match self {
            ModeSlot::Indexed(state) => state.pending(),
            ModeSlot::Correlated(table) | ModeSlot::CorrelatedMulti(table) => table.len(),
            ModeSlot::Detached => 0,
        }
    }

    /// Wake every waiter with `InstanceDestroyed` and drop held results.
    pub fn close(&self) -> usize {
        match self {
            ModeSlot::Indexed(state) => state.close(),
            ModeSlot::Correlated(table) | ModeSlot::CorrelatedMulti(table) => table.close(),
            ModeSlot::Detached => 0,
        }
    }
}
