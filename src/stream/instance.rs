//! A running graph bound to one transmission mode.

use super::mode::{IndexedItem, ModeSlot, TransmissionMode};
use super::queue::PushOutcome;
use super::correlation::DeliverOutcome;
use super::stats::{StreamCounters, StreamStats};
use crate::config::RuntimeConfig;
use crate::data::{DataInput, DataOutput, MultiResult, SinkSelector, SourceSelector};
use crate::engine::{
    ExecutionEngine, FrameTag, GraphDescription, GraphHandle, GraphTopology, SinkCallback,
    SinkDelivery, Submission,
};
use crate::error::{Result, StreamError};
use crate::runtime::Maintained;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

/// Lifecycle of a [`PipelineInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    New,
    Building,
    Running,
    Stopping,
    Destroyed,
}

/// State reachable from engine callbacks.
///
/// Callbacks hold only a `Weak` to this, never the instance itself.
struct Shared {
    name: String,
    topology: GraphTopology,
    config: RuntimeConfig,
    mode: OnceLock<ModeSlot>,
    closed: AtomicBool,
    state: Mutex<StreamState>,
    counters: StreamCounters,
}

impl Shared {
    fn set_state(&self, next: StreamState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    fn on_result(&self, delivery: SinkDelivery) {
        let SinkDelivery { sink, tag, output } = delivery;
        if let Err(err) = &output {
            tracing::error!(stream = %self.name, sink, error = %err, "engine reported a failed result");
        }

        let Some(slot) = self.mode.get() else {
            tracing::warn!(stream = %self.name, sink, "result arrived before any send, discarded");
            self.counters.add_discarded(1);
            return;
        };

        let stored = match slot {
            ModeSlot::Indexed(state) => {
                let origin = tag.map(|t| t.origin);
                match state.push(sink, IndexedItem { origin, output }) {
                    Some(PushOutcome::Queued) => true,
                    Some(PushOutcome::Overflowed) => {
                        tracing::warn!(stream = %self.name, sink, "result queue full, result dropped");
                        self.counters.add_overflowed(1);
                        return;
                    }
                    Some(PushOutcome::Closed) | None => false,
                }
            }
            ModeSlot::Correlated(table) | ModeSlot::CorrelatedMulti(table) => {
                let Some(id) = tag.and_then(|t| t.unique_id) else {
                    tracing::warn!(stream = %self.name, sink, "untagged result in correlated mode, discarded");
                    self.counters.add_discarded(1);
                    return;
                };
                let index = if matches!(slot, ModeSlot::Correlated(_)) { 0 } else { sink };
                match table.deliver(id, index, output) {
                    DeliverOutcome::Stored | DeliverOutcome::Completed => {
                        tracing::debug!(stream = %self.name, id, sink, "result stored");
                        true
                    }
                    DeliverOutcome::Discarded(reason) => {
                        tracing::warn!(stream = %self.name, id, sink, ?reason, "result discarded");
                        false
                    }
                }
            }
            ModeSlot::Detached => false,
        };

        if stored {
            self.counters.add_delivered(1);
        } else {
            self.counters.add_discarded(1);
        }
    }
}

/// One stream: a graph built by the engine plus the bookkeeping that turns
/// its callbacks into blocking, timeout-bounded request/response calls.
///
/// The transmission mode is fixed by the first send or get and every later
/// call must use the same mode.
pub struct PipelineInstance {
    shared: Arc<Shared>,
    engine: Arc<dyn ExecutionEngine>,
    graph: GraphHandle,
    next_id: AtomicU64,
}

impl PipelineInstance {
    /// Build and start a graph for `description`.
    ///
    /// On failure nothing is left registered with the engine.
    pub fn create(
        name: &str,
        description: &GraphDescription,
        engine: Arc<dyn ExecutionEngine>,
        config: &RuntimeConfig,
    ) -> Result<Self> {
        let topology = description.topology()?;
        let shared = Arc::new(Shared {
            name: name.to_string(),
            topology,
            config: config.clone(),
            mode: OnceLock::new(),
            closed: AtomicBool::new(false),
            state: Mutex::new(StreamState::New),
            counters: StreamCounters::default(),
        });

        shared.set_state(StreamState::Building);
        let graph = engine.build_graph(name, description)?;

        let started = (|| {
            for sink in 0..shared.topology.sink_count() {
                let weak: Weak<Shared> = Arc::downgrade(&shared);
                let callback: SinkCallback = Arc::new(move |delivery: SinkDelivery| {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_result(delivery);
                    }
                });
                engine.register_sink_callback(&graph, sink, callback)?;
            }
            engine.start(&graph)
        })();

        if let Err(err) = started {
            tracing::error!(stream = name, error = %err, "failed to start stream");
            engine.unregister_sink_callbacks(&graph);
            engine.teardown(&graph);
            shared.set_state(StreamState::Destroyed);
            return Err(err.into());
        }

        shared.set_state(StreamState::Running);
        tracing::info!(
            stream = name,
            engine = engine.name(),
            sources = shared.topology.source_count(),
            sinks = shared.topology.sink_count(),
            "stream running"
        );

        Ok(Self {
            shared,
            engine,
            graph,
            next_id: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn topology(&self) -> &GraphTopology {
        &self.shared.topology
    }

    pub fn state(&self) -> StreamState {
        *self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mode latched so far; `Default` before the first send or get.
    pub fn transmission_mode(&self) -> TransmissionMode {
        self.shared
            .mode
            .get()
            .map_or(TransmissionMode::Default, ModeSlot::mode)
    }

    pub fn stats(&self) -> StreamStats {
        let pending = self.shared.mode.get().map_or(0, ModeSlot::pending);
        self.shared.counters.snapshot(pending as u64)
    }

    /// Send to an entry point in indexed mode.
    pub fn send(&self, source: impl Into<SourceSelector>, input: DataInput) -> Result<()> {
        let source = self.shared.topology.resolve_source(&source.into())?;
        let ModeSlot::Indexed(state) = self.latch(TransmissionMode::Indexed)? else {
            return Err(self.mismatch(TransmissionMode::Indexed));
        };

        state.reserve(source)?;
        if let Err(err) = self.submit(source, FrameTag::indexed(source), input) {
            state.cancel(source);
            return Err(err);
        }
        Ok(())
    }

    /// Send to an entry point and return the id to collect the result with.
    pub fn send_with_id(&self, source: impl Into<SourceSelector>, input: DataInput) -> Result<u64> {
        let source = self.shared.topology.resolve_source(&source.into())?;
        let ModeSlot::Correlated(table) = self.latch(TransmissionMode::Correlated)? else {
            return Err(self.mismatch(TransmissionMode::Correlated));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        table.insert(id)?;
        if let Err(err) = self.submit(source, FrameTag::correlated(source, id), input) {
            table.remove(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Send one input to each of several entry points under a single id.
    ///
    /// The result is collected with [`get_multi`](Self::get_multi), one slot
    /// per exit point. Each entry point may be listed once, and together they
    /// must feed every exit point. If any submission fails the id is withdrawn.
    pub fn send_multi(&self, sources: &[SourceSelector], inputs: Vec<DataInput>) -> Result<u64> {
        if sources.is_empty() || sources.len() != inputs.len() {
            return Err(StreamError::InvalidLink(format!(
                "{} entry point(s) given for {} input(s)",
                sources.len(),
                inputs.len()
            )));
        }
        let indices = sources
            .iter()
            .map(|s| self.shared.topology.resolve_source(s))
            .collect::<Result<Vec<_>>>()?;
        self.check_covering(&indices)?;
        let ModeSlot::CorrelatedMulti(table) = self.latch(TransmissionMode::CorrelatedMulti)? else {
            return Err(self.mismatch(TransmissionMode::CorrelatedMulti));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        table.insert(id)?;
        for (source, input) in indices.into_iter().zip(inputs) {
            if let Err(err) = self.submit(source, FrameTag::correlated(source, id), input) {
                table.remove(id);
                return Err(err);
            }
        }
        Ok(id)
    }

    /// Take the oldest result of an exit point in indexed mode.
    pub fn get(&self, sink: impl Into<SinkSelector>, timeout: Duration) -> Result<DataOutput> {
        let sink = self.shared.topology.resolve_sink(&sink.into())?;
        let ModeSlot::Indexed(state) = self.latch(TransmissionMode::Indexed)? else {
            return Err(self.mismatch(TransmissionMode::Indexed));
        };
        let result = state.pop(sink, timeout);
        self.count_claim(&result);
        result
    }

    /// Wait for and claim the result of `id`.
    pub fn get_with_id(&self, id: u64, timeout: Duration) -> Result<DataOutput> {
        let ModeSlot::Correlated(table) = self.latch(TransmissionMode::Correlated)? else {
            return Err(self.mismatch(TransmissionMode::Correlated));
        };
        let result = table.wait_single(id, timeout);
        self.count_claim(&result);
        result
    }

    /// Wait for and claim every exit point's result of `id`.
    pub fn get_multi(&self, id: u64, timeout: Duration) -> Result<MultiResult> {
        let ModeSlot::CorrelatedMulti(table) = self.latch(TransmissionMode::CorrelatedMulti)? else {
            return Err(self.mismatch(TransmissionMode::CorrelatedMulti));
        };
        let result = table.wait_multi(id, timeout);
        self.count_claim(&result);
        result
    }

    /// Give up on `id` without waiting; a result arriving later is discarded.
    pub fn drop_result(&self, id: u64) -> Result<()> {
        let slot = match self.shared.mode.get() {
            Some(ModeSlot::Detached) => return Err(StreamError::InstanceDestroyed),
            Some(slot) => slot,
            None => return Err(StreamError::ResultNotFound(id)),
        };
        let Some(table) = slot.table() else {
            return Err(self.mismatch(TransmissionMode::Correlated));
        };
        if table.remove(id) {
            self.shared.counters.add_abandoned(1);
            tracing::debug!(stream = %self.shared.name, id, "result dropped");
            Ok(())
        } else {
            Err(StreamError::ResultNotFound(id))
        }
    }

    /// Remove correlated entries nobody waits on that are older than `retention`.
    pub fn sweep_expired(&self, retention: Duration) -> usize {
        let swept = self
            .shared
            .mode
            .get()
            .and_then(ModeSlot::table)
            .map_or(0, |table| table.sweep(retention));
        if swept > 0 {
            self.shared.counters.add_expired(swept as u64);
            tracing::warn!(stream = %self.shared.name, swept, "expired unclaimed results");
        }
        swept
    }

    /// Stop the stream.
    ///
    /// Callbacks are unregistered before any state is released, and every
    /// blocked get returns `InstanceDestroyed`. Later calls are no-ops.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(*state, StreamState::Stopping | StreamState::Destroyed) {
                return;
            }
            *state = StreamState::Stopping;
        }

        self.shared.closed.store(true, Ordering::SeqCst);
        self.engine.unregister_sink_callbacks(&self.graph);

        // Latching here closes the race with a concurrent first send.
        let slot = self.shared.mode.get_or_init(|| ModeSlot::Detached);
        let dropped = slot.close();
        self.engine.teardown(&self.graph);

        self.shared.set_state(StreamState::Destroyed);
        tracing::info!(stream = %self.shared.name, dropped, "stream destroyed");
    }

    fn latch(&self, requested: TransmissionMode) -> Result<&ModeSlot> {
        let shared = &self.shared;
        let slot = shared
            .mode
            .get_or_init(|| ModeSlot::new(requested, &shared.topology, &shared.config));
        if shared.closed.load(Ordering::SeqCst) || matches!(slot, ModeSlot::Detached) {
            return Err(StreamError::InstanceDestroyed);
        }
        Ok(slot)
    }

    /// Entry points of a multi-send: no repeats, every exit point reached.
    fn check_covering(&self, sources: &[usize]) -> Result<()> {
        let topology = &self.shared.topology;
        let mut listed = vec![false; topology.source_count()];
        let mut fed = vec![false; topology.sink_count()];
        for &source in sources {
            if let Some(seen) = listed.get_mut(source) {
                if std::mem::replace(seen, true) {
                    return Err(StreamError::InvalidLink(format!(
                        "entry point {} listed more than once",
                        source
                    )));
                }
            }
            for &sink in topology.sinks_fed_by(source) {
                if let Some(reached) = fed.get_mut(sink) {
                    *reached = true;
                }
            }
        }
        match fed.iter().position(|reached| !reached) {
            Some(sink) => Err(StreamError::InvalidLink(format!(
                "exit point {} is not fed by any listed entry point",
                sink
            ))),
            None => Ok(()),
        }
    }

    fn mismatch(&self, requested: TransmissionMode) -> StreamError {
        let current = self.transmission_mode();
        tracing::warn!(stream = %self.shared.name, %current, %requested, "transmission mode mismatch");
        StreamError::ModeMismatch { current, requested }
    }

    fn submit(&self, source: usize, tag: FrameTag, input: DataInput) -> Result<()> {
        let submission = Submission { source, tag, input };
        match self.engine.submit(&self.graph, submission) {
            Ok(()) => {
                self.shared.counters.add_submitted(1);
                tracing::debug!(stream = %self.shared.name, source, id = ?tag.unique_id, "frame submitted");
                Ok(())
            }
            Err(_) if self.shared.closed.load(Ordering::SeqCst) => {
                Err(StreamError::InstanceDestroyed)
            }
            Err(err) => {
                tracing::error!(stream = %self.shared.name, source, error = %err, "submit failed");
                Err(err.into())
            }
        }
    }

    fn count_claim<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.shared.counters.add_claimed(1),
            Err(StreamError::Timeout { .. }) => self.shared.counters.add_abandoned(1),
            Err(_) => {}
        }
    }
}

impl Maintained for PipelineInstance {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn stats(&self) -> StreamStats {
        PipelineInstance::stats(self)
    }

    fn maintain(&self) -> usize {
        if self.state() != StreamState::Running {
            return 0;
        }
        self.sweep_expired(self.shared.config.result_retention())
    }
}

impl Drop for PipelineInstance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PipelineInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineInstance")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("mode", &self.transmission_mode())
            .finish()
    }
}
