//! In-process engine on a tokio runtime.
//!
//! Every submission is routed to each sink reachable from its entry point.
//! What a sink produces is decided by a [`Transform`]; the default echoes
//! the input back with its frame metadata.

use super::description::GraphDescription;
use super::graph::{codes, GraphTable};
use super::traits::{ExecutionEngine, GraphHandle, SinkCallback, SinkDelivery, Submission};
use crate::config::RuntimeConfig;
use crate::data::{DataInput, DataOutput};
use crate::error::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime as TokioRuntime;

/// Produces the output of one sink for one input.
pub trait Transform: Send + Sync {
    fn apply(&self, sink: usize, input: &DataInput) -> Result<DataOutput, EngineError>;
}

impl<F> Transform for F
where
    F: Fn(usize, &DataInput) -> Result<DataOutput, EngineError> + Send + Sync,
{
    fn apply(&self, sink: usize, input: &DataInput) -> Result<DataOutput, EngineError> {
        self(sink, input)
    }
}

/// Returns the input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl Transform for Echo {
    fn apply(&self, _sink: usize, input: &DataInput) -> Result<DataOutput, EngineError> {
        Ok(DataOutput::for_input(input, input.data.clone()))
    }
}

/// Engine that runs graphs as tokio tasks.
pub struct LoopbackEngine {
    /// Always `Some` until drop.
    runtime: Option<TokioRuntime>,
    graphs: GraphTable,
    transform: Arc<dyn Transform>,
    latency: Duration,
}

impl LoopbackEngine {
    /// Create an engine with `worker_count` runtime threads (0 = one per CPU).
    pub fn new(worker_count: usize) -> Result<Self, EngineError> {
        let workers = if worker_count == 0 {
            num_cpus::get()
        } else {
            worker_count
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("streamrs-loopback")
            .enable_all()
            .build()
            .map_err(|e| {
                EngineError::new(codes::BUILD_FAILED, format!("tokio runtime: {}", e))
            })?;

        Ok(Self {
            runtime: Some(runtime),
            graphs: GraphTable::new(),
            transform: Arc::new(Echo),
            latency: Duration::ZERO,
        })
    }

    pub fn from_config(config: &RuntimeConfig) -> Result<Self, EngineError> {
        Self::new(config.worker_count)
    }

    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    /// Delay applied to every submission before its results are delivered.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of graphs currently built.
    pub fn graph_count(&self) -> usize {
        self.graphs.len()
    }

    fn runtime(&self) -> Result<&TokioRuntime, EngineError> {
        self.runtime
            .as_ref()
            .ok_or_else(|| EngineError::new(codes::SUBMIT_REJECTED, "engine is shutting down"))
    }
}

impl ExecutionEngine for LoopbackEngine {
    fn name(&self) -> &str {
        "loopback"
    }

    fn build_graph(
        &self,
        name: &str,
        description: &GraphDescription,
    ) -> Result<GraphHandle, EngineError> {
        let topology = description
            .topology()
            .map_err(|e| EngineError::new(codes::BUILD_FAILED, e.to_string()))?;
        Ok(self.graphs.insert(name, topology))
    }

    fn register_sink_callback(
        &self,
        graph: &GraphHandle,
        sink: usize,
        callback: SinkCallback,
    ) -> Result<(), EngineError> {
        self.graphs.get(graph)?.set_callback(sink, callback)
    }

    fn unregister_sink_callbacks(&self, graph: &GraphHandle) {
        if let Ok(entry) = self.graphs.get(graph) {
            entry.clear_callbacks();
        }
    }

    fn start(&self, graph: &GraphHandle) -> Result<(), EngineError> {
        self.graphs.get(graph)?.mark_started();
        Ok(())
    }

    fn submit(&self, graph: &GraphHandle, submission: Submission) -> Result<(), EngineError> {
        let entry = self.graphs.get(graph)?;
        entry.ensure_started()?;
        entry.check_source(submission.source)?;

        let sinks = entry.topology.sinks_fed_by(submission.source).to_vec();
        if sinks.is_empty() {
            tracing::debug!(
                stream = graph.name(),
                source = submission.source,
                "entry point feeds no exit point, frame dropped"
            );
            return Ok(());
        }

        let transform = self.transform.clone();
        let latency = self.latency;
        self.runtime()?.spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let Submission { tag, input, .. } = submission;
            for sink in sinks {
                let output = transform.apply(sink, &input);
                entry.dispatch(SinkDelivery {
                    sink,
                    tag: Some(tag),
                    output,
                });
            }
        });
        Ok(())
    }

    fn teardown(&self, graph: &GraphHandle) {
        if let Some(entry) = self.graphs.remove(graph) {
            entry.clear_callbacks();
        }
    }
}

impl Drop for LoopbackEngine {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
