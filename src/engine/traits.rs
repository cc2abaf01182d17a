//! The boundary between the coordinator and the dataflow engine.

use super::description::GraphDescription;
use crate::data::{DataInput, DataOutput};
use crate::error::EngineError;
use std::sync::Arc;

/// Correlation metadata carried by a frame through the graph.
///
/// Engines must hand the tag back unchanged with every result derived from
/// the tagged submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameTag {
    /// Entry point the frame was submitted to.
    pub origin: usize,
    /// Correlation id; `None` for indexed transmission.
    pub unique_id: Option<u64>,
}

impl FrameTag {
    pub fn indexed(origin: usize) -> Self {
        Self {
            origin,
            unique_id: None,
        }
    }

    pub fn correlated(origin: usize, unique_id: u64) -> Self {
        Self {
            origin,
            unique_id: Some(unique_id),
        }
    }
}

/// One unit of work handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub source: usize,
    pub tag: FrameTag,
    pub input: DataInput,
}

/// One result handed back by the engine at an exit point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkDelivery {
    pub sink: usize,
    /// `None` when the engine produced the frame without a tagged submission.
    pub tag: Option<FrameTag>,
    pub output: std::result::Result<DataOutput, EngineError>,
}

/// Callback invoked on an engine thread for every delivery at one sink.
pub type SinkCallback = Arc<dyn Fn(SinkDelivery) + Send + Sync>;

/// Opaque reference to a graph built by an engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphHandle {
    id: u64,
    name: String,
}

impl GraphHandle {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stream name the graph was built for.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A push/callback dataflow engine.
///
/// Sink indices and source indices follow the ordering of
/// [`GraphTopology`](super::GraphTopology). After
/// [`unregister_sink_callbacks`](Self::unregister_sink_callbacks) returns,
/// the engine must not invoke any callback previously registered for that
/// graph.
pub trait ExecutionEngine: Send + Sync {
    /// Engine name, for logs.
    fn name(&self) -> &str;

    fn build_graph(
        &self,
        name: &str,
        description: &GraphDescription,
    ) -> Result<GraphHandle, EngineError>;

    fn register_sink_callback(
        &self,
        graph: &GraphHandle,
        sink: usize,
        callback: SinkCallback,
    ) -> Result<(), EngineError>;

    fn unregister_sink_callbacks(&self, graph: &GraphHandle);

    fn start(&self, graph: &GraphHandle) -> Result<(), EngineError>;

    /// Hand one submission to the graph. Must not block on graph throughput.
    fn submit(&self, graph: &GraphHandle, submission: Submission) -> Result<(), EngineError>;

    fn teardown(&self, graph: &GraphHandle);
}
