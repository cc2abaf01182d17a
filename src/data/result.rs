//! Results gathered from several exit points under one unique id.

use super::buffer::DataOutput;
use crate::error::EngineError;

/// Outcome for one sink of a multi-sink result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkSlot {
    Delivered(DataOutput),
    /// The engine reported a failure for this sink.
    Failed(EngineError),
    /// Nothing arrived before the deadline.
    Missing,
}

impl SinkSlot {
    pub fn output(&self) -> Option<&DataOutput> {
        match self {
            SinkSlot::Delivered(output) => Some(output),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, SinkSlot::Missing)
    }
}

/// One slot per declared sink, in sink index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiResult {
    pub unique_id: u64,
    pub slots: Vec<SinkSlot>,
}

impl MultiResult {
    /// Number of sinks that produced something (output or failure).
    pub fn received(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_missing()).count()
    }

    /// Whether every declared sink produced something.
    pub fn is_complete(&self) -> bool {
        self.received() == self.slots.len()
    }

    /// Indices of sinks with nothing delivered.
    pub fn missing(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_missing())
            .map(|(i, _)| i)
            .collect()
    }

    /// Outputs that were delivered successfully, by sink index.
    pub fn outputs(&self) -> impl Iterator<Item = (usize, &DataOutput)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.output().map(|o| (i, o)))
    }
}
