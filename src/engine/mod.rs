//! Execution engines: the push/callback dataflow runtimes the coordinator drives.

pub mod description;
mod graph;
pub mod loopback;
pub mod manual;
pub mod traits;

pub use description::{ElementSpec, GraphDescription, GraphTopology, NextSpec};
pub use graph::codes;
pub use loopback::{Echo, LoopbackEngine, Transform};
pub use manual::ManualEngine;
pub use traits::{ExecutionEngine, FrameTag, GraphHandle, SinkCallback, SinkDelivery, Submission};
