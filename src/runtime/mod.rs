//! Process-level runtime: the stream registry and the shared management threads.

pub mod management;
pub mod registry;

pub use management::{Maintained, ManagementThreadPool, PoolState};
pub use registry::PipelineRegistry;
