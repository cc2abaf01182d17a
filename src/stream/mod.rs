//! Streams and the bookkeeping that correlates their results.

pub mod correlation;
pub mod instance;
pub mod mode;
pub mod queue;
pub mod stats;

pub use correlation::{CorrelationTable, DeliverOutcome, DiscardReason};
pub use instance::{PipelineInstance, StreamState};
pub use mode::TransmissionMode;
pub use queue::{BlockingResultQueue, PushOutcome};
pub use stats::StreamStats;
