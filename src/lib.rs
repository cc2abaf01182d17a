//! streamrs - synchronous request/response over asynchronous dataflow graphs.
//!
//! An execution engine runs graphs of processing elements and hands results
//! back through callbacks, on its own threads, in whatever order they
//! finish. This crate sits in front of such an engine and lets application
//! threads:
//!
//! - create and destroy named streams from JSON graph descriptions
//! - send data into a stream's entry points from any thread
//! - block, with a deadline, until *their* result comes out of the stream's
//!   exit points
//!
//! Results are matched to callers in one of three transmission modes,
//! latched by the first call on a stream: indexed (a FIFO per exit point),
//! correlated (one result per unique id), or correlated-multi (one result per
//! exit point per unique id).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │     FFI Layer (streamrs.h)          │
//! │  C-compatible functions & types     │
//! └─────────────────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────┐
//! │          PipelineRegistry           │
//! │  ┌──────────────┐ ┌──────────────┐  │
//! │  │  Pipeline    │ │  Management  │  │
//! │  │  Instances   │ │  Threads     │  │
//! │  └──────────────┘ └──────────────┘  │
//! │  ┌──────────────┐ ┌──────────────┐  │
//! │  │ Correlation  │ │ Result       │  │
//! │  │ Tables       │ │ Queues       │  │
//! │  └──────────────┘ └──────────────┘  │
//! └─────────────────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────┐
//! │   ExecutionEngine (loopback/tokio)  │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use streamrs::{DataInput, LoopbackEngine, PipelineRegistry, RuntimeConfig};
//!
//! let config = RuntimeConfig::default();
//! let engine = Arc::new(LoopbackEngine::from_config(&config)?);
//! let registry = PipelineRegistry::new(engine, config);
//!
//! registry.create_from_json("detect", r#"{
//!     "appsrc0": { "factory": "appsrc", "next": "appsink0" },
//!     "appsink0": { "factory": "appsink" }
//! }"#)?;
//!
//! let id = registry.send_with_id("detect", "appsrc0", DataInput::new(b"frame".to_vec()))?;
//! let result = registry.get_result_with_id("detect", id, Duration::from_millis(500))?;
//! # Ok::<(), streamrs::StreamError>(())
//! ```
//!
//! # FFI Usage
//!
//! ```c
//! StreamManager *mgr;
//! streamrs_manager_create(NULL, &mgr);
//! streamrs_create_stream(mgr, "detect", json);
//!
//! CInput in = { frame, frame_len, 0, NULL };
//! uint64_t id;
//! streamrs_send_data_with_unique_id(mgr, "detect", 0, &in, &id);
//!
//! COutput out;
//! streamrs_get_result_with_unique_id(mgr, "detect", id, 500, &out);
//! streamrs_output_free(&out);
//!
//! streamrs_manager_free(mgr);
//! ```

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod runtime;
pub mod stream;

// Re-export commonly used items
pub use config::{PartialPolicy, RuntimeConfig};
pub use data::{DataInput, DataOutput, MultiResult, SinkSelector, SinkSlot, SourceSelector};
pub use engine::{
    ExecutionEngine, GraphDescription, GraphTopology, LoopbackEngine, ManualEngine,
};
pub use error::{EngineError, ErrorKind, Result, StreamError};
pub use logging::init_logging;
pub use runtime::{Maintained, ManagementThreadPool, PipelineRegistry, PoolState};
pub use stream::{
    BlockingResultQueue, CorrelationTable, PipelineInstance, StreamState, StreamStats,
    TransmissionMode,
};

// Re-export FFI types for cbindgen
pub use ffi::manager::*;
pub use ffi::types::*;
