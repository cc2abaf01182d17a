//! Common test utilities and helpers

#![allow(dead_code)] // Not every test file uses every helper

use std::sync::Arc;
use std::time::Duration;
use streamrs::{
    DataOutput, ExecutionEngine, ManagementThreadPool, ManualEngine, PipelineRegistry,
    RuntimeConfig,
};

/// One entry point feeding one exit point.
pub const SINGLE: &str = r#"{
    "appsrc0": { "factory": "appsrc", "next": "infer" },
    "infer": { "factory": "model_infer", "next": "appsink0" },
    "appsink0": { "factory": "appsink" }
}"#;

/// Two entry points feeding three exit points.
pub const FAN_OUT: &str = r#"{
    "stream_config": { "deviceId": "0" },
    "appsrc0": { "factory": "appsrc", "next": "tee" },
    "appsrc1": { "factory": "appsrc", "next": "tee" },
    "tee": { "factory": "tee", "next": ["appsink0", "appsink1", "appsink2"] },
    "appsink0": { "factory": "appsink" },
    "appsink1": { "factory": "appsink" },
    "appsink2": { "factory": "appsink" }
}"#;

/// Timeout for results that are expected to arrive.
pub fn arrival_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Timeout for results that are expected not to arrive.
pub fn short_timeout() -> Duration {
    Duration::from_millis(30)
}

/// A management pool private to one test, with fast housekeeping rounds.
pub fn private_pool(config: &RuntimeConfig) -> Arc<ManagementThreadPool> {
    Arc::new(ManagementThreadPool::from_config(config))
}

pub fn registry_with(
    engine: Arc<dyn ExecutionEngine>,
    config: RuntimeConfig,
) -> PipelineRegistry {
    let pool = private_pool(&config);
    PipelineRegistry::with_pool(engine, config, pool)
}

/// Registry driven by hand.
pub fn manual_registry(config: RuntimeConfig) -> (Arc<ManualEngine>, PipelineRegistry) {
    let engine = Arc::new(ManualEngine::new());
    let registry = registry_with(engine.clone(), config);
    (engine, registry)
}

pub fn output(text: &str) -> DataOutput {
    DataOutput::new(text.as_bytes().to_vec())
}
