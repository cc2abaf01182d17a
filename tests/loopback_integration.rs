//! Streams running on the tokio-backed loopback engine.

mod common;

use common::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use streamrs::engine::codes;
use streamrs::{
    DataInput, DataOutput, EngineError, ErrorKind, LoopbackEngine, PipelineRegistry,
    RuntimeConfig,
};

fn loopback_registry(engine: LoopbackEngine, config: RuntimeConfig) -> (Arc<LoopbackEngine>, PipelineRegistry) {
    let engine = Arc::new(engine);
    let registry = registry_with(engine.clone(), config);
    (engine, registry)
}

/// Prefixes each output with the sink it came out of.
fn label_sink(sink: usize, input: &DataInput) -> Result<DataOutput, EngineError> {
    let mut data = format!("sink{sink}:").into_bytes();
    data.extend_from_slice(&input.data);
    Ok(DataOutput::for_input(input, data))
}

#[test]
fn test_concurrent_senders_get_their_own_results() {
    let (_engine, registry) =
        loopback_registry(LoopbackEngine::new(4).unwrap(), RuntimeConfig::default());
    let stream = registry.create_from_json("s", SINGLE).unwrap();

    let senders: Vec<_> = (0..8)
        .map(|t| {
            let stream = stream.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    let payload = format!("thread{t}-frame{i}");
                    let input = DataInput::new(payload.clone().into_bytes()).with_fragment_id(i);
                    let id = stream.send_with_id(0, input).unwrap();
                    let output = stream.get_with_id(id, arrival_timeout()).unwrap();
                    assert_eq!(output.as_str(), Some(payload.as_str()));
                    assert_eq!(output.fragment_id, i);
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    let stats = stream.stats();
    assert_eq!(stats.submitted, 200);
    assert_eq!(stats.claimed, 200);
    assert_eq!(stats.pending, 0);
}

#[test]
fn test_multi_sink_results_from_fan_out() {
    let engine = LoopbackEngine::new(2).unwrap().with_transform(label_sink);
    let (_engine, registry) = loopback_registry(engine, RuntimeConfig::default());
    registry.create_from_json("s", FAN_OUT).unwrap();

    let id = registry
        .send_multi(
            "s",
            &["appsrc0".into()],
            vec![DataInput::new(b"x".to_vec()).with_custom_param("cam1")],
        )
        .unwrap();
    let result = registry.get_multi_result("s", id, arrival_timeout()).unwrap();

    assert!(result.is_complete());
    for (sink, output) in result.outputs() {
        assert_eq!(output.as_str().unwrap(), format!("sink{sink}:x"));
        assert_eq!(output.custom_param, "cam1");
    }
}

#[test]
fn test_indexed_mode_limits_unmatched_sends() {
    let engine = LoopbackEngine::new(1)
        .unwrap()
        .with_latency(Duration::from_millis(100));
    let (_engine, registry) = loopback_registry(engine, RuntimeConfig::default());
    registry.create_from_json("s", SINGLE).unwrap();

    registry.send("s", 0, DataInput::new(b"first".to_vec())).unwrap();
    let err = registry
        .send("s", 0, DataInput::new(b"second".to_vec()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Overflow);

    let output = registry.get_result("s", 0, arrival_timeout()).unwrap();
    assert_eq!(output.as_str(), Some("first"));
    registry.send("s", 0, DataInput::new(b"third".to_vec())).unwrap();
    let output = registry.get_result("s", "appsink0", arrival_timeout()).unwrap();
    assert_eq!(output.as_str(), Some("third"));
}

#[test]
fn test_late_result_is_discarded() {
    let engine = LoopbackEngine::new(1)
        .unwrap()
        .with_latency(Duration::from_millis(80));
    let (_engine, registry) = loopback_registry(engine, RuntimeConfig::default());
    let stream = registry.create_from_json("s", SINGLE).unwrap();

    let id = stream.send_with_id(0, DataInput::default()).unwrap();
    assert!(stream.get_with_id(id, Duration::from_millis(5)).unwrap_err().is_timeout());

    thread::sleep(Duration::from_millis(300));
    assert!(stream.get_with_id(id, short_timeout()).unwrap_err().is_not_found());
    let stats = stream.stats();
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.pending, 0);
}

#[test]
fn test_stage_failure_surfaces_as_engine_failure() {
    let engine = LoopbackEngine::new(1).unwrap().with_transform(
        |_: usize, _: &DataInput| -> Result<DataOutput, EngineError> {
            Err(EngineError::new(codes::STAGE_FAILED, "model rejected frame"))
        },
    );
    let (_engine, registry) = loopback_registry(engine, RuntimeConfig::default());
    registry.create_from_json("s", SINGLE).unwrap();

    let id = registry.send_with_id("s", 0, DataInput::default()).unwrap();
    let err = registry
        .get_result_with_id("s", id, arrival_timeout())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineFailure);
}

#[test]
fn test_destroy_with_results_in_flight() {
    let engine = LoopbackEngine::new(2)
        .unwrap()
        .with_latency(Duration::from_millis(50));
    let (engine, registry) = loopback_registry(engine, RuntimeConfig::default());
    let stream = registry.create_from_json("s", FAN_OUT).unwrap();

    for _ in 0..10 {
        stream.send_with_id(1, DataInput::default()).unwrap();
    }
    registry.destroy("s").unwrap();
    assert_eq!(engine.graph_count(), 0);

    // In-flight tasks finish against a torn-down graph without effect.
    thread::sleep(Duration::from_millis(150));
    assert_eq!(stream.stats().delivered, 0);
    assert_eq!(
        stream.send_with_id(0, DataInput::default()).unwrap_err().kind(),
        ErrorKind::InstanceDestroyed
    );
}
