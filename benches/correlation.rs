//! Round-trip benchmarks for result correlation.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use streamrs::{
    CorrelationTable, DataInput, DataOutput, LoopbackEngine, ManagementThreadPool,
    ManualEngine, PipelineRegistry, RuntimeConfig,
};

const SINGLE: &str = r#"{
    "appsrc0": { "factory": "appsrc", "next": "appsink0" },
    "appsink0": { "factory": "appsink" }
}"#;

fn registry(engine: Arc<dyn streamrs::ExecutionEngine>) -> PipelineRegistry {
    let config = RuntimeConfig::default();
    let pool = Arc::new(ManagementThreadPool::from_config(&config));
    PipelineRegistry::with_pool(engine, config, pool)
}

fn bench_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("correlation_table");
    group.throughput(Throughput::Elements(1));

    let table = CorrelationTable::single();
    let mut id = 0u64;
    group.bench_function("insert_deliver_claim", |b| {
        b.iter(|| {
            table.insert(id).unwrap();
            table.deliver(id, 0, Ok(DataOutput::new(vec![0u8; 16])));
            black_box(table.wait_single(id, Duration::ZERO).unwrap());
            id += 1;
        });
    });

    group.finish();
}

fn bench_manual_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("manual_round_trip");

    for size in [64, 4096, 256 * 1024].iter() {
        let engine = Arc::new(ManualEngine::new());
        let registry = registry(engine.clone());
        let stream = registry.create_from_json("bench", SINGLE).unwrap();
        let payload = vec![7u8; *size];

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let id = stream.send_with_id(0, DataInput::default()).unwrap();
                engine.deliver_to("bench", 0, id, DataOutput::new(payload.clone()));
                black_box(stream.get_with_id(id, Duration::from_secs(1)).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_loopback_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("loopback_round_trip");
    group.throughput(Throughput::Elements(1));

    let registry = registry(Arc::new(LoopbackEngine::new(2).unwrap()));
    let stream = registry.create_from_json("bench", SINGLE).unwrap();
    group.bench_function("send_with_id_get", |b| {
        b.iter(|| {
            let id = stream
                .send_with_id(0, DataInput::new(vec![1u8; 1024]))
                .unwrap();
            black_box(stream.get_with_id(id, Duration::from_secs(1)).unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_table,
    bench_manual_round_trip,
    bench_loopback_round_trip
);
criterion_main!(benches);
