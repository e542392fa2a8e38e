//! Benchmarks for record transformation and disconnected buffering.

use std::{sync::Arc, time::Duration};

use amqp_log_stream::{
    LogRecord, RecordTransformer, Severity, TransformConfig,
    broker::PublishOptions,
    events::EventHub,
    publisher::{BufferedMessage, BufferedPublisher, StreamStats},
};
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

fn transformer() -> RecordTransformer {
    RecordTransformer::new(TransformConfig {
        tags: vec!["bunyan".into()],
        server: "bench-host".into(),
        application: "bench".into(),
        pid: 1,
        message_type: None,
        routing_key: None,
        formatter: None,
    })
}

fn record() -> LogRecord {
    LogRecord::new(Severity::Info, "request complete")
        .with_field("req_id", "f3a9")
        .with_field("latency_ms", 12)
        .with_field("req", json!({"method": "GET", "url": "/health", "headers": {"accept": "*/*"}}))
}

fn bench_transform(c: &mut Criterion) {
    let transformer = transformer();
    c.bench_function("transform_structured", |b| {
        b.iter_batched(
            record,
            |record| black_box(transformer.transform(record)),
            BatchSize::SmallInput,
        )
    });
    let raw = serde_json::to_string(record().fields()).expect("record serializes");
    c.bench_function("transform_raw_text", |b| {
        b.iter(|| {
            let record = LogRecord::parse(black_box(&raw)).expect("valid record");
            black_box(transformer.transform(record))
        })
    });
}

fn bench_buffering(c: &mut Criterion) {
    c.bench_function("buffer_overflow_100", |b| {
        let mut publisher = BufferedPublisher::new(
            100,
            PublishOptions::default(),
            "bench",
            Arc::new(EventHub::default()),
            Arc::new(StreamStats::default()),
            Duration::from_secs(60),
        );
        let payload: Arc<[u8]> = Arc::from(&b"{\"message\":\"bench\"}"[..]);
        b.iter(|| {
            publisher.submit(
                None,
                BufferedMessage {
                    routing_key: "info".into(),
                    payload: Arc::clone(&payload),
                },
            )
        })
    });
}

criterion_group!(benches, bench_transform, bench_buffering);
criterion_main!(benches);
