//! Order Pipeline Benchmarks - Hot-Path Performance Validation
//!
//! Benchmarks the validation gate, envelope chaining and end-to-end
//! pipeline throughput against a zero-latency paper venue.
//!
//! Run with: cargo bench --bench pipeline_bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rust_decimal::Decimal;

use order_intake::adapters::venue::PaperVenue;
use order_intake::config::{FaultSinkConfig, PipelineConfig, VenueConfig};
use order_intake::domain::envelope::ok;
use order_intake::domain::{OrderRequest, ResultEnvelope, ValidationGate};
use order_intake::ports::telemetry::NoopObserver;
use order_intake::usecases::{FaultSink, OrderPipeline};

/// Benchmark validation of a well-formed request.
fn bench_validate_ok(c: &mut Criterion) {
    let gate = ValidationGate::new();
    let req = OrderRequest::buy("AAPL", 100);

    c.bench_function("validate_ok", |b| {
        b.iter(|| {
            let _order = gate.validate(black_box(&req));
        });
    });
}

/// Benchmark validation of a request rejected on quantity.
fn bench_validate_reject(c: &mut Criterion) {
    let gate = ValidationGate::new();
    let req = OrderRequest::sell("AAPL", -5);

    c.bench_function("validate_reject", |b| {
        b.iter(|| {
            let _fault = gate.validate(black_box(&req));
        });
    });
}

/// Benchmark a three-step envelope chain.
fn bench_envelope_chain(c: &mut Criterion) {
    c.bench_function("envelope_and_then_x3", |b| {
        b.iter(|| {
            let out: ResultEnvelope<u64> = ok(black_box(7u64))
                .and_then(|v| ok(v * 3))
                .and_then(|v| ok(v + 1))
                .and_then(|v| ok(v / 2));
            out
        });
    });
}

/// Benchmark batch throughput through the full pipeline.
fn bench_pipeline_batch(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let _guard = rt.enter();

    let venue_config = VenueConfig {
        latency_ms: 0,
        ..VenueConfig::default()
    };
    let venue = Arc::new(PaperVenue::new(&venue_config));
    venue.set_quote("AAPL", Decimal::new(18950, 2));

    let pipeline_config = PipelineConfig {
        pool_size: 4,
        queue_capacity: 1_024,
        venue_retries: 0,
        ..PipelineConfig::default()
    };
    let sink = Arc::new(FaultSink::in_memory(&FaultSinkConfig::default()));
    let pipeline = Arc::new(OrderPipeline::new(
        &pipeline_config,
        venue,
        sink,
        Arc::new(NoopObserver),
    ));

    let mut group = c.benchmark_group("pipeline_batch");
    for size in [1usize, 16, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| {
                let pipeline = Arc::clone(&pipeline);
                async move {
                    let requests = (0..size).map(|_| OrderRequest::buy("AAPL", 10)).collect();
                    pipeline.process_batch(requests).await
                }
            });
        });
    }
    group.finish();

    rt.block_on(pipeline.shutdown());
}

criterion_group!(
    benches,
    bench_validate_ok,
    bench_validate_reject,
    bench_envelope_chain,
    bench_pipeline_batch,
);
criterion_main!(benches);
