/*
    Transaction and span lifecycle scenarios.
    Measures the per-call cost of the instrumentation state machine with an
    in-memory sink, i.e. without any real delivery latency.
*/

use criterion::{criterion_group, criterion_main, Criterion};
use tracelet::{Client, InMemorySinkBuilder, Outcome, Severity};

fn criterion_benchmark(c: &mut Criterion) {
    let client = Client::builder()
        .with_sink(InMemorySinkBuilder::new().build())
        .build();
    let cx = client.context();

    c.bench_function("transaction-begin-end", |b| {
        b.iter(|| {
            cx.begin("bench", "request").unwrap();
            cx.end(Outcome::Success).unwrap();
        })
    });

    c.bench_function("transaction-with-span-and-message", |b| {
        b.iter(|| {
            cx.begin("bench", "request").unwrap();
            let span = cx.start_span("stage", "app").unwrap();
            cx.capture_message("stage done", Severity::Info).unwrap();
            cx.end_span(span, Outcome::Success).unwrap();
            cx.end(Outcome::Success).unwrap();
        })
    });

    c.bench_function("nested-spans-depth-4", |b| {
        b.iter(|| {
            cx.begin("bench", "request").unwrap();
            let handles: Vec<_> = (0..4)
                .map(|_| cx.start_span("stage", "app").unwrap())
                .collect();
            for handle in handles.into_iter().rev() {
                cx.end_span(handle, Outcome::Success).unwrap();
            }
            cx.end(Outcome::Success).unwrap();
        })
    });

    let _ = client.shutdown();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
