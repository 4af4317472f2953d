//! End-to-end lifecycle tests against an in-memory sink.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracelet::{
    Client, DeliveryConfig, DeliveryError, DeliveryResult, DeliverySink, IncrementIdGenerator,
    InMemorySinkBuilder, Outcome, RetryPolicy, Severity, TraceBatch,
};

fn fast_delivery() -> DeliveryConfig {
    DeliveryConfig::builder()
        .with_retry_policy(RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
        })
        .build()
}

#[test]
fn round_trip_spans_and_events() {
    let sink = InMemorySinkBuilder::new().build();
    let client = Client::builder()
        .with_sink(sink.clone())
        .with_id_generator(IncrementIdGenerator::new())
        .with_delivery_config(fast_delivery())
        .build();
    let cx = client.context();

    let stages = ["preprocessing", "query", "inference", "external"];
    let txn = cx.begin("pipeline", "request").unwrap();
    for stage in stages {
        let span = cx.start_span(stage, "app").unwrap();
        cx.capture_message(format!("{stage} done"), Severity::Info)
            .unwrap();
        cx.end_span(span, Outcome::Success).unwrap();
    }
    cx.end(Outcome::Success).unwrap();
    client.force_flush().unwrap();

    let batches = sink.get_delivered_batches().unwrap();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];

    // Exactly N spans and N events, all referencing the same transaction.
    assert_eq!(batch.transaction.id, txn.id());
    assert_eq!(batch.transaction.outcome, Outcome::Success);
    assert_eq!(batch.transaction.spans.len(), stages.len());
    assert_eq!(batch.events.len(), stages.len());
    assert!(batch
        .events
        .iter()
        .all(|event| event.transaction == txn.id()));

    // Each event is attached to the span that was innermost at capture time.
    for (event, span) in batch.events.iter().zip(&batch.transaction.spans) {
        assert_eq!(event.span, Some(span.id));
    }

    client.shutdown().unwrap();
}

#[test]
fn consecutive_transactions_deliver_separate_batches() {
    let sink = InMemorySinkBuilder::new().build();
    let client = Client::builder()
        .with_sink(sink.clone())
        .with_delivery_config(fast_delivery())
        .build();
    let cx = client.context();

    for round in 0..3 {
        cx.begin("pipeline", "request").unwrap();
        cx.capture_message(format!("round {round}"), Severity::Info)
            .unwrap();
        cx.end(Outcome::Success).unwrap();
    }
    client.shutdown().unwrap();

    let batches = sink.get_delivered_batches().unwrap();
    assert_eq!(batches.len(), 3);
    let ids: std::collections::HashSet<_> = batches
        .iter()
        .map(|batch| batch.transaction.id)
        .collect();
    assert_eq!(ids.len(), 3);
    assert!(batches.iter().all(|batch| batch.events.len() == 1));
}

/// Sink that always fails with a retryable error.
#[derive(Debug)]
struct UnreachableSink {
    attempts: Arc<AtomicUsize>,
}

impl DeliverySink for UnreachableSink {
    fn deliver(&mut self, _batch: TraceBatch) -> BoxFuture<'static, DeliveryResult> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        async { Err(DeliveryError::Retryable("connection refused".to_owned())) }.boxed()
    }
}

#[test]
fn sink_failure_never_reaches_instrumented_code() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let client = Client::builder()
        .with_sink(UnreachableSink {
            attempts: attempts.clone(),
        })
        .with_delivery_config(fast_delivery())
        .build();
    let cx = client.context();

    // Every lifecycle call succeeds even though delivery is failing.
    cx.begin("pipeline", "request").unwrap();
    let span = cx.start_span("stage", "app").unwrap();
    cx.end_span(span, Outcome::Success).unwrap();
    cx.end(Outcome::Success).unwrap();
    client.force_flush().unwrap();
    client.shutdown().unwrap();

    // initial attempt + 2 retries, then the batch was dropped
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn delivery_does_not_block_next_begin() {
    let sink = InMemorySinkBuilder::new().build();
    let client = Client::builder()
        .with_sink(sink.clone())
        .with_delivery_config(fast_delivery())
        .build();
    let cx = client.context();

    cx.begin("first", "request").unwrap();
    cx.end(Outcome::Success).unwrap();
    // No flush in between: the new transaction opens regardless of whether
    // the previous batch has been delivered yet.
    cx.begin("second", "request").unwrap();
    cx.end(Outcome::Success).unwrap();

    client.shutdown().unwrap();
    assert_eq!(sink.get_delivered_batches().unwrap().len(), 2);
}
