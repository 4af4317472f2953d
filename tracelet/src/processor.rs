//! Background delivery of finalized telemetry.
//!
//! The [`DeliveryProcessor`] owns a bounded queue drained by a dedicated
//! worker thread. Producers hand over events as they are captured and
//! transactions as they close; the worker pairs each closed transaction with
//! the events recorded against it, builds a [`TraceBatch`] and pushes it
//! through the [`DeliverySink`] under the configured retry policy. Capture is
//! fire-and-forget: a full queue drops, it never blocks the instrumented
//! code, and delivery failures never propagate out of the worker.
//!
//! ```ascii
//!   +--------------+    sync_channel    +----------------+   +--------------+
//!   | TraceContext |                    |  worker thread |   | DeliverySink |
//!   | end()        +--------------------> batch + retry  +--->              |
//!   | capture_*()  |                    |                |   |              |
//!   +--------------+                    +----------------+   +--------------+
//! ```

use crate::config::DeliveryConfig;
use crate::error::{Error, TraceResult};
use crate::event::EventRecord;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::sink::{DeliveryError, DeliverySink, TraceBatch};
use crate::transaction::TransactionData;
use futures_executor::block_on;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Messages exchanged between producers and the worker thread.
#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
enum WorkerMessage {
    Event(EventRecord),
    EndTransaction(TransactionData),
    ForceFlush(SyncSender<TraceResult<()>>),
    Shutdown(SyncSender<TraceResult<()>>),
}

/// The event buffer and delivery worker.
#[derive(Debug)]
pub(crate) struct DeliveryProcessor {
    message_sender: SyncSender<WorkerMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    flush_timeout: Duration,
    shutdown_timeout: Duration,
    is_shutdown: AtomicBool,
    dropped_count: Arc<AtomicUsize>,
}

impl DeliveryProcessor {
    /// Spawns the worker thread and returns the processor.
    pub(crate) fn new(mut sink: Box<dyn DeliverySink>, config: DeliveryConfig) -> Self {
        let (message_sender, message_receiver) = sync_channel(config.max_queue_size);
        let retry = config.retry.clone();

        let handle = thread::Builder::new()
            .name("TraceletDeliveryWorker".to_string())
            .spawn(move || {
                let mut pending_events: Vec<EventRecord> = Vec::new();

                while let Ok(message) = message_receiver.recv() {
                    match message {
                        WorkerMessage::Event(event) => {
                            pending_events.push(event);
                        }
                        WorkerMessage::EndTransaction(transaction) => {
                            let batch = assemble_batch(&mut pending_events, transaction);
                            deliver_batch(sink.as_mut(), &retry, batch);
                        }
                        WorkerMessage::ForceFlush(sender) => {
                            // All prior messages have been processed in order,
                            // so there is nothing left to deliver here.
                            let _ = sender.send(Ok(()));
                        }
                        WorkerMessage::Shutdown(sender) => {
                            if !pending_events.is_empty() {
                                debug!(
                                    name: "delivery_worker_shutdown",
                                    orphaned_events = pending_events.len(),
                                    "discarding events with no finished transaction"
                                );
                            }
                            sink.shutdown();
                            let _ = sender.send(Ok(()));
                            return;
                        }
                    }
                }
                // All senders dropped without a shutdown message.
                sink.shutdown();
            })
            .expect("failed to spawn delivery worker thread");

        Self {
            message_sender,
            handle: Mutex::new(Some(handle)),
            flush_timeout: config.flush_timeout,
            shutdown_timeout: config.shutdown_timeout,
            is_shutdown: AtomicBool::new(false),
            dropped_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queues a captured event. Never blocks; on a full or closed queue the
    /// event is dropped and counted.
    pub(crate) fn record(&self, event: EventRecord) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            debug!(name: "event_after_shutdown", "processor is shutdown, dropping event");
            return;
        }
        let result = self.message_sender.try_send(WorkerMessage::Event(event));

        if result.is_err() {
            // Warn on the first drop only; the total is reported at shutdown.
            if self.dropped_count.fetch_add(1, Ordering::Relaxed) == 0 {
                warn!(
                    name: "event_dropping_started",
                    "delivery queue full or closed, dropping telemetry until shutdown"
                );
            }
        }
    }

    /// Queues a closed transaction for delivery.
    pub(crate) fn end_transaction(&self, transaction: TransactionData) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            warn!(
                name: "transaction_after_shutdown",
                transaction = %transaction.id,
                "processor is shutdown, dropping transaction"
            );
            return;
        }
        let id = transaction.id;
        let result = self
            .message_sender
            .try_send(WorkerMessage::EndTransaction(transaction));

        if result.is_err() {
            if self.dropped_count.fetch_add(1, Ordering::Relaxed) == 0 {
                warn!(
                    name: "event_dropping_started",
                    transaction = %id,
                    "delivery queue full or closed, dropping telemetry until shutdown"
                );
            }
        }
    }

    /// Waits until every previously queued batch has been handed to the sink,
    /// or the flush timeout elapses.
    pub(crate) fn force_flush(&self) -> TraceResult<()> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(Error::ClientClosed);
        }
        let (sender, receiver) = sync_channel(1);
        self.message_sender
            .try_send(WorkerMessage::ForceFlush(sender))
            .map_err(|_| Error::Lost)?;

        receiver
            .recv_timeout(self.flush_timeout)
            .map_err(|_| Error::FlushTimedOut(self.flush_timeout))?
    }

    /// Drains in-flight work within a bounded wait and joins the worker.
    /// A second call fails with [`Error::ClientClosed`].
    pub(crate) fn shutdown(&self) -> TraceResult<()> {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(Error::ClientClosed);
        }
        let dropped = self.dropped_count.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!(
                name: "events_dropped_total",
                count = dropped,
                "telemetry was dropped due to a full delivery queue"
            );
        }
        let (sender, receiver) = sync_channel(1);
        self.message_sender
            .try_send(WorkerMessage::Shutdown(sender))
            .map_err(|_| Error::Lost)?;

        let result = receiver
            .recv_timeout(self.shutdown_timeout)
            .map_err(|_| Error::FlushTimedOut(self.shutdown_timeout))?;
        if let Some(handle) = self.handle.lock()?.take() {
            handle.join().map_err(|_| Error::Lost)?;
        }
        result
    }
}

/// Pairs a closed transaction with the pending events recorded against it or
/// its spans. Events of other (still open) transactions stay buffered.
fn assemble_batch(pending_events: &mut Vec<EventRecord>, transaction: TransactionData) -> TraceBatch {
    let mut events = Vec::new();
    let mut remaining = Vec::with_capacity(pending_events.len());
    for event in pending_events.drain(..) {
        if event.transaction == transaction.id {
            events.push(event);
        } else {
            remaining.push(event);
        }
    }
    *pending_events = remaining;
    TraceBatch {
        transaction,
        events,
    }
}

/// Runs one batch through the sink under the retry policy. Retry exhaustion
/// and permanent failures drop the batch with a diagnostic; telemetry loss
/// never propagates as a failure of the instrumented workload.
fn deliver_batch(sink: &mut dyn DeliverySink, retry: &RetryPolicy, batch: TraceBatch) {
    let transaction_id = batch.transaction.id;
    let result = retry_with_backoff(
        retry,
        "deliver",
        &mut thread::sleep,
        DeliveryError::is_retryable,
        || block_on(sink.deliver(batch.clone())),
    );
    match result {
        Ok(()) => {
            debug!(
                name: "batch_delivered",
                transaction = %transaction_id,
                spans = batch.transaction.spans.len(),
                events = batch.events.len(),
            );
        }
        Err(err) => {
            warn!(
                name: "batch_dropped",
                transaction = %transaction_id,
                error = %err,
                "delivery failed after retries, dropping batch"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryConfigBuilder;
    use crate::event::{EventKind, EventRecord, Severity};
    use crate::ids::{EventId, TransactionId};
    use crate::in_memory_sink::InMemorySinkBuilder;
    use crate::sink::{DeliveryError, DeliveryResult};
    use crate::transaction::{Outcome, TransactionData};
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use std::time::SystemTime;

    fn test_transaction(id: u128) -> TransactionData {
        TransactionData {
            id: TransactionId::from(id),
            name: "pipeline".into(),
            kind: "request".into(),
            start_time: SystemTime::now(),
            end_time: SystemTime::now(),
            outcome: Outcome::Success,
            spans: Vec::new(),
        }
    }

    fn test_event(id: u64, transaction: u128) -> EventRecord {
        EventRecord {
            id: EventId::from(id),
            severity: Severity::Info,
            kind: EventKind::Message {
                body: "test".to_owned(),
            },
            timestamp: SystemTime::now(),
            transaction: TransactionId::from(transaction),
            span: None,
        }
    }

    fn zero_delay_config() -> DeliveryConfig {
        DeliveryConfigBuilder::default()
            .with_max_queue_size(16)
            .with_retry_policy(RetryPolicy {
                max_retries: 2,
                initial_delay_ms: 0,
                max_delay_ms: 0,
                jitter_ms: 0,
            })
            .build()
    }

    // Sink that fails every attempt, counting them.
    #[derive(Debug)]
    struct FailingSink {
        attempts: Arc<AtomicUsize>,
        permanent: bool,
    }

    impl DeliverySink for FailingSink {
        fn deliver(&mut self, _batch: TraceBatch) -> BoxFuture<'static, DeliveryResult> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let err = if self.permanent {
                DeliveryError::Permanent("rejected".to_owned())
            } else {
                DeliveryError::Retryable("unreachable".to_owned())
            };
            async move { Err(err) }.boxed()
        }
    }

    #[test]
    fn transaction_events_are_batched_together() {
        let sink = InMemorySinkBuilder::new().build();
        let processor = DeliveryProcessor::new(Box::new(sink.clone()), zero_delay_config());

        processor.record(test_event(1, 7));
        processor.record(test_event(2, 7));
        processor.end_transaction(test_transaction(7));
        processor.force_flush().unwrap();

        let batches = sink.get_delivered_batches().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].transaction.id, TransactionId::from(7));
        assert_eq!(batches[0].events.len(), 2);
        let _result = processor.shutdown();
    }

    #[test]
    fn events_of_other_transactions_stay_pending() {
        let sink = InMemorySinkBuilder::new().build();
        let processor = DeliveryProcessor::new(Box::new(sink.clone()), zero_delay_config());

        processor.record(test_event(1, 7));
        processor.record(test_event(2, 8));
        processor.end_transaction(test_transaction(7));
        processor.force_flush().unwrap();

        let batches = sink.get_delivered_batches().unwrap();
        assert_eq!(batches[0].events.len(), 1);
        assert_eq!(batches[0].events[0].transaction, TransactionId::from(7));

        // The buffered event is delivered once its transaction closes.
        processor.end_transaction(test_transaction(8));
        processor.force_flush().unwrap();
        let batches = sink.get_delivered_batches().unwrap();
        assert_eq!(batches[1].events.len(), 1);
        let _result = processor.shutdown();
    }

    #[test]
    fn retry_exhaustion_drops_batch_without_surfacing() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let sink = FailingSink {
            attempts: attempts.clone(),
            permanent: false,
        };
        let processor = DeliveryProcessor::new(Box::new(sink), zero_delay_config());

        processor.end_transaction(test_transaction(1));
        processor.force_flush().unwrap();

        // initial attempt + 2 retries
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        processor.shutdown().unwrap();
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let sink = FailingSink {
            attempts: attempts.clone(),
            permanent: true,
        };
        let processor = DeliveryProcessor::new(Box::new(sink), zero_delay_config());

        processor.end_transaction(test_transaction(1));
        processor.force_flush().unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        processor.shutdown().unwrap();
    }

    // Sink that blocks each delivery until the test releases it.
    #[derive(Debug)]
    struct GatedSink {
        release: Mutex<std::sync::mpsc::Receiver<()>>,
        delivered: Arc<AtomicUsize>,
    }

    impl DeliverySink for GatedSink {
        fn deliver(&mut self, _batch: TraceBatch) -> BoxFuture<'static, DeliveryResult> {
            let _ = self.release.lock().unwrap().recv();
            self.delivered.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }.boxed()
        }
    }

    #[test]
    fn full_queue_drops_events_without_blocking() {
        let (release, gate) = std::sync::mpsc::channel();
        let delivered = Arc::new(AtomicUsize::new(0));
        let sink = GatedSink {
            release: Mutex::new(gate),
            delivered: delivered.clone(),
        };
        let config = DeliveryConfigBuilder::default()
            .with_max_queue_size(2)
            .with_retry_policy(RetryPolicy {
                max_retries: 0,
                initial_delay_ms: 0,
                max_delay_ms: 0,
                jitter_ms: 0,
            })
            .build();
        let processor = DeliveryProcessor::new(Box::new(sink), config);

        // Occupy the worker inside a delivery, then overfill the queue. Every
        // record call returns immediately; the overflow is dropped.
        processor.end_transaction(test_transaction(1));
        for id in 0..5 {
            processor.record(test_event(id, 2));
        }
        assert!(processor.dropped_count.load(Ordering::Relaxed) >= 3);

        release.send(()).unwrap();
        // The worker drains the surviving events once the delivery returns.
        while processor.force_flush().is_err() {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        processor.shutdown().unwrap();
    }

    #[test]
    fn shutdown_is_not_idempotent() {
        let sink = InMemorySinkBuilder::new().build();
        let processor = DeliveryProcessor::new(Box::new(sink), zero_delay_config());

        processor.shutdown().unwrap();
        assert!(matches!(processor.shutdown(), Err(Error::ClientClosed)));
    }

    #[test]
    fn record_after_shutdown_is_dropped_silently() {
        let sink = InMemorySinkBuilder::new().build();
        let processor = DeliveryProcessor::new(Box::new(sink.clone()), zero_delay_config());
        processor.shutdown().unwrap();

        processor.record(test_event(1, 7));
        processor.end_transaction(test_transaction(7));
        assert!(sink.get_delivered_batches().unwrap().is_empty());
    }
}
