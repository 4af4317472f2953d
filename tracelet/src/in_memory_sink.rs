//! A sink that stores delivered batches in memory.

use crate::error::TraceResult;
use crate::sink::{DeliveryError, DeliveryResult, DeliverySink, TraceBatch};
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex};

/// An in-memory delivery sink that stores batches in a `Vec<TraceBatch>`.
///
/// Useful for testing and debugging. Delivered batches can be retrieved with
/// [`InMemorySink::get_delivered_batches`]; clones share the same storage.
///
/// # Example
///
/// ```
/// use tracelet::{Client, InMemorySinkBuilder, Outcome};
///
/// let sink = InMemorySinkBuilder::new().build();
/// let client = Client::builder().with_sink(sink.clone()).build();
/// let cx = client.context();
///
/// cx.begin("demo", "request").unwrap();
/// cx.end(Outcome::Success).unwrap();
/// client.force_flush().unwrap();
///
/// assert_eq!(sink.get_delivered_batches().unwrap().len(), 1);
/// # let _ = client.shutdown();
/// ```
#[derive(Clone, Debug)]
pub struct InMemorySink {
    batches: Arc<Mutex<Vec<TraceBatch>>>,
}

impl Default for InMemorySink {
    fn default() -> Self {
        InMemorySinkBuilder::new().build()
    }
}

/// Builder for [`InMemorySink`].
#[derive(Clone, Debug, Default)]
pub struct InMemorySinkBuilder {}

impl InMemorySinkBuilder {
    /// Creates a new instance of the `InMemorySinkBuilder`.
    pub fn new() -> Self {
        Self {}
    }

    /// Creates a new instance of the `InMemorySink`.
    pub fn build(&self) -> InMemorySink {
        InMemorySink {
            batches: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl InMemorySink {
    /// Returns the batches delivered so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock cannot be acquired.
    pub fn get_delivered_batches(&self) -> TraceResult<Vec<TraceBatch>> {
        self.batches
            .lock()
            .map(|guard| guard.clone())
            .map_err(Into::into)
    }

    /// Clears the internal storage of delivered batches.
    pub fn reset(&self) {
        let _ = self.batches.lock().map(|mut guard| guard.clear());
    }
}

impl DeliverySink for InMemorySink {
    fn deliver(&mut self, batch: TraceBatch) -> BoxFuture<'static, DeliveryResult> {
        let result = self
            .batches
            .lock()
            .map(|mut guard| guard.push(batch))
            .map_err(|err| DeliveryError::Permanent(format!("failed to lock batches: {err:?}")));
        Box::pin(std::future::ready(result))
    }

    // Delivered batches stay readable after shutdown so tests can assert on
    // telemetry flushed during client close.
}
