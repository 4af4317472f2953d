//! The delivery seam between the instrumentation core and a collector.

use crate::config::ServiceMeta;
use crate::event::EventRecord;
use crate::transaction::TransactionData;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::fmt::Debug;
use thiserror::Error;

/// Describes the result of a delivery attempt.
pub type DeliveryResult = Result<(), DeliveryError>;

/// Failure indication reported by a [`DeliverySink`].
///
/// The delivery worker retries [`DeliveryError::Retryable`] failures with
/// bounded exponential backoff and gives up immediately on
/// [`DeliveryError::Permanent`] ones. Either way the failure stays inside the
/// worker; it is never surfaced to the instrumented code.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Transient failure, e.g. the collector is briefly unreachable.
    #[error("retryable delivery failure: {0}")]
    Retryable(String),

    /// Failure that a retry cannot fix, e.g. a rejected payload.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    /// Whether the worker should retry after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Retryable(_))
    }
}

/// A closed transaction together with every event recorded against it or its
/// spans. This is the unit handed to the [`DeliverySink`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceBatch {
    /// The closed transaction, including its finished spans.
    pub transaction: TransactionData,
    /// Events recorded while the transaction was open, in capture order.
    pub events: Vec<EventRecord>,
}

/// `DeliverySink` is the interface a collector integration must implement to
/// receive finalized telemetry.
///
/// Transport, authentication and wire encoding are the sink's concern. The
/// sink is expected to be primarily a simple batch encoder and transmitter:
/// `deliver` is never called concurrently for the same sink instance, and any
/// failure should be reported through [`DeliveryError`] rather than retried
/// internally; the delivery worker owns the retry policy.
pub trait DeliverySink: Send + Sync + Debug {
    /// Delivers one batch. The returned future is resolved on the delivery
    /// worker thread.
    fn deliver(&mut self, batch: TraceBatch) -> BoxFuture<'static, DeliveryResult>;

    /// Receives the service metadata once, before the first delivery.
    fn set_service(&mut self, _service: &ServiceMeta) {}

    /// Shuts down the sink. Called once when the client closes; after this,
    /// `deliver` is not called again.
    fn shutdown(&mut self) {}
}
