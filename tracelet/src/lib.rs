//! # Tracelet
//!
//! A minimal transaction/span instrumentation client: the state machine any
//! tracing client must enforce (single active transaction per execution
//! context, strictly nested spans, events only while the owning transaction
//! is open) plus buffered, best-effort delivery of finalized telemetry
//! through a pluggable [`DeliverySink`].
//!
//! ```
//! use tracelet::{Client, InMemorySinkBuilder, Outcome, Severity};
//!
//! let sink = InMemorySinkBuilder::new().build();
//! let client = Client::builder().with_sink(sink.clone()).build();
//! let cx = client.context();
//!
//! cx.begin("checkout", "request").unwrap();
//! let span = cx.start_span("charge_card", "external").unwrap();
//! cx.capture_message("charged $12.00", Severity::Info).unwrap();
//! cx.end_span(span, Outcome::Success).unwrap();
//! cx.end(Outcome::Success).unwrap();
//!
//! client.shutdown().unwrap();
//! assert_eq!(sink.get_delivered_batches().unwrap().len(), 1);
//! ```
//!
//! Telemetry is best-effort by design: a failing sink is retried with
//! bounded exponential backoff and then dropped with a diagnostic, and
//! lifecycle misuse surfaces as an [`Error`] to the caller, never the other
//! way around.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(test, deny(warnings))]

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod ids;
pub mod in_memory_sink;
mod processor;
pub mod retry;
pub mod sink;
pub mod span;
pub mod stdout_sink;
pub mod transaction;

pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, DeliveryConfig, ServiceMeta};
pub use context::TraceContext;
pub use error::{Error, TraceResult};
pub use event::{EventKind, EventRecord, Severity};
pub use ids::{IdGenerator, IncrementIdGenerator, RandomIdGenerator, SpanId, TransactionId};
pub use in_memory_sink::{InMemorySink, InMemorySinkBuilder};
pub use retry::RetryPolicy;
pub use sink::{DeliveryError, DeliveryResult, DeliverySink, TraceBatch};
pub use span::{SpanData, SpanHandle, SpanParent};
pub use stdout_sink::StdoutSink;
pub use transaction::{Outcome, TransactionData, TransactionHandle};
