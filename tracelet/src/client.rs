//! Client lifecycle and construction.
//!
//! The client is the explicitly constructed, explicitly passed root object of
//! the instrumentation: it owns the delivery worker, hands out
//! [`TraceContext`]s and transitions through the lifecycle
//! `uninitialized → active → closed`. The builder is the uninitialized
//! phase; [`ClientBuilder::build`] produces an active client; and
//! [`Client::shutdown`] closes it, after which no further transaction may be
//! opened. There is no process-wide singleton.

use crate::config::{ClientConfig, DeliveryConfig};
use crate::context::{ContextInner, TraceContext};
use crate::error::{Error, TraceResult};
use crate::ids::{IdGenerator, RandomIdGenerator};
use crate::processor::DeliveryProcessor;
use crate::sink::DeliverySink;
use crate::stdout_sink::StdoutSink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

#[derive(Debug)]
pub(crate) struct ClientShared {
    pub(crate) processor: DeliveryProcessor,
    pub(crate) ids: Box<dyn IdGenerator>,
    is_closed: AtomicBool,
    contexts: Mutex<Vec<Weak<ContextInner>>>,
}

impl ClientShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Relaxed)
    }
}

/// The instrumentation client.
///
/// Cheap to clone; clones share the same delivery worker and lifecycle
/// state. Dropping the client does not shut it down; call
/// [`Client::shutdown`] explicitly to drain in-flight deliveries.
#[derive(Clone, Debug)]
pub struct Client {
    config: ClientConfig,
    shared: Arc<ClientShared>,
}

impl Client {
    /// Returns a builder whose defaults come from [`ClientConfig::default`]
    /// and [`DeliveryConfig::default`] (and therefore from `TRACELET_*`
    /// environment variables, where set).
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether the client is still accepting transactions.
    pub fn is_active(&self) -> bool {
        !self.shared.is_closed()
    }

    /// Creates an independent execution context with its own
    /// active-transaction slot and span stack.
    pub fn context(&self) -> TraceContext {
        let inner = Arc::new(ContextInner::new(self.shared.clone()));
        if let Ok(mut contexts) = self.shared.contexts.lock() {
            contexts.retain(|weak| weak.strong_count() > 0);
            contexts.push(Arc::downgrade(&inner));
        }
        TraceContext::from_inner(inner)
    }

    /// Waits until every batch queued so far has been handed to the sink, or
    /// the configured flush timeout elapses.
    pub fn force_flush(&self) -> TraceResult<()> {
        self.shared.processor.force_flush()
    }

    /// Transitions the client to `closed`.
    ///
    /// Transactions still open in any context are force-closed with outcome
    /// `Unset` and flushed best-effort, then the delivery worker is drained
    /// within the configured shutdown timeout (a bounded wait). A second
    /// call fails with [`Error::ClientClosed`].
    pub fn shutdown(&self) -> TraceResult<()> {
        if self.shared.is_closed.swap(true, Ordering::SeqCst) {
            return Err(Error::ClientClosed);
        }
        debug!(name: "client_shutdown", service = %self.config.service_name);
        let contexts = match self.shared.contexts.lock() {
            Ok(mut contexts) => std::mem::take(&mut *contexts),
            Err(err) => {
                warn!(name: "context_registry_poisoned", error = %err);
                Vec::new()
            }
        };
        for context in contexts.iter().filter_map(Weak::upgrade) {
            context.force_close();
        }
        self.shared.processor.shutdown()
    }
}

/// A builder for [`Client`], representing the `uninitialized` phase of the
/// client lifecycle.
#[derive(Debug)]
pub struct ClientBuilder {
    config: ClientConfig,
    delivery: DeliveryConfig,
    sink: Option<Box<dyn DeliverySink>>,
    ids: Box<dyn IdGenerator>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder {
            config: ClientConfig::default(),
            delivery: DeliveryConfig::default(),
            sink: None,
            ids: Box::new(RandomIdGenerator::default()),
        }
    }
}

impl ClientBuilder {
    /// Set the client configuration.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the delivery worker configuration.
    pub fn with_delivery_config(mut self, delivery: DeliveryConfig) -> Self {
        self.delivery = delivery;
        self
    }

    /// Set the delivery sink. Defaults to [`StdoutSink`].
    pub fn with_sink<S: DeliverySink + 'static>(mut self, sink: S) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Set the id generator. Defaults to [`RandomIdGenerator`]; tests
    /// typically use [`IncrementIdGenerator`](crate::ids::IncrementIdGenerator).
    pub fn with_id_generator<G: IdGenerator + 'static>(mut self, ids: G) -> Self {
        self.ids = Box::new(ids);
        self
    }

    /// Builds an active [`Client`], spawning its delivery worker.
    pub fn build(self) -> Client {
        let mut sink = self
            .sink
            .unwrap_or_else(|| Box::new(StdoutSink::new()) as Box<dyn DeliverySink>);
        sink.set_service(&self.config.service_meta());
        let processor = DeliveryProcessor::new(sink, self.delivery);
        debug!(
            name: "client_init",
            service = %self.config.service_name,
            environment = %self.config.environment,
            endpoint = %self.config.endpoint,
            authenticated = self.config.secret_token.is_some(),
        );
        Client {
            config: self.config,
            shared: Arc::new(ClientShared {
                processor,
                ids: self.ids,
                is_closed: AtomicBool::new(false),
                contexts: Mutex::new(Vec::new()),
            }),
        }
    }
}
