//! Per-execution-context transaction management.
//!
//! A [`TraceContext`] owns the single active-transaction slot of one logical
//! thread of control, together with the stack of open spans scoped to that
//! transaction. Contexts are handed out by
//! [`Client::context`](crate::client::Client::context) and are independent:
//! two contexts can each have an open transaction, but one context never has
//! two. There is no hidden "current transaction" lookup anywhere: the
//! context is an explicit handle threaded through the instrumented code.

use crate::client::ClientShared;
use crate::error::{Error, TraceResult};
use crate::event::{EventKind, EventRecord, Severity};
use crate::ids::TransactionId;
use crate::span::{SpanData, SpanHandle, SpanStack};
use crate::transaction::{Outcome, TransactionData, TransactionHandle};
use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{debug, warn};

#[derive(Debug)]
struct ActiveTransaction {
    id: TransactionId,
    name: Cow<'static, str>,
    kind: Cow<'static, str>,
    start_time: SystemTime,
    stack: SpanStack,
    finished_spans: Vec<SpanData>,
}

impl ActiveTransaction {
    fn finish(mut self, outcome: Outcome, end_time: SystemTime) -> TransactionData {
        debug_assert!(self.stack.is_empty());
        TransactionData {
            id: self.id,
            name: self.name,
            kind: self.kind,
            start_time: self.start_time,
            end_time,
            outcome,
            spans: std::mem::take(&mut self.finished_spans),
        }
    }
}

#[derive(Debug, Default)]
struct ContextState {
    active: Option<ActiveTransaction>,
}

#[derive(Debug)]
pub(crate) struct ContextInner {
    shared: Arc<ClientShared>,
    state: Mutex<ContextState>,
}

impl ContextInner {
    pub(crate) fn new(shared: Arc<ClientShared>) -> Self {
        ContextInner {
            shared,
            state: Mutex::new(ContextState::default()),
        }
    }

    /// Force-closes the active transaction, if any, with outcome
    /// [`Outcome::Unset`]. Used during client shutdown; delivery is
    /// best-effort.
    pub(crate) fn force_close(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if let Some(mut active) = state.active.take() {
            let end_time = SystemTime::now();
            warn!(
                name: "transaction_force_closed",
                transaction = %active.id,
                open_spans = active.stack.len(),
                "client shutdown with an open transaction"
            );
            active.finished_spans.extend(active.stack.close_all(end_time));
            self.shared
                .processor
                .end_transaction(active.finish(Outcome::Unset, end_time));
        }
    }
}

/// The transaction manager of one execution context.
///
/// All operations fail with [`Error::NoActiveTransaction`] when no
/// transaction is open, including message and exception capture after the
/// owning transaction has already closed.
#[derive(Clone, Debug)]
pub struct TraceContext {
    inner: Arc<ContextInner>,
}

impl TraceContext {
    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        TraceContext { inner }
    }

    /// Opens a transaction and records its start timestamp.
    ///
    /// Fails with [`Error::AlreadyActive`] if a transaction is already open
    /// in this context (no reentrant begin), and with [`Error::ClientClosed`]
    /// once the owning client has shut down. The originally active
    /// transaction is unaffected by a failed `begin`.
    pub fn begin(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: impl Into<Cow<'static, str>>,
    ) -> TraceResult<TransactionHandle> {
        if self.inner.shared.is_closed() {
            return Err(Error::ClientClosed);
        }
        let mut state = self.inner.state.lock()?;
        if state.active.is_some() {
            return Err(Error::AlreadyActive);
        }
        let id = self.inner.shared.ids.new_transaction_id();
        let name = name.into();
        debug!(name: "transaction_begin", transaction = %id, transaction_name = %name);
        state.active = Some(ActiveTransaction {
            id,
            name,
            kind: kind.into(),
            start_time: SystemTime::now(),
            stack: SpanStack::default(),
            finished_spans: Vec::new(),
        });
        Ok(TransactionHandle::new(id))
    }

    /// Closes the active transaction with `outcome`, sets its end timestamp
    /// and hands it to the delivery worker.
    ///
    /// Spans still open are force-closed innermost-first with outcome
    /// [`Outcome::Unset`] and a non-fatal diagnostic; the post-condition is
    /// that zero open spans remain.
    pub fn end(&self, outcome: Outcome) -> TraceResult<()> {
        let mut state = self.inner.state.lock()?;
        let mut active = state.active.take().ok_or(Error::NoActiveTransaction)?;
        let end_time = SystemTime::now();
        if !active.stack.is_empty() {
            warn!(
                name: "open_spans_at_end",
                transaction = %active.id,
                open_spans = active.stack.len(),
                "transaction ended with open spans, force-closing"
            );
            active.finished_spans.extend(active.stack.close_all(end_time));
        }
        let data = active.finish(outcome, end_time);
        debug!(
            name: "transaction_end",
            transaction = %data.id,
            outcome = ?data.outcome,
            spans = data.spans.len(),
        );
        self.inner.shared.processor.end_transaction(data);
        Ok(())
    }

    /// Opens a span nested under the innermost open span, or directly under
    /// the transaction when no span is open.
    pub fn start_span(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: impl Into<Cow<'static, str>>,
    ) -> TraceResult<SpanHandle> {
        let mut state = self.inner.state.lock()?;
        let active = state.active.as_mut().ok_or(Error::NoActiveTransaction)?;
        let id = self.inner.shared.ids.new_span_id();
        Ok(active.stack.open(
            id,
            name.into(),
            kind.into(),
            active.id,
            SystemTime::now(),
        ))
    }

    /// Closes the span referenced by `handle` with `outcome`.
    ///
    /// Spans close in reverse order of opening; passing any handle other
    /// than the innermost open span fails with [`Error::SpanNotOpen`].
    pub fn end_span(&self, handle: SpanHandle, outcome: Outcome) -> TraceResult<()> {
        let mut state = self.inner.state.lock()?;
        let active = state.active.as_mut().ok_or(Error::NoActiveTransaction)?;
        let span = active.stack.close(&handle, outcome, SystemTime::now())?;
        active.finished_spans.push(span);
        Ok(())
    }

    /// Captures a message event attached to the innermost open span, or to
    /// the transaction itself when no span is open. The event is forwarded
    /// to the delivery worker immediately.
    pub fn capture_message(
        &self,
        body: impl Into<String>,
        severity: Severity,
    ) -> TraceResult<()> {
        self.capture(severity, EventKind::Message { body: body.into() })
    }

    /// Captures an exception event from `error`. Exceptions always carry
    /// [`Severity::Error`].
    pub fn capture_exception<E>(&self, error: &E) -> TraceResult<()>
    where
        E: std::error::Error,
    {
        let message = error.to_string();
        self.capture(
            Severity::Error,
            EventKind::Exception {
                error_type: std::any::type_name::<E>(),
                message: (!message.is_empty()).then_some(message),
            },
        )
    }

    fn capture(&self, severity: Severity, kind: EventKind) -> TraceResult<()> {
        let state = self.inner.state.lock()?;
        let active = state.active.as_ref().ok_or(Error::NoActiveTransaction)?;
        let event = EventRecord {
            id: self.inner.shared.ids.new_event_id(),
            severity,
            kind,
            timestamp: SystemTime::now(),
            transaction: active.id,
            span: active.stack.innermost(),
        };
        self.inner.shared.processor.record(event);
        Ok(())
    }
}
