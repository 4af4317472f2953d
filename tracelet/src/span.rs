//! Span records and the per-transaction stack of open spans.

use crate::error::{Error, TraceResult};
use crate::ids::{SpanId, TransactionId};
use crate::transaction::Outcome;
use serde::Serialize;
use std::borrow::Cow;
use std::time::SystemTime;

/// Back-reference from a span to its enclosing transaction or span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanParent {
    /// The span is a direct child of the transaction.
    Transaction(TransactionId),
    /// The span is nested inside another span.
    Span(SpanId),
}

/// Handle to an open span, returned by
/// [`TraceContext::start_span`](crate::context::TraceContext::start_span).
///
/// Passing the handle back to `end_span` closes the span; only the handle of
/// the innermost open span is accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpanHandle {
    id: SpanId,
}

impl SpanHandle {
    /// The id of the span this handle refers to.
    pub fn id(&self) -> SpanId {
        self.id
    }
}

/// All the information collected by a finished span.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpanData {
    /// Span id.
    pub id: SpanId,
    /// Span name, e.g. the stage being timed.
    pub name: Cow<'static, str>,
    /// Span kind, e.g. `app` or `db`.
    pub kind: Cow<'static, str>,
    /// The enclosing transaction or span.
    pub parent: SpanParent,
    /// Start timestamp.
    pub start_time: SystemTime,
    /// End timestamp.
    pub end_time: SystemTime,
    /// Terminal classification.
    pub outcome: Outcome,
}

#[derive(Debug)]
struct OpenSpan {
    id: SpanId,
    name: Cow<'static, str>,
    kind: Cow<'static, str>,
    parent: SpanParent,
    start_time: SystemTime,
}

impl OpenSpan {
    fn finish(self, outcome: Outcome, end_time: SystemTime) -> SpanData {
        SpanData {
            id: self.id,
            name: self.name,
            kind: self.kind,
            parent: self.parent,
            start_time: self.start_time,
            end_time,
            outcome,
        }
    }
}

/// Last-in-first-out stack of the open spans of one transaction.
///
/// Enforces strict nesting: a span can only close while it is the stack top,
/// so children always close before their parent.
#[derive(Debug, Default)]
pub(crate) struct SpanStack {
    open: Vec<OpenSpan>,
}

impl SpanStack {
    /// Pushes a new span whose parent is the current stack top, or the
    /// transaction itself when the stack is empty.
    pub(crate) fn open(
        &mut self,
        id: SpanId,
        name: Cow<'static, str>,
        kind: Cow<'static, str>,
        transaction: TransactionId,
        start_time: SystemTime,
    ) -> SpanHandle {
        let parent = match self.open.last() {
            Some(top) => SpanParent::Span(top.id),
            None => SpanParent::Transaction(transaction),
        };
        self.open.push(OpenSpan {
            id,
            name,
            kind,
            parent,
            start_time,
        });
        SpanHandle { id }
    }

    /// Pops and finishes the span referenced by `handle`.
    ///
    /// Fails with [`Error::SpanNotOpen`] unless `handle` is the current stack
    /// top; the stack is left unchanged in that case.
    pub(crate) fn close(
        &mut self,
        handle: &SpanHandle,
        outcome: Outcome,
        end_time: SystemTime,
    ) -> TraceResult<SpanData> {
        match self.open.last() {
            Some(top) if top.id == handle.id => {}
            _ => return Err(Error::SpanNotOpen),
        }
        let top = self.open.pop().ok_or(Error::SpanNotOpen)?;
        Ok(top.finish(outcome, end_time))
    }

    /// Pops and force-closes every remaining span, innermost first, with
    /// outcome [`Outcome::Unset`]. Used only during forced transaction end.
    pub(crate) fn close_all(&mut self, end_time: SystemTime) -> Vec<SpanData> {
        let mut finished = Vec::with_capacity(self.open.len());
        while let Some(top) = self.open.pop() {
            finished.push(top.finish(Outcome::Unset, end_time));
        }
        finished
    }

    /// The id of the innermost open span, if any.
    pub(crate) fn innermost(&self) -> Option<SpanId> {
        self.open.last().map(|span| span.id)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.open.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn stack_with(ids: &[u64]) -> (SpanStack, Vec<SpanHandle>) {
        let mut stack = SpanStack::default();
        let handles = ids
            .iter()
            .map(|id| {
                stack.open(
                    SpanId::from(*id),
                    "span".into(),
                    "app".into(),
                    TransactionId::from(1),
                    SystemTime::now(),
                )
            })
            .collect();
        (stack, handles)
    }

    #[test]
    fn first_span_parents_to_transaction() {
        let (mut stack, handles) = stack_with(&[1]);
        let data = stack
            .close(&handles[0], Outcome::Success, SystemTime::now())
            .unwrap();
        assert_eq!(data.parent, SpanParent::Transaction(TransactionId::from(1)));
    }

    #[test]
    fn nested_span_parents_to_stack_top() {
        let (mut stack, handles) = stack_with(&[1, 2]);
        let inner = stack
            .close(&handles[1], Outcome::Success, SystemTime::now())
            .unwrap();
        assert_eq!(inner.parent, SpanParent::Span(SpanId::from(1)));
    }

    #[test]
    fn close_of_non_top_handle_fails() {
        let (mut stack, handles) = stack_with(&[1, 2, 3]);
        let err = stack
            .close(&handles[0], Outcome::Success, SystemTime::now())
            .unwrap_err();
        assert!(matches!(err, Error::SpanNotOpen));
        // The stack is unchanged and closing in LIFO order still works.
        assert_eq!(stack.len(), 3);
        for handle in handles.iter().rev() {
            stack
                .close(handle, Outcome::Success, SystemTime::now())
                .unwrap();
        }
        assert!(stack.is_empty());
    }

    #[test]
    fn close_on_empty_stack_fails() {
        let (mut stack, handles) = stack_with(&[7]);
        stack
            .close(&handles[0], Outcome::Success, SystemTime::now())
            .unwrap();
        let err = stack
            .close(&handles[0], Outcome::Success, SystemTime::now())
            .unwrap_err();
        assert!(matches!(err, Error::SpanNotOpen));
    }

    #[test]
    fn close_all_pops_innermost_first_with_unset_outcome() {
        let (mut stack, _) = stack_with(&[1, 2, 3]);
        let finished = stack.close_all(SystemTime::now());
        assert!(stack.is_empty());
        let ids: Vec<u64> = finished.iter().map(|span| span.id.to_u64()).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert!(finished.iter().all(|span| span.outcome == Outcome::Unset));
    }

    #[test]
    fn innermost_tracks_stack_top() {
        let (mut stack, handles) = stack_with(&[1, 2]);
        assert_eq!(stack.innermost(), Some(SpanId::from(2)));
        stack
            .close(&handles[1], Outcome::Success, SystemTime::now())
            .unwrap();
        assert_eq!(stack.innermost(), Some(SpanId::from(1)));
    }
}
