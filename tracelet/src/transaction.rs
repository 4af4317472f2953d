//! Finished-transaction data and outcome classification.

use crate::ids::TransactionId;
use crate::span::SpanData;
use serde::Serialize;
use std::borrow::Cow;
use std::time::SystemTime;

/// Terminal classification of a transaction or span.
///
/// Only the value passed to the closing call is recorded. Force-closed
/// transactions and spans are recorded as [`Outcome::Unset`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The tracked work completed successfully.
    Success,
    /// The tracked work failed.
    Error,
    /// No outcome was recorded before the close.
    #[default]
    Unset,
}

/// Handle to the transaction opened by
/// [`TraceContext::begin`](crate::context::TraceContext::begin).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransactionHandle {
    id: TransactionId,
}

impl TransactionHandle {
    pub(crate) fn new(id: TransactionId) -> Self {
        TransactionHandle { id }
    }

    /// The id of the transaction this handle refers to.
    pub fn id(&self) -> TransactionId {
        self.id
    }
}

/// All the information collected by a closed transaction, used as the
/// delivery input together with the events recorded against it.
///
/// Spans appear in the order they closed; parent references inside
/// [`SpanData`] preserve the nesting tree.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransactionData {
    /// Transaction id, shared by all spans and events recorded under it.
    pub id: TransactionId,
    /// Transaction name, e.g. the pipeline or request name.
    pub name: Cow<'static, str>,
    /// Transaction kind, e.g. `request`.
    pub kind: Cow<'static, str>,
    /// Start timestamp, set by `begin`.
    pub start_time: SystemTime,
    /// End timestamp, set exactly once when the transaction closes.
    pub end_time: SystemTime,
    /// Terminal classification.
    pub outcome: Outcome,
    /// Finished spans, in close order.
    pub spans: Vec<SpanData>,
}
