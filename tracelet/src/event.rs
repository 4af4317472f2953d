//! Point-in-time message and exception captures.

use crate::ids::{EventId, SpanId, TransactionId};
use serde::Serialize;
use std::time::SystemTime;

/// Severity of a captured message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message.
    Info,
    /// Something unexpected, the workload continues.
    Warning,
    /// An error condition. Exceptions always carry this severity.
    Error,
}

/// The payload of a captured event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventKind {
    /// A free-form message, typically carrying workload metrics.
    Message {
        /// Message body.
        body: String,
    },
    /// An error capture.
    Exception {
        /// The Rust type of the captured error.
        error_type: &'static str,
        /// The error's display output, when non-empty.
        message: Option<String>,
    },
}

/// A point-in-time capture attached to a transaction or one of its spans.
///
/// Events are recorded immediately when captured, not deferred to transaction
/// end; an event can only be recorded while its owning transaction is open.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventRecord {
    /// Event id.
    pub id: EventId,
    /// Severity classification.
    pub severity: Severity,
    /// Message or exception payload.
    pub kind: EventKind,
    /// Capture timestamp.
    pub timestamp: SystemTime,
    /// The transaction this event was recorded under.
    pub transaction: TransactionId,
    /// The innermost span open at capture time, if any.
    pub span: Option<SpanId>,
}
