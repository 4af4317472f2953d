//! Errors returned by the instrumentation API.

use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for instrumentation operations.
pub type TraceResult<T> = Result<T, Error>;

/// Errors returned by the instrumentation API.
///
/// The lifecycle variants (`AlreadyActive`, `NoActiveTransaction`,
/// `SpanNotOpen`, `ClientClosed`) indicate misuse by the instrumented code and
/// are surfaced immediately. Delivery problems are retried and then dropped
/// inside the delivery worker; they never appear here.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// `begin` was called while a transaction is already open in this
    /// execution context.
    #[error("a transaction is already active in this execution context")]
    AlreadyActive,

    /// The operation requires an open transaction and none is open.
    #[error("no active transaction in this execution context")]
    NoActiveTransaction,

    /// `end_span` was called with a handle that is not the innermost open
    /// span. Spans must close in reverse order of opening.
    #[error("span is not the innermost open span")]
    SpanNotOpen,

    /// The client has been shut down; no further transactions may be opened.
    #[error("client has been shut down")]
    ClientClosed,

    /// A flush or shutdown did not complete within its bounded wait.
    #[error("flush timed out after {} ms", .0.as_millis())]
    FlushTimedOut(Duration),

    /// The delivery worker is no longer reachable.
    #[error("delivery worker is no longer running")]
    Lost,

    /// Other errors not covered by the variants above.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl From<String> for Error {
    fn from(err_msg: String) -> Self {
        Error::Other(err_msg.into())
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(err: PoisonError<T>) -> Self {
        Error::Other(err.to_string().into())
    }
}
