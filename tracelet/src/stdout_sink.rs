//! A sink that writes batches to stdout as JSON lines.

use crate::config::ServiceMeta;
use crate::sink::{DeliveryError, DeliveryResult, DeliverySink, TraceBatch};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::sync::atomic;

#[derive(Serialize)]
struct ServiceLine<'a> {
    service: &'a ServiceMeta,
}

#[derive(Serialize)]
struct BatchLine<'a> {
    batch: &'a TraceBatch,
}

/// A delivery sink that writes each batch to stdout as one JSON line,
/// preceded by a single service-metadata line.
#[derive(Default)]
pub struct StdoutSink {
    service: Option<ServiceMeta>,
    service_emitted: bool,
    is_shutdown: atomic::AtomicBool,
}

impl fmt::Debug for StdoutSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StdoutSink")
    }
}

impl StdoutSink {
    /// Creates a new stdout sink.
    pub fn new() -> Self {
        Self::default()
    }

    fn encode(&mut self, batch: &TraceBatch) -> Result<String, DeliveryError> {
        let mut out = String::new();
        if !self.service_emitted {
            if let Some(service) = &self.service {
                let line = serde_json::to_string(&ServiceLine { service })
                    .map_err(|err| DeliveryError::Permanent(err.to_string()))?;
                out.push_str(&line);
                out.push('\n');
            }
            self.service_emitted = true;
        }
        let line = serde_json::to_string(&BatchLine { batch })
            .map_err(|err| DeliveryError::Permanent(err.to_string()))?;
        out.push_str(&line);
        Ok(out)
    }
}

impl DeliverySink for StdoutSink {
    fn deliver(&mut self, batch: TraceBatch) -> BoxFuture<'static, DeliveryResult> {
        if self.is_shutdown.load(atomic::Ordering::SeqCst) {
            return Box::pin(std::future::ready(Err(DeliveryError::Permanent(
                "sink is shut down".to_owned(),
            ))));
        }
        let result = self.encode(&batch).map(|lines| println!("{lines}"));
        Box::pin(std::future::ready(result))
    }

    fn set_service(&mut self, service: &ServiceMeta) {
        self.service = Some(service.clone());
    }

    fn shutdown(&mut self) {
        self.is_shutdown.store(true, atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TransactionId;
    use crate::transaction::{Outcome, TransactionData};
    use futures_executor::block_on;
    use std::time::SystemTime;

    fn test_batch() -> TraceBatch {
        TraceBatch {
            transaction: TransactionData {
                id: TransactionId::from(0xab),
                name: "pipeline".into(),
                kind: "request".into(),
                start_time: SystemTime::UNIX_EPOCH,
                end_time: SystemTime::UNIX_EPOCH,
                outcome: Outcome::Success,
                spans: Vec::new(),
            },
            events: Vec::new(),
        }
    }

    #[test]
    fn encodes_service_line_once() {
        let mut sink = StdoutSink::new();
        sink.set_service(&ServiceMeta {
            name: "cdnn".to_owned(),
            environment: "test".to_owned(),
        });

        let first = sink.encode(&test_batch()).unwrap();
        assert!(first.starts_with("{\"service\""));
        assert!(first.contains('\n'));

        let second = sink.encode(&test_batch()).unwrap();
        assert!(second.starts_with("{\"batch\""));
        assert!(!second.contains('\n'));
    }

    #[test]
    fn batch_line_carries_outcome_and_hex_id() {
        let mut sink = StdoutSink::new();
        let line = sink.encode(&test_batch()).unwrap();
        assert!(line.contains("\"outcome\":\"success\""));
        assert!(line.contains("000000000000000000000000000000ab"));
    }

    #[test]
    fn deliver_after_shutdown_fails() {
        let mut sink = StdoutSink::new();
        DeliverySink::shutdown(&mut sink);
        let result = block_on(sink.deliver(test_batch()));
        assert!(matches!(result, Err(DeliveryError::Permanent(_))));
    }
}
