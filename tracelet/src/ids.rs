//! Identifier types and generation.

use rand::{rngs, Rng, SeedableRng};
use serde::{Serialize, Serializer};
use std::cell::RefCell;
use std::fmt;

/// Identifier of a [`TransactionData`](crate::transaction::TransactionData).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u128);

impl TransactionId {
    /// The invalid transaction id, never produced by a generator.
    pub const INVALID: TransactionId = TransactionId(0);

    /// Converts the id to its raw representation.
    pub fn to_u128(self) -> u128 {
        self.0
    }
}

impl From<u128> for TransactionId {
    fn from(value: u128) -> Self {
        TransactionId(value)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({:032x})", self.0)
    }
}

impl Serialize for TransactionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Identifier of a span within a transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// The invalid span id, never produced by a generator.
    pub const INVALID: SpanId = SpanId(0);

    /// Converts the id to its raw representation.
    pub fn to_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for SpanId {
    fn from(value: u64) -> Self {
        SpanId(value)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({:016x})", self.0)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Identifier of a captured event.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u64);

impl From<u64> for EventId {
    fn from(value: u64) -> Self {
        EventId(value)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({:016x})", self.0)
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Interface for generating ids.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Generate a new `TransactionId`.
    fn new_transaction_id(&self) -> TransactionId;

    /// Generate a new `SpanId`.
    fn new_span_id(&self) -> SpanId;

    /// Generate a new `EventId`.
    fn new_event_id(&self) -> EventId;
}

/// Default [`IdGenerator`] implementation.
///
/// Generates transaction, span and event ids using a random number generator.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_transaction_id(&self) -> TransactionId {
        CURRENT_RNG.with(|rng| TransactionId::from(rng.borrow_mut().r#gen::<u128>()))
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| SpanId::from(rng.borrow_mut().r#gen::<u64>()))
    }

    fn new_event_id(&self) -> EventId {
        CURRENT_RNG.with(|rng| EventId::from(rng.borrow_mut().r#gen::<u64>()))
    }
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_entropy());
}

/// [`IdGenerator`] implementation that increments a counter for each new id.
/// This helps produce predictable ids for testing.
#[derive(Clone, Debug)]
pub struct IncrementIdGenerator(std::sync::Arc<std::sync::atomic::AtomicU64>);

impl IncrementIdGenerator {
    /// Create a new [`IncrementIdGenerator`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for IncrementIdGenerator {
    fn default() -> Self {
        Self(std::sync::Arc::new(std::sync::atomic::AtomicU64::new(1)))
    }
}

impl IdGenerator for IncrementIdGenerator {
    fn new_transaction_id(&self) -> TransactionId {
        TransactionId::from(self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst) as u128)
    }

    fn new_span_id(&self) -> SpanId {
        SpanId::from(self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
    }

    fn new_event_id(&self) -> EventId {
        EventId::from(self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_nonzero() {
        let generator = RandomIdGenerator::default();
        for _ in 0..16 {
            assert_ne!(generator.new_transaction_id(), TransactionId::INVALID);
            assert_ne!(generator.new_span_id(), SpanId::INVALID);
        }
    }

    #[test]
    fn increment_ids_are_sequential() {
        let generator = IncrementIdGenerator::new();
        assert_eq!(generator.new_transaction_id(), TransactionId::from(1));
        assert_eq!(generator.new_span_id(), SpanId::from(2));
        assert_eq!(generator.new_event_id().to_string(), EventId::from(3).to_string());
    }

    #[test]
    fn ids_display_as_fixed_width_hex() {
        assert_eq!(
            TransactionId::from(0xab).to_string(),
            "000000000000000000000000000000ab"
        );
        assert_eq!(SpanId::from(0xab).to_string(), "00000000000000ab");
    }
}
