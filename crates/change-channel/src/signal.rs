//! Values flowing from transports to subscribers.

use serde_json::Value;

/// What a subscriber is told. Carries no row payload; the receiver re-fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSignal {
    /// Something in the topic changed.
    Changed,
    /// The topic is not delivering changes (failed join or lost connection).
    Degraded,
    /// Delivery resumed after a degradation.
    Restored,
}

/// Transport connection health as seen by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Degraded,
}

/// A row change reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    /// Row after the change, absent on delete.
    pub record: Option<Value>,
    /// Row before the change, when the backend sends it.
    pub old_record: Option<Value>,
}

impl ChangeEvent {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            record: None,
            old_record: None,
        }
    }

    pub fn with_record(mut self, record: Value) -> Self {
        self.record = Some(record);
        self
    }

    pub fn with_old_record(mut self, old_record: Value) -> Self {
        self.old_record = Some(old_record);
        self
    }
}
