use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an outbox event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        EventId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse an id from its canonical string form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(EventId(Uuid::parse_str(s)?))
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Producer-side input to [`append`](crate::store::Transaction::append):
/// everything an [`Event`] holds except what the store assigns (id and
/// timestamps).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewEvent {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewEvent {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        NewEvent {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
        }
    }
}

/// An immutable domain event as stored in the outbox.
///
/// `occurred_at` is set from the injected clock when the event is
/// appended and defines delivery ordering. Payload and type never change
/// after the append commits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: SystemTime,
    pub created_at: SystemTime,
}

/// Delivery status of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
    Dead,
}

impl DeliveryStatus {
    /// Terminal states are never left again (except by operator replay).
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Dead)
    }
}

/// Mutable delivery bookkeeping for one event.
///
/// Mutated exclusively by the dispatcher through the store's transition
/// operations; `attempts` only ever grows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryState {
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub next_attempt_at: Option<SystemTime>,
    pub last_error: Option<String>,
    pub locked_by: Option<String>,
    pub locked_at: Option<SystemTime>,
}

impl Default for DeliveryState {
    fn default() -> Self {
        DeliveryState {
            status: DeliveryStatus::Pending,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
            locked_by: None,
            locked_at: None,
        }
    }
}

impl DeliveryState {
    pub fn is_claimed_by(&self, worker_id: &str) -> bool {
        self.status == DeliveryStatus::Processing && self.locked_by.as_deref() == Some(worker_id)
    }
}

/// One failed attempt, kept for dead-letter diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptError {
    pub attempt: u32,
    pub error: String,
    pub at: SystemTime,
}
