//! Parking lot for events that exhausted their retry budget or hit a
//! fatal failure.
//!
//! Records are append-only and survive replay: replaying resets the
//! event's delivery state so it becomes claimable again, while the
//! record stays behind as the audit trail. Only an explicit operator
//! purge removes one.

use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{OutboxError, OutboxResult};
use crate::event::{AttemptError, DeliveryState, Event, EventId};
use crate::store::OutboxStore;

/// A dead event, frozen with its final delivery state and the full
/// error history that got it there.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub event: Event,
    pub final_state: DeliveryState,
    pub error_history: Vec<AttemptError>,
    pub dead_at: SystemTime,
}

/// Filter and pagination for operator listing.
#[derive(Clone, Debug, Default)]
pub struct DeadLetterFilter {
    pub event_type: Option<String>,
    pub dead_from: Option<SystemTime>,
    pub dead_until: Option<SystemTime>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl DeadLetterFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn dead_from(mut self, from: SystemTime) -> Self {
        self.dead_from = Some(from);
        self
    }

    pub fn dead_until(mut self, until: SystemTime) -> Self {
        self.dead_until = Some(until);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &DeadLetterRecord) -> bool {
        if let Some(event_type) = &self.event_type {
            if record.event.event_type != *event_type {
                return false;
            }
        }
        if let Some(from) = self.dead_from {
            if record.dead_at < from {
                return false;
            }
        }
        if let Some(until) = self.dead_until {
            if record.dead_at > until {
                return false;
            }
        }
        true
    }
}

/// Storage for dead-letter records.
pub trait DeadLetterStore: Send + Sync {
    /// Append a record. Errors with [`OutboxError::Conflict`] if one
    /// already exists for the event: each event dead-letters at most
    /// once.
    fn record(&self, record: DeadLetterRecord) -> OutboxResult<()>;

    /// Fetch the record for an event, if any.
    fn get(&self, id: EventId) -> OutboxResult<Option<DeadLetterRecord>>;

    /// List records matching the filter, oldest `dead_at` first.
    fn list(&self, filter: &DeadLetterFilter) -> OutboxResult<Vec<DeadLetterRecord>>;

    /// Operator purge. Errors with [`OutboxError::NotFound`] if there is
    /// no record for the event.
    fn purge(&self, id: EventId) -> OutboxResult<()>;
}

/// In-memory reference implementation of [`DeadLetterStore`].
#[derive(Clone, Default)]
pub struct MemoryDeadLetterStore {
    records: Arc<RwLock<Vec<DeadLetterRecord>>>,
}

impl MemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> OutboxResult<std::sync::RwLockReadGuard<'_, Vec<DeadLetterRecord>>> {
        self.records
            .read()
            .map_err(|_| OutboxError::Storage("dead-letter lock poisoned".to_string()))
    }

    fn write(&self) -> OutboxResult<std::sync::RwLockWriteGuard<'_, Vec<DeadLetterRecord>>> {
        self.records
            .write()
            .map_err(|_| OutboxError::Storage("dead-letter lock poisoned".to_string()))
    }
}

impl DeadLetterStore for MemoryDeadLetterStore {
    fn record(&self, record: DeadLetterRecord) -> OutboxResult<()> {
        let mut records = self.write()?;
        if records.iter().any(|r| r.event.id == record.event.id) {
            return Err(OutboxError::Conflict(format!(
                "dead-letter record already exists for event {}",
                record.event.id
            )));
        }
        records.push(record);
        Ok(())
    }

    fn get(&self, id: EventId) -> OutboxResult<Option<DeadLetterRecord>> {
        Ok(self.read()?.iter().find(|r| r.event.id == id).cloned())
    }

    fn list(&self, filter: &DeadLetterFilter) -> OutboxResult<Vec<DeadLetterRecord>> {
        let records = self.read()?;
        let mut matching: Vec<DeadLetterRecord> = records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.dead_at);

        let page: Vec<DeadLetterRecord> = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(page)
    }

    fn purge(&self, id: EventId) -> OutboxResult<()> {
        let mut records = self.write()?;
        let before = records.len();
        records.retain(|r| r.event.id != id);
        if records.len() == before {
            return Err(OutboxError::NotFound(format!("dead-letter record {id}")));
        }
        Ok(())
    }
}

/// Operator-triggered replay of a dead-lettered event.
///
/// Verifies the dead-letter record exists, then resets the delivery
/// state to pending with a fresh attempt budget. The record is left in
/// place; never invoked automatically.
pub fn replay<S, D>(store: &S, dead_letters: &D, id: EventId) -> OutboxResult<()>
where
    S: OutboxStore + ?Sized,
    D: DeadLetterStore + ?Sized,
{
    if dead_letters.get(id)?.is_none() {
        return Err(OutboxError::NotFound(format!("dead-letter record {id}")));
    }
    store.reset_for_replay(id)
}
