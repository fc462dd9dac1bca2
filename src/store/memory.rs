use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use crate::clock::{Clock, SystemClock};
use crate::error::{OutboxError, OutboxResult};
use crate::event::{AttemptError, DeliveryState, DeliveryStatus, Event, EventId, NewEvent};

use super::OutboxStore;

struct Row {
    seq: u64,
    event: Event,
    state: DeliveryState,
    history: Vec<AttemptError>,
}

struct Inner {
    rows: HashMap<EventId, Row>,
    next_seq: u64,
}

/// In-memory reference implementation of [`OutboxStore`].
///
/// Rows live behind a single `RwLock`, so every claim and transition is
/// a critical section: the in-memory analogue of a conditional
/// `UPDATE ... RETURNING`. Cloning creates another handle to the same
/// storage, which is how concurrent workers share a store.
///
/// # Example
///
/// ```
/// use outbox_relay::{MemoryStore, NewEvent, OutboxStore};
/// use serde_json::json;
///
/// let store = MemoryStore::new();
/// let id = store
///     .transaction(|txn| {
///         // business writes go here, in the same transaction
///         Ok(txn.append(NewEvent::new(
///             "Patient",
///             "patient-42",
///             "AppointmentScheduled",
///             json!({ "slot": "2026-09-01T10:00" }),
///         )))
///     })
///     .unwrap();
///
/// assert!(store.event(id).unwrap().is_some());
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    clock: Arc<dyn Clock>,
}

/// Staging area for appends made inside [`MemoryStore::transaction`].
///
/// Nothing staged here is visible to `claim_batch` until the transaction
/// closure returns `Ok` and the batch commits; an `Err` discards it all.
pub struct Transaction<'a> {
    clock: &'a dyn Clock,
    staged: Vec<(Event, DeliveryState)>,
}

impl Transaction<'_> {
    /// Stage an event for append. The id is assigned immediately;
    /// `occurred_at` comes from the store's clock.
    pub fn append(&mut self, new: NewEvent) -> EventId {
        let now = self.clock.now();
        let event = Event {
            id: EventId::new(),
            aggregate_type: new.aggregate_type,
            aggregate_id: new.aggregate_id,
            event_type: new.event_type,
            payload: new.payload,
            occurred_at: now,
            created_at: now,
        };
        let id = event.id;
        self.staged.push((event, DeliveryState::default()));
        id
    }
}

impl MemoryStore {
    /// Create a store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Create a store on an injected clock.
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        MemoryStore {
            inner: Arc::new(RwLock::new(Inner {
                rows: HashMap::new(),
                next_seq: 0,
            })),
            clock: Arc::new(clock),
        }
    }

    /// Run `f` as a transaction. Appends staged inside the closure
    /// commit atomically when it returns `Ok`; any `Err` rolls the whole
    /// batch back, so an event is never written without its business
    /// write.
    pub fn transaction<T, F>(&self, f: F) -> OutboxResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> OutboxResult<T>,
    {
        let mut txn = Transaction {
            clock: &*self.clock,
            staged: Vec::new(),
        };
        let out = f(&mut txn)?;

        if !txn.staged.is_empty() {
            let mut inner = self.write()?;
            for (event, state) in txn.staged {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.rows.insert(
                    event.id,
                    Row {
                        seq,
                        event,
                        state,
                        history: Vec::new(),
                    },
                );
            }
        }

        Ok(out)
    }

    /// Append a single event in its own transaction.
    pub fn append(&self, new: NewEvent) -> OutboxResult<EventId> {
        self.transaction(|txn| Ok(txn.append(new)))
    }

    fn read(&self) -> OutboxResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| OutboxError::Storage("store lock poisoned".to_string()))
    }

    fn write(&self) -> OutboxResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| OutboxError::Storage("store lock poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the event can be claimed at `now` by a worker using `lease`.
fn claimable(state: &DeliveryState, now: SystemTime, lease: Duration) -> bool {
    match state.status {
        DeliveryStatus::Pending | DeliveryStatus::Failed => {
            state.next_attempt_at.map_or(true, |at| at <= now)
        }
        // A processing row is only reclaimable once its lease expired.
        DeliveryStatus::Processing => state.locked_at.map_or(true, |at| at + lease <= now),
        DeliveryStatus::Delivered | DeliveryStatus::Dead => false,
    }
}

impl OutboxStore for MemoryStore {
    fn claim_batch(
        &self,
        max: usize,
        worker_id: &str,
        lease: Duration,
    ) -> OutboxResult<Vec<Event>> {
        let now = self.clock.now();
        let mut inner = self.write()?;

        let mut eligible: Vec<(SystemTime, u64, EventId)> = inner
            .rows
            .values()
            .filter(|row| claimable(&row.state, now, lease))
            .map(|row| (row.event.occurred_at, row.seq, row.event.id))
            .collect();
        eligible.sort();
        eligible.truncate(max);

        let mut claimed = Vec::with_capacity(eligible.len());
        for (_, _, id) in eligible {
            if let Some(row) = inner.rows.get_mut(&id) {
                row.state.status = DeliveryStatus::Processing;
                row.state.attempts += 1;
                row.state.next_attempt_at = None;
                row.state.locked_by = Some(worker_id.to_string());
                row.state.locked_at = Some(now);
                claimed.push(row.event.clone());
            }
        }

        Ok(claimed)
    }

    fn mark_delivered(&self, id: EventId) -> OutboxResult<()> {
        let mut inner = self.write()?;
        let row = require(&mut inner, id)?;

        match row.state.status {
            DeliveryStatus::Delivered => Ok(()),
            DeliveryStatus::Dead => Err(OutboxError::Conflict(format!(
                "event {id} is dead, cannot mark delivered"
            ))),
            _ => {
                row.state.status = DeliveryStatus::Delivered;
                row.state.next_attempt_at = None;
                row.state.locked_by = None;
                row.state.locked_at = None;
                Ok(())
            }
        }
    }

    fn mark_failed(
        &self,
        id: EventId,
        error: &str,
        next_attempt_at: SystemTime,
    ) -> OutboxResult<()> {
        let now = self.clock.now();
        let mut inner = self.write()?;
        let row = require(&mut inner, id)?;

        match row.state.status {
            DeliveryStatus::Failed => Ok(()),
            DeliveryStatus::Delivered | DeliveryStatus::Dead => Err(OutboxError::Conflict(
                format!("event {id} is terminal, cannot mark failed"),
            )),
            _ => {
                row.history.push(AttemptError {
                    attempt: row.state.attempts,
                    error: error.to_string(),
                    at: now,
                });
                row.state.status = DeliveryStatus::Failed;
                row.state.last_error = Some(error.to_string());
                row.state.next_attempt_at = Some(next_attempt_at);
                row.state.locked_by = None;
                row.state.locked_at = None;
                Ok(())
            }
        }
    }

    fn mark_dead(&self, id: EventId, error: &str) -> OutboxResult<()> {
        let now = self.clock.now();
        let mut inner = self.write()?;
        let row = require(&mut inner, id)?;

        match row.state.status {
            DeliveryStatus::Dead => Ok(()),
            DeliveryStatus::Delivered => Err(OutboxError::Conflict(format!(
                "event {id} is delivered, cannot mark dead"
            ))),
            _ => {
                row.history.push(AttemptError {
                    attempt: row.state.attempts,
                    error: error.to_string(),
                    at: now,
                });
                row.state.status = DeliveryStatus::Dead;
                row.state.last_error = Some(error.to_string());
                row.state.next_attempt_at = None;
                row.state.locked_by = None;
                row.state.locked_at = None;
                Ok(())
            }
        }
    }

    fn release(&self, id: EventId) -> OutboxResult<()> {
        let mut inner = self.write()?;
        let row = require(&mut inner, id)?;

        if row.state.status == DeliveryStatus::Processing {
            row.state.status = DeliveryStatus::Pending;
            row.state.locked_by = None;
            row.state.locked_at = None;
        }
        Ok(())
    }

    fn reset_for_replay(&self, id: EventId) -> OutboxResult<()> {
        let mut inner = self.write()?;
        let row = require(&mut inner, id)?;

        if row.state.status != DeliveryStatus::Dead {
            return Err(OutboxError::Conflict(format!(
                "event {id} is not dead, cannot replay"
            )));
        }

        row.state = DeliveryState::default();
        row.history.clear();
        Ok(())
    }

    fn event(&self, id: EventId) -> OutboxResult<Option<Event>> {
        Ok(self.read()?.rows.get(&id).map(|row| row.event.clone()))
    }

    fn delivery_state(&self, id: EventId) -> OutboxResult<Option<DeliveryState>> {
        Ok(self.read()?.rows.get(&id).map(|row| row.state.clone()))
    }

    fn error_history(&self, id: EventId) -> OutboxResult<Vec<AttemptError>> {
        Ok(self
            .read()?
            .rows
            .get(&id)
            .map(|row| row.history.clone())
            .unwrap_or_default())
    }

    fn pending_backlog(&self) -> OutboxResult<usize> {
        Ok(self
            .read()?
            .rows
            .values()
            .filter(|row| {
                matches!(
                    row.state.status,
                    DeliveryStatus::Pending | DeliveryStatus::Failed
                )
            })
            .count())
    }

    fn purge_delivered(&self, older_than: Duration) -> OutboxResult<usize> {
        let now = self.clock.now();
        let mut inner = self.write()?;

        let before = inner.rows.len();
        inner.rows.retain(|_, row| {
            row.state.status != DeliveryStatus::Delivered
                || row.event.created_at + older_than > now
        });
        Ok(before - inner.rows.len())
    }
}

fn require(inner: &mut Inner, id: EventId) -> OutboxResult<&mut Row> {
    inner
        .rows
        .get_mut(&id)
        .ok_or_else(|| OutboxError::NotFound(format!("event {id}")))
}
