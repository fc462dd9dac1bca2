//! Durable outbox storage.
//!
//! [`OutboxStore`] is the dispatcher-facing seam: leased batch claiming
//! plus single-event state transitions, each atomic and keyed by event
//! id. Appending goes through the backend's own transactional API so the
//! event commits (or rolls back) together with the caller's business
//! write: see [`MemoryStore::transaction`] for the reference shape.

mod memory;

pub use memory::{MemoryStore, Transaction};

use std::time::{Duration, SystemTime};

use crate::error::OutboxResult;
use crate::event::{AttemptError, DeliveryState, Event, EventId};

/// Storage operations the dispatcher relies on.
///
/// Every mutation is a single-row atomic update scoped by event id; no
/// two concurrent `claim_batch` calls may return the same event.
pub trait OutboxStore: Send + Sync {
    /// Atomically claim up to `max` claimable events, oldest
    /// `occurred_at` first.
    ///
    /// Claimable means pending (or scheduled for retry) with any
    /// `next_attempt_at` elapsed, or processing under a lease that
    /// expired: the crash-recovery path. Claimed events move to
    /// processing, locked by `worker_id` for `lease`, with their attempt
    /// counter incremented.
    fn claim_batch(
        &self,
        max: usize,
        worker_id: &str,
        lease: Duration,
    ) -> OutboxResult<Vec<Event>>;

    /// Terminal success. Idempotent; the event row is retained for the
    /// retention sweep, never deleted here.
    fn mark_delivered(&self, id: EventId) -> OutboxResult<()>;

    /// Retryable failure: schedule the next attempt and release the
    /// lock. The error is appended to the attempt history.
    fn mark_failed(
        &self,
        id: EventId,
        error: &str,
        next_attempt_at: SystemTime,
    ) -> OutboxResult<()>;

    /// Terminal failure. Idempotent.
    fn mark_dead(&self, id: EventId, error: &str) -> OutboxResult<()>;

    /// Drop a claim back to pending so another worker can pick it up
    /// (graceful-shutdown path). The attempt counter keeps its value;
    /// attempts only ever grow.
    fn release(&self, id: EventId) -> OutboxResult<()>;

    /// Operator replay: dead back to pending with a fresh attempt
    /// budget and cleared lock/schedule.
    fn reset_for_replay(&self, id: EventId) -> OutboxResult<()>;

    /// Look up an event by id.
    fn event(&self, id: EventId) -> OutboxResult<Option<Event>>;

    /// Look up the delivery bookkeeping for an event.
    fn delivery_state(&self, id: EventId) -> OutboxResult<Option<DeliveryState>>;

    /// All failed attempts recorded for an event, oldest first.
    fn error_history(&self, id: EventId) -> OutboxResult<Vec<AttemptError>>;

    /// Number of events still awaiting delivery (pending or scheduled
    /// for retry, not currently claimed).
    fn pending_backlog(&self) -> OutboxResult<usize>;

    /// Retention sweep: remove delivered events older than the given
    /// age. Returns how many were removed.
    fn purge_delivered(&self, older_than: Duration) -> OutboxResult<usize>;
}
