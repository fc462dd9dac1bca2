//! Poller/dispatcher: claims batches of pending events and drives each
//! one through the delivery state machine.
//!
//! `pending → processing → {delivered | failed | dead}`; a failed event
//! becomes claimable again once its scheduled retry time elapses, and a
//! processing event whose lease expired is reclaimable by any worker;
//! that is the crash-recovery path behind the at-least-once guarantee.
//!
//! Workers share no in-memory state; the store's atomic claim is the
//! single source of ownership, so any number of `Dispatcher` instances
//! may poll the same store.

mod thread;

pub use thread::{DispatcherThread, WorkerStats};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::dead_letter::{DeadLetterRecord, DeadLetterStore};
use crate::error::{OutboxError, OutboxResult};
use crate::event::{Event, EventId};
use crate::registry::HandlerRegistry;
use crate::retry::RetryPolicy;
use crate::store::OutboxStore;

/// Counters for one claim-and-process cycle. This is the per-cycle
/// metrics surface; the dispatcher also logs it as a structured record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub claimed: usize,
    pub delivered: usize,
    pub failed: usize,
    pub dead: usize,
    /// Events still awaiting delivery after the cycle.
    pub backlog: usize,
}

enum Outcome {
    Delivered,
    Failed,
    Dead,
}

/// Claims batches from an [`OutboxStore`] and dispatches each event to
/// its registered handler, in `occurred_at` order, one at a time.
pub struct Dispatcher<S, D> {
    store: S,
    dead_letters: D,
    registry: Arc<HandlerRegistry>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    worker_id: String,
    batch_size: usize,
    lease: Duration,
}

impl<S, D> Dispatcher<S, D> {
    /// Create a dispatcher with default batching (≤100 events), a 60s
    /// lease, and the default retry policy.
    pub fn new(store: S, dead_letters: D, registry: HandlerRegistry) -> Self {
        Dispatcher {
            store,
            dead_letters,
            registry: Arc::new(registry),
            policy: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            worker_id: format!("worker-{}", std::process::id()),
            batch_size: 100,
            lease: Duration::from_secs(60),
        }
    }

    /// Set the worker id used for claim ownership.
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the maximum events claimed per cycle.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the claim lease duration.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Set the retry/backoff policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Apply batch size, lease, and retry settings from a config. The
    /// poll interval is consumed by [`DispatcherThread::spawn`].
    pub fn with_config(mut self, config: &crate::config::OutboxConfig) -> Self {
        self.batch_size = config.batch_size;
        self.lease = config.lease;
        self.policy = config.retry_policy();
        self
    }

    /// Inject a clock (tests use [`crate::ManualClock`]).
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }
}

impl<S: OutboxStore, D: DeadLetterStore> Dispatcher<S, D> {
    /// Claim one batch and process it to completion.
    pub fn run_cycle(&self) -> OutboxResult<CycleStats> {
        self.run_cycle_with(|| false)
    }

    /// Claim one batch and process it, checking `should_stop` between
    /// events. On a stop request the in-flight event is finished first,
    /// then the rest of the batch is released so other workers can claim
    /// it immediately instead of waiting out the lease.
    pub fn run_cycle_with<F: Fn() -> bool>(&self, should_stop: F) -> OutboxResult<CycleStats> {
        let mut stats = CycleStats::default();

        let claimed = self
            .store
            .claim_batch(self.batch_size, &self.worker_id, self.lease)?;
        stats.claimed = claimed.len();

        let mut events = claimed.into_iter();
        while let Some(event) = events.next() {
            match self.process_one(&event)? {
                Outcome::Delivered => stats.delivered += 1,
                Outcome::Failed => stats.failed += 1,
                Outcome::Dead => stats.dead += 1,
            }

            if should_stop() {
                for remaining in events.by_ref() {
                    self.store.release(remaining.id)?;
                }
                break;
            }
        }

        stats.backlog = self.store.pending_backlog()?;
        info!(
            worker_id = %self.worker_id,
            claimed = stats.claimed,
            delivered = stats.delivered,
            failed = stats.failed,
            dead = stats.dead,
            backlog = stats.backlog,
            "outbox cycle complete"
        );
        Ok(stats)
    }

    fn process_one(&self, event: &Event) -> OutboxResult<Outcome> {
        match self.registry.dispatch(event) {
            Ok(()) => {
                self.store.mark_delivered(event.id)?;
                debug!(event_id = %event.id, event_type = %event.event_type, "delivered");
                Ok(Outcome::Delivered)
            }
            Err(err) => {
                let attempts = self
                    .store
                    .delivery_state(event.id)?
                    .ok_or_else(|| OutboxError::NotFound(format!("event {}", event.id)))?
                    .attempts;

                if err.is_retryable() && !self.policy.is_exhausted(attempts) {
                    // First retry waits ~base_delay; attempts is already
                    // incremented by the claim.
                    let next = self
                        .policy
                        .next_attempt_at(self.clock.now(), attempts.saturating_sub(1));
                    self.store.mark_failed(event.id, &err.to_string(), next)?;
                    warn!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        attempts,
                        error = %err,
                        "delivery failed, retry scheduled"
                    );
                    Ok(Outcome::Failed)
                } else {
                    self.store.mark_dead(event.id, &err.to_string())?;
                    self.dead_letter(event.id, event)?;
                    warn!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        attempts,
                        error = %err,
                        "delivery failed permanently, dead-lettered"
                    );
                    Ok(Outcome::Dead)
                }
            }
        }
    }

    fn dead_letter(&self, id: EventId, event: &Event) -> OutboxResult<()> {
        let final_state = self
            .store
            .delivery_state(id)?
            .ok_or_else(|| OutboxError::NotFound(format!("event {id}")))?;
        let error_history = self.store.error_history(id)?;

        let record = DeadLetterRecord {
            event: event.clone(),
            final_state,
            error_history,
            dead_at: self.clock.now(),
        };

        match self.dead_letters.record(record) {
            Ok(()) => Ok(()),
            // At-most-once dead-lettering: a duplicate is logged and
            // ignored, never an abort.
            Err(OutboxError::Conflict(_)) => {
                warn!(event_id = %id, "duplicate dead-letter record ignored");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
