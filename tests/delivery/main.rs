use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use outbox_relay::{
    DeadLetterFilter, DeadLetterStore, DeliveryStatus, Dispatcher, Event, HandlerError,
    HandlerRegistry, ManualClock, MemoryDeadLetterStore, MemoryStore, NewEvent, OutboxError,
    OutboxStore, RetryPolicy,
};
use serde_json::json;

const LEASE: Duration = Duration::from_secs(60);

fn notification_event() -> NewEvent {
    NewEvent::new(
        "Patient",
        "patient-9",
        "NotificationRequested",
        json!({ "channel": "email", "template": "session-reminder" }),
    )
}

fn dispatcher_with(
    store: &MemoryStore,
    dlq: &MemoryDeadLetterStore,
    clock: &ManualClock,
    registry: HandlerRegistry,
    max_attempts: u32,
) -> Dispatcher<MemoryStore, MemoryDeadLetterStore> {
    Dispatcher::new(store.clone(), dlq.clone(), registry)
        .with_worker_id("w1")
        .with_clock(clock.clone())
        .with_lease(LEASE)
        .with_policy(RetryPolicy {
            max_attempts,
            jitter: 0.0,
            ..Default::default()
        })
}

// --- Transactional atomicity ---

#[test]
fn event_commits_and_rolls_back_with_the_business_write() {
    let store = MemoryStore::new();
    let business_state = Mutex::new(Vec::<String>::new());

    // Committed transaction: business write and event both land.
    store
        .transaction(|txn| {
            business_state.lock().unwrap().push("appointment-1".to_string());
            txn.append(notification_event());
            Ok(())
        })
        .unwrap();

    // Failed transaction: the event must not be visible either.
    let result: Result<(), OutboxError> = store.transaction(|txn| {
        txn.append(notification_event());
        Err(OutboxError::Storage("constraint violation".to_string()))
    });
    assert!(result.is_err());

    let claimed = store.claim_batch(10, "w1", LEASE).unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(business_state.lock().unwrap().len(), 1);
}

// --- Retry exhaustion ---

#[test]
fn always_retryable_handler_dies_after_exactly_max_attempts() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let registry = HandlerRegistry::new().with("NotificationRequested", move |_: &Event| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::retryable("smtp connection refused"))
    });

    let clock = ManualClock::new();
    let store = MemoryStore::with_clock(clock.clone());
    let dlq = MemoryDeadLetterStore::new();
    let max_attempts = 4;
    let dispatcher = dispatcher_with(&store, &dlq, &clock, registry, max_attempts);

    let id = store.append(notification_event()).unwrap();

    let mut schedules = Vec::new();
    loop {
        dispatcher.run_cycle().unwrap();
        let state = store.delivery_state(id).unwrap().unwrap();
        match state.status {
            DeliveryStatus::Failed => {
                let next = state.next_attempt_at.expect("failed event must be scheduled");
                schedules.push(next);
                clock.set(next);
            }
            DeliveryStatus::Dead => break,
            other => panic!("unexpected status {other:?}"),
        }
    }

    assert_eq!(invocations.load(Ordering::SeqCst), max_attempts as usize);

    let state = store.delivery_state(id).unwrap().unwrap();
    assert_eq!(state.attempts, max_attempts);

    // next_attempt_at grows monotonically between attempts.
    for pair in schedules.windows(2) {
        assert!(pair[0] < pair[1]);
    }

    // Dead-letter record preserves every failed attempt.
    let record = dlq.get(id).unwrap().unwrap();
    assert_eq!(record.error_history.len(), max_attempts as usize);
    assert_eq!(record.final_state.status, DeliveryStatus::Dead);
}

// --- Unknown event types ---

#[test]
fn unregistered_type_is_parked_dead_without_retries() {
    let clock = ManualClock::new();
    let store = MemoryStore::with_clock(clock.clone());
    let dlq = MemoryDeadLetterStore::new();
    let dispatcher = dispatcher_with(&store, &dlq, &clock, HandlerRegistry::new(), 8);

    let id = store
        .append(NewEvent::new("Report", "r-1", "LegacyEvent", json!({})))
        .unwrap();

    let stats = dispatcher.run_cycle().unwrap();
    assert_eq!(stats.dead, 1);

    let state = store.delivery_state(id).unwrap().unwrap();
    assert_eq!(state.status, DeliveryStatus::Dead);
    assert_eq!(state.attempts, 1);

    let record = dlq.get(id).unwrap().unwrap();
    assert!(record.error_history[0].error.contains("no handler registered"));
}

// --- Dead-letter replay ---

#[test]
fn replay_makes_the_event_claimable_and_keeps_the_record() {
    let clock = ManualClock::new();
    let store = MemoryStore::with_clock(clock.clone());
    let dlq = MemoryDeadLetterStore::new();

    // No handler: the event dies on its first claim.
    let parked = dispatcher_with(&store, &dlq, &clock, HandlerRegistry::new(), 8);
    let id = store.append(notification_event()).unwrap();
    parked.run_cycle().unwrap();
    assert_eq!(
        store.delivery_state(id).unwrap().unwrap().status,
        DeliveryStatus::Dead
    );

    // Operator replays after deploying the missing handler.
    outbox_relay::replay(&store, &dlq, id).unwrap();
    let state = store.delivery_state(id).unwrap().unwrap();
    assert_eq!(state.status, DeliveryStatus::Pending);
    assert_eq!(state.attempts, 0);

    let registry = HandlerRegistry::new().with("NotificationRequested", |_: &Event| Ok(()));
    let fixed = dispatcher_with(&store, &dlq, &clock, registry, 8);
    let stats = fixed.run_cycle().unwrap();
    assert_eq!(stats.delivered, 1);

    // The record remains queryable as the audit trail.
    let listed = dlq
        .list(&DeadLetterFilter::new().event_type("NotificationRequested"))
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].event.id, id);
}

// --- Crash recovery ---

#[test]
fn crashed_worker_claim_is_recovered_after_lease_expiry() {
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    let registry = HandlerRegistry::new().with("NotificationRequested", move |_: &Event| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let clock = ManualClock::new();
    let store = MemoryStore::with_clock(clock.clone());
    let dlq = MemoryDeadLetterStore::new();
    let dispatcher = dispatcher_with(&store, &dlq, &clock, registry, 8);

    let id = store.append(notification_event()).unwrap();

    // A worker claims the event and crashes: no mark ever arrives.
    let claimed = store.claim_batch(10, "crashed-worker", LEASE).unwrap();
    assert_eq!(claimed.len(), 1);

    // Before the lease expires nobody can touch it.
    let stats = dispatcher.run_cycle().unwrap();
    assert_eq!(stats.claimed, 0);

    clock.advance(LEASE * 2);
    let stats = dispatcher.run_cycle().unwrap();
    assert_eq!(stats.delivered, 1);
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    let state = store.delivery_state(id).unwrap().unwrap();
    assert_eq!(state.status, DeliveryStatus::Delivered);
    assert_eq!(state.attempts, 2);
}

// --- Handler idempotence ---

#[test]
fn idempotent_handler_sends_one_notification_across_redelivery() {
    // The handler keys its side effect on the event id, as the handler
    // contract requires under at-least-once delivery.
    let sent: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let notifications = Arc::new(AtomicUsize::new(0));

    let sent_keys = sent.clone();
    let outbound = notifications.clone();
    let registry = HandlerRegistry::new().with("NotificationRequested", move |event: &Event| {
        if sent_keys.lock().unwrap().insert(event.id.to_string()) {
            outbound.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    });
    let registry = Arc::new(registry);

    let clock = ManualClock::new();
    let store = MemoryStore::with_clock(clock.clone());
    let id = store.append(notification_event()).unwrap();

    // First delivery attempt: the handler runs but the worker crashes
    // before recording the outcome.
    let claimed = store.claim_batch(10, "crashed-worker", LEASE).unwrap();
    registry.dispatch(&claimed[0]).unwrap();

    // Lease expires; a healthy worker redelivers the same event.
    clock.advance(LEASE * 2);
    let reclaimed = store.claim_batch(10, "w2", LEASE).unwrap();
    assert_eq!(reclaimed[0].id, id);
    registry.dispatch(&reclaimed[0]).unwrap();
    store.mark_delivered(id).unwrap();

    // Handler ran twice, the notification went out once.
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
    assert_eq!(
        store.delivery_state(id).unwrap().unwrap().status,
        DeliveryStatus::Delivered
    );
}
