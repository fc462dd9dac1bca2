//! In-process fan-out of delivered events.
//!
//! Requires the `emitter` feature. [`EmitterHandler`] is a [`Handler`]
//! that forwards each event to an `event-emitter-rs` `EventEmitter`
//! keyed by event type, so local consumers (notification listeners,
//! projections) subscribe with `on` instead of implementing their own
//! handler. The emitted value is the full event serialized to a JSON
//! string: subscribers keep the event id for their idempotency keys.

use std::sync::Mutex;

use event_emitter_rs::EventEmitter;

use crate::error::HandlerError;
use crate::event::Event;
use crate::registry::Handler;

/// Handler that emits events to in-process subscribers.
///
/// ## Example
///
/// ```
/// use event_emitter_rs::EventEmitter;
/// use outbox_relay::EmitterHandler;
///
/// let mut emitter = EventEmitter::new();
/// emitter.on("AppointmentScheduled", |event_json: String| {
///     // parse, check the id against already-sent notifications, send
/// });
///
/// let handler = EmitterHandler::new(emitter);
/// // registry.register("AppointmentScheduled", handler)
/// ```
pub struct EmitterHandler {
    emitter: Mutex<EventEmitter>,
}

impl EmitterHandler {
    pub fn new(emitter: EventEmitter) -> Self {
        EmitterHandler {
            emitter: Mutex::new(emitter),
        }
    }
}

impl Default for EmitterHandler {
    fn default() -> Self {
        Self::new(EventEmitter::new())
    }
}

impl Handler for EmitterHandler {
    fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let envelope = serde_json::to_string(event)
            .map_err(|err| HandlerError::fatal(format!("unserializable event: {err}")))?;

        let mut emitter = self
            .emitter
            .lock()
            .map_err(|_| HandlerError::retryable("emitter lock poisoned"))?;
        emitter.emit(&event.event_type, envelope);
        Ok(())
    }
}
