//! Event-type to handler dispatch.
//!
//! The set of handled event types is closed at startup: every consumer
//! registers before the dispatcher starts, and registering the same type
//! twice is a configuration error rather than a silent overwrite. An
//! event whose type has no handler is a non-retryable failure: it goes
//! to the dead-letter store on its first claim instead of being retried
//! forever.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{HandlerError, OutboxError, OutboxResult};
use crate::event::Event;

/// Processes events of one registered type.
///
/// Delivery is at-least-once, so every handler must be idempotent:
/// invoked twice with the same event id it must produce its side effect
/// exactly once (use the event id as the idempotency key).
pub trait Handler: Send + Sync {
    fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        self(event)
    }
}

/// String-keyed handler lookup table.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type. Errors if the type already
    /// has one.
    pub fn register(
        &mut self,
        event_type: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> OutboxResult<()> {
        let event_type = event_type.into();
        if self.handlers.contains_key(&event_type) {
            return Err(OutboxError::Config(format!(
                "handler already registered for event type '{event_type}'"
            )));
        }
        self.handlers.insert(event_type, Box::new(handler));
        Ok(())
    }

    /// Builder-style [`register`](Self::register) that panics on a
    /// duplicate. Startup-time convenience.
    pub fn with(mut self, event_type: impl Into<String>, handler: impl Handler + 'static) -> Self {
        let event_type = event_type.into();
        if let Err(err) = self.register(event_type, handler) {
            panic!("{err}");
        }
        self
    }

    /// Dispatch an event to its handler.
    ///
    /// A missing handler is reported as [`HandlerError::Fatal`], and a
    /// panicking handler is caught and reported the same way; errors
    /// never propagate past this call.
    pub fn dispatch(&self, event: &Event) -> Result<(), HandlerError> {
        let handler = self.handlers.get(&event.event_type).ok_or_else(|| {
            HandlerError::Fatal(format!(
                "no handler registered for event type '{}'",
                event.event_type
            ))
        })?;

        match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::Fatal(format!(
                "handler panicked: {}",
                panic_message(&*panic)
            ))),
        }
    }

    /// Whether a handler is registered for the given type.
    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// The registered event types, unordered.
    pub fn event_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
