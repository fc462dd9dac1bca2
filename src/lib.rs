#[cfg(feature = "http")]
pub mod admin;
mod clock;
mod config;
mod dead_letter;
mod dispatcher;
#[cfg(feature = "emitter")]
mod emitter;
mod error;
mod event;
mod registry;
mod retry;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::OutboxConfig;
pub use dead_letter::{
    replay, DeadLetterFilter, DeadLetterRecord, DeadLetterStore, MemoryDeadLetterStore,
};
pub use dispatcher::{CycleStats, Dispatcher, DispatcherThread, WorkerStats};
#[cfg(feature = "emitter")]
pub use emitter::EmitterHandler;
pub use error::{HandlerError, OutboxError, OutboxResult};
pub use event::{AttemptError, DeliveryState, DeliveryStatus, Event, EventId, NewEvent};
pub use registry::{Handler, HandlerRegistry};
pub use retry::RetryPolicy;
pub use store::{MemoryStore, OutboxStore, Transaction};

// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
