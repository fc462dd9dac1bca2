//! Background polling thread for the dispatcher.
//!
//! Wakes on a fixed interval or on an external nudge, runs one cycle per
//! wake, and supports graceful shutdown: finish the in-flight event,
//! release the rest of the claimed batch, then stop.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::error;

use crate::dead_letter::DeadLetterStore;
use crate::store::OutboxStore;

use super::Dispatcher;

enum Control {
    Stop,
    Nudge,
}

/// Totals accumulated over a worker thread's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub cycles: usize,
    pub claimed: usize,
    pub delivered: usize,
    pub failed: usize,
    pub dead: usize,
    /// Cycles aborted by a storage error (retried on the next wake).
    pub cycle_errors: usize,
}

/// A background thread driving a [`Dispatcher`].
///
/// ## Example
///
/// ```ignore
/// let worker = DispatcherThread::spawn(dispatcher, Duration::from_secs(10));
///
/// // a producer just appended: wake the loop early
/// worker.nudge();
///
/// let stats = worker.stop();
/// println!("delivered {} events", stats.delivered);
/// ```
pub struct DispatcherThread {
    control_tx: Sender<Control>,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl DispatcherThread {
    /// Spawn a worker polling every `poll_interval` (spec default 10s).
    pub fn spawn<S, D>(dispatcher: Dispatcher<S, D>, poll_interval: Duration) -> Self
    where
        S: OutboxStore + Send + 'static,
        D: DeadLetterStore + Send + 'static,
    {
        let (control_tx, control_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = WorkerStats::default();

            loop {
                let stop_flag = std::cell::Cell::new(false);
                let result = dispatcher.run_cycle_with(|| {
                    if stop_flag.get() {
                        return true;
                    }
                    match control_rx.try_recv() {
                        Ok(Control::Stop) | Err(TryRecvError::Disconnected) => {
                            stop_flag.set(true);
                            true
                        }
                        // A nudge mid-cycle is already satisfied by the
                        // cycle in progress.
                        Ok(Control::Nudge) | Err(TryRecvError::Empty) => false,
                    }
                });

                stats.cycles += 1;
                match result {
                    Ok(cycle) => {
                        stats.claimed += cycle.claimed;
                        stats.delivered += cycle.delivered;
                        stats.failed += cycle.failed;
                        stats.dead += cycle.dead;
                    }
                    Err(err) => {
                        stats.cycle_errors += 1;
                        error!(
                            worker_id = %dispatcher.worker_id(),
                            error = %err,
                            "outbox cycle aborted"
                        );
                    }
                }

                if stop_flag.get() {
                    break;
                }

                match control_rx.recv_timeout(poll_interval) {
                    Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    Ok(Control::Nudge) | Err(RecvTimeoutError::Timeout) => {}
                }
            }

            stats
        });

        DispatcherThread {
            control_tx,
            handle: Some(handle),
        }
    }

    /// Wake the worker before its next scheduled poll (e.g. right after
    /// a producer appended).
    pub fn nudge(&self) {
        let _ = self.control_tx.send(Control::Nudge);
    }

    /// Request a graceful stop and wait for the worker to finish.
    pub fn stop(mut self) -> WorkerStats {
        let _ = self.control_tx.send(Control::Stop);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            WorkerStats::default()
        }
    }

    /// Request a stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.control_tx.send(Control::Stop);
    }

    /// Hard exit: abandon the thread without joining. Claims it still
    /// holds are recovered by other workers through lease expiry.
    pub fn abandon(mut self) {
        let _ = self.control_tx.send(Control::Stop);
        self.handle.take();
    }
}

impl Drop for DispatcherThread {
    fn drop(&mut self) {
        let _ = self.control_tx.send(Control::Stop);
        // No join on drop; the thread winds down on its own.
    }
}
