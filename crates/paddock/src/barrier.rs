//! N-party rendezvous barrier with abort propagation.
//!
//! Sessions line up at fixed checkpoints (ready, recording-start, stop)
//! and nobody proceeds until everyone has arrived. The Nth arrival
//! releases the round and the barrier resets for the next one. An abort -
//! either `release_all` or the shared error flag - resolves every pending
//! and future wait as `Aborted`, never as an error.
//!
//! Waiters are woken through a watch channel; a periodic tick re-checks
//! the shared error flag so an abort raised by a sibling session that
//! never touches this barrier still lands within one poll interval.

use crate::state::RunState;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Default interval for re-checking the shared error flag while suspended.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a `wait` call resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// All parties arrived; proceed.
    Completed,
    /// The barrier was released or the run errored; stop gracefully.
    Aborted,
}

impl WaitOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

#[derive(Debug)]
struct Inner {
    waiting: usize,
    /// Bumped each time a round completes. A waiter that captured
    /// generation g is released once it observes a generation above g.
    generation: u64,
    released: bool,
}

/// Reusable N-party barrier tied to a run's shared state.
#[derive(Debug)]
pub struct Barrier {
    parties: usize,
    poll_interval: Duration,
    state: Arc<RunState>,
    inner: Mutex<Inner>,
    // Value is a pulse counter; the truth lives behind `inner`.
    wake: watch::Sender<u64>,
}

impl Barrier {
    /// `parties` must be at least 1; a one-party barrier completes every
    /// wait immediately.
    pub fn new(parties: usize, state: Arc<RunState>) -> Self {
        Self::with_poll_interval(parties, state, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        parties: usize,
        state: Arc<RunState>,
        poll_interval: Duration,
    ) -> Self {
        assert!(parties >= 1, "barrier needs at least one party");
        let (wake, _) = watch::channel(0u64);
        Self {
            parties,
            poll_interval,
            state,
            inner: Mutex::new(Inner {
                waiting: 0,
                generation: 0,
                released: false,
            }),
            wake,
        }
    }

    /// Rendezvous with the other parties.
    ///
    /// The Nth caller releases the whole round (itself included) as
    /// `Completed` and resets the barrier for reuse. Earlier callers
    /// suspend until the round completes, the barrier is released, or the
    /// shared error flag is raised.
    pub async fn wait(&self, label: &str) -> WaitOutcome {
        let mut rx = self.wake.subscribe();

        let my_generation = {
            let mut inner = self.inner.lock().expect("barrier poisoned");
            if inner.released || self.state.has_error() {
                return WaitOutcome::Aborted;
            }
            inner.waiting += 1;
            if inner.waiting == self.parties {
                inner.waiting = 0;
                inner.generation += 1;
                drop(inner);
                tracing::debug!(barrier.label = label, parties = self.parties, "barrier released");
                self.pulse();
                return WaitOutcome::Completed;
            }
            tracing::trace!(
                barrier.label = label,
                waiting = inner.waiting,
                parties = self.parties,
                "barrier waiting"
            );
            inner.generation
        };

        // Un-registers this arrival if the future is dropped mid-wait
        // (e.g. the script task is aborted on timeout), so a cancelled
        // waiter never leaves a ghost count behind.
        let _registration = Registration {
            barrier: self,
            generation: my_generation,
        };

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Sender dropped: the coordinator is gone.
                        return WaitOutcome::Aborted;
                    }
                    if let Some(outcome) = self.check(my_generation) {
                        return outcome;
                    }
                }
                _ = ticker.tick() => {
                    if self.state.has_error() {
                        tracing::debug!(barrier.label = label, "barrier aborted by run error");
                        return WaitOutcome::Aborted;
                    }
                    if let Some(outcome) = self.check(my_generation) {
                        return outcome;
                    }
                }
            }
        }
    }

    /// Release every pending waiter as `Aborted` and mark the barrier
    /// permanently released. Idempotent; future waits abort immediately.
    pub fn release_all(&self) {
        {
            let mut inner = self.inner.lock().expect("barrier poisoned");
            if inner.released {
                return;
            }
            inner.released = true;
            inner.waiting = 0;
        }
        tracing::debug!(parties = self.parties, "barrier force-released");
        self.pulse();
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().expect("barrier poisoned").released
    }

    fn check(&self, my_generation: u64) -> Option<WaitOutcome> {
        let inner = self.inner.lock().expect("barrier poisoned");
        if inner.released {
            Some(WaitOutcome::Aborted)
        } else if inner.generation > my_generation {
            Some(WaitOutcome::Completed)
        } else {
            None
        }
    }

    fn pulse(&self) {
        self.wake.send_modify(|n| *n = n.wrapping_add(1));
    }
}

/// One suspended arrival. Dropping it removes the arrival from the count
/// unless its round already completed or the barrier was force-released
/// (both of which reset the count themselves).
struct Registration<'a> {
    barrier: &'a Barrier,
    generation: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut inner = self.barrier.inner.lock().expect("barrier poisoned");
        if inner.generation == self.generation && !inner.released && inner.waiting > 0 {
            inner.waiting -= 1;
        }
    }
}

/// The three checkpoints of one parallel race.
///
/// Three independent barriers rather than one: the checkpoints are
/// distinct rendezvous points and must not be confusable - an agent at
/// "ready" must never be released by a sibling reaching "stop".
#[derive(Debug)]
pub struct RaceBarriers {
    pub ready: Barrier,
    pub recording_start: Barrier,
    pub stop: Barrier,
}

impl RaceBarriers {
    pub fn new(parties: usize, state: Arc<RunState>, poll_interval: Duration) -> Self {
        Self {
            ready: Barrier::with_poll_interval(parties, state.clone(), poll_interval),
            recording_start: Barrier::with_poll_interval(parties, state.clone(), poll_interval),
            stop: Barrier::with_poll_interval(parties, state, poll_interval),
        }
    }

    /// Abort every checkpoint. Used on cancellation.
    pub fn release_all(&self) {
        self.ready.release_all();
        self.recording_start.release_all();
        self.stop.release_all();
    }
}
