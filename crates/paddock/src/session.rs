//! Per-agent race session: the timing/recording state machine and the
//! async handle that scripts drive.
//!
//! `RaceSession` is the pure state machine - every mutator takes an
//! explicit `now` in session-relative seconds, so the transition rules are
//! testable without a runtime or a clock. `SessionHandle` wraps it with
//! the session epoch, the optional barrier bundle (parallel mode only),
//! and the shared run state, and exposes the five operations scripts see.

use crate::barrier::{RaceBarriers, WaitOutcome};
use crate::state::RunState;
use derbyproto::{AgentId, Measurement, Segment};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Timing/recording state for one agent.
///
/// Single-threaded per agent: the script issues calls strictly in order,
/// so the machine never sees concurrent mutation. At most one segment is
/// open at a time, and a measurement name is active at most once.
#[derive(Debug)]
pub struct RaceSession {
    agent: AgentId,
    open_start: Option<f64>,
    segments: Vec<Segment>,
    measurements: Vec<Measurement>,
    active: HashMap<String, f64>,
    messages: Vec<String>,
    has_explicit_recording: bool,
    auto_recording_started: bool,
}

impl RaceSession {
    pub fn new(agent: AgentId) -> Self {
        Self {
            agent,
            open_start: None,
            segments: Vec::new(),
            measurements: Vec::new(),
            active: HashMap::new(),
            messages: Vec::new(),
            has_explicit_recording: false,
            auto_recording_started: false,
        }
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    /// True once either the explicit or the automatic path has claimed the
    /// first recording start. Whichever fires first wins; the other is a
    /// no-op for the recording-start decision.
    pub fn recording_triggered(&self) -> bool {
        self.has_explicit_recording || self.auto_recording_started
    }

    pub fn is_recording(&self) -> bool {
        self.open_start.is_some()
    }

    /// Explicit recording start. Returns true when a segment was opened;
    /// false when one was already open (the call still counts as the
    /// explicit trigger).
    pub fn recording_start(&mut self, now: f64) -> bool {
        self.has_explicit_recording = true;
        if self.open_start.is_some() {
            return false;
        }
        self.open_start = Some(now);
        true
    }

    /// Mark the explicit trigger without opening a segment. Used when the
    /// recording-start rendezvous aborted: the call degrades to a no-op
    /// instead of opening an unsynchronized segment.
    pub fn recording_start_aborted(&mut self) {
        self.has_explicit_recording = true;
    }

    /// Close the open segment. No-op when nothing is open.
    pub fn recording_end(&mut self, now: f64) -> bool {
        self.has_explicit_recording = true;
        match self.open_start.take() {
            Some(start) => {
                self.segments.push(Segment::new(start, now));
                true
            }
            None => false,
        }
    }

    /// Begin the named measurement, auto-starting the recording when
    /// nothing has started it yet. The auto-start is one-shot: a second
    /// measure_start never re-triggers it. Re-starting an active name
    /// overwrites its start time silently (last write wins).
    pub fn measure_start(&mut self, name: &str, now: f64) {
        if !self.recording_triggered() {
            self.auto_recording_started = true;
            if self.open_start.is_none() {
                self.open_start = Some(now);
            }
        }
        self.active.insert(name.to_string(), now);
    }

    /// One-shot claim of the automatic recording start without opening a
    /// segment. Used when the auto-start rendezvous aborted.
    pub fn measure_start_aborted(&mut self, name: &str, now: f64) {
        if !self.recording_triggered() {
            self.auto_recording_started = true;
        }
        self.active.insert(name.to_string(), now);
    }

    /// End the named measurement and return its duration. An end with no
    /// matching start is benign: returns 0.0 and records nothing.
    pub fn measure_end(&mut self, name: &str, now: f64) -> f64 {
        match self.active.remove(name) {
            Some(start_time) => {
                let duration = now - start_time;
                self.measurements.push(Measurement {
                    name: name.to_string(),
                    start_time,
                    end_time: now,
                    duration,
                });
                duration
            }
            None => {
                tracing::debug!(
                    agent.id = %self.agent,
                    measurement = name,
                    "measure end without matching start, returning zero"
                );
                0.0
            }
        }
    }

    pub fn note(&mut self, text: impl Into<String>) {
        self.messages.push(text.into());
    }

    /// End-of-script cleanup: a still-open segment is treated as an
    /// implicit recording end, not an error.
    pub fn finish(&mut self, now: f64) {
        if self.open_start.is_some() {
            tracing::debug!(agent.id = %self.agent, "closing segment left open at script end");
            self.recording_end(now);
        }
    }

    /// End time of the last completed measurement, if any. Finish rank is
    /// derived from this, not from stop-barrier arrival order.
    pub fn last_measurement_end(&self) -> Option<f64> {
        self.measurements.last().map(|m| m.end_time)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

/// Cloneable handle driving one `RaceSession`.
///
/// The two barrier-gated operations (`race_start` with pending auto-start,
/// `race_recording_start`) are async; everything else is local
/// bookkeeping. The inner mutex is never held across an await.
#[derive(Clone)]
pub struct SessionHandle {
    agent: AgentId,
    epoch: Instant,
    session: Arc<Mutex<RaceSession>>,
    barriers: Option<Arc<RaceBarriers>>,
    state: Arc<RunState>,
}

impl SessionHandle {
    pub fn new(
        agent: AgentId,
        barriers: Option<Arc<RaceBarriers>>,
        state: Arc<RunState>,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(RaceSession::new(agent.clone()))),
            agent,
            epoch: Instant::now(),
            barriers,
            state,
        }
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    /// Seconds since the session epoch.
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Rendezvous at the ready checkpoint before the script runs at all.
    /// Sequential mode has no barriers and is always ready.
    pub async fn ready(&self) -> WaitOutcome {
        match &self.barriers {
            Some(barriers) => barriers.ready.wait("ready").await,
            None => WaitOutcome::Completed,
        }
    }

    /// Explicitly start recording. In parallel mode all agents rendezvous
    /// first so their visible start markers land at the same logical
    /// instant; an aborted rendezvous degrades the call to a no-op.
    pub async fn race_recording_start(&self) {
        let already_open = self.lock().is_recording();
        if !already_open && self.recording_gate().await.is_aborted() {
            self.lock().recording_start_aborted();
            return;
        }
        let now = self.now();
        self.lock().recording_start(now);
    }

    /// Close the open recording segment. No-op when nothing is open.
    pub fn race_recording_end(&self) {
        let now = self.now();
        self.lock().recording_end(now);
    }

    /// Begin a named measurement, auto-starting the recording (and its
    /// rendezvous) if nothing has started it yet.
    pub async fn race_start(&self, name: &str) {
        let needs_auto_start = !self.lock().recording_triggered();
        if needs_auto_start && self.recording_gate().await.is_aborted() {
            let now = self.now();
            self.lock().measure_start_aborted(name, now);
            return;
        }
        let now = self.now();
        self.lock().measure_start(name, now);
    }

    /// End a named measurement. Unmatched names return 0.0.
    pub fn race_end(&self, name: &str) -> f64 {
        let now = self.now();
        self.lock().measure_end(name, now)
    }

    /// Side-channel annotation; always succeeds.
    pub fn race_message(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!(agent.id = %self.agent, message = %text, "race message");
        self.lock().note(text);
    }

    /// End-of-script finalization: force-close any open segment, record
    /// the finish time into the shared run state, then rendezvous at the
    /// stop checkpoint so cross-stream markers stay consistent.
    pub async fn finalize(&self) {
        let end_time = {
            let mut session = self.lock();
            let now = self.epoch.elapsed().as_secs_f64();
            session.finish(now);
            session.last_measurement_end().unwrap_or(now)
        };
        self.state.record_finish(self.agent.clone(), end_time);

        if let Some(barriers) = &self.barriers {
            barriers.stop.wait("stop").await;
        }
    }

    /// Snapshot the collected data for the coordinator's result row.
    pub fn snapshot(&self) -> (Vec<Segment>, Vec<Measurement>, Vec<String>) {
        let session = self.lock();
        (
            session.segments().to_vec(),
            session.measurements().to_vec(),
            session.messages().to_vec(),
        )
    }

    async fn recording_gate(&self) -> WaitOutcome {
        match &self.barriers {
            Some(barriers) => barriers.recording_start.wait("recording-start").await,
            None => WaitOutcome::Completed,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RaceSession> {
        self.session.lock().expect("session poisoned")
    }
}
