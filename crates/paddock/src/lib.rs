//! Paddock - the race core for Derby.
//!
//! Orchestrates N independent racer agents through a synchronized, timed
//! run, then reduces each agent's recording to the time window that
//! matters.
//!
//! # Pieces
//!
//! - **Barrier**: N-party rendezvous with abort propagation, used at the
//!   ready / recording-start / stop checkpoints of a parallel run.
//! - **Run state**: the shared error flag and finish-order bookkeeping.
//! - **Signal detector**: scans a recording's sampled color stream for
//!   green/red marker cues.
//! - **Segment builder**: converts cue sets into trim-ready time ranges.
//! - **Race session**: the per-agent timing/recording state machine and
//!   the async handle scripts drive.
//! - **Coordinator**: runs all sessions (parallel or sequential) and
//!   collects one result per agent, converting failures into partial
//!   results instead of aborting the run.

pub mod barrier;
pub mod coordinator;
pub mod segments;
pub mod session;
pub mod signal;
pub mod state;

pub use barrier::{Barrier, RaceBarriers, WaitOutcome};
pub use coordinator::{Coordinator, ScriptHost};
pub use segments::build_segments;
pub use session::{RaceSession, SessionHandle};
pub use signal::{detect_cues, extract_segments};
pub use state::{FinishRecord, RunState};
