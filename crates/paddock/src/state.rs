//! Shared run state for one race.
//!
//! A single `RunState` is shared by reference across every session and
//! barrier in a run. It carries the cross-agent abort flag, the first
//! error message, and the finish-order bookkeeping. Mutations are simple
//! flag sets and appends; a mutex guards the non-atomic parts.

use derbyproto::AgentId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// One agent's completion record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishRecord {
    pub agent: AgentId,

    /// Session-relative seconds of the agent's last measurement end, or
    /// of session finalization when nothing was measured.
    pub end_time: f64,
}

/// State shared across all sessions and barriers in one run.
#[derive(Debug, Default)]
pub struct RunState {
    has_error: AtomicBool,
    error_message: Mutex<Option<String>>,
    finish_order: Mutex<Vec<FinishRecord>>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once any session has failed or the run was cancelled. Barriers
    /// treat this as an abort signal on every poll.
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    /// Raise the abort flag. The first message wins; later calls still set
    /// the flag but keep the original message.
    pub fn flag_error(&self, message: impl Into<String>) {
        let message = message.into();
        {
            let mut slot = self.error_message.lock().expect("run state poisoned");
            if slot.is_none() {
                *slot = Some(message.clone());
            }
        }
        if !self.has_error.swap(true, Ordering::SeqCst) {
            tracing::warn!(run.error = %message, "run error flagged, aborting barriers");
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.error_message.lock().expect("run state poisoned").clone()
    }

    pub fn record_finish(&self, agent: AgentId, end_time: f64) {
        let mut order = self.finish_order.lock().expect("run state poisoned");
        order.push(FinishRecord { agent, end_time });
    }

    /// Finish records in the order sessions finalized. Rank by `end_time`,
    /// not by position - finalization order reflects scheduling, not speed.
    pub fn finish_order(&self) -> Vec<FinishRecord> {
        self.finish_order.lock().expect("run state poisoned").clone()
    }
}
