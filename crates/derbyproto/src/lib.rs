//! Shared domain types for Derby.
//!
//! This crate provides the types that cross crate boundaries - agent
//! identities, run modes, measurements, recording segments, and per-agent
//! results - with minimal dependencies so every Derby crate can import it
//! without cycles.

pub mod domain;
pub mod timing;

pub use domain::{AgentConfig, AgentId, RaceResult, RunMode};
pub use timing::{FrameSample, MarkerCues, Measurement, Segment};
