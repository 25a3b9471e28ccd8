//! Timing types: recording segments, named measurements, and the marker
//! cues extracted from a recording stream.
//!
//! All times are f64 seconds. Segment and cue times are relative to the
//! start of the recording; measurement times are relative to the session
//! epoch. The two clocks drift against each other once encoding delay is
//! involved, which is why segment boundaries come from detected markers
//! rather than from the measurement timestamps.

use serde::{Deserialize, Serialize};

/// A `{start, end}` extraction range within a recording, end > start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

impl Segment {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A named, timed interval within one agent's run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
}

/// One sampled frame of a recording: a timestamp plus the average color of
/// the marker region, as hue degrees (0..360) and saturation/luminance
/// fractions (0..1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    pub timestamp: f64,
    pub hue: f32,
    pub saturation: f32,
    pub luminance: f32,
}

/// Marker timestamps detected in a recording.
///
/// `start_cues` and `end_cues` are chronological. `frame_duration` is the
/// sampling interval, used to step segment boundaries off the visible
/// marker frames themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerCues {
    pub start_cues: Vec<f64>,
    pub end_cues: Vec<f64>,
    pub frame_duration: f64,
}

impl MarkerCues {
    /// True when either cue set is missing, meaning marker-based trimming
    /// is impossible and the caller must fall back to timestamp segments.
    pub fn is_incomplete(&self) -> bool {
        self.start_cues.is_empty() || self.end_cues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_duration() {
        let seg = Segment::new(1.08, 2.96);
        assert!((seg.duration() - 1.88).abs() < 1e-9);
    }

    #[test]
    fn cues_incomplete_when_one_side_missing() {
        let cues = MarkerCues {
            start_cues: vec![1.0],
            end_cues: vec![],
            frame_duration: 0.04,
        };
        assert!(cues.is_incomplete());
    }
}
