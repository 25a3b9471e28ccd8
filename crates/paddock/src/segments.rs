//! Turn marker cues into extraction segments.
//!
//! A marker renders across several frames; the last start cue of a window
//! is the frame closest to the true start, the first end cue closest to
//! the true end. Stepping each bound one frame further inward excludes the
//! visible marker itself from the extracted segment.

use derbyproto::{MarkerCues, Segment};

/// Build ordered, non-overlapping segments from detected cues.
///
/// Either cue list empty yields an empty result, signalling the caller to
/// fall back to timestamp-based segments. Cues are grouped chronologically
/// into windows - a run of start cues followed by the end cues that
/// precede the next start run - and each window gets the same two-sided
/// bound logic. Windows whose computed `end <= start` are dropped rather
/// than emitted with an invalid duration.
pub fn build_segments(cues: &MarkerCues) -> Vec<Segment> {
    if cues.is_incomplete() {
        return Vec::new();
    }

    let mut segments = Vec::new();
    for window in group_windows(&cues.start_cues, &cues.end_cues) {
        let start = window.last_start + cues.frame_duration;
        let end = window.first_end - cues.frame_duration;
        if end > start {
            segments.push(Segment::new(start, end));
        } else {
            tracing::warn!(
                window.start = window.last_start,
                window.end = window.first_end,
                "dropping marker window with non-positive duration"
            );
        }
    }
    segments
}

struct Window {
    last_start: f64,
    first_end: f64,
}

/// Pair each run of start cues with the first end cue that follows it.
///
/// Start cues after a window's end cues open the next window; end cues
/// with no preceding start cue (or trailing start cues with no end) are
/// discarded.
fn group_windows(start_cues: &[f64], end_cues: &[f64]) -> Vec<Window> {
    let mut windows = Vec::new();
    let mut starts = start_cues.iter().copied().peekable();
    let mut ends = end_cues.iter().copied().peekable();

    while let Some(first_start) = starts.next() {
        // Absorb the rest of this start run: every further start cue that
        // precedes the next usable end cue belongs to the same marker.
        let mut last_start = first_start;

        // Skip stale end cues from before this window even opened.
        while ends.peek().is_some_and(|e| *e <= first_start) {
            ends.next();
        }

        while starts.peek().is_some_and(|s| match ends.peek() {
            Some(e) => s < e,
            None => true,
        }) {
            last_start = starts.next().unwrap_or(last_start);
        }

        match ends.next() {
            Some(first_end) => {
                // Drain this window's remaining end cues up to the next
                // start run.
                let boundary = starts.peek().copied();
                while ends
                    .peek()
                    .is_some_and(|e| boundary.is_none_or(|b| *e < b))
                {
                    ends.next();
                }
                windows.push(Window {
                    last_start,
                    first_end,
                });
            }
            // Trailing start run with no end marker: nothing to extract.
            None => break,
        }
    }

    windows
}
