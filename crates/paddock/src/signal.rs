//! Marker detection over a recording's sampled color stream.
//!
//! Agent scripts render short solid-color regions (green = start, red =
//! end) immediately around the measured window. Scanning the recording for
//! those markers gives frame-accurate trim points regardless of clock
//! drift between the measurement timestamps and the recording's own clock;
//! wall-clock timestamps alone drift past 100ms once encoding and
//! buffering delay are involved.

use derbyconf::DetectionConfig;
use derbyproto::{FrameSample, MarkerCues, Segment};

use crate::segments::build_segments;

/// Scan sampled frames for start/end marker cues.
///
/// A frame participates only when its saturation clears the configured
/// minimum. Within that, green-band hue below the luminance ceiling is a
/// start cue; red-band hue above the luminance floor is an end cue. All
/// other frames are ignored.
///
/// Never fails: missing markers produce empty cue lists and a diagnostic,
/// and the caller falls back to timestamp-based segments.
pub fn detect_cues(frames: &[FrameSample], config: &DetectionConfig) -> MarkerCues {
    let mut start_cues = Vec::new();
    let mut end_cues = Vec::new();

    for frame in frames {
        if frame.saturation < config.min_saturation {
            continue;
        }
        if in_band(frame.hue, config.green_hue_min, config.green_hue_max)
            && frame.luminance <= config.green_luminance_max
        {
            start_cues.push(frame.timestamp);
        } else if in_band(frame.hue, config.red_hue_min, config.red_hue_max)
            && frame.luminance >= config.red_luminance_min
        {
            end_cues.push(frame.timestamp);
        }
    }

    let frame_duration = infer_frame_duration(frames, config.fallback_fps);

    if start_cues.is_empty() || end_cues.is_empty() {
        tracing::warn!(
            frames = frames.len(),
            start_cues = start_cues.len(),
            end_cues = end_cues.len(),
            "marker detection incomplete, caller should fall back to timestamp segments"
        );
    }

    MarkerCues {
        start_cues,
        end_cues,
        frame_duration,
    }
}

/// Detect markers and build segments, falling back to the session's own
/// timestamp-based segments when detection came up empty or produced no
/// valid window.
pub fn extract_segments(
    frames: &[FrameSample],
    config: &DetectionConfig,
    timestamp_segments: &[Segment],
) -> Vec<Segment> {
    let cues = detect_cues(frames, config);
    let segments = build_segments(&cues);
    if segments.is_empty() {
        tracing::warn!(
            fallback_segments = timestamp_segments.len(),
            "no marker segments, using timestamp-based segments"
        );
        return timestamp_segments.to_vec();
    }
    segments
}

/// Hue band membership, wrap-aware: a band with min > max crosses 0
/// degrees (the red band does).
fn in_band(hue: f32, min: f32, max: f32) -> bool {
    if min <= max {
        hue >= min && hue <= max
    } else {
        hue >= min || hue <= max
    }
}

/// Sampling interval inferred from consecutive timestamps, with a
/// configured-fps fallback when fewer than two samples exist.
fn infer_frame_duration(frames: &[FrameSample], fallback_fps: f64) -> f64 {
    frames
        .windows(2)
        .map(|pair| pair[1].timestamp - pair[0].timestamp)
        .find(|delta| *delta > 0.0)
        .unwrap_or(1.0 / fallback_fps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frame(timestamp: f64, hue: f32, saturation: f32, luminance: f32) -> FrameSample {
        FrameSample {
            timestamp,
            hue,
            saturation,
            luminance,
        }
    }

    fn neutral(timestamp: f64) -> FrameSample {
        frame(timestamp, 200.0, 0.1, 0.5)
    }

    #[test]
    fn classifies_green_and_red_markers() {
        let config = DetectionConfig::default();
        let frames = vec![
            neutral(0.00),
            frame(0.04, 120.0, 0.9, 0.3), // green
            frame(0.08, 120.0, 0.9, 0.3), // green, second marker frame
            neutral(0.12),
            frame(0.16, 0.0, 0.9, 0.4), // red, hue wraps through 0
            neutral(0.20),
        ];

        let cues = detect_cues(&frames, &config);
        assert_eq!(cues.start_cues, vec![0.04, 0.08]);
        assert_eq!(cues.end_cues, vec![0.16]);
        assert!((cues.frame_duration - 0.04).abs() < 1e-9);
    }

    #[test]
    fn low_saturation_frames_are_ignored() {
        let config = DetectionConfig::default();
        let frames = vec![
            frame(0.0, 120.0, 0.2, 0.3), // green hue but washed out
            frame(0.04, 350.0, 0.3, 0.4),
        ];

        let cues = detect_cues(&frames, &config);
        assert!(cues.start_cues.is_empty());
        assert!(cues.end_cues.is_empty());
    }

    #[test]
    fn luminance_bounds_reject_outliers() {
        let config = DetectionConfig::default();
        let frames = vec![
            frame(0.0, 120.0, 0.9, 0.9),  // too bright for a start marker
            frame(0.04, 350.0, 0.9, 0.1), // too dark for an end marker
        ];

        let cues = detect_cues(&frames, &config);
        assert!(cues.start_cues.is_empty());
        assert!(cues.end_cues.is_empty());
    }

    #[test]
    fn frame_duration_falls_back_to_configured_fps() {
        let config = DetectionConfig::default();
        let cues = detect_cues(&[neutral(1.0)], &config);
        assert!((cues.frame_duration - 0.04).abs() < 1e-9);
    }

    #[test]
    fn extract_falls_back_to_timestamp_segments() {
        let config = DetectionConfig::default();
        let fallback = vec![Segment::new(0.5, 2.5)];

        let segments = extract_segments(&[neutral(0.0)], &config, &fallback);
        assert_eq!(segments, fallback);
    }

    #[test]
    fn extract_prefers_marker_segments() {
        let config = DetectionConfig::default();
        let frames = vec![
            frame(1.00, 120.0, 0.9, 0.3),
            frame(1.04, 120.0, 0.9, 0.3),
            frame(3.00, 350.0, 0.9, 0.4),
        ];
        let fallback = vec![Segment::new(0.0, 10.0)];

        let segments = extract_segments(&frames, &config, &fallback);
        assert_eq!(segments.len(), 1);
        assert!((segments[0].start - 1.08).abs() < 1e-9);
        assert!((segments[0].end - 2.96).abs() < 1e-9);
    }
}
