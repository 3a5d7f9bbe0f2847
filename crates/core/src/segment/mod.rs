//! Source segmentation.
//!
//! Splits a probed media source into fixed-duration segments that
//! exactly cover `[0, duration)` with no gaps and no overlaps. Media
//! probing itself happens outside the engine; the segmenter only needs
//! the source reference and its duration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("Invalid source '{uri}': {reason}")]
    InvalidSource { uri: String, reason: String },

    #[error("Invalid segment duration: {0} seconds")]
    InvalidDuration(f64),
}

/// Reference to a probed media source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    /// Location of the source media (path or URL).
    pub uri: String,
    /// Total duration in seconds, as reported by the probe.
    pub duration_secs: f64,
}

impl SourceRef {
    pub fn new(uri: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            uri: uri.into(),
            duration_secs,
        }
    }
}

/// A single time slice of the source.
///
/// Ids are dense, start at 0 and follow source order. They are never
/// reused within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub id: u32,
    pub start_secs: f64,
    pub end_secs: f64,
    pub source: SourceRef,
}

impl Segment {
    /// Duration of this segment in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

/// Lazily yields segments covering the source end to end.
///
/// The final segment may be shorter than the configured duration. The
/// iterator is restartable: every call to [`Segmenter::iter`] starts
/// from segment 0 again.
#[derive(Debug, Clone)]
pub struct Segmenter {
    source: SourceRef,
    segment_secs: f64,
}

impl Segmenter {
    /// Validate the source and segment length up front.
    pub fn new(source: SourceRef, segment_secs: f64) -> Result<Self, SegmentError> {
        if segment_secs <= 0.0 || !segment_secs.is_finite() {
            return Err(SegmentError::InvalidDuration(segment_secs));
        }
        if source.uri.is_empty() {
            return Err(SegmentError::InvalidSource {
                uri: source.uri.clone(),
                reason: "empty uri".to_string(),
            });
        }
        if source.duration_secs <= 0.0 || !source.duration_secs.is_finite() {
            return Err(SegmentError::InvalidSource {
                uri: source.uri.clone(),
                reason: format!("non-positive duration {}", source.duration_secs),
            });
        }
        Ok(Self {
            source,
            segment_secs,
        })
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    /// Number of segments this source splits into.
    pub fn segment_count(&self) -> u32 {
        (self.source.duration_secs / self.segment_secs).ceil() as u32
    }

    /// Iterate segments in id order, starting from 0.
    pub fn iter(&self) -> SegmentIter {
        SegmentIter {
            source: self.source.clone(),
            segment_secs: self.segment_secs,
            next_id: 0,
        }
    }

    /// Collect all segments. Convenience for graph construction.
    pub fn segments(&self) -> Vec<Segment> {
        self.iter().collect()
    }
}

pub struct SegmentIter {
    source: SourceRef,
    segment_secs: f64,
    next_id: u32,
}

impl Iterator for SegmentIter {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        let start = self.next_id as f64 * self.segment_secs;
        if start >= self.source.duration_secs {
            return None;
        }
        let end = (start + self.segment_secs).min(self.source.duration_secs);
        let segment = Segment {
            id: self.next_id,
            start_secs: start,
            end_secs: end,
            source: self.source.clone(),
        };
        self.next_id += 1;
        Some(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(duration: f64) -> SourceRef {
        SourceRef::new("/media/input.mp4", duration)
    }

    #[test]
    fn test_even_split() {
        let segmenter = Segmenter::new(source(60.0), 15.0).unwrap();
        let segments = segmenter.segments();
        assert_eq!(segments.len(), 4);
        assert_eq!(segmenter.segment_count(), 4);
        for (i, s) in segments.iter().enumerate() {
            assert_eq!(s.id, i as u32);
            assert_eq!(s.start_secs, i as f64 * 15.0);
            assert_eq!(s.end_secs, (i as f64 + 1.0) * 15.0);
        }
    }

    #[test]
    fn test_final_short_segment() {
        let segmenter = Segmenter::new(source(50.0), 15.0).unwrap();
        let segments = segmenter.segments();
        assert_eq!(segments.len(), 4);
        let last = segments.last().unwrap();
        assert_eq!(last.start_secs, 45.0);
        assert_eq!(last.end_secs, 50.0);
        assert_eq!(last.duration_secs(), 5.0);
    }

    #[test]
    fn test_exact_cover_no_gaps_no_overlaps() {
        let segmenter = Segmenter::new(source(127.3), 10.0).unwrap();
        let segments = segmenter.segments();
        assert_eq!(segments[0].start_secs, 0.0);
        assert_eq!(segments.last().unwrap().end_secs, 127.3);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end_secs, pair[1].start_secs);
        }
    }

    #[test]
    fn test_source_shorter_than_segment() {
        let segmenter = Segmenter::new(source(3.0), 15.0).unwrap();
        let segments = segmenter.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].end_secs, 3.0);
    }

    #[test]
    fn test_restartable_iteration() {
        let segmenter = Segmenter::new(source(30.0), 10.0).unwrap();
        let first: Vec<_> = segmenter.iter().collect();
        let second: Vec<_> = segmenter.iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_duration_source_rejected() {
        let result = Segmenter::new(source(0.0), 15.0);
        assert!(matches!(
            result,
            Err(SegmentError::InvalidSource { .. })
        ));
    }

    #[test]
    fn test_negative_duration_source_rejected() {
        let result = Segmenter::new(source(-5.0), 15.0);
        assert!(matches!(result, Err(SegmentError::InvalidSource { .. })));
    }

    #[test]
    fn test_empty_uri_rejected() {
        let result = Segmenter::new(SourceRef::new("", 60.0), 15.0);
        assert!(matches!(result, Err(SegmentError::InvalidSource { .. })));
    }

    #[test]
    fn test_bad_segment_length_rejected() {
        let result = Segmenter::new(source(60.0), 0.0);
        assert!(matches!(result, Err(SegmentError::InvalidDuration(_))));
    }
}
