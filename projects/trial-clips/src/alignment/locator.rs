use crate::alignment::frame_log::{FrameLookup, FrameMatch, TimestampLog};
use crate::alignment::session::SessionResolver;
use crate::alignment::trials::TrialSegment;
use crate::error::ResolutionError;

/// Start and end frames of a trial within one session of one camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpan {
    /// Position of the chosen session in the candidate order.
    pub session: usize,
    pub start: FrameMatch,
    pub end: FrameMatch,
}

impl FrameSpan {
    /// Frames between the two matches, as used for the clip frame rate.
    pub fn frame_count(&self) -> usize {
        self.end.frame_index - self.start.frame_index
    }

    pub fn elapsed_secs(&self) -> f64 {
        let micros = self
            .end
            .timestamp
            .since(self.start.timestamp)
            .num_microseconds()
            .unwrap_or(0);
        micros as f64 / 1_000_000.0
    }
}

/// Turns a trial segment into concrete frame indices for one camera.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameIndexLocator {
    resolver: SessionResolver,
}

impl FrameIndexLocator {
    pub fn new(resolver: SessionResolver) -> Self {
        Self { resolver }
    }

    /// `logs` holds each candidate session's frame log for this camera, in
    /// session-name order. The end frame is always taken from the session
    /// chosen for the start.
    pub fn locate(
        &self,
        segment: &TrialSegment,
        logs: &[Option<&TimestampLog>],
    ) -> Result<FrameSpan, ResolutionError> {
        let resolved = self
            .resolver
            .resolve(segment.start, logs.iter().copied())?;

        let log = logs
            .get(resolved.position)
            .copied()
            .flatten()
            .ok_or(ResolutionError::NoSessionCandidate)?;

        let end = match log.lookup(segment.end, self.resolver.max_offset_micros) {
            FrameLookup::Found(m) => m,
            FrameLookup::NotFound => return Err(ResolutionError::EndFrameNotFound),
        };

        let start = resolved.start;
        tracing::debug!(
            "Located frames {}..={} in session #{} (start off by {}us)",
            start.frame_index,
            end.frame_index,
            resolved.position,
            start.distance_micros()
        );

        if start.frame_index >= end.frame_index {
            return Err(ResolutionError::InvalidTrialBounds {
                start: start.frame_index,
                end: end.frame_index,
            });
        }

        let span = FrameSpan {
            session: resolved.position,
            start,
            end,
        };
        if span.elapsed_secs() <= 0.0 {
            return Err(ResolutionError::ZeroElapsed);
        }
        Ok(span)
    }
}
