use crate::alignment::frame_log::{FrameLookup, FrameMatch, TimestampLog};
use crate::alignment::nearest::nearest_by;
use crate::alignment::timestamp::Timestamp;
use crate::error::ResolutionError;
use std::path::PathBuf;

/// One physical recording folder. A date/subject pair can have several when
/// the recorder was restarted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub name: String,
    pub dir: PathBuf,
}

/// The session chosen for a trial together with its start-frame match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSession {
    /// Position of the session in the candidate order given to the resolver.
    pub position: usize,
    pub start: FrameMatch,
}

/// Picks, per trial, the session whose frame log holds the timestamp closest
/// to the trial start. Works over any number of candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionResolver {
    pub max_offset_micros: Option<u64>,
}

impl SessionResolver {
    pub fn new(max_offset_micros: Option<u64>) -> Self {
        Self { max_offset_micros }
    }

    /// `candidates` yields each session's frame log (or `None` when the
    /// session has no log for this camera) in the tie-break order, which is
    /// lexicographic session name.
    pub fn resolve<'a, I>(&self, query: Timestamp, candidates: I) -> Result<ResolvedSession, ResolutionError>
    where
        I: IntoIterator<Item = Option<&'a TimestampLog>>,
    {
        let mut with_log = 0usize;
        let mut matches = Vec::new();

        for (position, log) in candidates.into_iter().enumerate() {
            let Some(log) = log else { continue };
            if log.is_empty() {
                continue;
            }
            with_log += 1;
            if let FrameLookup::Found(start) = log.lookup(query, self.max_offset_micros) {
                matches.push(ResolvedSession { position, start });
            }
        }

        if with_log == 0 {
            return Err(ResolutionError::NoSessionCandidate);
        }

        nearest_by(query, matches, |r| r.start.timestamp)
            .map_err(|_| ResolutionError::StartFrameNotFound)
    }
}
