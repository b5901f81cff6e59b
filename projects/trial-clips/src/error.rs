// Error taxonomy for a batch run
//
// Precondition and format errors stop their scope (run or camera). Resolution
// and build errors are per trial: they end up in the audit log and the batch
// moves on.

use std::path::PathBuf;
use std::time::Duration;

/// Fatal for the whole run.
#[derive(Debug, thiserror::Error)]
pub enum PreconditionError {
    #[error("trial boundary file not found: {0}")]
    BoundaryFileMissing(PathBuf),

    #[error("image directory not found: {0}")]
    ImageRootMissing(PathBuf),

    #[error("no session folder matching date '{date}' and subject '{subject}' in {root}")]
    NoSessionFolder {
        root: PathBuf,
        date: String,
        subject: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Fatal for one camera: the naming contract of the image assets is broken.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("image name '{name}' does not carry a frame number in field {field}")]
    MalformedImageName { name: String, field: usize },
}

/// Raised by the nearest-timestamp search itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlignError {
    #[error("nearest timestamp requested over an empty candidate set")]
    EmptyCandidateSet,
}

/// Per trial: the trial is skipped and the batch continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("BoundaryMissing: no {which} boundary recorded for trial {trial}")]
    BoundaryMissing { trial: usize, which: &'static str },

    #[error("MalformedBoundary: unparseable {which} boundary for trial {trial}: '{raw}'")]
    MalformedBoundary {
        trial: usize,
        which: &'static str,
        raw: String,
    },

    #[error("IncorrectTrial: trial {0} was not completed correctly, no delay window")]
    IncorrectTrial(usize),

    #[error("MissingMarker: trial {trial} has no value for event marker '{marker}'")]
    MissingMarker { trial: usize, marker: String },

    #[error("MarkerOutOfRange: event marker '{marker}' of trial {trial} puts the window outside the calendar range")]
    MarkerOutOfRange { trial: usize, marker: String },

    #[error("NoSessionCandidate: no session has a frame log for this camera")]
    NoSessionCandidate,

    #[error("StartFrameNotFound: no frame near the requested start")]
    StartFrameNotFound,

    #[error("EndFrameNotFound: no frame near the requested end")]
    EndFrameNotFound,

    #[error("InvalidTrialBounds: start frame {start} is not before end frame {end}")]
    InvalidTrialBounds { start: usize, end: usize },

    #[error("ZeroElapsed: matched end frame is not later than the matched start frame")]
    ZeroElapsed,

    #[error("Cancelled: run stopped before this trial was processed")]
    Cancelled,
}

/// Per trial and camera: the clip could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("EmptySelection: no image assets between frames {start} and {end}")]
    EmptySelection { start: usize, end: usize },

    #[error("FrameRead: failed to read frame {path}: {reason}")]
    FrameRead { path: PathBuf, reason: String },

    #[error("DimensionMismatch: {path} is {actual_w}x{actual_h}, clip is {expected_w}x{expected_h}")]
    DimensionMismatch {
        path: PathBuf,
        expected_w: i32,
        expected_h: i32,
        actual_w: i32,
        actual_h: i32,
    },

    #[error("WriterOpen: failed to open video writer for {path}: {reason}")]
    WriterOpen { path: PathBuf, reason: String },

    #[error("Encode: failed to write frame into {path}: {reason}")]
    Encode { path: PathBuf, reason: String },

    #[error("Timeout: trial exceeded its {0:?} budget")]
    Timeout(Duration),

    #[error("Panicked: trial worker panicked: {0}")]
    Panicked(String),
}

impl BuildError {
    pub fn frame_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::FrameRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
