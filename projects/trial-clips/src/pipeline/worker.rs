// Trial worker: drives one (camera, trial) pair from Pending to a terminal
// outcome.

use crate::alignment::locator::FrameIndexLocator;
use crate::alignment::trials::{ClipMode, TrialBoundaries};
use crate::error::{BuildError, ResolutionError};
use crate::pipeline::types::{
    AuditEntry, CameraContext, ClipRecord, Deadline, ProcessingState, TrialJob, TrialOutcome,
    TrialReport, TrialStage,
};
use crate::video::assembler::{compute_frame_rate, ClipAssembler, ClipRequest};
use crate::video::FrameBackend;
use anyhow::Result;
use crossbeam::channel::{Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Shared, read-only inputs of the trial workers of one camera.
pub struct TrialSettings {
    pub boundaries: Arc<TrialBoundaries>,
    pub mode: ClipMode,
    pub locator: FrameIndexLocator,
    pub trial_timeout: Option<Duration>,
}

/// Moves `$current` to `$next` and fails the trial if its deadline passed.
macro_rules! enter {
    ($current:expr, $next:expr, $deadline:expr) => {
        *$current = $next;
        if let Err(error) = $deadline.check() {
            return TrialOutcome::Errored { stage: $next, error };
        }
    };
}

/// Runs one trial to a terminal outcome. A panic anywhere in the trial
/// becomes an `Errored` outcome at the stage it was reached in.
pub fn process_trial<B: FrameBackend>(
    job: &TrialJob,
    ctx: &CameraContext,
    settings: &TrialSettings,
    backend: &B,
) -> TrialOutcome {
    let mut stage = TrialStage::Pending;
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        run_trial(job, ctx, settings, backend, &mut stage)
    }));
    result.unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        TrialOutcome::Errored {
            stage,
            error: BuildError::Panicked(message),
        }
    })
}

fn run_trial<B: FrameBackend>(
    job: &TrialJob,
    ctx: &CameraContext,
    settings: &TrialSettings,
    backend: &B,
    stage: &mut TrialStage,
) -> TrialOutcome {
    let deadline = settings
        .trial_timeout
        .map(Deadline::after)
        .unwrap_or_else(Deadline::unbounded);
    let trial = &job.trial;

    // Resolving: requested span and owning session.
    enter!(stage, TrialStage::Resolving, deadline);
    let segment = match settings.boundaries.segment(trial, &settings.mode) {
        Ok(s) => s,
        Err(e) => return TrialOutcome::Skipped(e),
    };

    // Locating: concrete frame indices.
    enter!(stage, TrialStage::Locating, deadline);
    let logs = ctx.logs();
    let span = match settings.locator.locate(&segment, &logs) {
        Ok(s) => s,
        Err(e) => return TrialOutcome::Skipped(e),
    };
    let camera_session = &ctx.sessions[span.session];

    // Building: frame list for the clip.
    enter!(stage, TrialStage::Building, deadline);
    let frames = camera_session
        .images
        .select(span.start.frame_index, span.end.frame_index);
    if frames.is_empty() {
        return TrialOutcome::Errored {
            stage: TrialStage::Building,
            error: BuildError::EmptySelection {
                start: span.start.frame_index,
                end: span.end.frame_index,
            },
        };
    }
    let fps = compute_frame_rate(span.frame_count(), span.elapsed_secs());
    tracing::debug!(
        "{} trial {}: session {}, frames {}..={}, {} assets @ {} fps",
        ctx.name(),
        trial.index,
        camera_session.session.name,
        span.start.frame_index,
        span.end.frame_index,
        frames.len(),
        fps
    );

    // Writing.
    enter!(stage, TrialStage::Writing, deadline);
    let request = ClipRequest {
        frames: &frames,
        source_dir: &camera_session.session.dir,
        fps,
        output: job.output.clone(),
    };
    let summary = match ClipAssembler::new(backend).assemble(&request, &deadline) {
        Ok(s) => s,
        Err(error) => {
            return TrialOutcome::Errored {
                stage: TrialStage::Writing,
                error,
            }
        }
    };

    let file_name = summary
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    TrialOutcome::Done {
        audit: AuditEntry {
            trial_index: trial.index,
            requested: segment.start,
            matched: span.start.timestamp,
            difference: span.start.timestamp.since(segment.start),
        },
        clip: ClipRecord {
            file_name,
            session: camera_session.session.name.clone(),
            start_frame: span.start.frame_index,
            end_frame: span.end.frame_index,
            frames_written: summary.frames_written,
            fps,
        },
    }
}

/// Pulls jobs until the queue is drained. Once the run is cancelled the
/// remaining jobs are reported as cancelled without being processed.
pub fn trial_worker<B: FrameBackend>(
    rx: Receiver<TrialJob>,
    tx: Sender<TrialReport>,
    ctx: Arc<CameraContext>,
    settings: Arc<TrialSettings>,
    backend: Arc<B>,
    state: Arc<ProcessingState>,
) -> Result<()> {
    state.active_workers.fetch_add(1, Ordering::Relaxed);

    for job in rx {
        let outcome = if state.is_active() {
            process_trial(&job, &ctx, &settings, backend.as_ref())
        } else {
            TrialOutcome::Skipped(ResolutionError::Cancelled)
        };

        let report = TrialReport {
            trial_index: job.trial.index,
            outcome,
        };
        if tx.send(report).is_err() {
            break; // Audit writer gone
        }
    }

    state.active_workers.fetch_sub(1, Ordering::Relaxed);
    Ok(())
}
