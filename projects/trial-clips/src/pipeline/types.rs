use crate::alignment::frame_log::TimestampLog;
use crate::alignment::session::Session;
use crate::alignment::timestamp::Timestamp;
use crate::alignment::trials::Trial;
use crate::error::{BuildError, ResolutionError};
use crate::video::image_set::ImageSet;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// States a (camera, trial) pair moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum TrialStage {
    Pending,
    Resolving,
    Locating,
    Building,
    Writing,
}

impl TrialStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialStage::Pending => "pending",
            TrialStage::Resolving => "resolving",
            TrialStage::Locating => "locating",
            TrialStage::Building => "building",
            TrialStage::Writing => "writing",
        }
    }
}

/// Wall-clock budget for one trial.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
            budget,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            at: None,
            budget: Duration::MAX,
        }
    }

    pub fn check(&self) -> Result<(), BuildError> {
        match self.at {
            Some(at) if Instant::now() >= at => Err(BuildError::Timeout(self.budget)),
            _ => Ok(()),
        }
    }
}

/// Match quality recorded for a clipped trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditEntry {
    pub trial_index: usize,
    pub requested: Timestamp,
    pub matched: Timestamp,
    /// `matched - requested`.
    pub difference: chrono::TimeDelta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipRecord {
    pub file_name: String,
    pub session: String,
    pub start_frame: usize,
    pub end_frame: usize,
    pub frames_written: usize,
    pub fps: f64,
}

/// Terminal state of one (camera, trial) pair.
#[derive(Debug)]
pub enum TrialOutcome {
    Done { audit: AuditEntry, clip: ClipRecord },
    Skipped(ResolutionError),
    Errored { stage: TrialStage, error: BuildError },
}

impl TrialOutcome {
    pub fn clip_name(&self) -> Option<&str> {
        match self {
            TrialOutcome::Done { clip, .. } => Some(&clip.file_name),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            TrialOutcome::Done { .. } => None,
            TrialOutcome::Skipped(e) => Some(format!("skipped, {}", e)),
            TrialOutcome::Errored { stage, error } => {
                Some(format!("errored while {}, {}", stage.as_str(), error))
            }
        }
    }
}

/// A finished trial, tagged for the in-order audit writer.
#[derive(Debug)]
pub struct TrialReport {
    pub trial_index: usize,
    pub outcome: TrialOutcome,
}

/// One session as seen by one camera.
#[derive(Debug, Clone)]
pub struct CameraSession {
    pub session: Session,
    pub log: Option<TimestampLog>,
    pub images: ImageSet,
}

/// Everything a trial worker needs for one camera. Immutable once built.
#[derive(Debug)]
pub struct CameraContext {
    pub camera: usize,
    /// Sorted by session name.
    pub sessions: Vec<CameraSession>,
}

impl CameraContext {
    pub fn name(&self) -> String {
        format!("cam{}", self.camera)
    }

    pub fn logs(&self) -> Vec<Option<&TimestampLog>> {
        self.sessions.iter().map(|s| s.log.as_ref()).collect()
    }
}

/// Work item for a trial worker.
#[derive(Debug, Clone)]
pub struct TrialJob {
    pub trial: Trial,
    pub output: PathBuf,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct CameraProgress {
    pub done: usize,
    pub skipped: usize,
    pub errored: usize,
    pub total: usize,
}

/// Run-wide state shared between the driver, workers and the ctrl-c handler.
#[derive(Debug)]
pub struct ProcessingState {
    pub is_active: AtomicBool,
    pub active_workers: AtomicUsize,
    pub cameras: RwLock<BTreeMap<String, CameraProgress>>,
    pub start_time: Instant,
}

impl Default for ProcessingState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingState {
    pub fn new() -> Self {
        Self {
            is_active: AtomicBool::new(true),
            active_workers: AtomicUsize::new(0),
            cameras: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.is_active.store(false, Ordering::Relaxed);
    }

    pub fn start_camera(&self, camera: &str, total: usize) {
        if let Ok(mut cameras) = self.cameras.write() {
            cameras.insert(
                camera.to_string(),
                CameraProgress {
                    total,
                    ..Default::default()
                },
            );
        }
    }

    pub fn record(&self, camera: &str, outcome: &TrialOutcome) {
        if let Ok(mut cameras) = self.cameras.write() {
            if let Some(progress) = cameras.get_mut(camera) {
                match outcome {
                    TrialOutcome::Done { .. } => progress.done += 1,
                    TrialOutcome::Skipped(_) => progress.skipped += 1,
                    TrialOutcome::Errored { .. } => progress.errored += 1,
                }
            }
        }
    }

    #[cfg(test)]
    pub fn progress(&self, camera: &str) -> Option<CameraProgress> {
        self.cameras.read().ok()?.get(camera).cloned()
    }

    pub fn to_summary_json(&self) -> serde_json::Value {
        let cameras = self
            .cameras
            .read()
            .map(|c| c.clone())
            .unwrap_or_default();
        serde_json::json!({
            "is_active": self.is_active(),
            "active_workers": self.active_workers.load(Ordering::Relaxed),
            "elapsed_secs": self.start_time.elapsed().as_secs_f64(),
            "cameras": cameras,
        })
    }
}
