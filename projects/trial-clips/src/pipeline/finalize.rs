use crate::alignment::trials::{Trial, TrialBoundaries};
use crate::run_artifacts::TrialSnapshot;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const SNAPSHOT_FILE: &str = "session_trials.json";

/// Clip file name per trial, keyed by camera name.
pub type CameraClips = BTreeMap<String, BTreeMap<usize, Option<String>>>;

/// Joins the trial table with the per-camera clip outcomes. A trial that a
/// camera never reported gets `None` for that camera.
pub fn build_snapshot(
    trials: &[Trial],
    boundaries: &TrialBoundaries,
    clips: &CameraClips,
) -> Vec<TrialSnapshot> {
    trials
        .iter()
        .map(|trial| {
            let (start, end) = boundaries.raw(trial.index);
            TrialSnapshot {
                trial_num: trial.index,
                correct: trial.correct,
                start: start.map(str::to_string),
                end: end.map(str::to_string),
                markers: trial.markers.clone(),
                clips: clips
                    .iter()
                    .map(|(camera, by_trial)| {
                        (camera.clone(), by_trial.get(&trial.index).cloned().flatten())
                    })
                    .collect(),
            }
        })
        .collect()
}

pub fn write_snapshot(output_dir: &Path, snapshot: &[TrialSnapshot]) -> Result<()> {
    let path = output_dir.join(SNAPSHOT_FILE);
    let json = serde_json::to_string_pretty(snapshot)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
    tracing::info!("Wrote trial snapshot ({} trials) to {:?}", snapshot.len(), path);
    Ok(())
}

pub fn read_snapshot(output_dir: &Path) -> Result<Vec<TrialSnapshot>> {
    let path = output_dir.join(SNAPSHOT_FILE);
    let content = fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
    Ok(serde_json::from_str(&content)?)
}
