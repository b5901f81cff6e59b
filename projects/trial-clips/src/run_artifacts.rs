// Run artifact struct definitions
//
// Artifacts persisted as JSON files within a run's output directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Written as `metadata.json` when a run starts.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunMetadata {
    pub subject: String,
    pub date: String,
    pub created_at: DateTime<Utc>,
    pub cameras: usize,
    pub delay_only: bool,
    /// Session folder names, in resolution order.
    pub sessions: Vec<String>,
}

/// One row of `session_trials.json`, the enriched trial table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrialSnapshot {
    pub trial_num: usize,
    pub correct: Option<bool>,
    /// Boundary timestamps as recorded; `None` if the line is absent.
    pub start: Option<String>,
    pub end: Option<String>,
    #[serde(default)]
    pub markers: BTreeMap<String, f64>,
    /// Camera name -> clip file name, `None` when no clip was written.
    pub clips: BTreeMap<String, Option<String>>,
}
