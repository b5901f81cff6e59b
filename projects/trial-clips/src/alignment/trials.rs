// Trial table and trial boundary files
//
// The trial table itself comes from the experiment recorder export; here it
// is only read. Boundary files hold one timestamp per line, line i being
// trial i+1.

use crate::alignment::timestamp::Timestamp;
use crate::error::{PreconditionError, ResolutionError};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// One trial as exported by the recorder. `index` is 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub index: usize,
    pub correct: Option<bool>,
    /// Named event markers, in milliseconds from trial start.
    pub markers: BTreeMap<String, f64>,
}

impl Trial {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            correct: None,
            markers: BTreeMap::new(),
        }
    }
}

/// Which part of a trial a clip covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipMode {
    WholeTrial,
    /// Delay window between two event markers; only correct trials have one.
    Delay { start_marker: String, end_marker: String },
}

/// The requested time span for one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialSegment {
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Raw start/end lines, parsed lazily so one bad line only costs its trial.
#[derive(Debug, Clone, Default)]
pub struct TrialBoundaries {
    starts: Vec<String>,
    ends: Vec<String>,
}

impl TrialBoundaries {
    pub fn from_lines(starts: Vec<String>, ends: Vec<String>) -> Self {
        Self { starts, ends }
    }

    /// Reads `_tr_starts` and `_tr_ends`. Either file missing is fatal.
    pub fn load(starts_path: &Path, ends_path: &Path) -> Result<Self> {
        let read = |path: &Path| -> Result<Vec<String>> {
            if !path.is_file() {
                return Err(PreconditionError::BoundaryFileMissing(path.to_path_buf()).into());
            }
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read trial boundary file {:?}", path))?;
            let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
            while lines.last().is_some_and(|l| l.trim().is_empty()) {
                lines.pop();
            }
            Ok(lines)
        };

        let boundaries = Self {
            starts: read(starts_path)?,
            ends: read(ends_path)?,
        };
        if boundaries.starts.len() != boundaries.ends.len() {
            tracing::warn!(
                "Trial boundary files disagree: {} starts, {} ends",
                boundaries.starts.len(),
                boundaries.ends.len()
            );
        }
        Ok(boundaries)
    }

    pub fn trial_count(&self) -> usize {
        self.starts.len().max(self.ends.len())
    }

    fn boundary(lines: &[String], trial: usize, which: &'static str) -> Result<Timestamp, ResolutionError> {
        let raw = trial
            .checked_sub(1)
            .and_then(|i| lines.get(i))
            .ok_or(ResolutionError::BoundaryMissing { trial, which })?;
        Timestamp::parse(raw).map_err(|_| ResolutionError::MalformedBoundary {
            trial,
            which,
            raw: raw.trim().to_string(),
        })
    }

    pub fn start(&self, trial: usize) -> Result<Timestamp, ResolutionError> {
        Self::boundary(&self.starts, trial, "start")
    }

    pub fn end(&self, trial: usize) -> Result<Timestamp, ResolutionError> {
        Self::boundary(&self.ends, trial, "end")
    }

    /// Boundary lines as recorded, for the trial snapshot.
    pub fn raw(&self, trial: usize) -> (Option<&str>, Option<&str>) {
        fn line(lines: &[String], trial: usize) -> Option<&str> {
            trial
                .checked_sub(1)
                .and_then(|i| lines.get(i))
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
        }
        (line(&self.starts, trial), line(&self.ends, trial))
    }

    /// The span to clip for `trial` under `mode`.
    pub fn segment(&self, trial: &Trial, mode: &ClipMode) -> Result<TrialSegment, ResolutionError> {
        let start = self.start(trial.index)?;
        match mode {
            ClipMode::WholeTrial => Ok(TrialSegment {
                start,
                end: self.end(trial.index)?,
            }),
            ClipMode::Delay {
                start_marker,
                end_marker,
            } => {
                if trial.correct != Some(true) {
                    return Err(ResolutionError::IncorrectTrial(trial.index));
                }
                let at_marker = |name: &String| {
                    let millis = trial.markers.get(name).copied().ok_or_else(|| {
                        ResolutionError::MissingMarker {
                            trial: trial.index,
                            marker: name.clone(),
                        }
                    })?;
                    start
                        .checked_offset_millis(millis)
                        .ok_or_else(|| ResolutionError::MarkerOutOfRange {
                            trial: trial.index,
                            marker: name.clone(),
                        })
                };
                Ok(TrialSegment {
                    start: at_marker(start_marker)?,
                    end: at_marker(end_marker)?,
                })
            }
        }
    }
}

/// Reads the trial table CSV: a `trial_num` column, an optional `correct`
/// column (`1`/`0`/`true`/`false`), and any number of numeric marker
/// columns. Empty cells are treated as absent.
pub fn load_trial_table(path: &Path) -> Result<Vec<Trial>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open trial table {:?}", path))?;

    let headers = reader.headers()?.clone();
    let trial_col = headers
        .iter()
        .position(|h| h == "trial_num")
        .ok_or_else(|| anyhow::anyhow!("Trial table {:?} has no 'trial_num' column", path))?;
    let correct_col = headers.iter().position(|h| h == "correct");

    let mut trials = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Bad trial table row {}", row + 1))?;

        let index: usize = record
            .get(trial_col)
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| v as usize)
            .filter(|v| *v >= 1)
            .ok_or_else(|| anyhow::anyhow!("Trial table row {} has no valid trial_num", row + 1))?;

        let mut trial = Trial::new(index);
        trial.correct = correct_col.and_then(|c| record.get(c)).and_then(parse_flag);

        for (col, name) in headers.iter().enumerate() {
            if col == trial_col || Some(col) == correct_col {
                continue;
            }
            if let Some(value) = record.get(col).and_then(|v| v.parse::<f64>().ok()) {
                if value.is_finite() {
                    trial.markers.insert(name.to_string(), value);
                }
            }
        }
        trials.push(trial);
    }

    trials.sort_by_key(|t| t.index);
    Ok(trials)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" => Some(true),
        "0" | "0.0" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundaries() -> TrialBoundaries {
        TrialBoundaries::from_lines(
            vec![
                "2022-09-02 10:00:00.000000".to_string(),
                "2022-09-02 10:00:10".to_string(),
                "bogus".to_string(),
            ],
            vec![
                "2022-09-02 10:00:05.000000".to_string(),
                "2022-09-02 10:00:15.5".to_string(),
            ],
        )
    }

    #[test]
    fn test_whole_trial_segment() {
        let seg = boundaries()
            .segment(&Trial::new(2), &ClipMode::WholeTrial)
            .unwrap();
        assert_eq!(seg.start.to_string(), "2022-09-02 10:00:10.000000");
        assert_eq!(seg.end.to_string(), "2022-09-02 10:00:15.500000");
    }

    #[test]
    fn test_boundary_failures_are_per_trial() {
        let b = boundaries();
        assert_eq!(b.trial_count(), 3);
        assert!(matches!(
            b.segment(&Trial::new(3), &ClipMode::WholeTrial),
            Err(ResolutionError::MalformedBoundary { trial: 3, .. })
        ));
        assert!(matches!(
            b.segment(&Trial::new(4), &ClipMode::WholeTrial),
            Err(ResolutionError::BoundaryMissing { trial: 4, which: "start" })
        ));
        assert!(matches!(
            b.segment(&Trial::new(0), &ClipMode::WholeTrial),
            Err(ResolutionError::BoundaryMissing { .. })
        ));
    }

    #[test]
    fn test_delay_segment() {
        let mode = ClipMode::Delay {
            start_marker: "Trace Start".to_string(),
            end_marker: "Trace End".to_string(),
        };
        let mut trial = Trial::new(1);
        trial.correct = Some(true);
        trial.markers.insert("Trace Start".to_string(), 1200.0);
        trial.markers.insert("Trace End".to_string(), 2700.5);

        let seg = boundaries().segment(&trial, &mode).unwrap();
        assert_eq!(seg.start.to_string(), "2022-09-02 10:00:01.200000");
        assert_eq!(seg.end.to_string(), "2022-09-02 10:00:02.700500");

        trial.correct = Some(false);
        assert_eq!(
            boundaries().segment(&trial, &mode),
            Err(ResolutionError::IncorrectTrial(1))
        );

        trial.correct = Some(true);
        trial.markers.insert("Trace End".to_string(), 1e16);
        assert_eq!(
            boundaries().segment(&trial, &mode),
            Err(ResolutionError::MarkerOutOfRange {
                trial: 1,
                marker: "Trace End".to_string(),
            })
        );

        trial.markers.remove("Trace End");
        assert!(matches!(
            boundaries().segment(&trial, &mode),
            Err(ResolutionError::MissingMarker { .. })
        ));
    }

    #[test]
    fn test_load_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let starts = dir.path().join("Aragorn_220902_tr_starts.txt");
        let ends = dir.path().join("Aragorn_220902_tr_ends.txt");
        std::fs::write(&starts, "2022-09-02 10:00:00\n\n").unwrap();

        let err = TrialBoundaries::load(&starts, &ends).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PreconditionError>(),
            Some(PreconditionError::BoundaryFileMissing(_))
        ));

        std::fs::write(&ends, "2022-09-02 10:00:03\n").unwrap();
        let loaded = TrialBoundaries::load(&starts, &ends).unwrap();
        assert_eq!(loaded.trial_count(), 1);
    }

    #[test]
    fn test_load_trial_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trials.csv");
        std::fs::write(
            &path,
            "trial_num,correct,Trace Start,Trace End,outcome\n\
             2,0,,,miss\n\
             1,1,1200,2700,hit\n",
        )
        .unwrap();

        let trials = load_trial_table(&path).unwrap();
        assert_eq!(trials.len(), 2);
        assert_eq!(trials[0].index, 1);
        assert_eq!(trials[0].correct, Some(true));
        assert_eq!(trials[0].markers.get("Trace End"), Some(&2700.0));
        assert!(!trials[0].markers.contains_key("outcome"));
        assert_eq!(trials[1].correct, Some(false));
        assert!(trials[1].markers.is_empty());
    }
}
