// Per-camera audit log (`log_cam<N>.txt`)
//
// Rows are `trial_index,trial_start,frame_start,start_diff`; a trial without
// a clip gets `trial_index,,,` preceded by a `#` comment carrying the reason.

use crate::alignment::timestamp::{format_offset, parse_offset, Timestamp};
use crate::pipeline::types::{AuditEntry, ProcessingState, TrialOutcome, TrialReport};
use anyhow::{Context, Result};
use crossbeam::channel::Receiver;
use indicatif::ProgressBar;
use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

pub const HEADER: [&str; 2] = [
    "# Logs for video files",
    "## trial_index, trial_start, frame_start, start_diff",
];

pub fn audit_log_name(camera: usize) -> String {
    format!("log_cam{}.txt", camera)
}

/// A parsed audit row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditRow {
    Matched(AuditEntry),
    Errored { trial_index: usize },
}

pub struct AuditLog<W: Write> {
    out: W,
}

impl AuditLog<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("Failed to create audit log {:?}", path))?;
        Ok(Self::new(BufWriter::new(file))?)
    }
}

impl<W: Write> AuditLog<W> {
    pub fn new(mut out: W) -> std::io::Result<Self> {
        for line in HEADER {
            writeln!(out, "{}", line)?;
        }
        Ok(Self { out })
    }

    pub fn write_entry(&mut self, entry: &AuditEntry) -> std::io::Result<()> {
        writeln!(
            self.out,
            "{},{},{},{}",
            entry.trial_index,
            entry.requested,
            entry.matched,
            format_offset(entry.difference)
        )
    }

    pub fn write_error(&mut self, trial_index: usize, reason: &str) -> std::io::Result<()> {
        self.note(&format!("trial {}: {}", trial_index, reason))?;
        writeln!(self.out, "{},,,", trial_index)
    }

    /// Free-form `#` comment line.
    pub fn note(&mut self, text: &str) -> std::io::Result<()> {
        writeln!(self.out, "# {}", text.replace(['\r', '\n'], " "))
    }

    pub fn write_outcome(&mut self, trial_index: usize, outcome: &TrialOutcome) -> std::io::Result<()> {
        match outcome {
            TrialOutcome::Done { audit, .. } => self.write_entry(audit),
            other => self.write_error(trial_index, &other.reason().unwrap_or_default()),
        }
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(mut self) -> std::io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

pub fn read_audit_log(path: &Path) -> Result<Vec<AuditRow>> {
    let file = File::open(path).with_context(|| format!("Failed to open audit log {:?}", path))?;
    parse_audit_log(file)
}

pub fn parse_audit_log<R: Read>(input: R) -> Result<Vec<AuditRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .from_reader(input);

    let mut rows = Vec::new();
    for (n, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Bad audit row {}", n + 1))?;
        let field = |i: usize| record.get(i).map(str::trim).unwrap_or("");

        let trial_index: usize = field(0)
            .parse()
            .with_context(|| format!("Bad trial index in audit row {}: '{}'", n + 1, field(0)))?;

        if field(1).is_empty() && field(2).is_empty() && field(3).is_empty() {
            rows.push(AuditRow::Errored { trial_index });
            continue;
        }

        rows.push(AuditRow::Matched(AuditEntry {
            trial_index,
            requested: Timestamp::parse(field(1))?,
            matched: Timestamp::parse(field(2))?,
            difference: parse_offset(field(3))?,
        }));
    }
    Ok(rows)
}

/// Receives trial reports in any order and writes them in `order`, the
/// order the trials were queued in. Returns the clip file name per trial.
pub fn audit_worker<W: Write>(
    rx: Receiver<TrialReport>,
    mut log: AuditLog<W>,
    order: Vec<usize>,
    camera: &str,
    state: Arc<ProcessingState>,
    pb: ProgressBar,
) -> Result<BTreeMap<usize, Option<String>>> {
    let mut expected: VecDeque<usize> = order.into();
    let mut pending: BTreeMap<usize, TrialOutcome> = BTreeMap::new();
    let mut clips = BTreeMap::new();

    // `None`: the trial was queued but no worker ever reported it.
    let mut emit = |log: &mut AuditLog<W>, trial_index: usize, outcome: Option<TrialOutcome>| -> Result<()> {
        let Some(outcome) = outcome else {
            tracing::error!("{} trial {}: no outcome reported", camera, trial_index);
            log.write_error(trial_index, "no outcome reported by the trial workers")?;
            clips.insert(trial_index, None);
            pb.inc(1);
            return Ok(());
        };
        match &outcome {
            TrialOutcome::Done { clip, .. } => {
                tracing::info!("{} trial {}: wrote {}", camera, trial_index, clip.file_name)
            }
            TrialOutcome::Skipped(reason) => {
                tracing::warn!("{} trial {}: {}", camera, trial_index, reason)
            }
            TrialOutcome::Errored { stage, error } => {
                tracing::error!("{} trial {} ({}): {}", camera, trial_index, stage.as_str(), error)
            }
        }
        log.write_outcome(trial_index, &outcome)?;
        state.record(camera, &outcome);
        clips.insert(trial_index, outcome.clip_name().map(str::to_string));
        pb.inc(1);
        Ok(())
    };

    for report in rx {
        pending.insert(report.trial_index, report.outcome);

        while let Some(next) = expected.front().copied() {
            match pending.remove(&next) {
                Some(outcome) => {
                    expected.pop_front();
                    emit(&mut log, next, Some(outcome))?;
                }
                None => break,
            }
        }
        log.flush()?;
    }

    // Workers gone: every queued trial still gets a row, in queue order,
    // even if its worker died before reporting.
    for trial_index in expected {
        let outcome = pending.remove(&trial_index);
        emit(&mut log, trial_index, outcome)?;
    }
    for (trial_index, outcome) in std::mem::take(&mut pending) {
        emit(&mut log, trial_index, Some(outcome))?;
    }

    log.into_inner()?;
    pb.finish_with_message("Done");
    Ok(clips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolutionError;
    use crate::pipeline::types::ClipRecord;
    use chrono::TimeDelta;
    use crossbeam::channel;

    fn ts(raw: &str) -> Timestamp {
        Timestamp::parse(raw).unwrap()
    }

    fn entry(trial_index: usize, diff_us: i64) -> AuditEntry {
        let requested = ts("2022-09-02 10:00:00.250000");
        let difference = TimeDelta::microseconds(diff_us);
        AuditEntry {
            trial_index,
            requested,
            matched: Timestamp::from_datetime(requested.as_datetime() + difference),
            difference,
        }
    }

    fn done(trial_index: usize) -> TrialOutcome {
        TrialOutcome::Done {
            audit: entry(trial_index, 1_000),
            clip: ClipRecord {
                file_name: format!("clip_{}.mp4", trial_index),
                session: "s".to_string(),
                start_frame: 0,
                end_frame: 1,
                frames_written: 2,
                fps: 30.0,
            },
        }
    }

    #[test]
    fn test_written_rows_parse_back() {
        let entries = vec![entry(1, 5_000), entry(2, -40_000), entry(4, 0)];

        let mut log = AuditLog::new(Vec::new()).unwrap();
        log.write_entry(&entries[0]).unwrap();
        log.write_entry(&entries[1]).unwrap();
        log.write_error(3, "skipped, InvalidTrialBounds: start frame 42 is not before end frame 42")
            .unwrap();
        log.write_entry(&entries[2]).unwrap();
        let bytes = log.into_inner().unwrap();

        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("# Logs for video files\n## trial_index"));
        assert!(text.contains("\n3,,,\n"));
        assert!(text.contains(
            "1,2022-09-02 10:00:00.250000,2022-09-02 10:00:00.255000,0.005000\n"
        ));

        let rows = parse_audit_log(bytes.as_slice()).unwrap();
        assert_eq!(
            rows,
            vec![
                AuditRow::Matched(entries[0]),
                AuditRow::Matched(entries[1]),
                AuditRow::Errored { trial_index: 3 },
                AuditRow::Matched(entries[2]),
            ]
        );
    }

    #[test]
    fn test_worker_writes_in_trial_order() {
        let (tx, rx) = channel::unbounded();
        let state = Arc::new(ProcessingState::new());
        state.start_camera("cam0", 3);

        tx.send(TrialReport { trial_index: 3, outcome: done(3) }).unwrap();
        tx.send(TrialReport {
            trial_index: 1,
            outcome: TrialOutcome::Skipped(ResolutionError::StartFrameNotFound),
        })
        .unwrap();
        tx.send(TrialReport { trial_index: 2, outcome: done(2) }).unwrap();
        drop(tx);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(audit_log_name(0));
        let log = AuditLog::create(&path).unwrap();
        let clips = audit_worker(rx, log, vec![1, 2, 3], "cam0", state.clone(), ProgressBar::hidden())
            .unwrap();

        assert_eq!(clips.get(&1), Some(&None));
        assert_eq!(clips.get(&3), Some(&Some("clip_3.mp4".to_string())));

        let rows = read_audit_log(&path).unwrap();
        let indices: Vec<usize> = rows
            .iter()
            .map(|r| match r {
                AuditRow::Matched(e) => e.trial_index,
                AuditRow::Errored { trial_index } => *trial_index,
            })
            .collect();
        assert_eq!(indices, vec![1, 2, 3]);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("# trial 1: skipped, StartFrameNotFound"));
        assert_eq!(state.progress("cam0").unwrap().done, 2);
    }

    #[test]
    fn test_worker_writes_rows_for_missing_reports() {
        let (tx, rx) = channel::unbounded();
        tx.send(TrialReport { trial_index: 2, outcome: done(2) }).unwrap();
        drop(tx);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(audit_log_name(0));
        let log = AuditLog::create(&path).unwrap();
        let clips = audit_worker(
            rx,
            log,
            vec![1, 2],
            "cam0",
            Arc::new(ProcessingState::new()),
            ProgressBar::hidden(),
        )
        .unwrap();
        assert_eq!(clips.len(), 2);
        assert_eq!(clips.get(&1), Some(&None));
        assert_eq!(clips.get(&2), Some(&Some("clip_2.mp4".to_string())));

        let rows = read_audit_log(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], AuditRow::Errored { trial_index: 1 });
        assert!(matches!(rows[1], AuditRow::Matched(AuditEntry { trial_index: 2, .. })));
    }
}
