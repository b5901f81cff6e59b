use crate::alignment::nearest::{nearest_by, nearest_sorted_index};
use crate::alignment::timestamp::Timestamp;
use crate::error::AlignError;
use anyhow::{Context, Result};
use std::path::Path;

/// One line of a camera frame log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    pub frame_index: usize,
    pub timestamp: Timestamp,
}

/// A frame chosen for a query, carrying its index so it never has to be
/// looked up again by timestamp equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMatch {
    pub frame_index: usize,
    pub timestamp: Timestamp,
    pub query: Timestamp,
}

impl FrameMatch {
    pub fn distance_micros(&self) -> u64 {
        self.timestamp.distance_micros(self.query)
    }
}

/// Outcome of a frame lookup. "No match" is never encoded as frame `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLookup {
    Found(FrameMatch),
    NotFound,
}

#[cfg(test)]
impl FrameLookup {
    pub fn found(self) -> Option<FrameMatch> {
        match self {
            FrameLookup::Found(m) => Some(m),
            FrameLookup::NotFound => None,
        }
    }
}

/// Per-camera, per-session frame timestamps, in file order.
#[derive(Debug, Clone, Default)]
pub struct TimestampLog {
    records: Vec<FrameRecord>,
    /// Timestamps of `records`, kept alongside for binary search.
    timestamps: Vec<Timestamp>,
    sorted: bool,
    skipped_lines: usize,
}

impl TimestampLog {
    pub fn from_records(records: Vec<FrameRecord>) -> Self {
        let timestamps: Vec<Timestamp> = records.iter().map(|r| r.timestamp).collect();
        let sorted = timestamps.windows(2).all(|w| w[0] <= w[1]);
        Self {
            records,
            timestamps,
            sorted,
            skipped_lines: 0,
        }
    }

    /// Parses `unused,timestamp` lines. Line `n` is frame `n`; a line whose
    /// timestamp cannot be read is dropped but still consumes its index.
    pub fn parse(content: &str) -> Self {
        let mut records = Vec::new();
        let mut skipped = 0;

        for (frame_index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                skipped += 1;
                continue;
            }
            let parsed = line
                .split(',')
                .nth(1)
                .map(Timestamp::parse)
                .and_then(|r| r.ok());

            match parsed {
                Some(timestamp) => records.push(FrameRecord {
                    frame_index,
                    timestamp,
                }),
                None => {
                    tracing::warn!("Frame log line {} is malformed: '{}'", frame_index, line);
                    skipped += 1;
                }
            }
        }

        let mut log = Self::from_records(records);
        log.skipped_lines = skipped;
        if !log.sorted {
            tracing::warn!("Frame log timestamps are not non-decreasing, falling back to linear search");
        }
        log
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read frame log {:?}", path))?;
        let log = Self::parse(&content);
        tracing::info!(
            "Loaded frame log {:?}: {} frames ({} lines skipped)",
            path,
            log.len(),
            log.skipped_lines
        );
        Ok(log)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    #[cfg(test)]
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Closest frame to `query`, ties going to the earliest line.
    pub fn nearest(&self, query: Timestamp) -> Result<FrameMatch, AlignError> {
        let record = if self.sorted {
            let pos = nearest_sorted_index(query, &self.timestamps)?;
            self.records[pos]
        } else {
            *nearest_by(query, self.records.iter(), |r| r.timestamp)?
        };

        Ok(FrameMatch {
            frame_index: record.frame_index,
            timestamp: record.timestamp,
            query,
        })
    }

    /// Like [`nearest`](Self::nearest), but a match farther than
    /// `max_offset_micros` (when given) or an empty log yields `NotFound`.
    pub fn lookup(&self, query: Timestamp, max_offset_micros: Option<u64>) -> FrameLookup {
        match self.nearest(query) {
            Ok(m) if max_offset_micros.map_or(true, |max| m.distance_micros() <= max) => {
                FrameLookup::Found(m)
            }
            _ => FrameLookup::NotFound,
        }
    }
}
