use crate::alignment::session::SessionResolver;
use crate::alignment::trials::ClipMode;
use crate::error::PreconditionError;
use clap::Parser;
use std::path::Path;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Root directory holding the session image folders
    #[arg(long, env = "TRIAL_CLIPS_VIDEO_ROOT")]
    pub video_root: String,

    /// Directory of the trial boundary files (defaults to the video root)
    #[arg(long, env = "TRIAL_CLIPS_TRIAL_ROOT")]
    pub trial_root: Option<String>,

    /// Root directory for output artifacts
    #[arg(long, env = "TRIAL_CLIPS_OUTPUT_ROOT")]
    pub output_root: Option<String>,

    /// Experiment date, as it appears in file and folder names
    #[arg(long)]
    pub date: String,

    /// Subject name
    #[arg(long)]
    pub subject: String,

    /// Number of cameras (cam0..camN-1)
    #[arg(long, default_value_t = 3)]
    pub cameras: usize,

    /// Clip only the delay window of correct trials
    #[arg(long)]
    pub delay_only: bool,

    /// Trial table column opening the delay window (ms from trial start)
    #[arg(long, default_value = "Trace Start")]
    pub delay_start_marker: String,

    /// Trial table column closing the delay window (ms from trial start)
    #[arg(long, default_value = "Trace End")]
    pub delay_end_marker: String,

    /// CSV trial table with `trial_num`, `correct` and marker columns
    #[arg(long)]
    pub trial_table: Option<String>,

    /// Trial worker threads per camera
    #[arg(long)]
    pub workers: Option<usize>,

    /// Per-trial deadline in seconds (0 disables it)
    #[arg(long, default_value_t = 300)]
    pub trial_timeout_secs: u64,

    /// Reject nearest frames farther than this from the requested time
    #[arg(long)]
    pub max_offset_ms: Option<f64>,

    /// Image asset extension
    #[arg(long, default_value = "jpg")]
    pub image_ext: String,

    /// Four-character codec tag of the output clips
    #[arg(long, default_value = "mp4v")]
    pub fourcc: String,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Checks everything that can be checked before touching the data.
    pub fn validate(&self) -> Result<(), PreconditionError> {
        let invalid = |msg: String| Err(PreconditionError::InvalidConfig(msg));

        if self.subject.trim().is_empty() || self.date.trim().is_empty() {
            return invalid("--subject and --date must not be empty".into());
        }
        if self.cameras == 0 {
            return invalid("--cameras must be at least 1".into());
        }
        if self.workers == Some(0) {
            return invalid("--workers must be at least 1".into());
        }
        if self.fourcc.chars().count() != 4 {
            return invalid(format!("--fourcc '{}' must be four characters", self.fourcc));
        }
        if let Some(ms) = self.max_offset_ms {
            if !ms.is_finite() || ms < 0.0 {
                return invalid(format!("--max-offset-ms {} must be a non-negative number", ms));
            }
        }
        if self.delay_only && self.trial_table.is_none() {
            return invalid("--delay-only needs --trial-table for the delay markers".into());
        }
        if !Path::new(&self.video_root).is_dir() {
            return Err(PreconditionError::ImageRootMissing(self.video_root.clone().into()));
        }
        if let Some(root) = &self.trial_root {
            if !Path::new(root).is_dir() {
                return invalid(format!("--trial-root {} is not a directory", root));
            }
        }
        Ok(())
    }

    pub fn clip_mode(&self) -> ClipMode {
        if self.delay_only {
            ClipMode::Delay {
                start_marker: self.delay_start_marker.clone(),
                end_marker: self.delay_end_marker.clone(),
            }
        } else {
            ClipMode::WholeTrial
        }
    }

    pub fn resolver(&self) -> SessionResolver {
        SessionResolver::new(self.max_offset_ms.map(|ms| (ms * 1000.0).round() as u64))
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn trial_timeout(&self) -> Option<Duration> {
        (self.trial_timeout_secs > 0).then(|| Duration::from_secs(self.trial_timeout_secs))
    }
}
