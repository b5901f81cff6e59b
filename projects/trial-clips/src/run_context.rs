use crate::alignment::session::Session;
use crate::cli::Args;
use crate::error::PreconditionError;
use crate::run_artifacts::RunMetadata;
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use walkdir::WalkDir;

/// Identity and directory layout of one batch run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub subject: String,
    pub date: String,
    pub video_root: PathBuf,
    pub trial_root: PathBuf,
    pub output_dir: PathBuf,
    pub cameras: usize,
    pub image_ext: String,
}

impl RunContext {
    /// Expects `args` to have passed [`Args::validate`].
    pub fn from_args(args: &Args) -> Self {
        let video_root = PathBuf::from(&args.video_root);
        let trial_root = args
            .trial_root
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| video_root.clone());
        let output_dir = args
            .output_root
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| video_root.join(format!("{}_{}_videos", args.subject, args.date)));

        Self {
            subject: args.subject.clone(),
            date: args.date.clone(),
            video_root,
            trial_root,
            output_dir,
            cameras: args.cameras,
            image_ext: args.image_ext.trim_start_matches('.').to_string(),
        }
    }

    pub fn trial_starts_path(&self) -> PathBuf {
        self.trial_root
            .join(format!("{}_{}_tr_starts.txt", self.subject, self.date))
    }

    pub fn trial_ends_path(&self) -> PathBuf {
        self.trial_root
            .join(format!("{}_{}_tr_ends.txt", self.subject, self.date))
    }

    /// Frame timestamp log of `camera` inside a session folder.
    pub fn frame_log_path(&self, session: &Session, camera: usize) -> PathBuf {
        session.dir.join(format!("{}_t{}.txt", self.subject, camera))
    }

    pub fn clip_file_name(&self, trial_index: usize, camera: usize) -> String {
        format!(
            "{}_{}_trial_{}_cam{}.mp4",
            self.date, self.subject, trial_index, camera
        )
    }

    /// Session folders for this date and subject, sorted by name.
    pub fn discover_sessions(&self) -> Result<Vec<Session>> {
        if !self.video_root.is_dir() {
            return Err(PreconditionError::ImageRootMissing(self.video_root.clone()).into());
        }

        let mut sessions: Vec<Session> = WalkDir::new(&self.video_root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                (name.contains(&self.date) && name.contains(&self.subject)).then(|| Session {
                    name,
                    dir: e.path().to_path_buf(),
                })
            })
            // The default output folder lives under the video root too.
            .filter(|s| s.dir != self.output_dir)
            .collect();

        if sessions.is_empty() {
            return Err(PreconditionError::NoSessionFolder {
                root: self.video_root.clone(),
                date: self.date.clone(),
                subject: self.subject.clone(),
            }
            .into());
        }

        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sessions)
    }

    pub fn create_output_dir(&self) -> Result<()> {
        if !self.output_dir.exists() {
            tracing::info!("Making save directory: {:?}", self.output_dir);
        }
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create output directory {:?}", self.output_dir))
    }

    pub fn write_metadata(&self, sessions: &[Session], delay_only: bool) -> Result<RunMetadata> {
        let metadata = RunMetadata {
            subject: self.subject.clone(),
            date: self.date.clone(),
            created_at: Utc::now(),
            cameras: self.cameras,
            delay_only,
            sessions: sessions.iter().map(|s| s.name.clone()).collect(),
        };

        let content = serde_json::to_string_pretty(&metadata)?;
        fs::write(self.output_dir.join("metadata.json"), content)?;
        Ok(metadata)
    }

    pub fn output_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }
}

#[cfg(test)]
pub fn read_metadata(output_dir: &std::path::Path) -> Result<RunMetadata> {
    let content = fs::read_to_string(output_dir.join("metadata.json"))?;
    Ok(serde_json::from_str(&content)?)
}
