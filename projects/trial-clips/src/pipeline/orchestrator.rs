// Batch driver: runs every (camera, trial) pair of one experiment day
//
// Cameras are processed one after the other. Within a camera, trials are
// queued for a pool of trial workers and their outcomes flow to a single
// audit writer, which keeps `log_cam<N>.txt` in trial order.

use crate::alignment::frame_log::TimestampLog;
use crate::alignment::locator::FrameIndexLocator;
use crate::alignment::session::Session;
use crate::alignment::trials::{load_trial_table, ClipMode, Trial, TrialBoundaries};
use crate::error::AlignError;
use crate::pipeline::audit::{audit_log_name, audit_worker, AuditLog};
use crate::pipeline::finalize::{build_snapshot, write_snapshot, CameraClips};
use crate::pipeline::types::{CameraContext, CameraSession, ProcessingState, TrialJob, TrialReport};
use crate::pipeline::worker::{trial_worker, TrialSettings};
use crate::run_artifacts::TrialSnapshot;
use crate::run_context::RunContext;
use crate::video::image_set::{camera_suffix, ImageSet};
use crate::video::FrameBackend;
use anyhow::{Context, Result};
use crossbeam::channel;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Run-level inputs. Building one checks every precondition.
#[derive(Debug)]
pub struct BatchPlan {
    pub sessions: Vec<Session>,
    pub boundaries: Arc<TrialBoundaries>,
    pub trials: Vec<Trial>,
}

impl BatchPlan {
    pub fn load(ctx: &RunContext, trial_table: Option<&Path>) -> Result<Self> {
        let boundaries = TrialBoundaries::load(&ctx.trial_starts_path(), &ctx.trial_ends_path())?;
        let sessions = ctx.discover_sessions()?;

        let trials = match trial_table {
            Some(path) => load_trial_table(path)?,
            None => (1..=boundaries.trial_count()).map(Trial::new).collect(),
        };

        tracing::info!(
            "{} {}: {} trials over {} session(s): {}",
            ctx.subject,
            ctx.date,
            trials.len(),
            sessions.len(),
            sessions
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            sessions,
            boundaries: Arc::new(boundaries),
            trials,
        })
    }
}

pub struct BatchOptions {
    pub mode: ClipMode,
    pub locator: FrameIndexLocator,
    pub trial_timeout: Option<Duration>,
    pub workers: usize,
}

pub struct BatchDriver<B: FrameBackend + 'static> {
    ctx: RunContext,
    plan: BatchPlan,
    settings: Arc<TrialSettings>,
    workers: usize,
    backend: Arc<B>,
    state: Arc<ProcessingState>,
}

impl<B: FrameBackend + 'static> BatchDriver<B> {
    pub fn new(
        ctx: RunContext,
        plan: BatchPlan,
        options: BatchOptions,
        backend: Arc<B>,
        state: Arc<ProcessingState>,
    ) -> Self {
        let settings = Arc::new(TrialSettings {
            boundaries: plan.boundaries.clone(),
            mode: options.mode,
            locator: options.locator,
            trial_timeout: options.trial_timeout,
        });
        Self {
            ctx,
            plan,
            settings,
            workers: options.workers.max(1),
            backend,
            state,
        }
    }

    /// Processes every camera and writes the run artifacts. Only run-level
    /// I/O failures are returned; per-trial and per-camera failures end up
    /// in the audit logs.
    pub fn run(&self) -> Result<Vec<TrialSnapshot>> {
        self.ctx.create_output_dir()?;
        self.ctx.write_metadata(
            &self.plan.sessions,
            matches!(self.settings.mode, ClipMode::Delay { .. }),
        )?;

        let mut clips = CameraClips::new();
        for camera in 0..self.ctx.cameras {
            let by_trial = self.run_camera(camera)?;
            clips.insert(format!("cam{}", camera), by_trial);
        }

        let snapshot = build_snapshot(&self.plan.trials, &self.plan.boundaries, &clips);
        write_snapshot(&self.ctx.output_dir, &snapshot)?;

        tracing::info!(
            "Run finished in {:.1}s: {}",
            self.state.start_time.elapsed().as_secs_f64(),
            self.state.to_summary_json()
        );
        Ok(snapshot)
    }

    fn run_camera(&self, camera: usize) -> Result<BTreeMap<usize, Option<String>>> {
        let name = format!("cam{}", camera);
        let audit_path = self.ctx.output_path(&audit_log_name(camera));
        let order: Vec<usize> = self.plan.trials.iter().map(|t| t.index).collect();
        self.state.start_camera(&name, order.len());

        let camera_ctx = match self.camera_context(camera) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                tracing::error!("{}: camera aborted, {:#}", name, e);
                let mut log = AuditLog::create(&audit_path)?;
                log.note(&format!("camera aborted: {:#}", e))?;
                for &trial_index in &order {
                    log.write_error(trial_index, "camera aborted")?;
                }
                log.into_inner()?;
                return Ok(order.into_iter().map(|i| (i, None)).collect());
            }
        };

        tracing::info!(
            "{}: {} trials, {} workers, audit log {:?}",
            name,
            order.len(),
            self.workers,
            audit_path
        );

        let pb = ProgressBar::new(order.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} trials ({eta})")?
                .progress_chars("#>-"),
        );
        pb.set_prefix(name.clone());

        let (tx_job, rx_job) = channel::unbounded::<TrialJob>();
        let (tx_report, rx_report) = channel::unbounded::<TrialReport>();

        let mut handles = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            handles.push(self.spawn_trial_worker(
                rx_job.clone(),
                tx_report.clone(),
                camera_ctx.clone(),
            ));
        }
        drop(rx_job);
        drop(tx_report);

        let log = AuditLog::create(&audit_path)?;
        let state_audit = self.state.clone();
        let name_audit = name.clone();
        let audit = thread::spawn(move || {
            audit_worker(rx_report, log, order, &name_audit, state_audit, pb)
        });

        for trial in &self.plan.trials {
            let job = TrialJob {
                trial: trial.clone(),
                output: self
                    .ctx
                    .output_path(&self.ctx.clip_file_name(trial.index, camera)),
            };
            if tx_job.send(job).is_err() {
                tracing::error!("{}: all trial workers exited early", name);
                break;
            }
        }
        drop(tx_job);

        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("{}: trial worker failed: {}", name, e),
                Err(_) => tracing::error!("{}: trial worker panicked", name),
            }
        }

        audit
            .join()
            .map_err(|_| anyhow::anyhow!("{}: audit writer panicked", name))?
    }

    fn spawn_trial_worker(
        &self,
        rx: channel::Receiver<TrialJob>,
        tx: channel::Sender<TrialReport>,
        ctx: Arc<CameraContext>,
    ) -> thread::JoinHandle<Result<()>> {
        let settings = self.settings.clone();
        let backend = self.backend.clone();
        let state = self.state.clone();
        thread::spawn(move || {
            tracing::debug!("Spawning trial worker for {}", ctx.name());
            trial_worker(rx, tx, ctx, settings, backend, state)
        })
    }

    /// Frame logs and image assets of every session for `camera`. A session
    /// without a usable frame log stays a session without candidates. The
    /// camera is aborted when no session has frame timestamps at all, or
    /// when an image directory is unreadable or holds a broken image name.
    fn camera_context(&self, camera: usize) -> Result<CameraContext> {
        let suffix = camera_suffix(camera, &self.ctx.image_ext);
        let mut sessions = Vec::with_capacity(self.plan.sessions.len());

        for session in &self.plan.sessions {
            let log_path = self.ctx.frame_log_path(session, camera);
            let log = if log_path.is_file() {
                match TimestampLog::load(&log_path) {
                    Ok(log) => Some(log),
                    Err(e) => {
                        tracing::warn!("cam{}: session {} has an unreadable frame log: {:#}", camera, session.name, e);
                        None
                    }
                }
            } else {
                tracing::warn!("cam{}: no frame log {:?} in session {}", camera, log_path, session.name);
                None
            };

            let images = ImageSet::scan(&session.dir, &suffix)
                .with_context(|| format!("cam{}: scanning session {}", camera, session.name))?;
            if images.is_empty() {
                tracing::warn!("cam{}: no '{}' image assets in session {}", camera, suffix, session.name);
            } else {
                tracing::info!("cam{}: {} image assets in {}", camera, images.len(), session.name);
            }

            sessions.push(CameraSession {
                session: session.clone(),
                log,
                images,
            });
        }

        if sessions.iter().all(|s| s.log.as_ref().map_or(true, TimestampLog::is_empty)) {
            return Err(anyhow::Error::new(AlignError::EmptyCandidateSet)
                .context(format!("cam{}: no session has frame timestamps", camera)));
        }

        Ok(CameraContext { camera, sessions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::timestamp::Timestamp;
    use crate::cli::Args;
    use crate::error::PreconditionError;
    use crate::pipeline::audit::{read_audit_log, AuditRow};
    use crate::pipeline::finalize::read_snapshot;
    use crate::video::assembler::testing::FakeBackend;
    use crate::video::FrameSize;
    use clap::Parser;
    use std::fs;

    const FRAMES: usize = 200;
    const SIZE: FrameSize = FrameSize {
        width: 32,
        height: 24,
    };

    fn image_name(frame: usize, camera: usize) -> String {
        format!("Aragorn_{}_cam{}.jpg", frame, camera)
    }

    /// One session, two cameras at 30 fps from 10:00:00.
    fn fixture(root: &Path) {
        let session = root.join("220902_Aragorn");
        fs::create_dir(&session).unwrap();
        let start = Timestamp::parse("2022-09-02 10:00:00").unwrap();
        for camera in 0..2 {
            let log: String = (0..FRAMES)
                .map(|i| format!("{},{}\n", i, start.offset_millis(i as f64 * 100.0 / 3.0)))
                .collect();
            fs::write(session.join(format!("Aragorn_t{}.txt", camera)), log).unwrap();
            for i in 0..FRAMES {
                fs::write(session.join(image_name(i, camera)), b"").unwrap();
            }
        }

        fs::write(
            root.join("Aragorn_220902_tr_starts.txt"),
            "2022-09-02 10:00:01.000000\n2022-09-02 10:00:05\nnot a time\n\n",
        )
        .unwrap();
        fs::write(
            root.join("Aragorn_220902_tr_ends.txt"),
            "2022-09-02 10:00:03.000000\n2022-09-02 10:00:05.005\n2022-09-02 10:00:06\n",
        )
        .unwrap();
    }

    fn context(root: &Path) -> RunContext {
        let args = Args::parse_from([
            "trial-clips",
            "--video-root",
            root.to_str().unwrap(),
            "--date",
            "220902",
            "--subject",
            "Aragorn",
            "--cameras",
            "2",
        ]);
        RunContext::from_args(&args)
    }

    fn options(mode: ClipMode, workers: usize) -> BatchOptions {
        BatchOptions {
            mode,
            locator: FrameIndexLocator::default(),
            trial_timeout: Some(Duration::from_secs(60)),
            workers,
        }
    }

    fn driver(root: &Path, backend: Arc<FakeBackend>, state: Arc<ProcessingState>) -> BatchDriver<FakeBackend> {
        let ctx = context(root);
        let plan = BatchPlan::load(&ctx, None).unwrap();
        BatchDriver::new(ctx, plan, options(ClipMode::WholeTrial, 2), backend, state)
    }

    fn all_frames() -> Arc<FakeBackend> {
        let names = (0..2).flat_map(|c| (0..FRAMES).map(move |i| image_name(i, c)));
        Arc::new(FakeBackend::with_frames(names, SIZE))
    }

    fn indices(rows: &[AuditRow]) -> Vec<(usize, bool)> {
        rows.iter()
            .map(|r| match r {
                AuditRow::Matched(e) => (e.trial_index, true),
                AuditRow::Errored { trial_index } => (*trial_index, false),
            })
            .collect()
    }

    #[test]
    fn test_run_writes_clips_logs_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        let backend = all_frames();
        let state = Arc::new(ProcessingState::new());

        let snapshot = driver(dir.path(), backend.clone(), state.clone()).run().unwrap();

        let out = dir.path().join("Aragorn_220902_videos");
        for camera in 0..2 {
            let rows = read_audit_log(&out.join(audit_log_name(camera))).unwrap();
            assert_eq!(indices(&rows), vec![(1, true), (2, false), (3, false)]);
        }
        let log = fs::read_to_string(out.join("log_cam0.txt")).unwrap();
        assert!(log.contains("# trial 2: skipped, InvalidTrialBounds"));
        assert!(log.contains("# trial 3: skipped, MalformedBoundary"));

        let clips = backend.clips();
        assert_eq!(clips.len(), 2);
        assert!(clips.iter().all(|c| c.finished && c.frames.len() == 61 && c.fps == 30.0));

        assert_eq!(snapshot.len(), 3);
        assert_eq!(
            snapshot[0].clips["cam1"].as_deref(),
            Some("220902_Aragorn_trial_1_cam1.mp4")
        );
        assert_eq!(snapshot[1].clips["cam0"], None);
        assert_eq!(read_snapshot(&out).unwrap(), snapshot);
        assert!(out.join("metadata.json").is_file());
        assert_eq!(state.progress("cam0").unwrap().done, 1);
        assert_eq!(state.progress("cam1").unwrap().skipped, 2);
    }

    #[test]
    fn test_malformed_image_name_aborts_only_that_camera() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        fs::write(dir.path().join("220902_Aragorn").join("Aragorn_x_cam1.jpg"), b"").unwrap();

        let snapshot = driver(dir.path(), all_frames(), Arc::new(ProcessingState::new()))
            .run()
            .unwrap();

        assert!(snapshot[0].clips["cam0"].is_some());
        assert!(snapshot.iter().all(|t| t.clips["cam1"].is_none()));

        let out = dir.path().join("Aragorn_220902_videos");
        let rows = read_audit_log(&out.join("log_cam1.txt")).unwrap();
        assert_eq!(indices(&rows), vec![(1, false), (2, false), (3, false)]);
        let log = fs::read_to_string(out.join("log_cam1.txt")).unwrap();
        assert!(log.contains("# camera aborted"));
    }

    #[test]
    fn test_camera_without_frame_logs_is_aborted() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        fs::remove_file(dir.path().join("220902_Aragorn").join("Aragorn_t1.txt")).unwrap();

        let snapshot = driver(dir.path(), all_frames(), Arc::new(ProcessingState::new()))
            .run()
            .unwrap();

        assert!(snapshot[0].clips["cam0"].is_some());
        assert!(snapshot.iter().all(|t| t.clips["cam1"].is_none()));

        let out = dir.path().join("Aragorn_220902_videos");
        let rows = read_audit_log(&out.join("log_cam1.txt")).unwrap();
        assert_eq!(indices(&rows), vec![(1, false), (2, false), (3, false)]);
        let log = fs::read_to_string(out.join("log_cam1.txt")).unwrap();
        assert!(log.contains("# camera aborted"));
        assert!(log.contains("no session has frame timestamps"));
        assert!(!log.contains("NoSessionCandidate"));
    }

    #[test]
    fn test_out_of_range_delay_marker_fails_only_its_trial() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        let table = dir.path().join("trials.csv");
        fs::write(
            &table,
            "trial_num,correct,Trace Start,Trace End\n1,1,1e16,2e16\n2,1,100,1500\n3,1,100,1500\n",
        )
        .unwrap();

        let ctx = context(dir.path());
        let plan = BatchPlan::load(&ctx, Some(&table)).unwrap();
        let mode = ClipMode::Delay {
            start_marker: "Trace Start".to_string(),
            end_marker: "Trace End".to_string(),
        };
        let backend = all_frames();
        let snapshot = BatchDriver::new(ctx, plan, options(mode, 1), backend.clone(), Arc::new(ProcessingState::new()))
            .run()
            .unwrap();

        let out = dir.path().join("Aragorn_220902_videos");
        for camera in 0..2 {
            let rows = read_audit_log(&out.join(audit_log_name(camera))).unwrap();
            assert_eq!(indices(&rows), vec![(1, false), (2, true), (3, false)]);
        }
        let log = fs::read_to_string(out.join("log_cam0.txt")).unwrap();
        assert!(log.contains("# trial 1: skipped, MarkerOutOfRange"));
        assert!(log.contains("# trial 3: skipped, MalformedBoundary"));

        // 10:00:05.100 to 10:00:06.500 at 30 fps
        let clips = backend.clips();
        assert_eq!(clips.len(), 2);
        assert!(clips.iter().all(|c| c.finished && c.frames.len() == 43));
        assert_eq!(
            snapshot[1].clips["cam0"].as_deref(),
            Some("220902_Aragorn_trial_2_cam0.mp4")
        );
    }

    #[test]
    fn test_cancelled_run_still_audits_every_trial() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        let backend = all_frames();
        let state = Arc::new(ProcessingState::new());
        state.cancel();

        let snapshot = driver(dir.path(), backend.clone(), state).run().unwrap();

        assert!(backend.clips().is_empty());
        assert!(snapshot.iter().all(|t| t.clips.values().all(Option::is_none)));
        let log = fs::read_to_string(dir.path().join("Aragorn_220902_videos/log_cam0.txt")).unwrap();
        assert_eq!(log.matches("skipped, Cancelled").count(), 3);
    }

    #[test]
    fn test_missing_boundary_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        fs::remove_file(dir.path().join("Aragorn_220902_tr_ends.txt")).unwrap();

        let err = BatchPlan::load(&context(dir.path()), None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PreconditionError>(),
            Some(PreconditionError::BoundaryFileMissing(_))
        ));
    }
}
