mod alignment;
mod cli;
mod error;
mod pipeline;
mod run_artifacts;
mod run_context;
mod video;

use alignment::locator::FrameIndexLocator;
use anyhow::Result;
use cli::Args;
use pipeline::orchestrator::{BatchDriver, BatchOptions, BatchPlan};
use pipeline::types::ProcessingState;
use run_context::RunContext;
use std::path::Path;
use std::sync::Arc;
use video::opencv_backend::OpencvBackend;

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();
    args.validate()?;

    let ctx = RunContext::from_args(&args);
    let plan = BatchPlan::load(&ctx, args.trial_table.as_deref().map(Path::new))?;

    let state = Arc::new(ProcessingState::new());
    let state_ctrlc = state.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("Interrupt received, finishing clips in progress");
        state_ctrlc.cancel();
    })?;

    let options = BatchOptions {
        mode: args.clip_mode(),
        locator: FrameIndexLocator::new(args.resolver()),
        trial_timeout: args.trial_timeout(),
        workers: args.worker_count(),
    };
    let backend = Arc::new(OpencvBackend::new(&args.fourcc)?);

    let snapshot = BatchDriver::new(ctx, plan, options, backend, state.clone()).run()?;

    let clipped = snapshot
        .iter()
        .filter(|t| t.clips.values().any(Option::is_some))
        .count();
    tracing::info!("{} of {} trials have at least one clip", clipped, snapshot.len());

    if !state.is_active() {
        anyhow::bail!("Run cancelled before all trials were processed");
    }
    Ok(())
}
