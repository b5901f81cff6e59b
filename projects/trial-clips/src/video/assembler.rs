use crate::error::BuildError;
use crate::pipeline::types::Deadline;
use crate::video::image_set::ImageAsset;
use crate::video::{ClipWriter, FrameBackend, FrameSize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// `frame_count / elapsed_secs`, rounded to three decimals.
pub fn compute_frame_rate(frame_count: usize, elapsed_secs: f64) -> f64 {
    (frame_count as f64 / elapsed_secs * 1000.0).round() / 1000.0
}

pub struct ClipRequest<'a> {
    /// Frames in clip order.
    pub frames: &'a [ImageAsset],
    pub source_dir: &'a Path,
    pub fps: f64,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipSummary {
    pub path: PathBuf,
    pub frames_written: usize,
    pub fps: f64,
    pub size: FrameSize,
    pub duration: Duration,
}

/// Writes an ordered frame list into a video container.
pub struct ClipAssembler<'b, B: FrameBackend> {
    backend: &'b B,
}

impl<'b, B: FrameBackend> ClipAssembler<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self { backend }
    }

    /// The first frame fixes the clip dimensions. Any later failure leaves
    /// the partial file in place.
    pub fn assemble(&self, request: &ClipRequest<'_>, deadline: &Deadline) -> Result<ClipSummary, BuildError> {
        let start_time = Instant::now();

        // Refuse before touching the output so no header-only file is left.
        let (first, rest) = request
            .frames
            .split_first()
            .ok_or(BuildError::EmptySelection { start: 0, end: 0 })?;

        let first_frame = self.backend.read_frame(&request.source_dir.join(&first.file_name))?;
        let size = self.backend.frame_size(&first_frame);

        let mut writer = self.backend.open_writer(&request.output, request.fps, size)?;
        writer.write_frame(&first_frame)?;
        drop(first_frame);

        for asset in rest {
            deadline.check()?;

            let path = request.source_dir.join(&asset.file_name);
            let frame = self.backend.read_frame(&path)?;
            let frame_size = self.backend.frame_size(&frame);
            if frame_size != size {
                return Err(BuildError::DimensionMismatch {
                    path,
                    expected_w: size.width,
                    expected_h: size.height,
                    actual_w: frame_size.width,
                    actual_h: frame_size.height,
                });
            }
            writer.write_frame(&frame)?;
        }

        writer.finish()?;

        Ok(ClipSummary {
            path: request.output.clone(),
            frames_written: request.frames.len(),
            fps: request.fps,
            size,
            duration: start_time.elapsed(),
        })
    }
}
