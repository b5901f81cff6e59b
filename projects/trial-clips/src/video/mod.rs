pub mod assembler;
pub mod image_set;
pub mod opencv_backend;

use crate::error::BuildError;
use std::path::Path;

/// Pixel dimensions of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: i32,
    pub height: i32,
}

/// Decodes image assets and opens clip writers. Shared by all trial workers.
pub trait FrameBackend: Send + Sync {
    type Frame;
    type Writer: ClipWriter<Frame = Self::Frame>;

    fn read_frame(&self, path: &Path) -> Result<Self::Frame, BuildError>;
    fn frame_size(&self, frame: &Self::Frame) -> FrameSize;
    fn open_writer(&self, path: &Path, fps: f64, size: FrameSize) -> Result<Self::Writer, BuildError>;
}

pub trait ClipWriter {
    type Frame;

    fn write_frame(&mut self, frame: &Self::Frame) -> Result<(), BuildError>;
    /// Flushes and closes the container.
    fn finish(self) -> Result<(), BuildError>;
}
