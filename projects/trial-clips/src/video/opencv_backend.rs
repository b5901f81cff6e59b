use super::{ClipWriter, FrameBackend, FrameSize};
use crate::error::BuildError;
use opencv::{
    core::{Mat, Size},
    imgcodecs,
    prelude::*,
    videoio::VideoWriter,
};
use std::path::{Path, PathBuf};

/// Reads JPEG assets with `imgcodecs` and writes clips through
/// `videoio::VideoWriter`.
pub struct OpencvBackend {
    fourcc: [char; 4],
}

impl OpencvBackend {
    pub fn new(fourcc: &str) -> Result<Self, BuildError> {
        let chars: Vec<char> = fourcc.chars().collect();
        let fourcc: [char; 4] = chars.try_into().map_err(|_| BuildError::WriterOpen {
            path: PathBuf::new(),
            reason: format!("fourcc '{}' must be exactly four characters", fourcc),
        })?;
        Ok(Self { fourcc })
    }
}

fn path_str(path: &Path) -> Result<&str, String> {
    path.to_str()
        .ok_or_else(|| format!("path {:?} is not valid UTF-8", path))
}

impl FrameBackend for OpencvBackend {
    type Frame = Mat;
    type Writer = OpencvClipWriter;

    fn read_frame(&self, path: &Path) -> Result<Mat, BuildError> {
        let name = path_str(path).map_err(|e| BuildError::frame_read(path, e))?;
        let mat = imgcodecs::imread(name, imgcodecs::IMREAD_COLOR)
            .map_err(|e| BuildError::frame_read(path, e))?;
        if mat.empty() {
            return Err(BuildError::frame_read(path, "decoder returned an empty image"));
        }
        Ok(mat)
    }

    fn frame_size(&self, frame: &Mat) -> FrameSize {
        FrameSize {
            width: frame.cols(),
            height: frame.rows(),
        }
    }

    fn open_writer(&self, path: &Path, fps: f64, size: FrameSize) -> Result<OpencvClipWriter, BuildError> {
        let open_err = |reason: String| BuildError::WriterOpen {
            path: path.to_path_buf(),
            reason,
        };

        let name = path_str(path).map_err(open_err)?;
        let [a, b, c, d] = self.fourcc;
        let fourcc = VideoWriter::fourcc(a, b, c, d).map_err(|e| open_err(e.to_string()))?;
        let writer = VideoWriter::new(name, fourcc, fps, Size::new(size.width, size.height), true)
            .map_err(|e| open_err(e.to_string()))?;

        if !writer.is_opened().map_err(|e| open_err(e.to_string()))? {
            return Err(open_err("VideoWriter did not open".to_string()));
        }

        tracing::debug!(
            "OpencvBackend: writer opened {:?} ({}x{} @ {:.3} fps)",
            path,
            size.width,
            size.height,
            fps
        );

        Ok(OpencvClipWriter {
            writer,
            path: path.to_path_buf(),
        })
    }
}

pub struct OpencvClipWriter {
    writer: VideoWriter,
    path: PathBuf,
}

impl ClipWriter for OpencvClipWriter {
    type Frame = Mat;

    fn write_frame(&mut self, frame: &Mat) -> Result<(), BuildError> {
        self.writer.write(frame).map_err(|e| BuildError::Encode {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn finish(mut self) -> Result<(), BuildError> {
        self.writer.release().map_err(|e| BuildError::Encode {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}
