use super::{VideoBackend, VideoReader, VideoWriter};
use crate::pipeline::cv::{frame_to_mat, mat_to_frame};
use crate::pipeline::types::Frame;
use anyhow::{anyhow, bail, Result};
use opencv::{
    core::{Mat, Size},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT},
};
use std::path::Path;

/// Video I/O through OpenCV's `VideoCapture` and `VideoWriter`.
pub struct OpencvBackend;

impl VideoBackend for OpencvBackend {
    fn name(&self) -> &'static str {
        "opencv"
    }

    fn open_reader(&self, path: &Path) -> Result<Box<dyn VideoReader>> {
        Ok(Box::new(OpencvReader::new(path)?))
    }

    fn open_writer(
        &self,
        path: &Path,
        fps: f64,
        dimensions: (u32, u32),
    ) -> Result<Box<dyn VideoWriter>> {
        Ok(Box::new(OpencvWriter::new(path, fps, dimensions)?))
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("Path is not valid UTF-8: {}", path.display()))
}

pub struct OpencvReader {
    capture: VideoCapture,
    source_fps: f64,
    total_frames: u64,
    width: u32,
    height: u32,
}

impl OpencvReader {
    pub fn new(path: &Path) -> Result<Self> {
        let capture = VideoCapture::from_file(path_str(path)?, CAP_ANY)?;
        if !capture.is_opened()? {
            bail!("Failed to open video file: {}", path.display());
        }

        let mut fps = capture.get(CAP_PROP_FPS)?;
        if fps <= 0.0 {
            tracing::warn!("OpencvReader: Failed to get FPS from metadata, falling back to 30.0");
            fps = 30.0;
        }
        let total_frames = capture.get(CAP_PROP_FRAME_COUNT)?.max(0.0) as u64;
        let coded_width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let coded_height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        // The FFmpeg backend rotates decoded frames; the size properties do not.
        let rotation = capture.get(videoio::CAP_PROP_ORIENTATION_META).unwrap_or(0.0);
        let (width, height) = if (rotation.round() as i64).rem_euclid(180) == 90 {
            (coded_height, coded_width)
        } else {
            (coded_width, coded_height)
        };

        tracing::info!(
            "OpencvReader: opened {}, fps={:.2}, frames={}, size={}x{}",
            path.display(),
            fps,
            total_frames,
            width,
            height
        );

        Ok(Self {
            capture,
            source_fps: fps,
            total_frames,
            width,
            height,
        })
    }
}

impl VideoReader for OpencvReader {
    fn frame_count(&self) -> u64 {
        self.total_frames
    }

    fn source_fps(&self) -> f64 {
        self.source_fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut bgr = Mat::default();
        if !self.capture.read(&mut bgr)? || bgr.empty() {
            return Ok(None);
        }
        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB)?;
        Ok(Some(mat_to_frame(&rgb)?))
    }
}

pub struct OpencvWriter {
    writer: videoio::VideoWriter,
    width: u32,
    height: u32,
}

impl OpencvWriter {
    pub fn new(path: &Path, fps: f64, (width, height): (u32, u32)) -> Result<Self> {
        let fourcc = videoio::VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = videoio::VideoWriter::new(
            path_str(path)?,
            fourcc,
            fps,
            Size::new(width as i32, height as i32),
            true,
        )?;
        if !writer.is_opened()? {
            bail!("Failed to open video writer: {}", path.display());
        }
        Ok(Self {
            writer,
            width,
            height,
        })
    }
}

impl VideoWriter for OpencvWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            bail!(
                "Frame size {:?} does not match writer size {}x{}",
                frame.dimensions(),
                self.width,
                self.height
            );
        }
        let rgb = frame_to_mat(frame)?;
        let mut bgr = Mat::default();
        imgproc::cvt_color_def(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR)?;
        self.writer.write(&bgr)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer.release()?;
        Ok(())
    }
}
