pub mod audio;
pub mod command;
pub mod ffmpeg_reader;
pub mod opencv_reader;
pub mod processor;
pub mod progress;

use crate::pipeline::types::Frame;
use anyhow::Result;
use clap::ValueEnum;
use std::path::Path;

/// Sequential frame source.
pub trait VideoReader {
    /// Frame count as reported by the container (may be an estimate).
    fn frame_count(&self) -> u64;
    fn source_fps(&self) -> f64;
    fn dimensions(&self) -> (u32, u32);
    /// Next decoded frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Sequential frame sink producing a video-only file.
pub trait VideoWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;
    /// Flushes and closes the output.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens readers and writers for one container implementation.
pub trait VideoBackend {
    fn name(&self) -> &'static str;
    fn open_reader(&self, path: &Path) -> Result<Box<dyn VideoReader>>;
    fn open_writer(
        &self,
        path: &Path,
        fps: f64,
        dimensions: (u32, u32),
    ) -> Result<Box<dyn VideoWriter>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackendKind {
    #[default]
    Ffmpeg,
    Opencv,
}

/// Instantiates the selected backend.
pub fn backend_for(kind: BackendKind) -> Box<dyn VideoBackend> {
    match kind {
        BackendKind::Ffmpeg => Box::new(ffmpeg_reader::FfmpegBackend),
        BackendKind::Opencv => Box::new(opencv_reader::OpencvBackend),
    }
}
