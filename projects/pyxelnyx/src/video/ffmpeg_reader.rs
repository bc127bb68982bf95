use super::command::{probe_video, FfmpegCommand};
use super::{VideoBackend, VideoReader, VideoWriter};
use crate::pipeline::types::Frame;
use anyhow::{anyhow, bail, Context, Result};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Stdio};

/// Video I/O through `ffmpeg` subprocesses exchanging raw RGB24 frames.
pub struct FfmpegBackend;

impl VideoBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn open_reader(&self, path: &Path) -> Result<Box<dyn VideoReader>> {
        Ok(Box::new(FfmpegReader::new(path)?))
    }

    fn open_writer(
        &self,
        path: &Path,
        fps: f64,
        dimensions: (u32, u32),
    ) -> Result<Box<dyn VideoWriter>> {
        Ok(Box::new(FfmpegWriter::new(path, fps, dimensions)?))
    }
}

/// Decode to stdout. Display rotation is applied (ffmpeg's default), so the
/// frame size is `VideoInfo::display_dimensions`.
fn reader_command(path: &Path) -> FfmpegCommand {
    FfmpegCommand::new("-")
        .input_arg("-autorotate")
        .input(path)
        .output_args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24"])
}

fn writer_command(path: &Path, fps: f64, (width, height): (u32, u32)) -> FfmpegCommand {
    FfmpegCommand::new(path)
        .input_arg("-f")
        .input_arg("rawvideo")
        .input_arg("-pix_fmt")
        .input_arg("rgb24")
        .input_arg("-s")
        .input_arg(format!("{}x{}", width, height))
        .input_arg("-r")
        .input_arg(format!("{}", fps))
        .input("-")
        // yuv420p needs even dimensions
        .output_args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2"])
        .video_codec("libx264")
        .output_args(["-pix_fmt", "yuv420p", "-an"])
}

/// Decodes a file through `ffmpeg -f rawvideo -pix_fmt rgb24 -`.
pub struct FfmpegReader {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    source_fps: f64,
    total_frames: u64,
}

impl FfmpegReader {
    pub fn new(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Video file not found: {}", path.display());
        }
        let info = probe_video(path)?;
        let (width, height) = info.display_dimensions();
        if width == 0 || height == 0 {
            bail!("Video stream has no dimensions: {}", path.display());
        }
        if info.rotation != 0 {
            tracing::info!(
                "FfmpegReader: {} is rotated {} degrees, decoding upright at {}x{}",
                path.display(),
                info.rotation,
                width,
                height
            );
        }

        let mut child = reader_command(path)
            .to_command()?
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn ffmpeg decoder")?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("ffmpeg decoder has no stdout"))?;

        tracing::info!(
            "FfmpegReader: opened {}, duration={:.2}s, fps={:.2}, frames={}, size={}x{}",
            path.display(),
            info.duration,
            info.fps,
            info.total_frames,
            width,
            height
        );

        Ok(Self {
            child,
            stdout,
            width,
            height,
            source_fps: info.fps,
            total_frames: info.total_frames,
        })
    }
}

impl VideoReader for FfmpegReader {
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
        let mut buf = vec![0u8; self.width as usize * self.height as usize * 3];
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).context("Failed to read frame from ffmpeg"),
        }
        Frame::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| anyhow!("Decoded frame has the wrong size"))
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Encodes RGB24 frames to H.264 through `ffmpeg -f rawvideo -i -`.
pub struct FfmpegWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    width: u32,
    height: u32,
}

impl FfmpegWriter {
    pub fn new(path: &Path, fps: f64, dimensions: (u32, u32)) -> Result<Self> {
        let mut child = writer_command(path, fps, dimensions)
            .to_command()?
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn ffmpeg encoder")?;
        let stdin = child.stdin.take();

        tracing::debug!(
            "FfmpegWriter: writing {} at {:.2} fps ({}x{})",
            path.display(),
            fps,
            dimensions.0,
            dimensions.1
        );

        Ok(Self {
            child,
            stdin,
            width: dimensions.0,
            height: dimensions.1,
        })
    }
}

impl VideoWriter for FfmpegWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            bail!(
                "Frame size {:?} does not match writer size {}x{}",
                frame.dimensions(),
                self.width,
                self.height
            );
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("ffmpeg encoder stdin is closed"))?;
        stdin
            .write_all(frame.as_raw())
            .context("Failed to write frame to ffmpeg")
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        drop(self.stdin.take());
        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        let status = self.child.wait().context("Failed to wait for ffmpeg encoder")?;
        if !status.success() {
            bail!("ffmpeg encoder exited with {}: {}", status, stderr.trim());
        }
        Ok(())
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_command_streams_rgb24() {
        let args = reader_command(Path::new("in.mov")).build_args();
        assert_eq!(&args[..6], ["-y", "-v", "error", "-autorotate", "-i", "in.mov"]);
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "rgb24"]));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn test_writer_command_pads_and_drops_audio() {
        let args = writer_command(Path::new("out.mp4"), 12.5, (641, 360)).build_args();
        assert!(args.windows(2).any(|w| w == ["-s", "641x360"]));
        assert!(args.windows(2).any(|w| w == ["-r", "12.5"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "yuv420p"]));
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }
}
