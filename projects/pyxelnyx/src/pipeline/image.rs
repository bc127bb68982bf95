use crate::error::{MediaError, MediaResult};
use crate::pipeline::aggregator::DetectionAggregator;
use crate::pipeline::frame_worker::FrameWorker;
use crate::pipeline::types::Frame;
use crate::run_context::png_fallback_for;
use crate::video::command::FfmpegCommand;
use anyhow::{Context, Result};
use image::{ImageError, ImageFormat};
use std::path::{Path, PathBuf};

/// Still-image decoding and encoding.
pub trait ImageIo {
    fn decode(&self, path: &Path) -> Result<Frame>;
    /// `MediaError::UnsupportedFormat` means the format cannot be written at all.
    fn encode(&self, frame: &Frame, path: &Path) -> MediaResult<()>;
}

/// `image` crate codecs, with an FFmpeg single-frame decode for anything
/// they cannot read (HEIC/HEIF among others).
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardImageIo;

/// First frame of `path` as PNG on stdout.
fn ffmpeg_decode_command(path: &Path) -> FfmpegCommand {
    FfmpegCommand::new("-")
        .input(path)
        .output_args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png"])
}

impl StandardImageIo {
    fn decode_with_ffmpeg(path: &Path) -> MediaResult<Frame> {
        let png = ffmpeg_decode_command(path).run()?;
        let img = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .map_err(|e| MediaError::decode(path, e.to_string()))?;
        Ok(img.to_rgb8())
    }
}

impl ImageIo for StandardImageIo {
    fn decode(&self, path: &Path) -> Result<Frame> {
        match image::open(path) {
            Ok(img) => Ok(img.to_rgb8()),
            Err(e) => {
                tracing::debug!(
                    "Image: native decode of {} failed ({}), trying ffmpeg",
                    path.display(),
                    e
                );
                Self::decode_with_ffmpeg(path)
                    .with_context(|| format!("Could not decode {}", path.display()))
            }
        }
    }

    fn encode(&self, frame: &Frame, path: &Path) -> MediaResult<()> {
        let format = ImageFormat::from_path(path)
            .map_err(|_| MediaError::UnsupportedFormat(path.display().to_string()))?;
        if !format.writing_enabled() {
            return Err(MediaError::UnsupportedFormat(format!("{:?}", format)));
        }
        frame.save_with_format(path, format).map_err(|e| match e {
            ImageError::Unsupported(u) => MediaError::UnsupportedFormat(u.to_string()),
            ImageError::IoError(io) => MediaError::Io(io),
            other => MediaError::encode(path, other.to_string()),
        })
    }
}

/// Result of processing one still image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    Redacted {
        output: PathBuf,
        people: usize,
        /// Set when the requested format could not be written and PNG was used.
        substituted_from: Option<PathBuf>,
    },
    /// Nobody was found; no output was written.
    NoDetections,
}

/// Decode, detect, composite and encode one image.
///
/// Background objects are appended to `aggregator` even when no person is
/// found.
pub fn process_image(
    io: &dyn ImageIo,
    worker: &mut FrameWorker,
    aggregator: &mut DetectionAggregator,
    source: &Path,
    output: &Path,
) -> Result<ImageOutcome> {
    let frame = io.decode(source)?;
    let (w, h) = frame.dimensions();
    tracing::debug!("Image: decoded {} ({}x{})", source.display(), w, h);

    let redaction = worker
        .process(&frame)
        .with_context(|| format!("Detection failed for {}", source.display()))?;
    aggregator.append(&redaction.background);

    if redaction.people == 0 {
        tracing::info!("Image: no people found in {}", source.display());
        return Ok(ImageOutcome::NoDetections);
    }

    let written = match io.encode(&redaction.frame, output) {
        Ok(()) => ImageOutcome::Redacted {
            output: output.to_path_buf(),
            people: redaction.people,
            substituted_from: None,
        },
        Err(MediaError::UnsupportedFormat(reason)) => {
            let fallback = png_fallback_for(output);
            tracing::warn!(
                "Image: cannot write {} ({}), saving {} instead",
                output.display(),
                reason,
                fallback.display()
            );
            io.encode(&redaction.frame, &fallback)
                .with_context(|| format!("Failed to save {}", fallback.display()))?;
            ImageOutcome::Redacted {
                output: fallback,
                people: redaction.people,
                substituted_from: Some(output.to_path_buf()),
            }
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to save {}", output.display()));
        }
    };

    tracing::info!(
        "Image: redacted {} people in {}",
        redaction.people,
        source.display()
    );
    Ok(written)
}
