use crate::config::{
    MaskType, ProcessingConfig, DEFAULT_BLUR_PASSES, DEFAULT_BLUR_SIZE, DEFAULT_CONFIDENCE,
    DEFAULT_DETECTION_MODEL, DEFAULT_MODEL, DEFAULT_SUFFIX,
};
use crate::pipeline::geometry::{StructuringElement, DEFAULT_EXPANSION_PX};
use crate::run_context::MediaFilter;
use crate::video::BackendKind;
use clap::Parser;
use std::path::PathBuf;

/// Detect people in images and videos and replace them with a blur or a
/// black fill.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Image, video, or directory of media files
    pub input: PathBuf,

    /// Which media to pick up when INPUT is a directory
    #[arg(long, value_enum, default_value_t = MediaFilter::Both, env = "PYXELNYX_MEDIA_TYPE")]
    pub media_type: MediaFilter,

    /// How detected people are replaced
    #[arg(long, value_enum, default_value_t = MaskType::Blur, env = "PYXELNYX_MASK_TYPE")]
    pub mask_type: MaskType,

    /// Gaussian kernel size (1-301, even values are rounded up)
    #[arg(long, default_value_t = DEFAULT_BLUR_SIZE, env = "PYXELNYX_BLUR")]
    pub blur: u32,

    /// Number of blur passes (1-10)
    #[arg(long, default_value_t = DEFAULT_BLUR_PASSES, env = "PYXELNYX_PASSES")]
    pub passes: u32,

    /// Minimum detection confidence (0.0-1.0)
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE, env = "PYXELNYX_CONFIDENCE")]
    pub confidence: f32,

    /// ONNX model used to find people
    #[arg(long, default_value = DEFAULT_MODEL, env = "PYXELNYX_MODEL")]
    pub model: PathBuf,

    /// Ignore segmentation masks and redact whole boxes
    #[arg(long)]
    pub no_segmentation: bool,

    /// Pixels added around every detection (0-200)
    #[arg(long, default_value_t = DEFAULT_EXPANSION_PX, env = "PYXELNYX_EXPANSION")]
    pub expansion: u32,

    /// Shape used to grow segmentation masks
    #[arg(long, value_enum, default_value_t = StructuringElement::Disk, env = "PYXELNYX_DILATION_SHAPE")]
    pub dilation_shape: StructuringElement,

    /// Appended to the file stem of every output
    #[arg(long, default_value = DEFAULT_SUFFIX, env = "PYXELNYX_SUFFIX", allow_hyphen_values = true)]
    pub suffix: String,

    /// Drop the audio track from video outputs
    #[arg(long)]
    pub no_audio: bool,

    /// Process every Nth video frame (1-15)
    #[arg(long, default_value_t = 1, env = "PYXELNYX_FRAME_INTERVAL")]
    pub frame_interval: u32,

    /// Record other objects to <stem>-detections.json
    #[arg(long)]
    pub object_detection: bool,

    /// ONNX model used with --object-detection
    #[arg(long, default_value = DEFAULT_DETECTION_MODEL, env = "PYXELNYX_DETECTION_MODEL")]
    pub detection_model: PathBuf,

    /// Video decoding/encoding backend
    #[arg(long, value_enum, default_value_t = BackendKind::Ffmpeg, env = "PYXELNYX_VIDEO_BACKEND")]
    pub video_backend: BackendKind,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn to_config(&self) -> ProcessingConfig {
        ProcessingConfig {
            media_filter: self.media_type,
            mask_type: self.mask_type,
            blur_size: self.blur,
            blur_passes: self.passes,
            confidence: self.confidence,
            model: self.model.clone(),
            use_segmentation: !self.no_segmentation,
            expansion_px: self.expansion,
            dilation: self.dilation_shape,
            suffix: self.suffix.clone(),
            keep_audio: !self.no_audio,
            frame_interval: self.frame_interval,
            object_detection: self.object_detection,
            detection_model: self.detection_model.clone(),
            video_backend: self.video_backend,
            show_progress: !self.no_progress,
        }
    }
}
