use crate::error::ConfigError;
use crate::pipeline::composite::MaskTransform;
use crate::pipeline::frame_worker::RedactionSettings;
use crate::pipeline::geometry::{StructuringElement, DEFAULT_EXPANSION_PX};
use crate::run_context::MediaFilter;
use crate::video::BackendKind;
use clap::ValueEnum;
use std::ops::RangeInclusive;
use std::path::PathBuf;

pub const BLUR_SIZE_RANGE: RangeInclusive<u32> = 1..=301;
pub const BLUR_PASSES_RANGE: RangeInclusive<u32> = 1..=10;
pub const FRAME_INTERVAL_RANGE: RangeInclusive<u32> = 1..=15;
pub const MAX_EXPANSION_PX: u32 = 200;

pub const DEFAULT_BLUR_SIZE: u32 = 151;
pub const DEFAULT_BLUR_PASSES: u32 = 3;
pub const DEFAULT_CONFIDENCE: f32 = 0.33;
pub const DEFAULT_MODEL: &str = "yolov8n-seg.onnx";
pub const DEFAULT_DETECTION_MODEL: &str = "yolov8m.onnx";
pub const DEFAULT_SUFFIX: &str = "-background";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MaskType {
    Black,
    #[default]
    Blur,
}

/// Everything one run needs, after argument parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingConfig {
    pub media_filter: MediaFilter,
    pub mask_type: MaskType,
    pub blur_size: u32,
    pub blur_passes: u32,
    pub confidence: f32,
    pub model: PathBuf,
    pub use_segmentation: bool,
    pub expansion_px: u32,
    pub dilation: StructuringElement,
    pub suffix: String,
    pub keep_audio: bool,
    pub frame_interval: u32,
    pub object_detection: bool,
    pub detection_model: PathBuf,
    pub video_backend: BackendKind,
    pub show_progress: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            media_filter: MediaFilter::Both,
            mask_type: MaskType::Blur,
            blur_size: DEFAULT_BLUR_SIZE,
            blur_passes: DEFAULT_BLUR_PASSES,
            confidence: DEFAULT_CONFIDENCE,
            model: PathBuf::from(DEFAULT_MODEL),
            use_segmentation: true,
            expansion_px: DEFAULT_EXPANSION_PX,
            dilation: StructuringElement::Disk,
            suffix: DEFAULT_SUFFIX.to_string(),
            keep_audio: true,
            frame_interval: 1,
            object_detection: false,
            detection_model: PathBuf::from(DEFAULT_DETECTION_MODEL),
            video_backend: BackendKind::Ffmpeg,
            show_progress: true,
        }
    }
}

fn check_range(
    value: u32,
    range: &RangeInclusive<u32>,
    err: impl FnOnce(u32, u32, u32) -> ConfigError,
) -> Result<(), ConfigError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(err(value, *range.start(), *range.end()))
    }
}

impl ProcessingConfig {
    /// Rejects out-of-range parameters. Runs before any model is loaded.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ConfigError::Confidence(self.confidence));
        }
        check_range(self.blur_size, &BLUR_SIZE_RANGE, |value, min, max| {
            ConfigError::BlurSize { value, min, max }
        })?;
        check_range(self.blur_passes, &BLUR_PASSES_RANGE, |value, min, max| {
            ConfigError::BlurPasses { value, min, max }
        })?;
        check_range(self.frame_interval, &FRAME_INTERVAL_RANGE, |value, min, max| {
            ConfigError::FrameInterval { value, min, max }
        })?;
        if self.expansion_px > MAX_EXPANSION_PX {
            return Err(ConfigError::Expansion {
                value: self.expansion_px,
                max: MAX_EXPANSION_PX,
            });
        }
        if self.suffix.is_empty() {
            return Err(ConfigError::EmptySuffix);
        }
        Ok(())
    }

    /// The transform selected for this run.
    pub fn transform(&self) -> MaskTransform {
        match self.mask_type {
            MaskType::Black => MaskTransform::Black,
            MaskType::Blur => MaskTransform::blur(self.blur_size, self.blur_passes),
        }
    }

    pub fn redaction_settings(&self) -> RedactionSettings {
        RedactionSettings {
            transform: self.transform(),
            expansion_px: self.expansion_px,
            dilation: self.dilation,
            use_segmentation: self.use_segmentation,
            confidence: self.confidence,
        }
    }

    /// Audio survives only when requested and every frame is kept.
    pub fn retains_audio(&self) -> bool {
        self.keep_audio && self.frame_interval == 1
    }
}
