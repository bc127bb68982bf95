//! Error types for media and configuration handling.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors raised by the media collaborators (image I/O, FFmpeg, compositing).
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("Failed to encode {path}: {message}")]
    Encode { path: PathBuf, message: String },

    #[error("Buffer size mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn decode(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn encode(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Encode {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Parameter validation failures, raised before any file is touched.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Confidence must be between 0.0 and 1.0 (got {0})")]
    Confidence(f32),

    #[error("Blur kernel size must be between {min} and {max} (got {value})")]
    BlurSize { value: u32, min: u32, max: u32 },

    #[error("Blur passes must be between {min} and {max} (got {value})")]
    BlurPasses { value: u32, min: u32, max: u32 },

    #[error("Frame interval must be between {min} and {max} (got {value})")]
    FrameInterval { value: u32, min: u32, max: u32 },

    #[error("Expansion must be at most {max} pixels (got {value})")]
    Expansion { value: u32, max: u32 },

    #[error("Filename suffix must not be empty")]
    EmptySuffix,
}
