//! Audio track extraction and remuxing around the video-only frame loop.

use super::command::{check_ffmpeg, FfmpegCommand};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Encoder process able to copy an audio track out of a file and mux it back.
pub trait AudioCodec {
    fn is_available(&self) -> bool;
    /// Copies the first audio stream of `source` into `destination`.
    fn extract(&self, source: &Path, destination: &Path) -> Result<()>;
    /// Muxes the video stream of `video` with the audio of `audio` into `destination`.
    fn merge(&self, video: &Path, audio: &Path, destination: &Path) -> Result<()>;
}

/// `ffmpeg` based codec: stream-copies audio out, re-encodes to AAC when muxing.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegAudioCodec;

/// Stream-copies the first audio track of `source`, dropping video.
fn extract_command(source: &Path, destination: &Path) -> FfmpegCommand {
    FfmpegCommand::new(destination)
        .input(source)
        .output_arg("-vn")
        .audio_codec("copy")
}

/// Video from input 0 copied as is, audio from input 1 encoded to AAC.
fn merge_command(video: &Path, audio: &Path, destination: &Path) -> FfmpegCommand {
    FfmpegCommand::new(destination)
        .input(video)
        .input(audio)
        .video_codec("copy")
        .audio_codec("aac")
        .map("0:v:0")
        .map("1:a:0")
        .output_arg("-shortest")
}

impl AudioCodec for FfmpegAudioCodec {
    fn is_available(&self) -> bool {
        check_ffmpeg().is_ok()
    }

    fn extract(&self, source: &Path, destination: &Path) -> Result<()> {
        extract_command(source, destination)
            .run()
            .with_context(|| format!("Audio extraction failed for {}", source.display()))?;
        Ok(())
    }

    fn merge(&self, video: &Path, audio: &Path, destination: &Path) -> Result<()> {
        merge_command(video, audio, destination)
            .run()
            .with_context(|| format!("Audio merge failed for {}", destination.display()))?;
        Ok(())
    }
}

/// Owns the temporary audio file for one video job.
///
/// Every operation is best effort and reports failure as `false`. The temp
/// file is removed on `cleanup` and on drop.
pub struct AudioSidecarManager<'a> {
    codec: &'a dyn AudioCodec,
    workdir: PathBuf,
    audio: Option<TempPath>,
}

impl<'a> AudioSidecarManager<'a> {
    /// Temp files are created inside `workdir`.
    pub fn new(codec: &'a dyn AudioCodec, workdir: impl Into<PathBuf>) -> Self {
        Self {
            codec,
            workdir: workdir.into(),
            audio: None,
        }
    }

    pub fn is_encoder_available(&self) -> bool {
        self.codec.is_available()
    }

    /// Extracts the audio of `source` into a fresh temp file.
    pub fn extract_audio(&mut self, source: &Path) -> bool {
        self.audio = None;

        let temp = match tempfile::Builder::new()
            .prefix(".pyxelnyx-audio-")
            .suffix(".mka")
            .tempfile_in(&self.workdir)
        {
            Ok(file) => file.into_temp_path(),
            Err(e) => {
                tracing::warn!("Audio: could not create temp file: {}", e);
                return false;
            }
        };

        match self.codec.extract(source, &temp) {
            Ok(()) => {
                tracing::debug!("Audio: extracted track to {}", temp.display());
                self.audio = Some(temp);
                true
            }
            Err(e) => {
                tracing::warn!("Audio: {:#}", e);
                false
            }
        }
    }

    /// Path of the extracted audio, if extraction succeeded.
    pub fn audio_path(&self) -> Option<&Path> {
        self.audio.as_deref()
    }

    pub fn merge_audio(&self, video_no_audio: &Path, audio: &Path, destination: &Path) -> bool {
        match self.codec.merge(video_no_audio, audio, destination) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Audio: {:#}", e);
                false
            }
        }
    }

    /// Removes the temp audio file now.
    pub fn cleanup(&mut self) {
        if let Some(temp) = self.audio.take() {
            if let Err(e) = temp.close() {
                tracing::warn!("Audio: failed to remove temp file: {}", e);
            }
        }
    }
}
