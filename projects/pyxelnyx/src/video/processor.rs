use crate::pipeline::types::Frame;
use crate::run_artifacts::format_timestamp;
use crate::video::audio::{AudioCodec, AudioSidecarManager};
use crate::video::progress::ProgressObserver;
use crate::video::{VideoBackend, VideoReader, VideoWriter};
use anyhow::{Context, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempPath;

/// Where a frame sits in its source stream.
#[derive(Debug, Clone, Copy)]
pub struct FramePosition {
    pub index: u64,
    pub fps: f64,
}

impl FramePosition {
    pub fn timestamp(&self) -> String {
        format_timestamp(self.index, self.fps)
    }
}

/// A trait for handling video frames. This separates the "how to process"
/// from the "how to read and orchestrate" logic.
pub trait FrameProcessor {
    fn process(&mut self, frame: &Frame, position: FramePosition) -> Result<Frame>;
}

/// Blanket implementation so any closure with the right signature
/// automatically implements FrameProcessor.
impl<F> FrameProcessor for F
where
    F: FnMut(&Frame, FramePosition) -> Result<Frame>,
{
    fn process(&mut self, frame: &Frame, position: FramePosition) -> Result<Frame> {
        self(frame, position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Opening,
    ProbeAudio,
    FrameLoop,
    Remux,
    Finalize,
}

/// What happened to the source audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOutcome {
    Kept,
    NotRequested,
    /// Frame sampling changes the timeline, so audio is not carried over.
    DisabledByInterval,
    EncoderUnavailable,
    /// Extraction found nothing to copy.
    NoTrack,
    /// Muxing failed; the output is video-only.
    MergeFailed,
}

/// Per-file state, alive from Opening to Finalize.
pub struct VideoSession {
    pub fps: f64,
    pub output_fps: f64,
    pub width: u32,
    pub height: u32,
    pub total_frames: u64,
    pub has_audio: bool,
    pub temp_video: Option<TempPath>,
    stage: PipelineStage,
}

impl VideoSession {
    fn enter(&mut self, stage: PipelineStage) {
        tracing::debug!("Video: {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }
}

/// Parameters for a single video.
#[derive(Debug, Clone, Copy)]
pub struct VideoJob<'a> {
    pub source: &'a Path,
    pub destination: &'a Path,
    /// Process every Nth frame.
    pub frame_interval: u32,
    pub keep_audio: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoReport {
    pub frames_read: u64,
    pub frames_written: u64,
    /// Frames written unmodified because processing failed.
    pub frames_passed_through: u64,
    pub audio: AudioOutcome,
    pub output_fps: f64,
    pub duration: Duration,
}

struct LoopStats {
    frames_read: u64,
    frames_written: u64,
    frames_passed_through: u64,
}

/// Streams one video through a `FrameProcessor`:
/// Opening, ProbeAudio, FrameLoop, Remux and Finalize.
pub struct VideoPipeline<'a> {
    backend: &'a dyn VideoBackend,
    codec: &'a dyn AudioCodec,
    observer: &'a dyn ProgressObserver,
}

impl<'a> VideoPipeline<'a> {
    pub fn new(
        backend: &'a dyn VideoBackend,
        codec: &'a dyn AudioCodec,
        observer: &'a dyn ProgressObserver,
    ) -> Self {
        Self {
            backend,
            codec,
            observer,
        }
    }

    pub fn run<P>(&self, job: &VideoJob, processor: &mut P) -> Result<VideoReport>
    where
        P: FrameProcessor + ?Sized,
    {
        let start_time = Instant::now();
        let interval = job.frame_interval.max(1);
        let workdir = match job.destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        // Opening
        let mut reader = self
            .backend
            .open_reader(job.source)
            .with_context(|| format!("Failed to open {}", job.source.display()))?;
        let (width, height) = reader.dimensions();
        let fps = reader.source_fps();
        let mut session = VideoSession {
            fps,
            output_fps: fps / interval as f64,
            width,
            height,
            total_frames: reader.frame_count(),
            has_audio: false,
            temp_video: None,
            stage: PipelineStage::Opening,
        };

        let suffix = job
            .destination
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let temp_video = tempfile::Builder::new()
            .prefix(".pyxelnyx-")
            .suffix(&suffix)
            .tempfile_in(workdir)
            .context("Failed to create temporary video file")?
            .into_temp_path();
        let writer = self
            .backend
            .open_writer(&temp_video, session.output_fps, (session.width, session.height))
            .with_context(|| format!("Failed to open writer for {}", job.destination.display()))?;
        session.temp_video = Some(temp_video);

        tracing::info!(
            "Video: {} via {}, {}x{} at {:.2} fps, {} frames, interval {}",
            job.source.display(),
            self.backend.name(),
            session.width,
            session.height,
            fps,
            session.total_frames,
            interval
        );

        // ProbeAudio
        session.enter(PipelineStage::ProbeAudio);
        let mut audio = AudioSidecarManager::new(self.codec, workdir);
        let mut audio_outcome = if !job.keep_audio {
            AudioOutcome::NotRequested
        } else if interval > 1 {
            tracing::info!("Video: audio disabled because frame interval is {}", interval);
            AudioOutcome::DisabledByInterval
        } else if !audio.is_encoder_available() {
            tracing::warn!("Video: audio encoder unavailable, output will be video-only");
            AudioOutcome::EncoderUnavailable
        } else if audio.extract_audio(job.source) {
            session.has_audio = true;
            AudioOutcome::Kept
        } else {
            AudioOutcome::NoTrack
        };

        // FrameLoop
        session.enter(PipelineStage::FrameLoop);
        let stats = self.frame_loop(&mut session, reader.as_mut(), writer, processor, interval)?;
        drop(reader);

        // Remux
        session.enter(PipelineStage::Remux);
        let temp_video = session
            .temp_video
            .take()
            .context("Temporary video file missing")?;
        let merged = match audio.audio_path() {
            Some(track) if session.has_audio => {
                audio.merge_audio(&temp_video, track, job.destination)
            }
            _ => false,
        };
        if session.has_audio && !merged {
            tracing::warn!(
                "Video: could not restore audio for {}, writing video-only output",
                job.destination.display()
            );
            audio_outcome = AudioOutcome::MergeFailed;
        }
        if !merged {
            temp_video.persist(job.destination).map_err(|e| e.error).with_context(|| {
                format!("Failed to move output to {}", job.destination.display())
            })?;
        }

        // Finalize
        session.enter(PipelineStage::Finalize);
        audio.cleanup();

        Ok(VideoReport {
            frames_read: stats.frames_read,
            frames_written: stats.frames_written,
            frames_passed_through: stats.frames_passed_through,
            audio: audio_outcome,
            output_fps: session.output_fps,
            duration: start_time.elapsed(),
        })
    }

    fn frame_loop<P>(
        &self,
        session: &mut VideoSession,
        reader: &mut dyn VideoReader,
        mut writer: Box<dyn VideoWriter>,
        processor: &mut P,
        interval: u32,
    ) -> Result<LoopStats>
    where
        P: FrameProcessor + ?Sized,
    {
        let interval = interval as u64;
        let expected = session.total_frames.div_ceil(interval);
        let mut observer_alive = self.notify(true, |o| o.on_start(expected));

        let mut stats = LoopStats {
            frames_read: 0,
            frames_written: 0,
            frames_passed_through: 0,
        };

        loop {
            let frame = match reader.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        "Video: read failed at frame {}, treating as end of stream: {:#}",
                        stats.frames_read,
                        e
                    );
                    break;
                }
            };
            let index = stats.frames_read;
            stats.frames_read += 1;
            if index % interval != 0 {
                continue;
            }

            let position = FramePosition {
                index,
                fps: session.fps,
            };
            let result = catch_unwind(AssertUnwindSafe(|| processor.process(&frame, position)));
            let output = match result {
                Ok(Ok(out)) if out.dimensions() == frame.dimensions() => out,
                Ok(Ok(out)) => {
                    tracing::warn!(
                        "Video: frame {} came back as {:?}, keeping original",
                        index,
                        out.dimensions()
                    );
                    stats.frames_passed_through += 1;
                    frame
                }
                Ok(Err(e)) => {
                    tracing::warn!("Video: frame {} passed through: {:#}", index, e);
                    stats.frames_passed_through += 1;
                    frame
                }
                Err(_) => {
                    tracing::warn!("Video: frame {} passed through after a panic", index);
                    stats.frames_passed_through += 1;
                    frame
                }
            };

            writer
                .write_frame(&output)
                .with_context(|| format!("Failed to write frame {}", index))?;
            stats.frames_written += 1;

            let written = stats.frames_written;
            observer_alive =
                self.notify(observer_alive, |o| o.on_progress(written, expected.max(written)));
        }

        writer.finish().context("Failed to finalize video stream")?;
        self.notify(observer_alive, |o| o.on_finish());

        tracing::info!(
            "Video: wrote {} frames ({} passed through)",
            stats.frames_written,
            stats.frames_passed_through
        );
        Ok(stats)
    }

    /// Runs an observer callback, containing panics. Returns whether the
    /// observer should keep receiving calls.
    fn notify<F>(&self, alive: bool, call: F) -> bool
    where
        F: FnOnce(&dyn ProgressObserver),
    {
        if !alive {
            return false;
        }
        let observer = self.observer;
        match catch_unwind(AssertUnwindSafe(|| call(observer))) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!("Video: progress observer panicked, disabling it");
                false
            }
        }
    }
}
