// Batch orchestrator: runs every input file through the image or video
// pipeline with one set of loaded models.
//
// Files are processed strictly one after another. A failure on one file is
// logged and recorded, and the batch moves on.

use crate::config::ProcessingConfig;
use crate::pipeline::aggregator::DetectionAggregator;
use crate::pipeline::detection::Detector;
use crate::pipeline::frame_worker::FrameWorker;
use crate::pipeline::image::{process_image, ImageIo, ImageOutcome};
use crate::pipeline::types::Frame;
use crate::run_context::{collect_inputs, detections_path_for, media_kind, output_path_for, MediaKind};
use crate::video::audio::AudioCodec;
use crate::video::processor::{AudioOutcome, FramePosition, VideoJob, VideoPipeline};
use crate::video::progress::ProgressObserver;
use crate::video::VideoBackend;
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

/// Detectors built after the configuration has been validated.
pub struct Detectors {
    pub primary: Box<dyn Detector>,
    pub secondary: Option<Box<dyn Detector>>,
}

/// Media adapters the processor drives.
pub struct Collaborators {
    pub image_io: Box<dyn ImageIo>,
    pub video_backend: Box<dyn VideoBackend>,
    pub audio_codec: Box<dyn AudioCodec>,
    pub progress: Box<dyn ProgressObserver>,
}

/// A file finished, but not exactly as requested.
#[derive(Debug, Clone, PartialEq)]
pub enum Degradation {
    FormatSubstituted { requested: PathBuf, written: PathBuf },
    AudioDropped(AudioOutcome),
    FramesPassedThrough(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Redacted {
        output: PathBuf,
        detections_file: Option<PathBuf>,
        degradations: Vec<Degradation>,
    },
    /// No person in a still image; nothing was written.
    NoDetections { detections_file: Option<PathBuf> },
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FileOutcome::Redacted { .. })
    }
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub successful: usize,
    pub total: usize,
    pub failures: Vec<(PathBuf, String)>,
}

impl BatchSummary {
    /// Non-zero when a non-empty batch produced nothing.
    pub fn exit_code(&self) -> i32 {
        if self.total > 0 && self.successful == 0 {
            1
        } else {
            0
        }
    }
}

pub struct Processor {
    config: ProcessingConfig,
    worker: FrameWorker,
    aggregator: DetectionAggregator,
    collaborators: Collaborators,
}

impl Processor {
    /// Validates `config`, then loads the detectors.
    pub fn new<L>(config: ProcessingConfig, collaborators: Collaborators, load: L) -> Result<Self>
    where
        L: FnOnce(&ProcessingConfig) -> Result<Detectors>,
    {
        config.validate()?;
        let detectors = load(&config).context("Failed to load detection models")?;
        let worker = FrameWorker::new(
            config.redaction_settings(),
            detectors.primary,
            detectors.secondary,
        );
        if worker.has_secondary() {
            tracing::info!("Object detection enabled, writing *-detections.json side files");
        }
        Ok(Self {
            config,
            worker,
            aggregator: DetectionAggregator::new(),
            collaborators,
        })
    }

    /// Processes a single file or every matching file in a directory.
    pub fn process_path(&mut self, input: &Path) -> Result<BatchSummary> {
        let files = collect_inputs(input, self.config.media_filter)?;
        let mut summary = BatchSummary {
            total: files.len(),
            ..Default::default()
        };

        if files.is_empty() {
            tracing::warn!("No supported media files found in {}", input.display());
            return Ok(summary);
        }
        tracing::info!("Found {} file(s) to process", files.len());

        for (i, file) in files.iter().enumerate() {
            tracing::info!("Processing [{}/{}]: {}", i + 1, files.len(), file.display());
            match self.process_file(file) {
                Ok(outcome) if outcome.is_success() => summary.successful += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Failed to process {}: {:#}", file.display(), e);
                    summary.failures.push((file.clone(), format!("{:#}", e)));
                }
            }
        }

        Ok(summary)
    }

    /// Runs one file through the matching pipeline.
    pub fn process_file(&mut self, input: &Path) -> Result<FileOutcome> {
        self.aggregator.reset();

        let kind = media_kind(input)
            .ok_or_else(|| anyhow!("Unsupported file format: {}", input.display()))?;
        let output = output_path_for(input, &self.config.suffix);

        let outcome = match kind {
            MediaKind::Image => self.process_image_file(input, &output)?,
            MediaKind::Video => self.process_video_file(input, &output)?,
        };

        for degradation in outcome_degradations(&outcome) {
            tracing::warn!("{}: {:?}", input.display(), degradation);
        }
        Ok(outcome)
    }

    fn process_image_file(&mut self, input: &Path, output: &Path) -> Result<FileOutcome> {
        let outcome = process_image(
            self.collaborators.image_io.as_ref(),
            &mut self.worker,
            &mut self.aggregator,
            input,
            output,
        )?;

        Ok(match outcome {
            ImageOutcome::Redacted {
                output: written,
                substituted_from,
                ..
            } => {
                let detections_file = self.write_detections(input, &written)?;
                let degradations = substituted_from
                    .map(|requested| Degradation::FormatSubstituted {
                        requested,
                        written: written.clone(),
                    })
                    .into_iter()
                    .collect();
                FileOutcome::Redacted {
                    output: written,
                    detections_file,
                    degradations,
                }
            }
            ImageOutcome::NoDetections => FileOutcome::NoDetections {
                detections_file: self.write_detections(input, output)?,
            },
        })
    }

    fn process_video_file(&mut self, input: &Path, output: &Path) -> Result<FileOutcome> {
        let job = VideoJob {
            source: input,
            destination: output,
            frame_interval: self.config.frame_interval,
            keep_audio: self.config.keep_audio,
        };
        let pipeline = VideoPipeline::new(
            self.collaborators.video_backend.as_ref(),
            self.collaborators.audio_codec.as_ref(),
            self.collaborators.progress.as_ref(),
        );

        let worker = &mut self.worker;
        let aggregator = &mut self.aggregator;
        let mut on_frame = |frame: &Frame, pos: FramePosition| -> Result<Frame> {
            let redaction = worker.process(frame)?;
            if !redaction.background.is_empty() {
                let timestamp = pos.timestamp();
                let tagged: Vec<_> = redaction
                    .background
                    .into_iter()
                    .map(|d| d.at_frame(pos.index, timestamp.clone()))
                    .collect();
                aggregator.append(&tagged);
            }
            Ok(redaction.frame)
        };
        let report = pipeline.run(&job, &mut on_frame)?;

        tracing::info!(
            "Video: finished {} in {:.1}s ({} frames)",
            output.display(),
            report.duration.as_secs_f64(),
            report.frames_written
        );

        let mut degradations = Vec::new();
        if report.frames_passed_through > 0 {
            degradations.push(Degradation::FramesPassedThrough(report.frames_passed_through));
        }
        if matches!(
            report.audio,
            AudioOutcome::MergeFailed | AudioOutcome::EncoderUnavailable
        ) {
            degradations.push(Degradation::AudioDropped(report.audio));
        }

        Ok(FileOutcome::Redacted {
            output: output.to_path_buf(),
            detections_file: self.write_detections(input, output)?,
            degradations,
        })
    }

    /// Writes the side file when anything was collected for this input.
    fn write_detections(&self, input: &Path, output: &Path) -> Result<Option<PathBuf>> {
        if self.aggregator.is_empty() {
            return Ok(None);
        }
        let path = detections_path_for(output);
        let source_name = input
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.aggregator.serialize(&path, &source_name)?;
        Ok(Some(path))
    }
}

fn outcome_degradations(outcome: &FileOutcome) -> &[Degradation] {
    match outcome {
        FileOutcome::Redacted { degradations, .. } => degradations,
        FileOutcome::NoDetections { .. } => &[],
    }
}
