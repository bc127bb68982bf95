mod cli;
mod config;
mod error;
mod pipeline;
mod run_artifacts;
mod run_context;
mod video;

use anyhow::Result;
use cli::Args;
use config::ProcessingConfig;
use pipeline::detection::Detector;
use pipeline::image::StandardImageIo;
use pipeline::orchestrator::{Collaborators, Detectors, Processor};
use pipeline::yolo::YoloDetector;
use tracing_subscriber::EnvFilter;
use video::audio::FfmpegAudioCodec;
use video::progress::{IndicatifProgress, NoopProgress, ProgressObserver};

fn load_detectors(config: &ProcessingConfig) -> Result<Detectors> {
    let primary = YoloDetector::new(&config.model)?;
    let secondary = if config.object_detection {
        Some(Box::new(YoloDetector::new(&config.detection_model)?) as Box<dyn Detector>)
    } else {
        None
    };
    Ok(Detectors {
        primary: Box::new(primary),
        secondary,
    })
}

fn run(args: &Args) -> Result<i32> {
    let config = args.to_config();
    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Ok(1);
    }

    tracing::info!(
        "Mask: {:?}, confidence {:.2}, expansion {}px, segmentation {}",
        config.mask_type,
        config.confidence,
        config.expansion_px,
        if config.use_segmentation { "on" } else { "off" }
    );
    if config.keep_audio && !config.retains_audio() {
        tracing::warn!(
            "Audio will be dropped from videos: frame interval {} changes the timeline",
            config.frame_interval
        );
    }

    let progress: Box<dyn ProgressObserver> = if config.show_progress {
        Box::new(IndicatifProgress::new())
    } else {
        Box::new(NoopProgress)
    };
    let collaborators = Collaborators {
        image_io: Box::new(StandardImageIo),
        video_backend: video::backend_for(config.video_backend),
        audio_codec: Box::new(FfmpegAudioCodec),
        progress,
    };

    let mut processor = Processor::new(config, collaborators, load_detectors)?;
    let summary = processor.process_path(&args.input)?;

    println!(
        "Processed {}/{} file(s) successfully",
        summary.successful, summary.total
    );
    for (path, reason) in &summary.failures {
        println!("  failed: {} ({})", path.display(), reason);
    }
    Ok(summary.exit_code())
}

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse_args();

    let code = run(&args)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
