use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp", "heic", "heif",
];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov"];

/// Containers the image encoder cannot write; outputs switch to JPEG.
const JPEG_OUTPUT_EXTENSIONS: &[&str] = &["heic", "heif"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// Which media a directory scan picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MediaFilter {
    Images,
    Videos,
    #[default]
    Both,
}

impl MediaFilter {
    pub fn accepts(&self, kind: MediaKind) -> bool {
        matches!(
            (self, kind),
            (MediaFilter::Both, _)
                | (MediaFilter::Images, MediaKind::Image)
                | (MediaFilter::Videos, MediaKind::Video)
        )
    }
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

/// Classifies a path by its extension, case-insensitively.
pub fn media_kind(path: &Path) -> Option<MediaKind> {
    let ext = lowercase_extension(path)?;
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Supported files directly inside `dir`, sorted by file name.
pub fn list_media(dir: &Path, filter: MediaFilter) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| media_kind(e.path()).is_some_and(|k| filter.accepts(k)))
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Resolves the input argument to the list of files to process.
pub fn collect_inputs(input: &Path, filter: MediaFilter) -> Result<Vec<PathBuf>> {
    if input.is_dir() {
        return Ok(list_media(input, filter));
    }
    if !input.is_file() {
        bail!("Input path does not exist: {}", input.display());
    }
    match media_kind(input) {
        Some(_) => Ok(vec![input.to_path_buf()]),
        None => bail!(
            "Unsupported file format: {} (images: {}; videos: {})",
            input.display(),
            IMAGE_EXTENSIONS.join(", "),
            VIDEO_EXTENSIONS.join(", ")
        ),
    }
}

fn stem_of(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<stem><suffix><ext>` next to the input. HEIC/HEIF inputs produce `.jpg`.
pub fn output_path_for(input: &Path, suffix: &str) -> PathBuf {
    let ext = match lowercase_extension(input) {
        Some(e) if JPEG_OUTPUT_EXTENSIONS.contains(&e.as_str()) => "jpg".to_string(),
        Some(_) => input
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        None => String::new(),
    };
    let name = if ext.is_empty() {
        format!("{}{}", stem_of(input), suffix)
    } else {
        format!("{}{}.{}", stem_of(input), suffix, ext)
    };
    input.with_file_name(name)
}

/// PNG path used when the preferred output format cannot be written.
pub fn png_fallback_for(output: &Path) -> PathBuf {
    output.with_extension("png")
}

/// `<stem>-detections.json` next to the output file.
pub fn detections_path_for(output: &Path) -> PathBuf {
    output.with_file_name(format!("{}-detections.json", stem_of(output)))
}
