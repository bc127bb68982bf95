// Run artifact struct definitions
//
// Structs persisted as the `<stem>-detections.json` side file next to a
// redacted output.

use crate::pipeline::types::{BoundingBox, Detection};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Pixel-space box as written to the side file.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxRecord {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl From<BoundingBox> for BoxRecord {
    fn from(b: BoundingBox) -> Self {
        Self {
            x1: b.x1,
            y1: b.y1,
            x2: b.x2,
            y2: b.y2,
        }
    }
}

/// A single non-primary object.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoxRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl From<&Detection> for DetectionRecord {
    fn from(d: &Detection) -> Self {
        Self {
            label: d.class_label.clone(),
            confidence: d.confidence,
            bbox: d.bbox.into(),
            frame: d.frame_index,
            timestamp: d.timestamp.clone(),
        }
    }
}

/// Everything the secondary detector found in one input file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectionReport {
    pub source_file: String,
    pub total_detections: usize,
    pub detections: Vec<DetectionRecord>,
}

/// Formats a frame position as `HH:MM:SS.mmm`.
pub fn format_timestamp(frame_index: u64, fps: f64) -> String {
    let millis = if fps > 0.0 {
        (frame_index as f64 / fps * 1000.0).round() as i64
    } else {
        0
    };
    let d = Duration::milliseconds(millis);
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        d.num_hours(),
        d.num_minutes() % 60,
        d.num_seconds() % 60,
        d.num_milliseconds() % 1000
    )
}
