use crate::pipeline::types::{Detection, Frame};
use anyhow::Result;

/// COCO class names (80 classes), in model output order.
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
    "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
    "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
    "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
    "skateboard", "surfboard", "tennis racket", "bottle", "wine glass", "cup",
    "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

/// Label for a class id, falling back to `class_<id>` outside the COCO set.
pub fn class_name(class_id: usize) -> String {
    COCO_CLASSES
        .get(class_id)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("class_{}", class_id))
}

/// An instance detector. Boxes are always reported; masks only by
/// segmentation models.
pub trait Detector {
    fn detect(&mut self, frame: &Frame, confidence: f32) -> Result<Vec<Detection>>;
}

/// Greedy class-aware non-maximum suppression. Returns the indices of the
/// kept detections, highest confidence first.
pub fn nms_indices(detections: &[Detection], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| {
        detections[b]
            .confidence
            .total_cmp(&detections[a].confidence)
    });

    let mut keep: Vec<usize> = Vec::with_capacity(order.len());
    for i in order {
        let det = &detections[i];
        let suppressed = keep.iter().any(|&k| {
            let kept = &detections[k];
            kept.class_label == det.class_label && kept.bbox.iou(&det.bbox) > iou_threshold
        });
        if !suppressed {
            keep.push(i);
        }
    }
    keep
}
