//! YOLOv8 and YOLOv8-seg detectors on ONNX Runtime.
//!
//! Detection models emit `output0` shaped `[1, 4 + classes, anchors]`.
//! Segmentation models append 32 mask coefficients per anchor to `output0`
//! and emit prototypes as `output1` shaped `[1, 32, 160, 160]`.

use crate::pipeline::detection::{class_name, nms_indices, Detector};
use crate::pipeline::types::{BoundingBox, Detection, Frame, MaskBuffer};
use anyhow::{anyhow, bail, Context, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::{ArrayView2, ArrayView3};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use std::path::Path;
use tracing::{debug, info};

const INPUT_SIZE: u32 = 640;
const NUM_CLASSES: usize = 80;
const NMS_THRESHOLD: f32 = 0.45;
const MASK_THRESHOLD: f32 = 0.5;

/// Mask prototypes from a segmentation head, `[masks, height, width]`.
struct Prototypes {
    data: Vec<f32>,
    shape: (usize, usize, usize),
}

pub struct YoloDetector {
    session: Session,
    input_size: u32,
}

impl YoloDetector {
    pub fn new(model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            bail!("Model file not found: {}", model_path.display());
        }
        let model_bytes = std::fs::read(model_path)
            .with_context(|| format!("Failed to read model file {}", model_path.display()))?;

        let session = Session::builder()
            .map_err(|e| anyhow!("Failed to create session builder: {}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Failed to set optimization level: {}", e))?
            .commit_from_memory(&model_bytes)
            .map_err(|e| anyhow!("Failed to load model {}: {}", model_path.display(), e))?;

        info!("YoloDetector: loaded {}", model_path.display());
        Ok(Self {
            session,
            input_size: INPUT_SIZE,
        })
    }

    /// Resize to the square input, normalize to [0, 1], NCHW.
    fn preprocess(&self, frame: &Frame) -> Result<Value> {
        let size = self.input_size;
        let resized = imageops::resize(frame, size, size, FilterType::Triangle);
        let (w, h) = (size as usize, size as usize);

        let mut chw = vec![0f32; 3 * h * w];
        for (x, y, px) in resized.enumerate_pixels() {
            let idx = y as usize * w + x as usize;
            for c in 0..3 {
                chw[c * h * w + idx] = px[c] as f32 / 255.0;
            }
        }

        Tensor::from_array((vec![1usize, 3, h, w], chw.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| anyhow!("Failed to create tensor: {}", e))
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &Frame, confidence: f32) -> Result<Vec<Detection>> {
        let input = self.preprocess(frame)?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| anyhow!("ONNX inference failed: {}", e))?;

        let (shape, data) = outputs
            .get("output0")
            .ok_or_else(|| anyhow!("Missing output0 tensor"))?
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("Failed to extract output0: {}", e))?;
        if shape.len() != 3 {
            bail!("Unexpected output0 rank {}", shape.len());
        }
        let (channels, anchors) = (shape[1] as usize, shape[2] as usize);
        let predictions = data.to_vec();

        let prototypes = match outputs.get("output1") {
            Some(value) => {
                let (shape, data) = value
                    .try_extract_tensor::<f32>()
                    .map_err(|e| anyhow!("Failed to extract output1: {}", e))?;
                if shape.len() != 4 {
                    bail!("Unexpected output1 rank {}", shape.len());
                }
                Some(Prototypes {
                    data: data.to_vec(),
                    shape: (shape[1] as usize, shape[2] as usize, shape[3] as usize),
                })
            }
            None => None,
        };
        drop(outputs);

        let detections = decode_predictions(
            &predictions,
            (channels, anchors),
            prototypes.as_ref(),
            frame.dimensions(),
            self.input_size,
            confidence,
        )?;
        debug!("YoloDetector: {} detections", detections.len());
        Ok(detections)
    }
}

/// Turns raw head output into detections in frame coordinates.
fn decode_predictions(
    predictions: &[f32],
    (channels, anchors): (usize, usize),
    prototypes: Option<&Prototypes>,
    (frame_w, frame_h): (u32, u32),
    input_size: u32,
    confidence: f32,
) -> Result<Vec<Detection>> {
    if channels < 4 + NUM_CLASSES {
        bail!("output0 has {} channels, expected at least {}", channels, 4 + NUM_CLASSES);
    }
    let num_masks = match prototypes {
        Some(p) => p.shape.0,
        None => 0,
    };
    if channels < 4 + NUM_CLASSES + num_masks {
        bail!("output0 has {} channels but prototypes need {}", channels, num_masks);
    }

    // [channels, anchors] viewed as [anchors, channels]
    let preds = ArrayView2::from_shape((channels, anchors), predictions)
        .context("output0 does not match its shape")?;
    let preds = preds.t();

    let scale_x = frame_w as f32 / input_size as f32;
    let scale_y = frame_h as f32 / input_size as f32;

    let mut candidates = Vec::new();
    let mut coefficients = Vec::new();
    for row in preds.outer_iter() {
        let (best_class, best_score) = (0..NUM_CLASSES)
            .map(|c| (c, row[4 + c]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if best_score < confidence {
            continue;
        }

        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        let clamp = |v: f32, max: u32| (v.round() as i32).clamp(0, max as i32);
        let bbox = BoundingBox::new(
            clamp((cx - w / 2.0) * scale_x, frame_w),
            clamp((cy - h / 2.0) * scale_y, frame_h),
            clamp((cx + w / 2.0) * scale_x, frame_w),
            clamp((cy + h / 2.0) * scale_y, frame_h),
        );
        if bbox.is_empty() {
            continue;
        }

        candidates.push(Detection::new(bbox, class_name(best_class), best_score));
        coefficients.push(
            (0..num_masks)
                .map(|k| row[4 + NUM_CLASSES + k])
                .collect::<Vec<f32>>(),
        );
    }

    let keep = nms_indices(&candidates, NMS_THRESHOLD);
    let mut detections = Vec::with_capacity(keep.len());
    for i in keep {
        let det = candidates[i].clone();
        let det = match prototypes {
            Some(protos) => {
                let mask = decode_mask(&coefficients[i], protos, det.bbox, (frame_w, frame_h))?;
                det.with_mask(mask)
            }
            None => det,
        };
        detections.push(det);
    }
    Ok(detections)
}

/// `sigmoid(coefficients · prototypes)`, upsampled to the frame, limited to
/// the box and thresholded.
fn decode_mask(
    coefficients: &[f32],
    prototypes: &Prototypes,
    bbox: BoundingBox,
    (frame_w, frame_h): (u32, u32),
) -> Result<MaskBuffer> {
    let (num_masks, proto_h, proto_w) = prototypes.shape;
    let protos = ArrayView3::from_shape(prototypes.shape, &prototypes.data)
        .context("output1 does not match its shape")?;

    let mut logits = vec![0f32; proto_h * proto_w];
    for (k, &c) in coefficients.iter().enumerate().take(num_masks) {
        for (dst, &p) in logits.iter_mut().zip(protos.index_axis(ndarray::Axis(0), k).iter()) {
            *dst += c * p;
        }
    }
    let probs: Vec<f32> = logits.into_iter().map(|v| 1.0 / (1.0 + (-v).exp())).collect();

    let proto_img: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(proto_w as u32, proto_h as u32, probs)
            .ok_or_else(|| anyhow!("Prototype buffer has the wrong size"))?;
    let upsampled = imageops::resize(&proto_img, frame_w, frame_h, FilterType::Triangle);

    Ok(MaskBuffer::from_fn(frame_w, frame_h, |x, y| {
        let (xi, yi) = (x as i32, y as i32);
        xi >= bbox.x1
            && xi < bbox.x2
            && yi >= bbox.y1
            && yi < bbox.y2
            && upsampled.get_pixel(x, y)[0] > MASK_THRESHOLD
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One anchor per entry: (cx, cy, w, h, class, score, mask coefficient).
    fn head(anchors: &[(f32, f32, f32, f32, usize, f32, f32)], num_masks: usize) -> Vec<f32> {
        let channels = 4 + NUM_CLASSES + num_masks;
        let n = anchors.len();
        let mut out = vec![0f32; channels * n];
        for (i, &(cx, cy, w, h, class, score, coeff)) in anchors.iter().enumerate() {
            out[i] = cx;
            out[n + i] = cy;
            out[2 * n + i] = w;
            out[3 * n + i] = h;
            out[(4 + class) * n + i] = score;
            for k in 0..num_masks {
                out[(4 + NUM_CLASSES + k) * n + i] = coeff;
            }
        }
        out
    }

    #[test]
    fn test_decode_boxes_scaled_to_frame() {
        let preds = head(&[(320.0, 320.0, 64.0, 128.0, 0, 0.9, 0.0)], 0);
        let dets =
            decode_predictions(&preds, (84, 1), None, (1280, 640), 640, 0.33).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_label, "person");
        assert_eq!(dets[0].bbox, BoundingBox::new(576, 256, 704, 384));
        assert!(dets[0].mask.is_none());
    }

    #[test]
    fn test_decode_applies_threshold_and_nms() {
        let preds = head(
            &[
                (100.0, 100.0, 50.0, 50.0, 0, 0.9, 0.0),
                (102.0, 101.0, 50.0, 50.0, 0, 0.8, 0.0),
                (400.0, 400.0, 50.0, 50.0, 2, 0.2, 0.0),
            ],
            0,
        );
        let dets = decode_predictions(&preds, (84, 3), None, (640, 640), 640, 0.33).unwrap();
        assert_eq!(dets.len(), 1);
        assert!((dets[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_masks_cropped_to_box() {
        let num_masks = 2;
        let prototypes = Prototypes {
            data: vec![4.0; num_masks * 4 * 4],
            shape: (num_masks, 4, 4),
        };
        let preds = head(&[(320.0, 320.0, 320.0, 320.0, 0, 0.9, 1.0)], num_masks);
        let dets = decode_predictions(
            &preds,
            (4 + NUM_CLASSES + num_masks, 1),
            Some(&prototypes),
            (64, 64),
            640,
            0.33,
        )
        .unwrap();

        let mask = dets[0].mask.as_ref().unwrap();
        assert_eq!(mask.dimensions(), (64, 64));
        assert_eq!(dets[0].bbox, BoundingBox::new(16, 16, 48, 48));
        assert!(mask.get(32, 32));
        assert!(!mask.get(5, 5));
        assert_eq!(mask.coverage(), 32 * 32);
    }

    #[test]
    fn test_negative_logits_give_empty_mask() {
        let prototypes = Prototypes {
            data: vec![-4.0; 4 * 4],
            shape: (1, 4, 4),
        };
        let mask = decode_mask(&[1.0], &prototypes, BoundingBox::new(0, 0, 8, 8), (8, 8)).unwrap();
        assert_eq!(mask.coverage(), 0);
    }
}
