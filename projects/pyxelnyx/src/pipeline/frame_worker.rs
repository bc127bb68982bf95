use crate::error::MediaResult;
use crate::pipeline::composite::{blend, combine, MaskTransform};
use crate::pipeline::detection::Detector;
use crate::pipeline::geometry::{expand_box, expand_mask, StructuringElement};
use crate::pipeline::types::{Detection, Frame, MaskBuffer};
use anyhow::{Context, Result};
use image::imageops;

/// Settings that shape how a single frame is redacted.
#[derive(Debug, Clone, Copy)]
pub struct RedactionSettings {
    pub transform: MaskTransform,
    pub expansion_px: u32,
    /// Element used to grow segmentation masks.
    pub dilation: StructuringElement,
    pub use_segmentation: bool,
    pub confidence: f32,
}

/// Result of running one frame through the worker.
pub struct FrameRedaction {
    pub frame: Frame,
    /// Number of primary-class instances that were redacted.
    pub people: usize,
    /// Non-primary detections from the secondary detector.
    pub background: Vec<Detection>,
}

/// Runs detection and compositing for one frame at a time.
///
/// Instances with a segmentation mask are expanded, merged and blended in a
/// single pass. Instances without one fall back to their expanded box, and
/// those boxes are transformed one after another into the running buffer.
pub struct FrameWorker {
    settings: RedactionSettings,
    detector: Box<dyn Detector>,
    secondary: Option<Box<dyn Detector>>,
}

impl FrameWorker {
    pub fn new(
        settings: RedactionSettings,
        detector: Box<dyn Detector>,
        secondary: Option<Box<dyn Detector>>,
    ) -> Self {
        Self {
            settings,
            detector,
            secondary,
        }
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    /// Detects, redacts and collects background objects for one frame.
    ///
    /// Primary detection failures are returned. Secondary detection failures
    /// are logged and yield no background objects.
    pub fn process(&mut self, frame: &Frame) -> Result<FrameRedaction> {
        let people = self.detect_people(frame)?;
        let redacted = if people.is_empty() {
            frame.clone()
        } else {
            self.redact(frame, &people)
                .context("Failed to composite detections")?
        };
        let background = self.detect_background(frame);

        Ok(FrameRedaction {
            frame: redacted,
            people: people.len(),
            background,
        })
    }

    /// Primary-class detections above the confidence threshold.
    pub fn detect_people(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let detections = self
            .detector
            .detect(frame, self.settings.confidence)
            .context("Primary detector failed")?;
        Ok(detections.into_iter().filter(|d| d.is_primary()).collect())
    }

    /// Non-primary detections from the secondary detector, if one is loaded.
    pub fn detect_background(&mut self, frame: &Frame) -> Vec<Detection> {
        let Some(secondary) = self.secondary.as_mut() else {
            return Vec::new();
        };
        match secondary.detect(frame, self.settings.confidence) {
            Ok(detections) => detections.into_iter().filter(|d| !d.is_primary()).collect(),
            Err(e) => {
                tracing::warn!("Secondary detector failed: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Redacts the given detections with the configured transform.
    pub fn redact(&self, frame: &Frame, people: &[Detection]) -> MediaResult<Frame> {
        let transform = self.settings.transform;
        redact_with(frame, people, &self.settings, |f| transform.apply(f))
    }
}

/// Redaction with an explicit transform function.
pub fn redact_with<F>(
    frame: &Frame,
    people: &[Detection],
    settings: &RedactionSettings,
    mut transform: F,
) -> MediaResult<Frame>
where
    F: FnMut(&Frame) -> MediaResult<Frame>,
{
    let (masked, boxed): (Vec<&Detection>, Vec<&Detection>) = people
        .iter()
        .partition(|d| settings.use_segmentation && d.mask.is_some());

    let mut result = frame.clone();

    if !masked.is_empty() {
        let expanded = masked
            .iter()
            .filter_map(|d| d.mask.as_ref())
            .map(|m| expand_mask(m, settings.expansion_px, settings.dilation))
            .collect::<MediaResult<Vec<MaskBuffer>>>()?;
        if let Some(mask) = combine(&expanded)? {
            result = blend(&result, &mask, &mut transform)?;
        }
    }

    let bounds = frame.dimensions();
    for det in boxed {
        let region = expand_box(det.bbox, settings.expansion_px, bounds);
        if region.is_empty() {
            tracing::debug!("Skipping empty box {:?}", det.bbox);
            continue;
        }
        let (x, y) = (region.x1 as u32, region.y1 as u32);
        let crop = imageops::crop_imm(
            &result,
            x,
            y,
            region.width() as u32,
            region.height() as u32,
        )
        .to_image();
        let transformed = transform(&crop)?;
        imageops::replace(&mut result, &transformed, x as i64, y as i64);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{random_frame, FailingDetector, FixedDetector};
    use crate::pipeline::types::BoundingBox;
    use std::cell::Cell;

    fn settings(transform: MaskTransform) -> RedactionSettings {
        RedactionSettings {
            transform,
            expansion_px: 25,
            dilation: StructuringElement::Disk,
            use_segmentation: true,
            confidence: 0.33,
        }
    }

    #[test]
    fn test_box_fallback_black() {
        let frame = random_frame(100, 100, 7);
        let person = Detection::new(BoundingBox::new(10, 10, 30, 30), "person", 0.9);
        let out = redact_with(
            &frame,
            &[person],
            &settings(MaskTransform::Black),
            |f| MaskTransform::Black.apply(f),
        )
        .unwrap();

        for (x, y, px) in out.enumerate_pixels() {
            if x < 55 && y < 55 {
                assert_eq!(px.0, [0, 0, 0], "({}, {})", x, y);
            } else {
                assert_eq!(px, frame.get_pixel(x, y), "({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_masks_merge_into_single_transform() {
        let frame = random_frame(40, 40, 11);
        let left = MaskBuffer::from_box(40, 40, BoundingBox::new(0, 0, 20, 40));
        let right = MaskBuffer::from_box(40, 40, BoundingBox::new(20, 0, 40, 40));
        let people = vec![
            Detection::new(BoundingBox::new(0, 0, 20, 40), "person", 0.8).with_mask(left),
            Detection::new(BoundingBox::new(20, 0, 40, 40), "person", 0.7).with_mask(right),
        ];

        let calls = Cell::new(0);
        let out = redact_with(&frame, &people, &settings(MaskTransform::Black), |f| {
            calls.set(calls.get() + 1);
            MaskTransform::Black.apply(f)
        })
        .unwrap();

        assert_eq!(calls.get(), 1);
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_dilation_shape_follows_settings() {
        let frame = random_frame(40, 40, 12);
        let dot = MaskBuffer::from_box(40, 40, BoundingBox::new(20, 20, 21, 21));
        let people =
            vec![Detection::new(BoundingBox::new(20, 20, 21, 21), "person", 0.9).with_mask(dot)];
        let mut s = settings(MaskTransform::Black);
        s.expansion_px = 4;

        let disk = redact_with(&frame, &people, &s, |f| MaskTransform::Black.apply(f)).unwrap();
        s.dilation = StructuringElement::Square;
        let square = redact_with(&frame, &people, &s, |f| MaskTransform::Black.apply(f)).unwrap();

        assert_eq!(disk.get_pixel(24, 20).0, [0, 0, 0]);
        assert_eq!(disk.get_pixel(24, 24), frame.get_pixel(24, 24));
        assert_eq!(square.get_pixel(24, 24).0, [0, 0, 0]);
    }

    #[test]
    fn test_segmentation_disabled_uses_boxes() {
        let frame = random_frame(60, 60, 3);
        let mask = MaskBuffer::from_box(60, 60, BoundingBox::new(30, 30, 31, 31));
        let people = vec![
            Detection::new(BoundingBox::new(0, 0, 5, 5), "person", 0.8).with_mask(mask),
        ];
        let mut s = settings(MaskTransform::Black);
        s.use_segmentation = false;
        s.expansion_px = 0;

        let out = redact_with(&frame, &people, &s, |f| MaskTransform::Black.apply(f)).unwrap();
        assert_eq!(out.get_pixel(2, 2).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(30, 30), frame.get_pixel(30, 30));
    }

    #[test]
    fn test_overlapping_boxes_compound() {
        let frame = random_frame(80, 80, 5);
        let a = Detection::new(BoundingBox::new(10, 10, 50, 50), "person", 0.9);
        let b = Detection::new(BoundingBox::new(30, 30, 70, 70), "person", 0.8);
        let mut s = settings(MaskTransform::blur(5, 1));
        s.expansion_px = 0;
        let blur = |f: &Frame| MaskTransform::blur(5, 1).apply(f);

        let single_a = redact_with(&frame, std::slice::from_ref(&a), &s, blur).unwrap();
        let both = redact_with(&frame, &[a, b], &s, blur).unwrap();

        // The overlap is blurred twice when both boxes are applied.
        let twice_over_a = {
            let crop = imageops::crop_imm(&single_a, 30, 30, 40, 40).to_image();
            let mut expected = single_a.clone();
            imageops::replace(&mut expected, &blur(&crop).unwrap(), 30, 30);
            expected
        };
        assert_eq!(both, twice_over_a);
        assert_ne!(both.get_pixel(40, 40), single_a.get_pixel(40, 40));
    }

    #[test]
    fn test_empty_detections_leave_frame_unchanged() {
        let frame = random_frame(20, 20, 1);
        let out = redact_with(&frame, &[], &settings(MaskTransform::Black), |f| {
            MaskTransform::Black.apply(f)
        })
        .unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn test_process_filters_classes() {
        let frame = random_frame(50, 50, 9);
        let primary = FixedDetector::new(vec![
            Detection::new(BoundingBox::new(0, 0, 10, 10), "person", 0.9),
            Detection::new(BoundingBox::new(20, 20, 30, 30), "dog", 0.9),
        ]);
        let secondary = FixedDetector::new(vec![
            Detection::new(BoundingBox::new(0, 0, 10, 10), "person", 0.9),
            Detection::new(BoundingBox::new(20, 20, 30, 30), "car", 0.7),
        ]);
        let mut worker = FrameWorker::new(
            settings(MaskTransform::Black),
            Box::new(primary),
            Some(Box::new(secondary)),
        );

        let result = worker.process(&frame).unwrap();
        assert_eq!(result.people, 1);
        assert_eq!(result.background.len(), 1);
        assert_eq!(result.background[0].class_label, "car");
    }

    #[test]
    fn test_secondary_failure_is_contained() {
        let frame = random_frame(30, 30, 2);
        let mut worker = FrameWorker::new(
            settings(MaskTransform::Black),
            Box::new(FixedDetector::default()),
            Some(Box::new(FailingDetector)),
        );
        let result = worker.process(&frame).unwrap();
        assert_eq!(result.people, 0);
        assert!(result.background.is_empty());
        assert_eq!(result.frame, frame);
    }

    #[test]
    fn test_primary_failure_propagates() {
        let frame = random_frame(30, 30, 2);
        let mut worker = FrameWorker::new(
            settings(MaskTransform::Black),
            Box::new(FailingDetector),
            None,
        );
        assert!(worker.process(&frame).is_err());
    }
}
