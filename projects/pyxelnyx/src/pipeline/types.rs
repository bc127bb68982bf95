use image::RgbImage;
use serde::{Deserialize, Serialize};

/// An 8-bit RGB frame, row-major.
pub type Frame = RgbImage;

/// Class label of the instances that get redacted.
pub const PRIMARY_CLASS: &str = "person";

/// Pixel-space bounding box, corners inclusive-exclusive.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = BoundingBox {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        };
        let intersection = inter.area() as f32;
        let union = self.area() as f32 + other.area() as f32 - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Single-channel binary mask with the frame's dimensions. Values are 0 or 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl MaskBuffer {
    /// All-zero mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    /// Wraps raw row-major bytes; any non-zero value counts as set.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize {
            return None;
        }
        let data = data.into_iter().map(|v| (v != 0) as u8).collect();
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Builds a mask from a predicate evaluated at every pixel.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        let mut mask = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if f(x, y) {
                    mask.set(x, y, true);
                }
            }
        }
        mask
    }

    /// Mask covering the given box, clamped to the buffer.
    pub fn from_box(width: u32, height: u32, bbox: BoundingBox) -> Self {
        Self::from_fn(width, height, |x, y| {
            let (x, y) = (x as i32, y as i32);
            x >= bbox.x1 && x < bbox.x2 && y >= bbox.y1 && y < bbox.y2
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.data[self.index(x, y)] != 0
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let idx = self.index(x, y);
        self.data[idx] = value as u8;
    }

    /// Raw row-major values.
    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Number of set pixels.
    pub fn coverage(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// True when every pixel set here is also set in `other`.
    pub fn is_subset_of(&self, other: &MaskBuffer) -> bool {
        self.dimensions() == other.dimensions()
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(&a, &b)| a == 0 || b != 0)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

/// One instance reported by a detector.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub mask: Option<MaskBuffer>,
    pub class_label: String,
    pub confidence: f32,
    pub frame_index: Option<u64>,
    pub timestamp: Option<String>,
}

impl Detection {
    pub fn new(bbox: BoundingBox, class_label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            mask: None,
            class_label: class_label.into(),
            confidence,
            frame_index: None,
            timestamp: None,
        }
    }

    pub fn with_mask(mut self, mask: MaskBuffer) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Tags the detection with its position in a video stream.
    pub fn at_frame(mut self, frame_index: u64, timestamp: impl Into<String>) -> Self {
        self.frame_index = Some(frame_index);
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn is_primary(&self) -> bool {
        self.class_label == PRIMARY_CLASS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_iou() {
        let a = BoundingBox::new(0, 0, 10, 10);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);

        let b = BoundingBox::new(5, 0, 15, 10);
        // 50 / 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);

        let c = BoundingBox::new(20, 20, 30, 30);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn test_mask_from_box_and_subset() {
        let small = MaskBuffer::from_box(20, 20, BoundingBox::new(5, 5, 10, 10));
        let large = MaskBuffer::from_box(20, 20, BoundingBox::new(0, 0, 15, 15));
        assert_eq!(small.coverage(), 25);
        assert!(small.is_subset_of(&large));
        assert!(!large.is_subset_of(&small));
    }

    #[test]
    fn test_mask_from_box_clamps_out_of_bounds() {
        let mask = MaskBuffer::from_box(10, 10, BoundingBox::new(-5, -5, 3, 3));
        assert_eq!(mask.coverage(), 9);
    }

    #[test]
    fn test_mask_from_raw_binarizes() {
        let mask = MaskBuffer::from_raw(2, 2, vec![0, 255, 1, 0]).unwrap();
        assert_eq!(mask.as_raw(), &[0, 1, 1, 0]);
        assert!(MaskBuffer::from_raw(2, 2, vec![0; 3]).is_none());
    }
}
