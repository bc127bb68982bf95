//! In-memory stand-ins for the detector and image I/O ports.

use crate::error::{MediaError, MediaResult};
use crate::pipeline::detection::Detector;
use crate::pipeline::image::ImageIo;
use crate::pipeline::types::{Detection, Frame};
use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub fn random_frame(width: u32, height: u32, seed: u64) -> Frame {
    let mut rng = StdRng::seed_from_u64(seed);
    Frame::from_fn(width, height, |_, _| {
        image::Rgb([rng.random(), rng.random(), rng.random()])
    })
}

/// Returns the same detections for every frame and counts its calls.
#[derive(Clone, Default)]
pub struct FixedDetector {
    pub detections: Vec<Detection>,
    pub calls: Rc<Cell<usize>>,
}

impl FixedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            calls: Rc::default(),
        }
    }
}

impl Detector for FixedDetector {
    fn detect(&mut self, _frame: &Frame, _confidence: f32) -> Result<Vec<Detection>> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.detections.clone())
    }
}

pub struct FailingDetector;

impl Detector for FailingDetector {
    fn detect(&mut self, _frame: &Frame, _confidence: f32) -> Result<Vec<Detection>> {
        bail!("inference failed")
    }
}

/// Image store keyed by path. Extensions listed in `unwritable` fail with
/// `UnsupportedFormat`.
#[derive(Clone, Default)]
pub struct MemoryImageIo {
    pub files: Rc<RefCell<HashMap<PathBuf, Frame>>>,
    pub unwritable: Vec<&'static str>,
    pub decodes: Rc<Cell<usize>>,
}

impl MemoryImageIo {
    pub fn with_file(self, path: impl Into<PathBuf>, frame: Frame) -> Self {
        self.files.borrow_mut().insert(path.into(), frame);
        self
    }

    pub fn get(&self, path: &Path) -> Option<Frame> {
        self.files.borrow().get(path).cloned()
    }
}

impl ImageIo for MemoryImageIo {
    fn decode(&self, path: &Path) -> Result<Frame> {
        self.decodes.set(self.decodes.get() + 1);
        match self.files.borrow().get(path) {
            Some(frame) => Ok(frame.clone()),
            None => bail!("cannot decode {}", path.display()),
        }
    }

    fn encode(&self, frame: &Frame, path: &Path) -> MediaResult<()> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if self.unwritable.contains(&ext) {
            return Err(MediaError::UnsupportedFormat(ext.to_string()));
        }
        self.files
            .borrow_mut()
            .insert(path.to_path_buf(), frame.clone());
        Ok(())
    }
}
