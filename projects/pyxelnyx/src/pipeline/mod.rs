// Redaction pipeline: detection, masking and compositing, plus the batch
// orchestrator that drives images and videos through them.

pub mod aggregator;
pub mod composite;
pub mod cv;
pub mod detection;
pub mod frame_worker;
pub mod geometry;
pub mod image;
pub mod orchestrator;
#[cfg(test)]
pub mod testing;
pub mod types;
pub mod yolo;
