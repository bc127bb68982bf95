use crate::pipeline::types::Detection;
use crate::run_artifacts::{DetectionRecord, DetectionReport};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Collects non-primary detections for the file currently being processed.
#[derive(Debug, Default)]
pub struct DetectionAggregator {
    records: Vec<DetectionRecord>,
}

impl DetectionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append<'a, I>(&mut self, detections: I)
    where
        I: IntoIterator<Item = &'a Detection>,
    {
        self.records
            .extend(detections.into_iter().map(DetectionRecord::from));
    }

    /// Drops everything collected so far.
    pub fn reset(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn report(&self, source_name: &str) -> DetectionReport {
        DetectionReport {
            source_file: source_name.to_string(),
            total_detections: self.len(),
            detections: self.records.clone(),
        }
    }

    /// Writes the collected records as pretty-printed JSON.
    pub fn serialize(&self, destination: &Path, source_name: &str) -> Result<()> {
        let file = File::create(destination)
            .with_context(|| format!("Failed to create {}", destination.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.report(source_name))
            .with_context(|| format!("Failed to write {}", destination.display()))?;
        writer.flush()?;
        tracing::info!(
            "Aggregator: wrote {} detections to {}",
            self.len(),
            destination.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::BoundingBox;

    #[test]
    fn test_append_and_reset() {
        let mut agg = DetectionAggregator::new();
        assert!(agg.is_empty());

        let dets = vec![
            Detection::new(BoundingBox::new(0, 0, 5, 5), "car", 0.6),
            Detection::new(BoundingBox::new(5, 5, 9, 9), "dog", 0.4).at_frame(3, "00:00:00.100"),
        ];
        agg.append(&dets);
        assert_eq!(agg.len(), 2);

        agg.reset();
        assert!(agg.is_empty());
    }

    #[test]
    fn test_serialize_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip-detections.json");

        let mut agg = DetectionAggregator::new();
        agg.append(&[Detection::new(BoundingBox::new(1, 2, 3, 4), "car", 0.75)]);
        agg.serialize(&path, "clip.mp4").unwrap();

        let report: DetectionReport =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(report.source_file, "clip.mp4");
        assert_eq!(report.total_detections, 1);
        assert_eq!(report.detections[0].label, "car");
        assert_eq!(report.detections[0].bbox.y2, 4);
    }
}
