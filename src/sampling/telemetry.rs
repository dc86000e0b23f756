//! Forwarding sample images to an experiment tracker

use chrono::Utc;
use image::{DynamicImage, GenericImageView};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

/// Images produced for one sampling concept, in generation order
#[derive(Debug, Clone)]
pub struct ConceptSamples {
    /// Prompt the images were generated from
    pub prompt: String,
    /// Generated images
    pub images: Vec<DynamicImage>,
    /// Where each image was saved
    pub paths: Vec<PathBuf>,
}

/// Samples of one sampling episode, grouped by concept
#[derive(Debug, Clone, Copy)]
pub struct SampleEvent<'a> {
    /// One group per sampling concept, in configuration order
    pub samples: &'a [ConceptSamples],
}

impl SampleEvent<'_> {
    /// Total number of images in the event
    pub fn image_count(&self) -> usize {
        self.samples.iter().map(|s| s.images.len()).sum()
    }
}

/// Experiment tracking sink receiving sample images
pub trait TelemetrySink: Send {
    /// Sink name
    fn name(&self) -> &str;

    /// Record the samples of one episode at `step`
    fn log_samples(&mut self, event: &SampleEvent<'_>, step: u64) -> Result<()>;
}

/// Appends one JSON line per sampling episode to a local file
pub struct JsonlTelemetrySink {
    path: PathBuf,
}

#[derive(Serialize)]
struct SampleRecord<'a> {
    step: u64,
    timestamp: chrono::DateTime<Utc>,
    samples: Vec<ConceptRecord<'a>>,
}

#[derive(Serialize)]
struct ConceptRecord<'a> {
    prompt: &'a str,
    images: Vec<ImageRecord<'a>>,
}

#[derive(Serialize)]
struct ImageRecord<'a> {
    path: Option<&'a Path>,
    width: u32,
    height: u32,
}

impl JsonlTelemetrySink {
    /// Sink appending to `path`, created on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Output file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetrySink for JsonlTelemetrySink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn log_samples(&mut self, event: &SampleEvent<'_>, step: u64) -> Result<()> {
        let record = SampleRecord {
            step,
            timestamp: Utc::now(),
            samples: event
                .samples
                .iter()
                .map(|concept| ConceptRecord {
                    prompt: &concept.prompt,
                    images: concept
                        .images
                        .iter()
                        .enumerate()
                        .map(|(i, image)| {
                            let (width, height) = image.dimensions();
                            ImageRecord {
                                path: concept.paths.get(i).map(PathBuf::as_path),
                                width,
                                height,
                            }
                        })
                        .collect(),
                })
                .collect(),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        serde_json::to_writer(&mut file, &record)?;
        writeln!(file)?;

        debug!("Logged {} samples to {:?}", event.image_count(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_jsonl_appends_one_line_per_event() {
        let dir = TempDir::new().unwrap();
        let mut sink = JsonlTelemetrySink::new(dir.path().join("samples.jsonl"));
        let samples = vec![ConceptSamples {
            prompt: "sks dog".to_string(),
            images: vec![DynamicImage::new_rgb8(4, 3)],
            paths: vec![PathBuf::from("100/0-0.png")],
        }];
        let event = SampleEvent { samples: &samples };

        sink.log_samples(&event, 100).unwrap();
        sink.log_samples(&event, 200).unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["step"], 200);
        assert_eq!(lines[0]["samples"][0]["prompt"], "sks dog");
        assert_eq!(lines[0]["samples"][0]["images"][0]["width"], 4);
        assert_eq!(lines[0]["samples"][0]["images"][0]["path"], "100/0-0.png");
    }
}
