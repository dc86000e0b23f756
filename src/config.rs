//! Configuration structures for dataset construction and periodic sampling

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::concept::Concept;
use crate::data::ImageTransform;
use crate::error::{Error, Result};

/// Top-level run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Dataset construction options
    #[serde(default)]
    pub dataset: DatasetConfig,
    /// Concepts to train on
    #[serde(default)]
    pub concepts: Vec<Concept>,
    /// Periodic sampling; disabled when absent
    #[serde(default)]
    pub sampling: Option<SamplingConfig>,
    /// Experiment tracking sinks
    #[serde(default)]
    pub loggers: LoggersConfig,
    /// Root directory for sample images
    #[serde(default = "default_sample_save_dir")]
    pub sample_save_dir: PathBuf,
}

fn default_sample_save_dir() -> PathBuf {
    PathBuf::from("samples")
}

impl Config {
    /// Load configuration from a JSON (`.json`) or YAML file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let config: Self = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.dataset.validate()?;

        for (i, concept) in self.concepts.iter().enumerate() {
            concept
                .validate()
                .map_err(|e| Error::config(format!("concept {}: {}", i, e)))?;
        }

        if let Some(sampling) = &self.sampling {
            sampling.validate()?;
        }

        Ok(())
    }

    /// Whether sample images should be forwarded to the telemetry sink.
    ///
    /// Requires the tracker to be enabled and its `sample` flag set.
    pub fn log_samples(&self) -> bool {
        self.loggers
            .wandb
            .as_ref()
            .map(|w| w.enabled && w.sample)
            .unwrap_or(false)
    }
}

/// Dataset construction options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Output side length of every image tensor
    #[serde(default = "default_size")]
    pub size: u32,
    /// Center crop instead of a random crop
    #[serde(default)]
    pub center_crop: bool,
    /// Pad token sequences to the tokenizer's maximum length
    #[serde(default)]
    pub pad_tokens: bool,
    /// Shuffle seed. Without it the example order differs between runs.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_size() -> u32 {
    512
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            size: default_size(),
            center_crop: false,
            pad_tokens: false,
            seed: None,
        }
    }
}

impl DatasetConfig {
    /// Image pipeline for these options
    pub fn transform(&self) -> ImageTransform {
        ImageTransform::new(self.size, self.center_crop)
    }

    /// Shuffle source: seeded when `seed` is set, OS entropy otherwise
    pub fn shuffle_rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    /// Validate dataset options
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::config("Dataset image size must be > 0"));
        }
        Ok(())
    }
}

/// Periodic sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Sample when `global_step % interval_steps == 0`
    pub interval_steps: u64,
    /// Maximum number of images per pipeline call
    pub batch_size: usize,
    /// Prompts to sample, in order
    #[serde(default)]
    pub concepts: Vec<SampleConcept>,
}

impl SamplingConfig {
    /// Validate sampling options
    pub fn validate(&self) -> Result<()> {
        if self.interval_steps == 0 {
            return Err(Error::config("Sampling interval_steps must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("Sampling batch_size must be > 0"));
        }
        Ok(())
    }
}

/// One prompt to sample periodically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleConcept {
    /// Prompt text
    pub prompt: String,
    /// Generator seed
    #[serde(default)]
    pub seed: u64,
    /// Number of images to produce
    #[serde(default = "default_num_samples")]
    pub num_samples: usize,
    /// Free-form generation parameters (`cfg_scale`, `steps`, `negative_prompt`, ...)
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

fn default_num_samples() -> usize {
    1
}

/// Experiment tracking configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggersConfig {
    /// Weights & Biases style sink
    #[serde(default)]
    pub wandb: Option<WandbConfig>,
}

/// Weights & Biases configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WandbConfig {
    /// Enable the sink
    #[serde(default)]
    pub enabled: bool,
    /// Forward sample images
    #[serde(default)]
    pub sample: bool,
    /// Project name
    #[serde(default)]
    pub project: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use test_case::test_case;

    const YAML: &str = r#"
dataset:
  size: 256
  center_crop: true
concepts:
  - instance_set:
      path: data/instance
      prompt: a photo of sks dog
    class_set:
      path: data/class
      prompt: a photo of a dog
sampling:
  interval_steps: 100
  batch_size: 2
  concepts:
    - prompt: sks dog on the beach
      seed: 42
      num_samples: 4
      cfg_scale: 7.5
      steps: 30
loggers:
  wandb:
    enabled: true
    sample: true
"#;

    #[test]
    fn test_load_yaml_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, YAML).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.dataset.size, 256);
        assert!(config.dataset.center_crop);
        assert!(!config.dataset.pad_tokens);
        assert_eq!(config.concepts.len(), 1);
        assert!(config.concepts[0].class_set.is_some());
        assert_eq!(config.sample_save_dir, PathBuf::from("samples"));

        let sampling = config.sampling.as_ref().unwrap();
        assert_eq!(sampling.interval_steps, 100);
        let concept = &sampling.concepts[0];
        assert_eq!(concept.seed, 42);
        assert_eq!(concept.num_samples, 4);
        assert_eq!(concept.params.get("steps"), Some(&serde_json::json!(30)));
        assert!(!concept.params.contains_key("prompt"));
        assert!(config.log_samples());
    }

    #[test]
    fn test_load_json_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"concepts": []}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.dataset, DatasetConfig::default());
        assert!(config.sampling.is_none());
        assert!(!config.log_samples());
    }

    #[test_case(true, true, true ; "enabled with samples")]
    #[test_case(true, false, false ; "enabled without samples")]
    #[test_case(false, true, false ; "disabled with samples")]
    #[test_case(false, false, false ; "disabled")]
    fn test_log_samples_requires_enabled_tracker(enabled: bool, sample: bool, expected: bool) {
        let yaml = format!("loggers:\n  wandb:\n    enabled: {}\n    sample: {}\n", enabled, sample);
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.log_samples(), expected);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let sampling = SamplingConfig {
            interval_steps: 0,
            batch_size: 1,
            concepts: vec![],
        };
        assert!(matches!(sampling.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_size_rejected() {
        let dataset = DatasetConfig {
            size: 0,
            ..Default::default()
        };
        assert!(dataset.validate().is_err());
    }
}
