//! Periodic sample generation during training
//!
//! [`SampleCallback`] is invoked by the training loop after every batch. On
//! steps that are a multiple of the configured interval it suspends gradient
//! checkpointing, generates seeded images for each sampling concept, writes
//! them to `<sample_save_dir>/<global_step>/<concept>-<sample>.png` and
//! optionally forwards them to a [`TelemetrySink`].
//!
//! The callback blocks the training loop while it runs. Failures are never
//! swallowed: a half-written step directory is left behind for diagnosis.

use candle_core::{Device, Shape, Tensor};
use image::DynamicImage;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

pub mod checkpointing;
pub mod params;
pub mod telemetry;

pub use checkpointing::{CheckpointToggle, CheckpointingSuspended};
pub use params::{rename_params, GenerationRequest, PARAM_RENAMES};
pub use telemetry::{ConceptSamples, JsonlTelemetrySink, SampleEvent, TelemetrySink};

use crate::config::{Config, SampleConcept, SamplingConfig};
use crate::error::{Error, Result};

/// Environment variables consulted, in order, for the process rank
const RANK_ENV_VARS: &[&str] = &["RANK", "LOCAL_RANK", "SLURM_PROCID"];

/// Device-bound random source for one sampling concept
pub struct SeededGenerator {
    device: Device,
    seed: u64,
    rng: StdRng,
}

impl SeededGenerator {
    /// Seed a generator for `device`. Accelerator devices are seeded as well.
    pub fn new(device: &Device, seed: u64) -> Result<Self> {
        if !device.is_cpu() {
            device.set_seed(seed)?;
        }
        Ok(Self {
            device: device.clone(),
            seed,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Seed this generator was created with
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Device noise is allocated on
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Host-side random source, for pipelines sampling outside of tensors
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Standard normal f32 noise of `shape`, e.g. initial latents
    pub fn randn<S: Into<Shape>>(&mut self, shape: S) -> Result<Tensor> {
        let shape = shape.into();
        let data: Vec<f32> = (0..shape.elem_count())
            .map(|_| StandardNormal.sample(&mut self.rng))
            .collect();
        Ok(Tensor::from_vec(data, shape, &self.device)?)
    }
}

/// Text-to-image generation pipeline driven by the callback.
///
/// Implementations must run inference only, without recording gradients.
pub trait GenerationPipeline {
    /// Device the pipeline runs on
    fn device(&self) -> &Device;

    /// Produce `request.num_images_per_prompt` images
    fn generate(
        &mut self,
        request: &GenerationRequest,
        generator: &mut SeededGenerator,
    ) -> Result<Vec<DynamicImage>>;

    /// Release cached accelerator memory
    fn release_cached_memory(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Disjoint borrows of the parts of a model the callback needs
pub struct ModelParts<'a> {
    /// Run configuration holding the sampling section
    pub config: &'a Config,
    /// Inference pipeline
    pub pipeline: &'a mut dyn GenerationPipeline,
    /// Denoising network
    pub unet: &'a mut dyn CheckpointToggle,
    /// Prompt encoder
    pub text_encoder: &'a mut dyn CheckpointToggle,
}

/// A model under training that can be sampled from
pub trait SamplingModel {
    /// Borrow the configuration, pipeline and trainable components at once
    fn parts(&mut self) -> ModelParts<'_>;
}

/// Result of one sampling episode
#[derive(Debug, Clone)]
pub struct SamplingOutcome {
    /// Global step the episode ran at
    pub step: u64,
    /// Directory the images were written to
    pub dir: PathBuf,
    /// Images per sampling concept, in configuration order
    pub concepts: Vec<ConceptSamples>,
}

impl SamplingOutcome {
    /// Total number of images saved
    pub fn image_count(&self) -> usize {
        self.concepts.iter().map(|c| c.images.len()).sum()
    }
}

/// Training-loop hook that periodically generates and saves sample images
pub struct SampleCallback {
    sample_dir: PathBuf,
    telemetry: Option<Box<dyn TelemetrySink>>,
    rank: usize,
    show_progress: bool,
}

impl SampleCallback {
    /// Callback writing under `sample_dir`; the process rank is read from the environment
    pub fn new(sample_dir: impl Into<PathBuf>) -> Self {
        Self {
            sample_dir: sample_dir.into(),
            telemetry: None,
            rank: process_rank(),
            show_progress: true,
        }
    }

    /// Callback writing under `config.sample_save_dir`
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sample_save_dir.clone())
    }

    /// Forward samples to `sink`
    pub fn with_telemetry(mut self, sink: Box<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Override the process rank
    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    /// Show a progress bar per concept
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Root directory for step folders
    pub fn sample_dir(&self) -> &Path {
        &self.sample_dir
    }

    /// Only rank 0 samples
    pub fn is_primary(&self) -> bool {
        self.rank == 0
    }

    /// Whether `global_step` is a sampling step under `sampling`
    pub fn is_due(sampling: Option<&SamplingConfig>, global_step: u64) -> Result<bool> {
        let Some(sampling) = sampling else {
            return Ok(false);
        };
        if sampling.concepts.is_empty() {
            return Ok(false);
        }
        if sampling.interval_steps == 0 {
            return Err(Error::config("Sampling interval_steps must be > 0"));
        }
        Ok(global_step % sampling.interval_steps == 0)
    }

    /// Run after each training batch. Returns `None` when nothing was sampled.
    pub fn on_train_batch_end<M: SamplingModel + ?Sized>(
        &mut self,
        global_step: u64,
        model: &mut M,
    ) -> Result<Option<SamplingOutcome>> {
        if !self.is_primary() {
            return Ok(None);
        }

        let parts = model.parts();
        if !Self::is_due(parts.config.sampling.as_ref(), global_step)? {
            return Ok(None);
        }

        self.sample(global_step, parts).map(Some)
    }

    #[instrument(skip(self, parts))]
    fn sample(&mut self, global_step: u64, parts: ModelParts<'_>) -> Result<SamplingOutcome> {
        let ModelParts {
            config,
            pipeline,
            unet,
            text_encoder,
        } = parts;
        let Some(sampling) = config.sampling.as_ref() else {
            return Err(Error::config("Sampling configuration missing"));
        };
        sampling.validate()?;

        let save_dir = self.sample_dir.join(global_step.to_string());
        fs::create_dir_all(&save_dir)?;
        info!(
            "Sampling {} concepts at step {} into {:?}",
            sampling.concepts.len(),
            global_step,
            save_dir
        );

        let images = {
            let _suspended = CheckpointingSuspended::new(vec![unet, text_encoder]);
            let images = sampling
                .concepts
                .iter()
                .map(|concept| self.generate_concept(&mut *pipeline, concept, sampling.batch_size))
                .collect::<Result<Vec<_>>>()?;
            pipeline.release_cached_memory()?;
            images
        };

        let mut concepts = Vec::with_capacity(images.len());
        for (i, (concept, images)) in sampling.concepts.iter().zip(images).enumerate() {
            let mut paths = Vec::with_capacity(images.len());
            for (j, image) in images.iter().enumerate() {
                let path = save_dir.join(format!("{}-{}.png", i, j));
                image.save(&path)?;
                paths.push(path);
            }
            concepts.push(ConceptSamples {
                prompt: concept.prompt.clone(),
                images,
                paths,
            });
        }

        let outcome = SamplingOutcome {
            step: global_step,
            dir: save_dir,
            concepts,
        };
        info!("Saved {} samples for step {}", outcome.image_count(), global_step);

        if let Some(sink) = self.telemetry.as_mut() {
            if config.log_samples() && outcome.image_count() > 0 {
                let event = SampleEvent {
                    samples: &outcome.concepts,
                };
                sink.log_samples(&event, global_step)?;
                debug!("Forwarded samples to {}", sink.name());
            }
        }

        Ok(outcome)
    }

    /// Generate `concept.num_samples` images in batches of at most `batch_size`
    fn generate_concept(
        &self,
        pipeline: &mut dyn GenerationPipeline,
        concept: &SampleConcept,
        batch_size: usize,
    ) -> Result<Vec<DynamicImage>> {
        let mut generator = SeededGenerator::new(pipeline.device(), concept.seed)?;
        let progress = self.progress_bar(concept);

        let mut images = Vec::with_capacity(concept.num_samples);
        let mut remaining = concept.num_samples;
        while remaining > 0 {
            let batch = remaining.min(batch_size);
            let request = GenerationRequest::for_concept(concept, batch);
            let produced = pipeline.generate(&request, &mut generator)?;
            if produced.len() != batch {
                return Err(Error::device(format!(
                    "pipeline returned {} images for a batch of {} ({:?})",
                    produced.len(),
                    batch,
                    concept.prompt
                )));
            }
            images.extend(produced);
            progress.inc(batch as u64);
            remaining -= batch;
        }

        progress.finish_and_clear();
        Ok(images)
    }

    fn progress_bar(&self, concept: &SampleConcept) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(concept.num_samples as u64);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:30.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(format!("Generating samples: {}", concept.prompt));
        bar
    }
}

/// Rank of this process in a multi-process run, 0 when not launched distributed
pub fn process_rank() -> usize {
    rank_from(|var| std::env::var(var).ok())
}

/// First parsable rank among [`RANK_ENV_VARS`]; unset or malformed values fall through
fn rank_from<F: Fn(&str) -> Option<String>>(lookup: F) -> usize {
    RANK_ENV_VARS
        .iter()
        .find_map(|var| lookup(var).and_then(|value| value.trim().parse().ok()))
        .unwrap_or(0)
}
