//! dreamkit - Concept datasets and periodic sampling for subject-driven
//! text-to-image fine-tuning
//!
//! The crate turns folders of concept images into shuffled, tokenized
//! training examples (optionally paired with class images for prior
//! preservation) and provides a training-loop callback that periodically
//! renders seeded sample images to disk.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod concept;
pub mod config;
pub mod data;
pub mod error;
pub mod sampling;
pub mod tokenizer;

// Re-exports
pub use concept::{combine_prompt, resolve_set, Concept, DatasetSet, RawEntry};
pub use config::{Config, DatasetConfig, LoggersConfig, SampleConcept, SamplingConfig};
pub use data::{
    DataError, DataLoader, DataLoaderConfig, Dataset, Entry, EntryStore, ImageTransform,
    PairedDataset, PromptDataset, PromptExample,
};
pub use error::{Error, Result};
pub use sampling::{
    GenerationPipeline, GenerationRequest, JsonlTelemetrySink, ModelParts, SampleCallback,
    SamplingModel, SamplingOutcome, SeededGenerator, TelemetrySink,
};
pub use tokenizer::{HfPromptTokenizer, PromptTokenizer, TokenizerAdapter};
