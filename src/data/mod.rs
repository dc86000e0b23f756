//! Training datasets for concept fine-tuning
//!
//! Concepts are resolved into [`Entry`] records once, shuffled, and kept
//! read-only. Image tensors are only decoded when an entry is fetched, and
//! every fetch returns a fresh value, so datasets can be shared across
//! loader threads without locking.

use candle_core::Tensor;
use std::path::PathBuf;

pub mod entry_store;
pub mod loaders;
pub mod paired;
pub mod prompt;
pub mod transform;

#[cfg(test)]
mod test_module;

// Re-exports
pub use entry_store::EntryStore;
pub use loaders::{DataLoader, DataLoaderConfig};
pub use paired::PairedDataset;
pub use prompt::{PromptDataset, PromptExample};
pub use transform::ImageTransform;

use crate::error::Result;

/// Common trait for index-addressable datasets
pub trait Dataset: Send + Sync {
    /// Item produced by [`Dataset::get`]
    type Item: Send;

    /// Get the number of samples in the dataset
    fn len(&self) -> usize;

    /// Check if the dataset is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a sample by index
    fn get(&self, index: usize) -> Result<Self::Item>;
}

/// One training example
#[derive(Debug, Clone)]
pub struct Entry {
    /// Source image file
    pub path: PathBuf,
    /// `[3, size, size]` image in `[-1, 1]`; set on fetched copies only
    pub image: Option<Tensor>,
    /// Prompt token ids
    pub token_ids: Vec<u32>,
    /// Reserved for precomputed VAE latents
    pub latent: Option<Tensor>,
    /// Reserved for precomputed text conditioning
    pub condition: Option<Tensor>,
}

impl Entry {
    /// Unmaterialized entry
    pub fn new(path: PathBuf, token_ids: Vec<u32>) -> Self {
        Self {
            path,
            image: None,
            token_ids,
            latent: None,
            condition: None,
        }
    }

    /// Copy of this entry carrying `image`
    pub fn with_image(&self, image: Tensor) -> Self {
        Self {
            image: Some(image),
            ..self.clone()
        }
    }
}

/// Error types for data loading
#[derive(thiserror::Error, Debug)]
pub enum DataError {
    /// A dataset set's directory could not be listed
    #[error("Dataset directory not readable: {path}: {source}")]
    DatasetNotFound {
        /// Directory that was listed
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Prompt combination is on but an image has no readable `.txt` sidecar
    #[error("Missing prompt sidecar {sidecar} for image {image}: {source}")]
    MissingSidecar {
        /// Image the prompt was needed for
        image: PathBuf,
        /// Expected `.txt` file
        sidecar: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// An image file could not be decoded
    #[error("Unreadable image {path}: {source}")]
    InvalidImage {
        /// Image file
        path: PathBuf,
        /// Decoder error
        #[source]
        source: image::ImageError,
    },

    /// Tokenization produced an empty sequence
    #[error("Prompt produced no tokens: {prompt:?}")]
    EmptyTokens {
        /// Offending prompt
        prompt: String,
    },

    /// An entry was requested from a dataset with no entries
    #[error("Dataset is empty")]
    EmptyDataset,
}
