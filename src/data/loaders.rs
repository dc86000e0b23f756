//! Batch assembly with parallel item fetches

use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::Dataset;
use crate::error::{Error, Result};

/// Configuration for DataLoader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLoaderConfig {
    /// Batch size
    pub batch_size: usize,
    /// Whether to shuffle indices every epoch
    pub shuffle: bool,
    /// Whether to drop the last incomplete batch
    pub drop_last: bool,
    /// Number of worker threads fetching items (0 = one per core)
    pub num_workers: usize,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            shuffle: true,
            drop_last: false,
            num_workers: 4,
        }
    }
}

/// Fetches batches of a [`Dataset`] on a dedicated worker pool
pub struct DataLoader<D: Dataset> {
    dataset: Arc<D>,
    config: DataLoaderConfig,
    pool: rayon::ThreadPool,
}

impl<D: Dataset> DataLoader<D> {
    /// Create a new DataLoader
    pub fn new(dataset: Arc<D>, config: DataLoaderConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::config("DataLoader batch_size must be > 0"));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_workers)
            .thread_name(|i| format!("dreamkit-loader-{}", i))
            .build()
            .map_err(|e| Error::Other(anyhow::anyhow!("Failed to start loader pool: {}", e)))?;

        info!(
            "Creating DataLoader with batch_size={}, num_workers={}, shuffle={}",
            config.batch_size, config.num_workers, config.shuffle
        );

        Ok(Self {
            dataset,
            config,
            pool,
        })
    }

    /// Underlying dataset
    pub fn dataset(&self) -> &Arc<D> {
        &self.dataset
    }

    /// Get the number of batches per epoch
    pub fn num_batches(&self) -> usize {
        let dataset_size = self.dataset.len();
        if self.config.drop_last {
            dataset_size / self.config.batch_size
        } else {
            dataset_size.div_ceil(self.config.batch_size)
        }
    }

    /// Index batches for one epoch
    pub fn batches<R: Rng>(&self, rng: &mut R) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.config.shuffle {
            indices.shuffle(rng);
        }

        indices
            .chunks(self.config.batch_size)
            .filter(|chunk| !self.config.drop_last || chunk.len() == self.config.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Fetch `indices` concurrently; items come back in index order
    #[instrument(skip(self, indices), fields(len = indices.len()))]
    pub fn load_batch(&self, indices: &[usize]) -> Result<Vec<D::Item>> {
        let dataset = &self.dataset;
        let items = self
            .pool
            .install(|| indices.par_iter().map(|&i| dataset.get(i)).collect::<Result<Vec<_>>>())?;
        debug!("Loaded batch of {}", items.len());
        Ok(items)
    }

    /// Load the index batches of one epoch (see [`Self::batches`]) in order
    pub fn epoch(
        &self,
        batches: Vec<Vec<usize>>,
    ) -> impl Iterator<Item = Result<Vec<D::Item>>> + '_ {
        batches.into_iter().map(move |batch| self.load_batch(&batch))
    }
}
