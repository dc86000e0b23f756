//! Prompt replication dataset used to drive class image generation

use serde::{Deserialize, Serialize};
use std::ops::Range;

use super::Dataset;
use crate::error::{Error, Result};

/// A prompt repeated `num_samples` times, so generation workers can split the work by index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptDataset {
    prompt: String,
    num_samples: usize,
}

/// One generation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptExample {
    /// Prompt to generate from
    pub prompt: String,
    /// Position in the replicated sequence
    pub index: usize,
}

impl PromptDataset {
    /// Repeat `prompt` `num_samples` times
    pub fn new(prompt: impl Into<String>, num_samples: usize) -> Self {
        Self {
            prompt: prompt.into(),
            num_samples,
        }
    }

    /// Example at `index`. Every index yields the same prompt.
    pub fn get(&self, index: usize) -> PromptExample {
        PromptExample {
            prompt: self.prompt.clone(),
            index,
        }
    }

    /// Contiguous index range owned by worker `rank` of `world_size`.
    ///
    /// Ranges are disjoint and together cover `0..num_samples`; the first
    /// `num_samples % world_size` workers get one extra index.
    pub fn shard(&self, rank: usize, world_size: usize) -> Result<Range<usize>> {
        if world_size == 0 || rank >= world_size {
            return Err(Error::config(format!(
                "invalid shard {} of {}",
                rank, world_size
            )));
        }
        let base = self.num_samples / world_size;
        let extra = self.num_samples % world_size;
        let start = rank * base + rank.min(extra);
        let len = base + usize::from(rank < extra);
        Ok(start..start + len)
    }
}

impl Dataset for PromptDataset {
    type Item = PromptExample;

    fn len(&self) -> usize {
        self.num_samples
    }

    fn get(&self, index: usize) -> Result<PromptExample> {
        Ok(PromptDataset::get(self, index))
    }
}
