//! Instance / class paired dataset for prior-preservation training

use rand::Rng;
use std::sync::Arc;
use tracing::{info, instrument};

use super::entry_store::resolve_entries;
use super::{Dataset, Entry, EntryStore, ImageTransform};
use crate::concept::Concept;
use crate::config::DatasetConfig;
use crate::error::{Error, Result};
use crate::tokenizer::{PromptTokenizer, TokenizerAdapter};

/// Pairs each instance entry with an independently indexed class entry.
///
/// Both pools wrap around on their own length, so they may differ in size.
#[derive(Debug, Clone)]
pub struct PairedDataset {
    instances: EntryStore,
    classes: EntryStore,
}

impl PairedDataset {
    /// Build both pools. Every concept must define a class set.
    #[instrument(skip_all, fields(concepts = concepts.len()))]
    pub fn new<R: Rng>(
        concepts: &[Concept],
        tokenizer: &TokenizerAdapter,
        transform: ImageTransform,
        rng: &mut R,
    ) -> Result<Self> {
        let class_sets = concepts
            .iter()
            .enumerate()
            .map(|(i, c)| {
                c.class_set
                    .as_ref()
                    .ok_or_else(|| Error::config(format!("concept {} has no class_set", i)))
            })
            .collect::<Result<Vec<_>>>()?;

        let instances = EntryStore::new(concepts, tokenizer, transform, rng)?;
        let class_entries = resolve_entries(class_sets, tokenizer)?;
        let classes = EntryStore::from_entries(class_entries, transform, rng);

        info!(
            "Paired dataset: {} instance entries, {} class entries",
            instances.len(),
            classes.len()
        );
        Ok(Self { instances, classes })
    }

    /// Build from configuration, seeding both shuffles from `config.seed` when set
    pub fn from_config(
        config: &DatasetConfig,
        concepts: &[Concept],
        tokenizer: Arc<dyn PromptTokenizer>,
    ) -> Result<Self> {
        let adapter = TokenizerAdapter::new(tokenizer, config.pad_tokens);
        Self::new(concepts, &adapter, config.transform(), &mut config.shuffle_rng())
    }

    /// Instance pool
    pub fn instances(&self) -> &EntryStore {
        &self.instances
    }

    /// Class pool
    pub fn classes(&self) -> &EntryStore {
        &self.classes
    }

    /// Number of class entries
    pub fn class_len(&self) -> usize {
        self.classes.len()
    }

    /// Instance at `index % len()` and class at `index % class_len()`
    pub fn get(&self, index: usize) -> Result<(Entry, Entry)> {
        let instance = self.instances.get(index)?;
        let class = self.classes.get(index)?;
        Ok((instance, class))
    }
}

impl Dataset for PairedDataset {
    type Item = (Entry, Entry);

    fn len(&self) -> usize {
        self.instances.len()
    }

    fn get(&self, index: usize) -> Result<(Entry, Entry)> {
        PairedDataset::get(self, index)
    }
}
