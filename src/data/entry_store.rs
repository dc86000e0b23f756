//! Shuffled, index-addressable store of resolved instance entries

use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{DataError, Dataset, Entry, ImageTransform};
use crate::concept::{resolve_set, Concept, DatasetSet};
use crate::config::DatasetConfig;
use crate::error::Result;
use crate::tokenizer::{PromptTokenizer, TokenizerAdapter};

/// Base dataset: every concept's instance images, shuffled once at construction
#[derive(Debug, Clone)]
pub struct EntryStore {
    entries: Arc<[Entry]>,
    transform: ImageTransform,
}

impl EntryStore {
    /// Resolve and tokenize all instance sets, then shuffle with `rng`
    #[instrument(skip_all, fields(concepts = concepts.len()))]
    pub fn new<R: Rng>(
        concepts: &[Concept],
        tokenizer: &TokenizerAdapter,
        transform: ImageTransform,
        rng: &mut R,
    ) -> Result<Self> {
        let entries = resolve_entries(concepts.iter().map(|c| &c.instance_set), tokenizer)?;
        let store = Self::from_entries(entries, transform, rng);
        info!("Resolved {} instance entries", store.len());
        Ok(store)
    }

    /// Build from configuration, seeding the shuffle from `config.seed` when set
    pub fn from_config(
        config: &DatasetConfig,
        concepts: &[Concept],
        tokenizer: Arc<dyn PromptTokenizer>,
    ) -> Result<Self> {
        let adapter = TokenizerAdapter::new(tokenizer, config.pad_tokens);
        Self::new(concepts, &adapter, config.transform(), &mut config.shuffle_rng())
    }

    /// Shuffle `entries` once and take ownership of them
    pub(crate) fn from_entries<R: Rng>(
        mut entries: Vec<Entry>,
        transform: ImageTransform,
        rng: &mut R,
    ) -> Self {
        entries.shuffle(rng);
        Self {
            entries: entries.into(),
            transform,
        }
    }

    /// Entries in shuffled order, without images
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Image pipeline applied on access
    pub fn transform(&self) -> ImageTransform {
        self.transform
    }

    /// Entry at `index % len` with a freshly decoded image
    pub fn get(&self, index: usize) -> Result<Entry> {
        if self.entries.is_empty() {
            return Err(DataError::EmptyDataset.into());
        }
        let entry = &self.entries[index % self.entries.len()];
        self.materialize(entry)
    }

    /// New entry with `entry`'s image decoded and transformed; `entry` is untouched
    pub fn materialize(&self, entry: &Entry) -> Result<Entry> {
        debug!("Materializing {:?}", entry.path);
        let image = self.transform.load_tensor(&entry.path)?;
        Ok(entry.with_image(image))
    }
}

impl Dataset for EntryStore {
    type Item = Entry;

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, index: usize) -> Result<Entry> {
        EntryStore::get(self, index)
    }
}

/// Resolve and tokenize the given sets, in order
pub(crate) fn resolve_entries<'a>(
    sets: impl IntoIterator<Item = &'a DatasetSet>,
    tokenizer: &TokenizerAdapter,
) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for set in sets {
        for raw in resolve_set(set)? {
            let raw = raw?;
            let token_ids = tokenizer.tokenize(&raw.prompt)?;
            entries.push(Entry::new(raw.path, token_ids));
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::DatasetSet;
    use crate::data::test_module::{concept_dir, write_png};
    use crate::error::Error;
    use crate::tokenizer::tests::adapter;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn store(concepts: &[Concept], seed: u64) -> EntryStore {
        EntryStore::new(
            concepts,
            &adapter(16, false),
            ImageTransform::new(8, false),
            &mut StdRng::seed_from_u64(seed),
        )
        .unwrap()
    }

    #[test]
    fn test_length_counts_non_text_files_across_concepts() {
        let root = TempDir::new().unwrap();
        let a = concept_dir(root.path(), "a", 3);
        let b = concept_dir(root.path(), "b", 4);
        std::fs::write(a.join("notes.txt"), "ignored").unwrap();

        let concepts = vec![
            Concept::new(DatasetSet::new(&a, "a photo of sks dog")),
            Concept::new(DatasetSet::new(&b, "a photo of zwx cat")),
        ];
        let store = store(&concepts, 0);

        assert_eq!(store.len(), 7);
        let paths: HashSet<_> = store.entries().iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths.len(), 7);
        assert!(store.entries().iter().all(|e| e.image.is_none()));
    }

    #[test]
    fn test_index_wraps() {
        let root = TempDir::new().unwrap();
        let dir = concept_dir(root.path(), "a", 3);
        let concepts = vec![Concept::new(
            DatasetSet::new(&dir, "x").with_sidecar_template("{PROMPT} {TXT_PROMPT}"),
        )];
        for i in 0..3 {
            std::fs::write(dir.join(format!("{}.txt", i)), "word ".repeat(i + 1)).unwrap();
        }
        let store = store(&concepts, 3);

        for i in 0..3 {
            let a = store.get(i).unwrap();
            let b = store.get(i + 3).unwrap();
            let c = store.get(i + 300).unwrap();
            assert_eq!(a.token_ids, b.token_ids);
            assert_eq!(a.token_ids, c.token_ids);
            assert_eq!(a.path, c.path);
        }
    }

    #[test]
    fn test_get_materializes_copy() {
        let root = TempDir::new().unwrap();
        let dir = concept_dir(root.path(), "a", 2);
        let store = store(&[Concept::new(DatasetSet::new(&dir, "x"))], 1);

        let entry = store.get(0).unwrap();
        let image = entry.image.as_ref().unwrap();
        assert_eq!(image.dims(), &[3, 8, 8]);
        assert!(entry.latent.is_none());
        assert!(entry.condition.is_none());
        assert!(store.entries()[0].image.is_none());
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let root = TempDir::new().unwrap();
        let dir = concept_dir(root.path(), "a", 12);
        let concepts = vec![Concept::new(DatasetSet::new(&dir, "x"))];

        let order = |seed| -> Vec<_> {
            store(&concepts, seed).entries().iter().map(|e| e.path.clone()).collect()
        };
        assert_eq!(order(5), order(5));
    }

    #[test]
    fn test_from_config_pads_tokens() {
        let root = TempDir::new().unwrap();
        let dir = concept_dir(root.path(), "a", 2);
        let config = DatasetConfig {
            size: 8,
            pad_tokens: true,
            seed: Some(9),
            ..Default::default()
        };
        let tokenizer = Arc::new(crate::tokenizer::tests::WordTokenizer { max_length: 10 });
        let store = EntryStore::from_config(
            &config,
            &[Concept::new(DatasetSet::new(&dir, "a photo"))],
            tokenizer,
        )
        .unwrap();

        assert!(store.entries().iter().all(|e| e.token_ids.len() == 10));
    }

    #[test]
    fn test_unreadable_image_propagates() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("broken");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("bad.png"), b"garbage").unwrap();
        let store = store(&[Concept::new(DatasetSet::new(&dir, "x"))], 0);

        assert!(matches!(
            store.get(0),
            Err(Error::Data(DataError::InvalidImage { .. }))
        ));
    }

    #[test]
    fn test_empty_store() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("empty");
        std::fs::create_dir(&dir).unwrap();
        let store = store(&[Concept::new(DatasetSet::new(&dir, "x"))], 0);

        assert!(store.is_empty());
        assert!(matches!(
            store.get(0),
            Err(Error::Data(DataError::EmptyDataset))
        ));
    }

    #[test]
    fn test_concurrent_gets() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("imgs");
        std::fs::create_dir(&dir).unwrap();
        for i in 0..4 {
            write_png(&dir, &format!("{}.png", i), 12 + i, 10);
        }
        let store = Arc::new(store(&[Concept::new(DatasetSet::new(&dir, "x"))], 2));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || store.get(i).map(|e| e.image.is_some()))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().unwrap());
        }
    }
}
