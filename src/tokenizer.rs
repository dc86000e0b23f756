//! Prompt tokenization

use std::path::Path;
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, warn};

use crate::data::DataError;
use crate::error::{Error, Result};

/// Tokens tried, in order, when looking up the padding id
const PAD_TOKEN_CANDIDATES: &[&str] = &["<pad>", "[PAD]", "<|endoftext|>"];

/// Text tokenizer used to turn prompts into token ids
pub trait PromptTokenizer: Send + Sync {
    /// Maximum sequence length the text encoder accepts
    fn model_max_length(&self) -> usize;

    /// Tokenize `text`, truncating at `max_length` and padding to it when `pad` is set
    fn tokenize(&self, text: &str, pad: bool, max_length: usize) -> Result<Vec<u32>>;
}

/// HuggingFace `tokenizer.json` backed tokenizer
pub struct HfPromptTokenizer {
    tokenizer: Tokenizer,
    model_max_length: usize,
    pad_id: u32,
}

impl HfPromptTokenizer {
    /// Load from a `tokenizer.json` file
    pub fn from_file(path: impl AsRef<Path>, model_max_length: usize) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| Error::tokenizer(format!("Failed to load {}: {}", path.display(), e)))?;
        Self::new(tokenizer, model_max_length)
    }

    /// Wrap an already constructed tokenizer
    pub fn new(mut tokenizer: Tokenizer, model_max_length: usize) -> Result<Self> {
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: model_max_length,
                ..Default::default()
            }))
            .map_err(|e| Error::tokenizer(format!("Invalid truncation: {}", e)))?;
        tokenizer.with_padding(None);

        let pad_id = match pad_token_id(&tokenizer) {
            Some(id) => id,
            None => {
                warn!(
                    "No pad token among {:?}; padding with id 0",
                    PAD_TOKEN_CANDIDATES
                );
                0
            }
        };
        debug!("Tokenizer max length {}, pad id {}", model_max_length, pad_id);

        Ok(Self {
            tokenizer,
            model_max_length,
            pad_id,
        })
    }
}

/// Id of the first [`PAD_TOKEN_CANDIDATES`] entry in the vocabulary
fn pad_token_id(tokenizer: &Tokenizer) -> Option<u32> {
    PAD_TOKEN_CANDIDATES
        .iter()
        .find_map(|t| tokenizer.token_to_id(t))
}

impl PromptTokenizer for HfPromptTokenizer {
    fn model_max_length(&self) -> usize {
        self.model_max_length
    }

    fn tokenize(&self, text: &str, pad: bool, max_length: usize) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| Error::tokenizer(format!("Encoding failed: {}", e)))?;

        let mut ids = encoding.get_ids().to_vec();
        ids.truncate(max_length);
        if pad {
            ids.resize(max_length, self.pad_id);
        }
        Ok(ids)
    }
}

/// Applies the dataset's padding policy on top of a [`PromptTokenizer`]
#[derive(Clone)]
pub struct TokenizerAdapter {
    tokenizer: Arc<dyn PromptTokenizer>,
    pad_tokens: bool,
}

impl TokenizerAdapter {
    /// Create an adapter
    pub fn new(tokenizer: Arc<dyn PromptTokenizer>, pad_tokens: bool) -> Self {
        Self {
            tokenizer,
            pad_tokens,
        }
    }

    /// Maximum token sequence length
    pub fn max_length(&self) -> usize {
        self.tokenizer.model_max_length()
    }

    /// Whether sequences are padded to [`Self::max_length`]
    pub fn pad_tokens(&self) -> bool {
        self.pad_tokens
    }

    /// Token ids for `prompt`. Never empty, never longer than the maximum.
    pub fn tokenize(&self, prompt: &str) -> Result<Vec<u32>> {
        let max_length = self.max_length();
        let mut ids = self.tokenizer.tokenize(prompt, self.pad_tokens, max_length)?;

        ids.truncate(max_length);
        if self.pad_tokens && ids.len() != max_length {
            return Err(Error::tokenizer(format!(
                "Padded sequence has length {}, expected {}",
                ids.len(),
                max_length
            )));
        }
        if ids.is_empty() {
            return Err(DataError::EmptyTokens {
                prompt: prompt.to_string(),
            }
            .into());
        }

        Ok(ids)
    }
}
