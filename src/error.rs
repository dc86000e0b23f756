//! Error types for dreamkit

use thiserror::Error;

use crate::data::DataError;

/// Main error type for dreamkit operations
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed dataset / sampling configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dataset resolution or materialization failure
    #[error(transparent)]
    Data(#[from] DataError),

    /// Tokenizer failure
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Accelerator failure surfaced by the generation pipeline (e.g. out of memory)
    #[error("Device error: {0}")]
    Device(String),

    /// Image encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for dreamkit operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a tokenizer error
    pub fn tokenizer(msg: impl Into<String>) -> Self {
        Self::Tokenizer(msg.into())
    }

    /// Create a device error
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }
}
