// Embeddings module
// Turns text into unit-norm dense vectors, batched and capped per device

pub mod hashing;
pub mod ollama;
pub mod pooling;

#[cfg(test)]
mod tests;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::EncoderConfig;

pub use hashing::HashingEncoder;
pub use ollama::OllamaEncoder;
pub use pooling::{TokenBatch, l2_normalize, mean_pool};

/// Largest batch sent through the model at once on an accelerator
pub const ACCELERATOR_BATCH_CAP: usize = 16;
/// Largest batch sent through the model at once on CPU
pub const CPU_BATCH_CAP: usize = 64;

/// Maps text to L2-normalized vectors.
///
/// Implementations must return exactly one vector per input, in input order,
/// and must truncate over-long inputs instead of failing on them.
pub trait Encoder: Send + Sync {
    /// Output width, when known before the first call
    fn dimension_hint(&self) -> Option<usize>;

    /// Encode `texts`, processing at most `batch_size` inputs per model call
    /// (further capped by the encoder's device limit).
    fn encode(&self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>>;

    /// Encode a single query string
    #[inline]
    fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.encode(&[text.to_string()], 1)?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Encoder returned no vector for a single input"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderBackend {
    /// Remote embedding model served by Ollama
    Ollama,
    /// Local deterministic bag-of-tokens model
    Hashing,
}

impl std::fmt::Display for EncoderBackend {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            EncoderBackend::Ollama => write!(f, "ollama"),
            EncoderBackend::Hashing => write!(f, "hashing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Accelerator,
}

impl Device {
    #[inline]
    pub fn batch_cap(self) -> usize {
        match self {
            Device::Cpu => CPU_BATCH_CAP,
            Device::Accelerator => ACCELERATOR_BATCH_CAP,
        }
    }

    /// Clamp a caller's requested batch size to what this device can hold
    #[inline]
    pub fn effective_batch_size(self, requested: usize) -> usize {
        requested.clamp(1, self.batch_cap())
    }
}

impl std::fmt::Display for Device {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// Build the encoder selected in `config`
#[inline]
pub fn build_encoder(config: &EncoderConfig) -> Result<Box<dyn Encoder>> {
    match config.backend {
        EncoderBackend::Ollama => Ok(Box::new(OllamaEncoder::new(config)?)),
        EncoderBackend::Hashing => Ok(Box::new(HashingEncoder::new(
            config.dimension as usize,
            config.max_tokens as usize,
            config.device,
        ))),
    }
}
