#[cfg(test)]
mod tests;

use anyhow::Result;
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use super::pooling::{TokenBatch, l2_normalize, mean_pool};
use super::{Device, Encoder};

const CLS_TOKEN: &str = "[CLS]";
const PAD_TOKEN: &str = "[PAD]";

/// Local encoder with hashed token embeddings.
///
/// Text is split into lowercase Unicode words behind a leading `[CLS]`
/// token and truncated to `max_tokens`. Each token maps to a fixed
/// pseudo-random vector derived from its BLAKE3 hash; a sentence vector is
/// the masked mean of its token vectors, L2-normalized. Texts that share
/// words therefore land close together, which is enough for offline builds
/// and for tests.
#[derive(Debug, Clone)]
pub struct HashingEncoder {
    dimension: usize,
    max_tokens: usize,
    device: Device,
}

impl HashingEncoder {
    #[inline]
    pub fn new(dimension: usize, max_tokens: usize, device: Device) -> Self {
        Self {
            dimension: dimension.max(1),
            max_tokens: max_tokens.max(1),
            device,
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Split `text` into model tokens, truncating silently
    #[inline]
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::with_capacity(self.max_tokens.min(64));
        tokens.push(CLS_TOKEN.to_string());
        tokens.extend(
            text.unicode_words()
                .map(str::to_lowercase)
                .take(self.max_tokens.saturating_sub(1)),
        );
        tokens
    }

    fn token_embedding(&self, token: &str) -> Vec<f32> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(token.as_bytes());
        let mut reader = hasher.finalize_xof();

        let mut bytes = vec![0u8; self.dimension * 4];
        reader.fill(&mut bytes);

        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                (raw as f32 / u32::MAX as f32).mul_add(2.0, -1.0)
            })
            .collect()
    }

    fn encode_chunk(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let sequences: Vec<Vec<String>> = texts.iter().map(|t| self.tokenize(t)).collect();
        let batch = TokenBatch::pad(sequences, &PAD_TOKEN.to_string());

        batch
            .rows
            .iter()
            .zip(&batch.attention_mask)
            .map(|(row, mask)| {
                let token_embeddings: Vec<Vec<f32>> =
                    row.iter().map(|token| self.token_embedding(token)).collect();
                let mut pooled = mean_pool(&token_embeddings, mask, self.dimension);
                l2_normalize(&mut pooled);
                pooled
            })
            .collect()
    }
}

impl Encoder for HashingEncoder {
    #[inline]
    fn dimension_hint(&self) -> Option<usize> {
        Some(self.dimension)
    }

    #[inline]
    fn encode(&self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_size = self.device.effective_batch_size(batch_size);
        debug!(
            "Hashing {} texts in chunks of {} (requested {})",
            texts.len(),
            chunk_size,
            batch_size
        );

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(chunk_size) {
            vectors.extend(self.encode_chunk(chunk));
        }

        Ok(vectors)
    }
}
