
/// A padded batch of token sequences with its attention mask.
///
/// Every row has length `seq_len`; `attention_mask[i][j]` is 1 for a real
/// token and 0 for padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBatch<T> {
    pub rows: Vec<Vec<T>>,
    pub attention_mask: Vec<Vec<u8>>,
    pub seq_len: usize,
}

impl<T: Clone> TokenBatch<T> {
    /// Pad `sequences` to the longest one using `pad`
    #[inline]
    pub fn pad(sequences: Vec<Vec<T>>, pad: &T) -> Self {
        let seq_len = sequences.iter().map(Vec::len).max().unwrap_or(0);

        let mut rows = Vec::with_capacity(sequences.len());
        let mut attention_mask = Vec::with_capacity(sequences.len());

        for mut sequence in sequences {
            let real = sequence.len();
            sequence.resize(seq_len, pad.clone());

            let mut mask = vec![1u8; real];
            mask.resize(seq_len, 0);

            rows.push(sequence);
            attention_mask.push(mask);
        }

        Self {
            rows,
            attention_mask,
            seq_len,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Average token embeddings of one sequence, ignoring masked positions.
///
/// Masked positions add nothing to the sum or to the count. A sequence with
/// no unmasked tokens pools to the zero vector of width `dimension`.
#[inline]
pub fn mean_pool(token_embeddings: &[Vec<f32>], attention_mask: &[u8], dimension: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; dimension];
    let mut count = 0usize;

    for (embedding, &mask) in token_embeddings.iter().zip(attention_mask) {
        if mask == 0 {
            continue;
        }
        for (acc, value) in pooled.iter_mut().zip(embedding) {
            *acc += value;
        }
        count += 1;
    }

    if count > 0 {
        let denominator = count as f32;
        for value in &mut pooled {
            *value /= denominator;
        }
    }

    pooled
}

/// Scale `vector` to unit L2 norm in place. The zero vector is left as is.
#[inline]
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[inline]
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}
