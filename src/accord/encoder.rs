//! Text encoding into the resonance vector space.
//!
//! The [`Encoder`] trait abstracts the embedding service: text in,
//! unit-normalized vector of the process-wide dimension out. Encoding is
//! deterministic for a given model build and rejects empty input.
//!
//! [`HashedTokenEncoder`] is the built-in local implementation: each token
//! maps to a deterministic seeded pseudo-random base vector (the seed is a
//! hash of the token, so the same token always lands on the same vector),
//! the token vectors are superposed, and the sum is normalized. It needs no
//! model download and gives stable, meaningful cosine overlap for texts that
//! share vocabulary — enough for demos and tests, while production deploys
//! swap in a real embedding service behind the same trait.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::accord::errors::AccordError;
use crate::accord::models::Vector;

/// Default vector dimension of the built-in encoder.
pub const DEFAULT_ENCODER_DIM: usize = 256;

/// Text → unit-norm vector of a fixed dimension.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Encode one text. Deterministic for a given encoder build; errors on
    /// empty input and on zero-norm results.
    async fn encode(&self, text: &str) -> Result<Vector, AccordError>;

    /// Encode a batch. The default implementation encodes sequentially.
    async fn batch_encode(&self, texts: &[String]) -> Result<Vec<Vector>, AccordError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.encode(text).await?);
        }
        Ok(out)
    }

    /// The fixed dimension D of produced vectors.
    fn dim(&self) -> usize;
}

/// Normalize a vector in place to unit length.
///
/// Returns an encoding error when the norm is zero.
pub fn normalize(mut vector: Vector) -> Result<Vector, AccordError> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(AccordError::encoding("zero-norm vector"));
    }
    for x in vector.iter_mut() {
        *x /= norm;
    }
    Ok(vector)
}

/// Deterministic local encoder based on seeded token superposition.
pub struct HashedTokenEncoder {
    dim: usize,
}

impl Default for HashedTokenEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_ENCODER_DIM)
    }
}

impl HashedTokenEncoder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// Deterministic base vector for one token, seeded from a hash of the
    /// token text.
    fn token_vector(&self, token: &str) -> Vector {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        let mut seed = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]);
        // The seed must be non-zero for the xorshift sequence to move.
        if seed == 0 {
            seed = 0x9e3779b97f4a7c15;
        }
        let mut state = seed;
        let mut vector = Vec::with_capacity(self.dim);
        for _ in 0..self.dim {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            // Map to [-1, 1).
            let unit = (state >> 11) as f32 / (1u64 << 53) as f32;
            vector.push(unit * 2.0 - 1.0);
        }
        vector
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
            .map(|t| t.to_string())
            .collect()
    }
}

#[async_trait]
impl Encoder for HashedTokenEncoder {
    async fn encode(&self, text: &str) -> Result<Vector, AccordError> {
        if text.trim().is_empty() {
            return Err(AccordError::encoding("cannot encode empty input"));
        }
        let tokens = Self::tokenize(text);
        if tokens.is_empty() {
            return Err(AccordError::encoding("input has no encodable tokens"));
        }
        let mut sum = vec![0.0f32; self.dim];
        for token in &tokens {
            let tv = self.token_vector(token);
            for (acc, x) in sum.iter_mut().zip(tv.iter()) {
                *acc += x;
            }
        }
        normalize(sum)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}
