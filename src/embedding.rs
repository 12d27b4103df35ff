//! Hashed bag-of-words vectors and vector utilities.
//!
//! The corpus is small and hand-written, so instead of calling an embedding
//! model every token is hashed into one of [`EMBEDDING_DIMS`] signed buckets
//! and the accumulated vector is L2-normalized. Collisions are expected; the
//! guarantees are determinism and unit norm (except for the empty input).
//!
//! # Algorithm
//!
//! For each token:
//! 1. `h = fold(chars, 0, |h, c| h * 31 + c)` over `u32` with wrapping.
//! 2. bucket `h % D`, sign `+1` if `h` is even, `-1` otherwise.
//! 3. `vector[bucket] += sign`.
//!
//! Then divide by the Euclidean norm, unless the norm is zero.

/// Dimensionality of hashed vectors.
pub const EMBEDDING_DIMS: usize = 128;

/// Polynomial string hash (multiplier 31, unsigned 32-bit, wrapping).
pub fn token_hash(token: &str) -> u32 {
    token
        .chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32))
}

/// Map a token list to a unit-length vector of [`EMBEDDING_DIMS`] components.
///
/// An empty token list yields the exact zero vector.
pub fn embed_tokens<S: AsRef<str>>(tokens: &[S]) -> Vec<f64> {
    let mut vector = vec![0.0f64; EMBEDDING_DIMS];

    for token in tokens {
        let hash = token_hash(token.as_ref());
        let index = hash as usize % EMBEDDING_DIMS;
        let sign = if hash % 2 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }

    let norm = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }

    vector
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths, empty input, or a zero vector on
/// either side.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }

    dot / denom
}
