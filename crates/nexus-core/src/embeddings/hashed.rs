//! Deterministic hashed-projection embedder.
//!
//! Feature-hashing over word unigrams and bigrams into the model dimension,
//! L2-normalized. Used when the ONNX model is unavailable and in hermetic
//! tests: fully offline, deterministic across runs and platforms.
//!
//! Quality is far below the ONNX model, but the geometry is real: texts
//! sharing vocabulary land close under cosine distance, disjoint texts are
//! near-orthogonal, and identical texts embed identically.

use super::EMBEDDING_DIMENSIONS;

/// FNV-1a, fixed here so hashes are stable across Rust versions.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Scatter one feature into the accumulator: four signed slots per feature.
fn scatter(acc: &mut [f32], feature: &str, weight: f32) {
    let mut h = fnv1a(feature.as_bytes());
    for _ in 0..4 {
        let idx = (h % EMBEDDING_DIMENSIONS as u64) as usize;
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        acc[idx] += sign * weight;
        h = fnv1a(&h.to_le_bytes());
    }
}

/// Embed a text deterministically into a unit-norm vector.
pub fn embed(text: &str) -> Vec<f32> {
    let mut acc = vec![0.0_f32; EMBEDDING_DIMENSIONS];
    let tokens = tokenize(text);

    for token in &tokens {
        scatter(&mut acc, token, 1.0);
    }
    // Bigrams at lower weight give mild phrase sensitivity
    for pair in tokens.windows(2) {
        let bigram = format!("{} {}", pair[0], pair[1]);
        scatter(&mut acc, &bigram, 0.5);
    }

    let norm = acc.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut acc {
            *x /= norm;
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let a = embed("Python is widely used for machine learning");
        let b = embed("Python is widely used for machine learning");
        assert_eq!(a, b);
    }

    #[test]
    fn test_unit_norm() {
        let v = embed("some text with several tokens in it");
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_dimension() {
        assert_eq!(embed("hello").len(), EMBEDDING_DIMENSIONS);
    }

    #[test]
    fn test_overlapping_texts_closer_than_disjoint() {
        let base = embed("python machine learning libraries");
        let related = embed("machine learning in python");
        let unrelated = embed("quarterly budget meeting notes");
        assert!(cosine_similarity(&base, &related) > cosine_similarity(&base, &unrelated));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let v = embed("");
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(embed("Python ML"), embed("python ml"));
    }
}
