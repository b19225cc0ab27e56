//! Deterministic snapshot projection.
//!
//! Deterministic embedding generation for state-similarity search. This is
//! *not* a neural embedding model: it provides a stable, offline baseline
//! using feature hashing over a snapshot's serialized entries, sufficient
//! for top-k similarity ranking in embedded mode.

use blake3::Hasher;

use crate::error::{ModelError, WorldResult};
use crate::state::StateSnapshot;

/// Default embedding dimensionality.
///
/// Keep this modest to control memory usage across large snapshot histories.
pub const DEFAULT_EMBEDDING_DIM: usize = 128;

fn tokenize(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
}

fn hash_into(vec: &mut [f32], token: &str) {
    let mut h = Hasher::new();
    h.update(token.as_bytes());
    let hash = h.finalize();

    let bytes = hash.as_bytes();
    // Deterministically map to a bucket.
    let mut bucket = 0u64;
    for (i, &b) in bytes.iter().take(8).enumerate() {
        bucket |= u64::from(b) << (8 * i);
    }

    let idx = (bucket as usize) % vec.len();
    let sign = if (bytes[8] & 1) == 0 { 1.0f32 } else { -1.0f32 };
    vec[idx] += sign;
}

/// Projects a snapshot's entries into a fixed-dimension, L2-normalized
/// vector.
///
/// Each entry contributes its key, version, and the canonical JSON of its
/// value; equal snapshot content always produces an equal vector regardless
/// of snapshot id or timestamps.
#[must_use]
pub fn project_snapshot(snapshot: &StateSnapshot, dim: usize) -> Vec<f32> {
    if dim == 0 {
        return Vec::new();
    }

    let mut vec = vec![0.0f32; dim];
    let mut count = 0u32;

    for (key, entry) in &snapshot.entries {
        let value_json =
            serde_json::to_string(&entry.value).unwrap_or_else(|_| "null".to_string());
        let serialized = format!("{key} v{} {value_json}", entry.version);
        for token in tokenize(&serialized.to_ascii_lowercase()) {
            hash_into(&mut vec, token);
            count = count.saturating_add(1);
        }
    }

    if count == 0 {
        return vec;
    }

    l2_normalize(&mut vec);
    vec
}

fn l2_normalize(vec: &mut [f32]) {
    let mut norm2 = 0.0f64;
    for &x in vec.iter() {
        norm2 += f64::from(x) * f64::from(x);
    }
    if norm2 > 0.0 {
        let inv = norm2.sqrt().recip();
        #[allow(clippy::cast_possible_truncation)]
        let invf = inv as f32;
        for x in vec.iter_mut() {
            *x *= invf;
        }
    }
}

/// Cosine similarity between two vectors.
///
/// Fails `DimensionMismatch` when lengths differ. The raw cosine lies in
/// [-1, 1]; similarity-search callers clamp to [0, 1].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> WorldResult<f32> {
    if a.len() != b.len() {
        return Err(ModelError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        }
        .into());
    }
    if a.is_empty() {
        return Ok(0.0);
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let xf = f64::from(x);
        let yf = f64::from(y);
        dot += xf * yf;
        norm_a += xf * xf;
        norm_b += yf * yf;
    }

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return Ok(0.0);
    }

    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if sim.is_finite() {
        #[allow(clippy::cast_possible_truncation)]
        Ok(sim as f32)
    } else {
        Ok(0.0)
    }
}
