//! Vector similarity utilities.
//!
//! Brute-force cosine scoring. Collections cache each stored vector's L2 norm
//! at insert time so a query costs one dot product per Document.

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_with_norms(a, l2_norm(a), b, l2_norm(b))
}

/// Euclidean length of `v`, accumulated in f64.
pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter()
        .map(|x| {
            let x = *x as f64;
            x * x
        })
        .sum::<f64>()
        .sqrt()
}

/// Cosine similarity with both norms already known.
///
/// Mismatched dimensions and zero vectors score 0.0. The result is clamped to
/// [-1, 1] so rounding never leaks outside the range.
pub fn cosine_with_norms(a: &[f32], norm_a: f64, b: &[f32], norm_b: f64) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let denom = norm_a * norm_b;
    if denom < 1e-10 {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| *x as f64 * *y as f64)
        .sum();

    (dot / denom).clamp(-1.0, 1.0) as f32
}

/// Rank `(score, position)` pairs by descending score.
///
/// The sort is stable: equal scores keep insertion order, so the earliest
/// Document wins a tie. NaN scores rank last.
pub fn rank_descending(scored: &mut [(f32, usize)]) {
    for entry in scored.iter_mut() {
        if entry.0.is_nan() {
            entry.0 = f32::NEG_INFINITY;
        }
    }
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
}
