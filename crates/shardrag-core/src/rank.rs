//! Distance ranking.
//!
//! Records are ranked by the Euclidean norm of their difference vector,
//! ascending; a zero vector is an exact match. Ties are broken by id so the
//! order is stable across runs.

use std::cmp::Ordering;

use crate::models::RankedRecord;

/// `‖v‖₂`.
pub fn euclidean_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Distance between two plaintext vectors, `None` if their lengths differ.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    Some(
        a.iter()
            .zip(b)
            .map(|(x, y)| {
                let d = *x as f64 - *y as f64;
                d * d
            })
            .sum::<f64>()
            .sqrt(),
    )
}

/// Total order on distances with NaN after every number.
fn by_distance(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => a.total_cmp(&b),
        (a_nan, b_nan) => a_nan.cmp(&b_nan),
    }
}

/// Rank reconstructed difference vectors and keep the closest `top_k`.
pub fn rank_by_distance(differences: Vec<(String, Vec<f64>)>, top_k: usize) -> Vec<RankedRecord> {
    let mut ranked: Vec<RankedRecord> = differences
        .into_iter()
        .map(|(id, diff)| RankedRecord {
            distance: euclidean_norm(&diff),
            id,
        })
        .collect();
    ranked.sort_by(|a, b| by_distance(a.distance, b.distance).then_with(|| a.id.cmp(&b.id)));
    ranked.truncate(top_k);
    ranked
}

/// Plaintext nearest-neighbor search for corpora that are not secret-shared.
///
/// Returns `(chunk, distance)` pairs, closest first. Candidates whose
/// dimensionality differs from the query, or whose distance is not a
/// number, are skipped.
pub fn find_closest_chunks<'a>(
    query: &[f32],
    candidates: &'a [(String, Vec<f32>)],
    top_k: usize,
) -> Vec<(&'a str, f64)> {
    let mut scored: Vec<(&str, f64)> = candidates
        .iter()
        .filter_map(|(chunk, emb)| euclidean_distance(query, emb).map(|d| (chunk.as_str(), d)))
        .filter(|(_, d)| !d.is_nan())
        .collect();
    scored.sort_by(|a, b| by_distance(a.1, b.1));
    scored.truncate(top_k);
    scored
}
