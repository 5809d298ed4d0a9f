//! K-means over embeddings with cosine distance
//!
//! k-means++ initialization (distance-squared sampling), up to 50
//! iterations, early stop on zero reassignments. Randomness comes from a
//! caller-provided seedable rng so tests are reproducible.

use rand::rngs::StdRng;
use rand::Rng;

use crate::search::cosine_similarity;

/// Iteration cap.
pub const MAX_ITERATIONS: usize = 50;

/// Theme count rule: `min(6, max(3, floor(sqrt(n/5))))`.
pub fn theme_count(n: usize) -> usize {
    let k = ((n as f64 / 5.0).sqrt().floor()) as usize;
    k.clamp(3, 6)
}

/// Cosine distance `1 - cos`.
#[inline]
fn distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b) as f64
}

/// k-means++ seeding: first center uniform, the rest sampled proportional
/// to squared distance from the nearest chosen center.
fn seed_centers(vectors: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centers: Vec<Vec<f32>> = Vec::with_capacity(k);
    centers.push(vectors[rng.gen_range(0..vectors.len())].clone());

    while centers.len() < k {
        let weights: Vec<f64> = vectors
            .iter()
            .map(|v| {
                centers
                    .iter()
                    .map(|c| distance(v, c))
                    .fold(f64::MAX, f64::min)
                    .powi(2)
            })
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= f64::EPSILON {
            // All points coincide with existing centers
            centers.push(vectors[rng.gen_range(0..vectors.len())].clone());
            continue;
        }
        let mut pick = rng.gen::<f64>() * total;
        let mut chosen = vectors.len() - 1;
        for (i, w) in weights.iter().enumerate() {
            pick -= w;
            if pick <= 0.0 {
                chosen = i;
                break;
            }
        }
        centers.push(vectors[chosen].clone());
    }
    centers
}

fn nearest_center(vector: &[f32], centers: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::MAX;
    for (i, center) in centers.iter().enumerate() {
        let d = distance(vector, center);
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

/// Mean of member vectors, L2-normalized (sensible centroid under cosine).
fn centroid(vectors: &[Vec<f32>], members: &[usize], dim: usize) -> Vec<f32> {
    let mut out = vec![0.0_f32; dim];
    for &m in members {
        for (o, x) in out.iter_mut().zip(vectors[m].iter()) {
            *o += x;
        }
    }
    let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut out {
            *x /= norm;
        }
    }
    out
}

/// Cluster `vectors` into `k` groups. Returns one assignment per vector.
///
/// Degenerate input (`n <= k`) gets one cluster per vector.
pub fn kmeans_cosine(vectors: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<usize> {
    let n = vectors.len();
    if n == 0 || k == 0 {
        return vec![];
    }
    if n <= k {
        return (0..n).collect();
    }
    let dim = vectors[0].len();

    let mut centers = seed_centers(vectors, k, rng);
    let mut assignments: Vec<usize> = vectors
        .iter()
        .map(|v| nearest_center(v, &centers))
        .collect();

    for _ in 0..MAX_ITERATIONS {
        // Recompute centers from current assignment
        for cluster in 0..k {
            let members: Vec<usize> = (0..n).filter(|&i| assignments[i] == cluster).collect();
            if !members.is_empty() {
                centers[cluster] = centroid(vectors, &members, dim);
            }
        }

        // Reassign; stop on a fixed point
        let mut moved = 0;
        for (i, vector) in vectors.iter().enumerate() {
            let next = nearest_center(vector, &centers);
            if next != assignments[i] {
                assignments[i] = next;
                moved += 1;
            }
        }
        if moved == 0 {
            break;
        }
    }

    assignments
}

// ============================================================================
// TESTS
// ============================================================================
