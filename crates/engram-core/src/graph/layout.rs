//! Graph layout and edge selection
//!
//! Cluster centers sit on a circle of radius 150 around the origin; member
//! nodes spiral outward from their center. Edges are the highest-similarity
//! pairs, greedily accepted while both endpoints stay under the degree cap.

use std::collections::HashMap;
use std::f64::consts::PI;

use crate::model::GraphEdge;
use crate::search::{cosine_similarity, SearchDoc};

/// Radius of the circle cluster centers are placed on.
const CLUSTER_RADIUS: f64 = 150.0;

/// Base spiral radius inside a cluster.
const SPIRAL_RADIUS: f64 = 80.0;

/// Max edges per node.
pub const MAX_DEGREE: usize = 5;

/// Center of cluster `i` of `k`.
pub fn cluster_center(i: usize, k: usize) -> (f64, f64) {
    let angle = 2.0 * PI * i as f64 / k.max(1) as f64;
    (CLUSTER_RADIUS * angle.cos(), CLUSTER_RADIUS * angle.sin())
}

/// Spiral placement of member `i` of `n` around `(cx, cy)`:
/// `θ = 4π·i/n`, `r = 80·(0.3 + 0.7·i/n)`.
pub fn spiral_position(center: (f64, f64), i: usize, n: usize) -> (f64, f64) {
    let n = n.max(1) as f64;
    let theta = 4.0 * PI * i as f64 / n;
    let r = SPIRAL_RADIUS * (0.3 + 0.7 * i as f64 / n);
    (center.0 + r * theta.cos(), center.1 + r * theta.sin())
}

/// All-pairs similarity edges at or above `min_similarity`, best-first,
/// greedily kept while both endpoints have degree < [`MAX_DEGREE`].
pub fn build_edges(docs: &[SearchDoc], min_similarity: f64) -> Vec<GraphEdge> {
    let mut candidates: Vec<(usize, usize, f64)> = Vec::new();
    for i in 0..docs.len() {
        for j in (i + 1)..docs.len() {
            let similarity =
                cosine_similarity(&docs[i].embedding, &docs[j].embedding) as f64;
            if similarity >= min_similarity {
                candidates.push((i, j, similarity));
            }
        }
    }
    candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut degrees: HashMap<usize, usize> = HashMap::new();
    let mut edges = Vec::new();
    for (i, j, similarity) in candidates {
        let di = degrees.get(&i).copied().unwrap_or(0);
        let dj = degrees.get(&j).copied().unwrap_or(0);
        if di >= MAX_DEGREE || dj >= MAX_DEGREE {
            continue;
        }
        *degrees.entry(i).or_insert(0) += 1;
        *degrees.entry(j).or_insert(0) += 1;
        edges.push(GraphEdge {
            source: docs[i].id.clone(),
            target: docs[j].id.clone(),
            similarity: (similarity * 1000.0).round() / 1000.0,
        });
    }
    edges
}

// ============================================================================
// TESTS
// ============================================================================
