//! HNSW vector index
//!
//! USearch-backed approximate nearest neighbor index over document
//! embeddings, cosine metric. Documents are addressed by string id
//! externally; the index maps them to dense u64 keys internally.

use std::collections::HashMap;

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::{Result, SearchError};
use crate::llm::EMBEDDING_DIMENSIONS;

/// HNSW connectivity parameter (higher = better recall, more memory)
const DEFAULT_CONNECTIVITY: usize = 16;

/// HNSW expansion factor for index building
const DEFAULT_EXPANSION_ADD: usize = 128;

/// HNSW expansion factor for search
const DEFAULT_EXPANSION_SEARCH: usize = 64;

/// Initial reserved capacity
const INITIAL_CAPACITY: usize = 1024;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the vector index
#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub dimensions: usize,
    pub connectivity: usize,
    pub expansion_add: usize,
    pub expansion_search: usize,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            dimensions: EMBEDDING_DIMENSIONS,
            connectivity: DEFAULT_CONNECTIVITY,
            expansion_add: DEFAULT_EXPANSION_ADD,
            expansion_search: DEFAULT_EXPANSION_SEARCH,
        }
    }
}

// ============================================================================
// VECTOR INDEX
// ============================================================================

/// Cosine HNSW index with string-key mapping.
pub struct VectorIndex {
    index: Index,
    config: VectorIndexConfig,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

impl VectorIndex {
    /// Create with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(VectorIndexConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(config: VectorIndexConfig) -> Result<Self> {
        let options = IndexOptions {
            dimensions: config.dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: config.connectivity,
            expansion_add: config.expansion_add,
            expansion_search: config.expansion_search,
            multi: false,
        };

        let index = Index::new(&options).map_err(|e| SearchError::Vector(e.to_string()))?;
        index
            .reserve(INITIAL_CAPACITY)
            .map_err(|e| SearchError::Vector(e.to_string()))?;

        Ok(Self {
            index,
            config,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
        })
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.key_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_to_id.is_empty()
    }

    /// Insert or replace the vector stored under `key`.
    pub fn upsert(&mut self, key: &str, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimensions {
            return Err(SearchError::Vector(format!(
                "dimension mismatch: expected {}, got {}",
                self.config.dimensions,
                vector.len()
            )));
        }

        // Replace = remove + add; usearch keys are write-once
        if let Some(&id) = self.key_to_id.get(key) {
            self.index
                .remove(id)
                .map_err(|e| SearchError::Vector(e.to_string()))?;
            self.index
                .add(id, vector)
                .map_err(|e| SearchError::Vector(e.to_string()))?;
            return Ok(());
        }

        if self.index.size() + 1 >= self.index.capacity() {
            self.index
                .reserve(self.index.capacity() * 2)
                .map_err(|e| SearchError::Vector(e.to_string()))?;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.index
            .add(id, vector)
            .map_err(|e| SearchError::Vector(e.to_string()))?;
        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());
        Ok(())
    }

    /// Remove a key; missing keys are fine.
    pub fn remove(&mut self, key: &str) -> Result<()> {
        if let Some(id) = self.key_to_id.remove(key) {
            self.id_to_key.remove(&id);
            self.index
                .remove(id)
                .map_err(|e| SearchError::Vector(e.to_string()))?;
        }
        Ok(())
    }

    /// k-NN search. Returns `(key, cosine_similarity)` best-first.
    pub fn search(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        if vector.len() != self.config.dimensions {
            return Err(SearchError::Vector(format!(
                "dimension mismatch: expected {}, got {}",
                self.config.dimensions,
                vector.len()
            )));
        }
        if self.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let matches = self
            .index
            .search(vector, k)
            .map_err(|e| SearchError::Vector(e.to_string()))?;

        Ok(matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .filter_map(|(id, dist)| {
                self.id_to_key
                    .get(id)
                    .map(|key| (key.clone(), 1.0 - *dist))
            })
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================
