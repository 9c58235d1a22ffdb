use std::collections::{HashMap, VecDeque};

use crate::types::EmbeddingCacheEntry;

/// Content-hash keyed embedding cache with FIFO eviction.
///
/// Keyed independently of record ids, so identical chunk text in different entities
/// is embedded once.
#[derive(Debug)]
pub struct EmbeddingCache {
    entries: HashMap<String, EmbeddingCacheEntry>,
    order: VecDeque<String>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up an embedding produced by `model_id`, counting the hit or miss.
    /// An entry cached under another model is a miss.
    pub fn get(&mut self, content_hash: &str, model_id: &str) -> Option<Vec<f32>> {
        if let Some(entry) = self.entries.get(content_hash)
            && entry.model_id == model_id
        {
            self.hits += 1;
            Some(entry.embedding.clone())
        } else {
            self.misses += 1;
            None
        }
    }

    /// Insert or replace an entry. Returns the hashes evicted to stay within capacity.
    pub fn insert(&mut self, entry: EmbeddingCacheEntry) -> Vec<String> {
        let hash = entry.content_hash.clone();
        if self.entries.insert(hash.clone(), entry).is_none() {
            self.order.push_back(hash);
        }

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                evicted.push(oldest);
            }
        }
        evicted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Approximate heap footprint of the cached vectors.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        self.entries
            .values()
            .map(|e| e.embedding.len() * size_of::<f32>() + e.content_hash.len() + e.model_id.len())
            .sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.hits = 0;
        self.misses = 0;
    }
}
