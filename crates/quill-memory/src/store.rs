use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cache::EmbeddingCache;
use crate::chunker::{ChunkConfig, chunk_text};
use crate::durable::DurableStore;
use crate::error::{MemoryError, Result};
use crate::mirror::{Mirror, MirrorOp};
use crate::similarity::{DistanceMetric, normalize};
use crate::types::{ContentChunk, EmbeddingCacheEntry, EntityType, SearchHit, SearchOptions, VectorRecord};

const UPSERT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub dimensions: usize,
    pub metric: DistanceMetric,
    /// In-memory cap; the oldest records by `indexed_at` are evicted beyond it.
    pub max_vectors: usize,
    pub persistence: bool,
    pub max_cache_entries: usize,
    /// Prefix for durable keys, so several stores can share one database.
    pub namespace: String,
    pub chunking: ChunkConfig,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            dimensions: 384,
            metric: DistanceMetric::Cosine,
            max_vectors: 10_000,
            persistence: true,
            max_cache_entries: 20_000,
            namespace: "default".into(),
            chunking: ChunkConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub vectors: usize,
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Embeddings plus cached vectors, excluding map overhead.
    pub approx_bytes: usize,
    pub dimensions: usize,
    /// `false` when no durable store is attached or the mirror has degraded.
    pub persistent: bool,
}

struct Entry {
    record: VectorRecord,
    /// Insertion order; breaks `indexed_at` ties during eviction.
    seq: u64,
}

#[derive(Default)]
struct State {
    records: HashMap<String, Entry>,
    next_seq: u64,
}

impl State {
    fn insert(&mut self, record: VectorRecord) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.insert(record.id.clone(), Entry { record, seq });
    }
}

/// Per-user vector index: brute-force search over an in-memory working set, mirrored
/// best-effort to a [`DurableStore`].
///
/// Writes are single-writer by contract. Locks are never held across `.await`.
pub struct VectorStore {
    config: VectorStoreConfig,
    durable: Option<Arc<dyn DurableStore>>,
    state: RwLock<State>,
    cache: Mutex<EmbeddingCache>,
    mirror: OnceLock<Mirror>,
    initialized: AtomicBool,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("config", &self.config)
            .field("has_durable", &self.durable.is_some())
            .finish_non_exhaustive()
    }
}

impl VectorStore {
    #[must_use]
    pub fn new(config: VectorStoreConfig, durable: Option<Arc<dyn DurableStore>>) -> Self {
        let cache = EmbeddingCache::new(config.max_cache_entries);
        Self {
            config,
            durable,
            state: RwLock::new(State::default()),
            cache: Mutex::new(cache),
            mirror: OnceLock::new(),
            initialized: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> &VectorStoreConfig {
        &self.config
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(AtomicOrdering::Acquire)
    }

    fn records_ns(&self) -> String {
        format!("{}:records", self.config.namespace)
    }

    fn embeddings_ns(&self) -> String {
        format!("{}:embeddings", self.config.namespace)
    }

    /// Load persisted records and cached embeddings into memory.
    ///
    /// Idempotent. Persistence problems are logged and the store continues in
    /// memory-only mode; they are never returned.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` leaves room for backends that must fail fast.
    pub async fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        if self.config.persistence
            && let Some(durable) = &self.durable
        {
            let mirror = self.mirror.get_or_init(|| Mirror::spawn(Arc::clone(durable)));
            if let Err(e) = self.load_from(durable.as_ref()).await {
                tracing::warn!(error = %e, "failed to load durable vectors; continuing memory-only");
                mirror.degrade();
            }
        }

        self.initialized.store(true, AtomicOrdering::Release);
        let evicted = self.enforce_memory_limits();
        tracing::info!(
            vectors = self.len(),
            evicted,
            persistent = self.is_persistent(),
            "vector store initialized"
        );
        Ok(())
    }

    async fn load_from(&self, durable: &dyn DurableStore) -> Result<()> {
        let rows = durable.get_all(&self.records_ns()).await?;
        let mut records = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            match serde_json::from_str::<VectorRecord>(&value) {
                Ok(r) if r.embedding.len() == self.config.dimensions => records.push(r),
                Ok(r) => tracing::warn!(
                    key = %key,
                    expected = self.config.dimensions,
                    actual = r.embedding.len(),
                    "skipping persisted record with wrong dimension"
                ),
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping unreadable persisted record"),
            }
        }
        records.sort_by_key(|r| r.indexed_at);

        let cached = durable.get_all(&self.embeddings_ns()).await?;

        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            for record in records {
                state.insert(record);
            }
        }
        {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            for (key, value) in cached {
                match serde_json::from_str::<EmbeddingCacheEntry>(&value) {
                    Ok(entry) if entry.embedding.len() == self.config.dimensions => {
                        cache.insert(entry);
                    }
                    Ok(entry) => tracing::debug!(
                        key = %key,
                        model = %entry.model_id,
                        actual = entry.embedding.len(),
                        "skipping cached embedding with wrong dimension"
                    ),
                    Err(e) => tracing::warn!(key = %key, error = %e, "skipping unreadable cached embedding"),
                }
            }
        }
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(MemoryError::NotInitialized)
        }
    }

    fn check_dimensions(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() == self.config.dimensions {
            Ok(())
        } else {
            Err(MemoryError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: embedding.len(),
            })
        }
    }

    fn mirror_op(&self, op: MirrorOp) {
        if let Some(mirror) = self.mirror.get() {
            mirror.send(op);
        }
    }

    fn mirror_record(&self, record: &VectorRecord) {
        if self.mirror.get().is_none() {
            return;
        }
        match serde_json::to_string(record) {
            Ok(value) => self.mirror_op(MirrorOp::Put {
                namespace: self.records_ns(),
                key: record.id.clone(),
                value,
            }),
            Err(e) => tracing::warn!(id = %record.id, error = %e, "failed to serialize record"),
        }
    }

    fn prepare(&self, mut record: VectorRecord) -> VectorRecord {
        if self.config.metric == DistanceMetric::Cosine {
            record.embedding = normalize(&record.embedding);
        }
        record
    }

    /// Insert or replace one record.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotInitialized`] before [`Self::initialize`] and
    /// [`MemoryError::DimensionMismatch`] when the embedding has the wrong length.
    pub fn upsert(&self, record: VectorRecord) -> Result<()> {
        self.ensure_initialized()?;
        self.check_dimensions(&record.embedding)?;

        let record = self.prepare(record);
        self.mirror_record(&record);
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record);
        self.enforce_memory_limits();
        Ok(())
    }

    /// Insert or replace many records, yielding to the runtime between groups of 100.
    ///
    /// Every record is validated before any is written.
    ///
    /// # Errors
    ///
    /// Same as [`Self::upsert`]; on error nothing is written.
    pub async fn upsert_batch(&self, records: Vec<VectorRecord>) -> Result<()> {
        self.ensure_initialized()?;
        for record in &records {
            self.check_dimensions(&record.embedding)?;
        }

        let total = records.len();
        let mut records = records.into_iter().peekable();
        while records.peek().is_some() {
            let group: Vec<VectorRecord> = records
                .by_ref()
                .take(UPSERT_BATCH_SIZE)
                .map(|r| self.prepare(r))
                .collect();
            for record in &group {
                self.mirror_record(record);
            }
            {
                let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
                for record in group {
                    state.insert(record);
                }
            }
            self.enforce_memory_limits();
            tokio::task::yield_now().await;
        }
        tracing::debug!(count = total, "upserted record batch");
        Ok(())
    }

    /// Remove one record from memory and the mirror. Returns whether it existed.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .remove(id)
            .is_some();
        self.mirror_op(MirrorOp::Delete {
            namespace: self.records_ns(),
            key: id.to_owned(),
        });
        removed
    }

    /// Remove every chunk of an entity, optionally restricted to one entity type.
    /// Returns the number of records removed from memory.
    pub fn delete_by_entity(&self, entity_id: &str, entity_type: Option<EntityType>) -> usize {
        let ids: Vec<String> = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let ids: Vec<String> = state
                .records
                .values()
                .filter(|e| {
                    e.record.entity_id == entity_id
                        && entity_type.is_none_or(|t| e.record.entity_type == t)
                })
                .map(|e| e.record.id.clone())
                .collect();
            for id in &ids {
                state.records.remove(id);
            }
            ids
        };

        for id in &ids {
            self.mirror_op(MirrorOp::Delete {
                namespace: self.records_ns(),
                key: id.clone(),
            });
        }
        if !ids.is_empty() {
            tracing::debug!(entity_id, removed = ids.len(), "deleted entity chunks");
        }
        ids.len()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<VectorRecord> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .get(id)
            .map(|e| e.record.clone())
    }

    /// All chunks of an entity, ordered by chunk index.
    #[must_use]
    pub fn get_by_entity(&self, entity_id: &str) -> Vec<VectorRecord> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<VectorRecord> = state
            .records
            .values()
            .filter(|e| e.record.entity_id == entity_id)
            .map(|e| e.record.clone())
            .collect();
        records.sort_by_key(|r| r.chunk_index);
        records
    }

    /// Brute-force similarity search.
    ///
    /// Filters run before scoring. Once `timeout_ms` has elapsed the scan stops and the
    /// matches found so far are ranked and returned. Equal scores are ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotInitialized`] or [`MemoryError::DimensionMismatch`].
    pub fn search(&self, query: &[f32], options: &SearchOptions) -> Result<Vec<SearchHit>> {
        self.ensure_initialized()?;
        self.check_dimensions(query)?;

        let started = Instant::now();
        let deadline = Duration::from_millis(options.timeout_ms);
        let metric = self.config.metric;
        let query = if metric == DistanceMetric::Cosine {
            normalize(query)
        } else {
            query.to_vec()
        };

        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut scanned = 0usize;
        let mut timed_out = false;
        let mut matches: Vec<(f32, &VectorRecord)> = Vec::new();

        for entry in state.records.values() {
            if started.elapsed() > deadline {
                timed_out = true;
                break;
            }
            scanned += 1;
            let record = &entry.record;

            if let Some(types) = &options.entity_types
                && !types.contains(&record.entity_type)
            {
                continue;
            }
            if options.exclude_entity_ids.contains(&record.entity_id) {
                continue;
            }
            if let Some(filter) = &options.metadata_filter
                && !filter.matches(&record.metadata)
            {
                continue;
            }

            let score = metric.score(&query, &record.embedding);
            if score >= options.threshold {
                matches.push((score, record));
            }
        }

        if timed_out {
            tracing::warn!(
                scanned,
                total = state.records.len(),
                timeout_ms = options.timeout_ms,
                "vector search deadline exceeded; returning partial results"
            );
        }

        matches.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        matches.truncate(options.top_k);

        Ok(matches
            .into_iter()
            .map(|(score, r)| SearchHit {
                id: r.id.clone(),
                entity_id: r.entity_id.clone(),
                entity_type: r.entity_type,
                score,
                chunk_index: r.chunk_index,
                total_chunks: r.total_chunks,
                content: if options.include_content {
                    r.content.clone()
                } else {
                    None
                },
                metadata: r.metadata.clone(),
            })
            .collect())
    }

    /// Split text with this store's chunking configuration.
    #[must_use]
    pub fn chunk(&self, text: &str) -> Vec<ContentChunk> {
        chunk_text(text, &self.config.chunking)
    }

    /// Cached embedding for a chunk hash, valid only for the model that produced it.
    /// Counts a hit or a miss.
    #[must_use]
    pub fn get_cached_embedding(&self, content_hash: &str, model_id: &str) -> Option<Vec<f32>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(content_hash, model_id)
    }

    pub fn cache_embedding(&self, content_hash: &str, embedding: Vec<f32>, model_id: &str) {
        let entry = EmbeddingCacheEntry {
            content_hash: content_hash.to_owned(),
            embedding,
            model_id: model_id.to_owned(),
            cached_at: chrono::Utc::now().timestamp_millis(),
        };
        let persisted = if self.mirror.get().is_some() {
            serde_json::to_string(&entry).ok()
        } else {
            None
        };

        let evicted = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry);

        if let Some(value) = persisted {
            self.mirror_op(MirrorOp::Put {
                namespace: self.embeddings_ns(),
                key: content_hash.to_owned(),
                value,
            });
        }
        for hash in evicted {
            self.mirror_op(MirrorOp::Delete {
                namespace: self.embeddings_ns(),
                key: hash,
            });
        }
    }

    /// Evict the oldest records (by `indexed_at`, then insertion order) until the
    /// working set fits `max_vectors`. The durable mirror is not touched.
    /// Returns the number evicted.
    pub fn enforce_memory_limits(&self) -> usize {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let excess = state.records.len().saturating_sub(self.config.max_vectors);
        if excess == 0 {
            return 0;
        }

        let mut order: Vec<(i64, u64, String)> = state
            .records
            .values()
            .map(|e| (e.record.indexed_at, e.seq, e.record.id.clone()))
            .collect();
        order.sort_unstable();
        for (_, _, id) in order.into_iter().take(excess) {
            state.records.remove(&id);
        }
        tracing::debug!(evicted = excess, "evicted oldest vectors over memory cap");
        excess
    }

    /// Wipe the working set, the embedding cache and the durable mirror.
    pub fn clear(&self) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.records.clear();
        }
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.mirror_op(MirrorOp::Clear {
            namespace: self.records_ns(),
        });
        self.mirror_op(MirrorOp::Clear {
            namespace: self.embeddings_ns(),
        });
        tracing::info!("vector store cleared");
    }

    /// Wait for every durable write queued so far.
    pub async fn flush(&self) {
        if let Some(mirror) = self.mirror.get() {
            mirror.flush().await;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.mirror.get().is_some_and(Mirror::is_healthy)
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let (vectors, record_bytes) = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            let bytes = state
                .records
                .values()
                .map(|e| {
                    e.record.embedding.len() * size_of::<f32>()
                        + e.record.content.as_ref().map_or(0, String::len)
                        + e.record.id.len()
                })
                .sum::<usize>();
            (state.records.len(), bytes)
        };
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        StoreStats {
            vectors,
            cache_entries: cache.len(),
            cache_hits: cache.hits(),
            cache_misses: cache.misses(),
            approx_bytes: record_bytes + cache.approx_bytes(),
            dimensions: self.config.dimensions,
            persistent: self.is_persistent(),
        }
    }
}
