//! Lifecycle and indexing policy over the store, retriever and suggestion engine.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use quill_llm::{EmbeddingProvider, LanguageModel, LlmError};
use quill_memory::{EntityType, VectorRecord, VectorStore};

use crate::error::{RagError, Result};
use crate::prompt::PromptFormatter;
use crate::query::QueryFormatter;
use crate::retriever::{ContextRetriever, RetrievalOptions, RetrieverConfig};
use crate::suggestion::{SuggestionConfig, SuggestionEngine};
use crate::types::{
    ContextItem, CurrentContext, Entity, IndexProgress, IndexReport, RagMetrics,
    RetrievedContext, Suggestion, SuggestionRequest, SuggestionResponse,
};

const ENTITY_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub retrieval: RetrieverConfig,
    pub suggestions: SuggestionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed { chunks: usize, cache_hits: usize },
    /// The entity had no decrypted content.
    Skipped,
}

/// Entry point for indexing and suggestions.
///
/// Owns indexing policy (what text is indexed, how ids are formed); the
/// [`VectorStore`] owns storage. Construct explicitly and call [`Self::initialize`]
/// before use and [`Self::dispose`] when done.
pub struct RagEngine<E: EmbeddingProvider, M: LanguageModel> {
    store: Arc<VectorStore>,
    embedder: Arc<E>,
    model: Arc<M>,
    retriever: Arc<ContextRetriever<E>>,
    suggestions: SuggestionEngine<E, M>,
    config: RagConfig,
    initialized: AtomicBool,
}

impl<E: EmbeddingProvider, M: LanguageModel> RagEngine<E, M> {
    #[must_use]
    pub fn new(store: Arc<VectorStore>, embedder: Arc<E>, model: Arc<M>, config: RagConfig) -> Self {
        let retriever = Arc::new(ContextRetriever::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            config.retrieval.clone(),
        ));
        let suggestions = SuggestionEngine::new(
            Arc::clone(&retriever),
            Arc::clone(&model),
            config.suggestions.clone(),
        );
        Self {
            store,
            embedder,
            model,
            retriever,
            suggestions,
            config,
            initialized: AtomicBool::new(false),
        }
    }

    /// Replace the key-phrase query builder and the prompt templates.
    #[must_use]
    pub fn with_formatters(
        self,
        query: Arc<dyn QueryFormatter>,
        prompts: Arc<dyn PromptFormatter>,
    ) -> Self {
        let retriever = Arc::new(
            ContextRetriever::new(
                Arc::clone(&self.store),
                Arc::clone(&self.embedder),
                self.config.retrieval.clone(),
            )
            .with_query_formatter(query),
        );
        let suggestions = SuggestionEngine::new(
            Arc::clone(&retriever),
            Arc::clone(&self.model),
            self.config.suggestions.clone(),
        )
        .with_prompt_formatter(prompts);
        Self {
            retriever,
            suggestions,
            ..self
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    #[must_use]
    pub fn retriever(&self) -> &ContextRetriever<E> {
        &self.retriever
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(RagError::NotInitialized)
        }
    }

    /// Bring up the store and both model backends. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedder's dimensions differ from the store's, or if a
    /// backend cannot be reached.
    pub async fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        if self.embedder.dimensions() != self.store.dimensions() {
            return Err(RagError::DimensionConfig {
                provider: self.embedder.dimensions(),
                store: self.store.dimensions(),
            });
        }

        self.store.initialize().await?;
        self.embedder.initialize().await?;
        self.model.initialize().await?;
        self.initialized.store(true, Ordering::Release);

        tracing::info!(
            embedder = self.embedder.model_id(),
            model = self.model.name(),
            vectors = self.store.len(),
            "RAG engine initialized"
        );
        Ok(())
    }

    /// Flush pending durable writes, release backends and return to the uninitialized
    /// state. The in-memory index is kept.
    pub async fn dispose(&self) {
        self.store.flush().await;
        self.embedder.release();
        self.model.release();
        self.initialized.store(false, Ordering::Release);
        tracing::info!("RAG engine disposed");
    }

    /// Remove all indexed data and cached embeddings, including the durable copy.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotInitialized`] before [`Self::initialize`].
    pub async fn clear(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.store.clear();
        self.store.flush().await;
        Ok(())
    }

    /// (Re)index one entity: its old chunks are replaced.
    ///
    /// Entities without decrypted content are skipped and their existing chunks kept.
    /// Not safe to call concurrently for the same entity.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding fails or the embedding has the wrong dimension.
    pub async fn index_entity(&self, entity: &Entity) -> Result<IndexOutcome> {
        self.ensure_initialized()?;
        let Some(content) = entity.decrypted_content.as_deref() else {
            tracing::debug!(entity_id = %entity.id, "no decrypted content; skipping");
            return Ok(IndexOutcome::Skipped);
        };

        self.store.delete_by_entity(&entity.id, Some(entity.entity_type));

        let text = indexable_text(entity, content);
        let chunks = self.store.chunk(&text);
        if chunks.is_empty() {
            return Ok(IndexOutcome::Indexed {
                chunks: 0,
                cache_hits: 0,
            });
        }

        let mut cached: HashMap<String, Vec<f32>> = HashMap::new();
        let mut pending_hashes: Vec<String> = Vec::new();
        let mut pending_texts: Vec<String> = Vec::new();
        let mut cache_hits = 0;
        let model_id = self.embedder.model_id();
        for chunk in &chunks {
            if cached.contains_key(&chunk.content_hash)
                || pending_hashes.contains(&chunk.content_hash)
            {
                continue;
            }
            if let Some(embedding) = self
                .store
                .get_cached_embedding(&chunk.content_hash, model_id)
            {
                cache_hits += 1;
                cached.insert(chunk.content_hash.clone(), embedding);
            } else {
                pending_hashes.push(chunk.content_hash.clone());
                pending_texts.push(chunk.text.clone());
            }
        }

        if !pending_texts.is_empty() {
            let fresh = self.embedder.batch_embed(&pending_texts).await?;
            if fresh.len() != pending_texts.len() {
                return Err(LlmError::Embedding(format!(
                    "expected {} embeddings, got {}",
                    pending_texts.len(),
                    fresh.len()
                ))
                .into());
            }
            for (hash, embedding) in pending_hashes.into_iter().zip(fresh) {
                self.store.cache_embedding(&hash, embedding.clone(), model_id);
                cached.insert(hash, embedding);
            }
        }

        let indexed_at = chrono::Utc::now().timestamp_millis();
        let metadata = entity.metadata();
        let total = chunks.len();
        let mut records = Vec::with_capacity(total);
        for chunk in chunks {
            let Some(embedding) = cached.get(&chunk.content_hash).cloned() else {
                continue;
            };
            records.push(VectorRecord {
                id: VectorRecord::chunk_id(&entity.id, chunk.index),
                entity_type: entity.entity_type,
                entity_id: entity.id.clone(),
                embedding,
                content_hash: chunk.content_hash,
                indexed_at,
                chunk_index: chunk.index,
                total_chunks: total,
                content: Some(chunk.text),
                metadata: metadata.clone(),
            });
        }

        let count = records.len();
        self.store.upsert_batch(records).await?;
        tracing::debug!(entity_id = %entity.id, chunks = count, cache_hits, "entity indexed");
        Ok(IndexOutcome::Indexed {
            chunks: count,
            cache_hits,
        })
    }

    /// Index many entities in batches of 10, reporting progress after each one.
    ///
    /// A failing entity is recorded in the report and does not stop the run.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotInitialized`] before [`Self::initialize`].
    pub async fn index_entities<F>(
        &self,
        entities: &[Entity],
        mut on_progress: F,
    ) -> Result<IndexReport>
    where
        F: FnMut(&IndexProgress) + Send,
    {
        self.ensure_initialized()?;
        let start = Instant::now();
        let mut report = IndexReport::default();
        let mut progress = IndexProgress {
            total: entities.len(),
            ..IndexProgress::default()
        };

        for batch in entities.chunks(ENTITY_BATCH_SIZE) {
            for entity in batch {
                match self.index_entity(entity).await {
                    Ok(IndexOutcome::Indexed { chunks, cache_hits }) => {
                        report.indexed += 1;
                        report.chunks_created += chunks;
                        report.cache_hits += cache_hits;
                    }
                    Ok(IndexOutcome::Skipped) => report.skipped += 1,
                    Err(e) => {
                        tracing::warn!(entity_id = %entity.id, error = %e, "failed to index entity");
                        let message = format!("{}: {e}", entity.id);
                        report.failed += 1;
                        report.errors.push(message.clone());
                        progress.errors.push(message);
                    }
                }
                progress.processed += 1;
                progress.current.clone_from(&entity.id);
                progress.percent = percent(progress.processed, progress.total);
                on_progress(&progress);
            }
            tokio::task::yield_now().await;
        }

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            indexed = report.indexed,
            skipped = report.skipped,
            failed = report.failed,
            chunks = report.chunks_created,
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }

    /// Remove every chunk of an entity. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotInitialized`] before [`Self::initialize`].
    pub fn delete_entity(&self, entity_id: &str, entity_type: Option<EntityType>) -> Result<usize> {
        self.ensure_initialized()?;
        Ok(self.store.delete_by_entity(entity_id, entity_type))
    }

    /// Raw retrieval for a free-text query.
    ///
    /// # Errors
    ///
    /// Returns an error before initialization or if retrieval fails.
    pub async fn search(&self, query: &str, options: &RetrievalOptions) -> Result<RetrievedContext> {
        self.ensure_initialized()?;
        self.retriever.retrieve_context(query, options).await
    }

    /// # Errors
    ///
    /// Returns an error before initialization or if retrieval fails.
    pub async fn generate_suggestions(
        &self,
        request: &SuggestionRequest,
    ) -> Result<SuggestionResponse> {
        self.ensure_initialized()?;
        self.suggestions.generate_suggestions(request).await
    }

    /// # Errors
    ///
    /// Returns an error before initialization or if retrieval fails.
    pub async fn generate_quick_suggestions(
        &self,
        request: &SuggestionRequest,
    ) -> Result<SuggestionResponse> {
        self.ensure_initialized()?;
        self.suggestions.generate_quick_suggestions(request).await
    }

    /// # Errors
    ///
    /// Returns an error before initialization or if retrieval fails.
    pub async fn get_related_notes(
        &self,
        content: &str,
        title: Option<&str>,
        self_id: &str,
        limit: usize,
    ) -> Result<Vec<ContextItem>> {
        self.ensure_initialized()?;
        self.suggestions
            .get_related_notes(content, title, self_id, limit)
            .await
    }

    /// # Errors
    ///
    /// Returns an error before initialization or if retrieval fails.
    pub async fn get_suggested_links(
        &self,
        content: &str,
        title: Option<&str>,
        self_id: &str,
        limit: usize,
    ) -> Result<Vec<Suggestion>> {
        self.ensure_initialized()?;
        self.suggestions
            .get_suggested_links(content, title, self_id, limit)
            .await
    }

    /// # Errors
    ///
    /// Returns an error before initialization or if retrieval fails.
    pub async fn extract_action_items(
        &self,
        current: CurrentContext,
        max_suggestions: usize,
    ) -> Result<Vec<Suggestion>> {
        self.ensure_initialized()?;
        self.suggestions
            .extract_action_items(current, max_suggestions)
            .await
    }

    #[must_use]
    pub fn metrics(&self) -> RagMetrics {
        let stats = self.store.stats();
        RagMetrics {
            vectors: stats.vectors,
            cache_entries: stats.cache_entries,
            approx_memory_bytes: stats.approx_bytes,
            cache_size_ratio: ratio(stats.cache_entries as u64, stats.vectors as u64),
            cache_hit_rate: ratio(stats.cache_hits, stats.cache_misses),
            cache_hits: stats.cache_hits,
            cache_misses: stats.cache_misses,
            persistent: stats.persistent,
        }
    }
}

/// Title, body, and for tasks their status and priority.
fn indexable_text(entity: &Entity, content: &str) -> String {
    let mut text = String::new();
    let title = entity.title.trim();
    if !title.is_empty() {
        text.push_str(title);
        text.push_str("\n\n");
    }
    text.push_str(content);

    if entity.entity_type == EntityType::Todo {
        if let Some(status) = &entity.status {
            let _ = write!(text, "\nStatus: {status}");
        }
        if let Some(priority) = entity.priority {
            let _ = write!(text, "\nPriority: {priority}");
        }
    }
    text
}

/// `a / (a + b)`, or 0 when both are 0.
#[expect(clippy::cast_precision_loss)]
fn ratio(a: u64, b: u64) -> f32 {
    let total = a + b;
    if total == 0 {
        0.0
    } else {
        a as f32 / total as f32
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    u8::try_from(done * 100 / total).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use quill_llm::mock::{MockEmbedder, MockLanguageModel};
    use quill_memory::{Priority, VectorStoreConfig};

    use super::*;

    fn entity(id: &str, entity_type: EntityType, content: Option<&str>) -> Entity {
        Entity {
            id: id.into(),
            owner_id: "u1".into(),
            entity_type,
            title: format!("Title {id}"),
            decrypted_content: content.map(str::to_owned),
            updated_at: Utc::now(),
            tags: Vec::new(),
            priority: None,
            status: None,
            due_date: None,
            container_id: None,
        }
    }

    fn engine(dimensions: usize) -> RagEngine<MockEmbedder, MockLanguageModel> {
        let store = Arc::new(VectorStore::new(
            VectorStoreConfig {
                dimensions,
                ..VectorStoreConfig::default()
            },
            None,
        ));
        RagEngine::new(
            store,
            Arc::new(MockEmbedder::new(dimensions)),
            Arc::new(MockLanguageModel::default()),
            RagConfig::default(),
        )
    }

    #[tokio::test]
    async fn operations_fail_before_initialize() {
        let engine = engine(8);
        let err = engine
            .index_entity(&entity("n1", EntityType::Note, Some("text")))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::NotInitialized));
        assert!(matches!(
            engine.search("q", &RetrievalOptions::default()).await,
            Err(RagError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn dimension_disagreement_fails_fast() {
        let store = Arc::new(VectorStore::new(
            VectorStoreConfig {
                dimensions: 4,
                ..VectorStoreConfig::default()
            },
            None,
        ));
        let engine = RagEngine::new(
            store,
            Arc::new(MockEmbedder::new(8)),
            Arc::new(MockLanguageModel::default()),
            RagConfig::default(),
        );
        assert!(matches!(
            engine.initialize().await,
            Err(RagError::DimensionConfig {
                provider: 8,
                store: 4
            })
        ));
    }

    #[tokio::test]
    async fn entity_without_content_is_skipped() {
        let engine = engine(8);
        engine.initialize().await.unwrap();
        let outcome = engine
            .index_entity(&entity("n1", EntityType::Note, None))
            .await
            .unwrap();
        assert_eq!(outcome, IndexOutcome::Skipped);
        assert!(engine.store().is_empty());
    }

    #[tokio::test]
    async fn reindexing_replaces_chunks() {
        let engine = engine(8);
        engine.initialize().await.unwrap();
        let mut note = entity("n1", EntityType::Note, Some("first version of the note"));
        engine.index_entity(&note).await.unwrap();
        note.decrypted_content = Some("second version of the note".into());
        engine.index_entity(&note).await.unwrap();

        let records = engine.store().get_by_entity("n1");
        assert_eq!(records.len(), 1);
        assert!(records[0].content.as_deref().unwrap().contains("second version"));
    }

    #[tokio::test]
    async fn todo_text_includes_status_and_priority() {
        let mut todo = entity("t1", EntityType::Todo, Some("Ship the release"));
        todo.status = Some("open".into());
        todo.priority = Some(Priority::High);
        let text = indexable_text(&todo, "Ship the release");
        assert!(text.starts_with("Title t1\n\nShip the release"));
        assert!(text.contains("Status: open"));
        assert!(text.contains("Priority: high"));
    }

    #[tokio::test]
    async fn progress_reaches_one_hundred_percent() {
        let engine = engine(8);
        engine.initialize().await.unwrap();
        let entities: Vec<Entity> = (0..23)
            .map(|i| entity(&format!("n{i}"), EntityType::Note, Some("shared body text")))
            .collect();

        let mut seen = Vec::new();
        let report = engine
            .index_entities(&entities, |p| seen.push((p.processed, p.percent)))
            .await
            .unwrap();

        assert_eq!(report.indexed, 23);
        assert_eq!(seen.len(), 23);
        assert_eq!(seen.last(), Some(&(23, 100)));
    }

    #[tokio::test]
    async fn dispose_returns_to_uninitialized() {
        let engine = engine(8);
        engine.initialize().await.unwrap();
        engine.dispose().await;
        assert!(!engine.is_initialized());
        assert!(matches!(engine.clear().await, Err(RagError::NotInitialized)));
    }

    #[test]
    fn ratio_handles_zero() {
        assert!(ratio(0, 0).abs() < f32::EPSILON);
        assert!((ratio(1, 3) - 0.25).abs() < f32::EPSILON);
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(5, 10), 50);
    }
}
