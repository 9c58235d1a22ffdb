//! Query-time retrieval: embed, search, shape results into [`ContextItem`]s.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use quill_llm::EmbeddingProvider;
use quill_memory::{EntityType, MetadataFilter, Priority, SearchOptions, VectorStore};

use crate::error::Result;
use crate::query::{KeyPhraseQueryFormatter, QueryFormatter, text_at_position};
use crate::types::{ContextItem, RetrievedContext};

/// Rendered in place of context when retrieval found nothing.
pub const NO_CONTEXT: &str = "No relevant context found.";

const EXCERPT_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub top_k: usize,
    pub threshold: f32,
    pub timeout_ms: u64,
    /// Results for cursor-position retrieval, which wants tighter context.
    pub position_top_k: usize,
    /// Chars searched on each side of the cursor for the enclosing paragraph.
    pub position_window: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            threshold: 0.3,
            timeout_ms: 100,
            position_top_k: 3,
            position_window: 1000,
        }
    }
}

/// Per-call overrides. Unset fields fall back to [`RetrieverConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetrievalOptions {
    pub top_k: Option<usize>,
    pub threshold: Option<f32>,
    pub entity_types: Option<Vec<EntityType>>,
    pub filter: Option<MetadataFilter>,
    pub exclude_entity_ids: Vec<String>,
    pub timeout_ms: Option<u64>,
}

impl RetrievalOptions {
    #[must_use]
    pub fn top_k(k: usize) -> Self {
        Self {
            top_k: Some(k),
            ..Self::default()
        }
    }
}

pub struct ContextRetriever<E: EmbeddingProvider> {
    store: Arc<VectorStore>,
    embedder: Arc<E>,
    formatter: Arc<dyn QueryFormatter>,
    config: RetrieverConfig,
}

impl<E: EmbeddingProvider> ContextRetriever<E> {
    #[must_use]
    pub fn new(store: Arc<VectorStore>, embedder: Arc<E>, config: RetrieverConfig) -> Self {
        Self {
            store,
            embedder,
            formatter: Arc::new(KeyPhraseQueryFormatter),
            config,
        }
    }

    #[must_use]
    pub fn with_query_formatter(mut self, formatter: Arc<dyn QueryFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    #[must_use]
    pub fn query_formatter(&self) -> &dyn QueryFormatter {
        self.formatter.as_ref()
    }

    fn search_options(&self, options: &RetrievalOptions, default_top_k: usize) -> SearchOptions {
        SearchOptions {
            top_k: options.top_k.unwrap_or(default_top_k),
            threshold: options.threshold.unwrap_or(self.config.threshold),
            entity_types: options.entity_types.clone(),
            metadata_filter: options.filter.clone(),
            include_content: true,
            timeout_ms: options.timeout_ms.unwrap_or(self.config.timeout_ms),
            exclude_entity_ids: options.exclude_entity_ids.clone(),
        }
    }

    async fn run(&self, query: &str, search: &SearchOptions) -> Result<RetrievedContext> {
        let start = Instant::now();
        if query.trim().is_empty() {
            return Ok(RetrievedContext::empty(query));
        }

        let vector = self.embedder.embed(query).await?;
        let hits = self.store.search(&vector, search)?;
        let items: Vec<ContextItem> = hits.into_iter().map(ContextItem::from).collect();

        let duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::debug!(results = items.len(), duration_ms, "context retrieved");
        Ok(RetrievedContext::new(query, items, duration_ms))
    }

    /// Semantic search for free text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding the query or searching the store fails.
    pub async fn retrieve_context(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<RetrievedContext> {
        let search = self.search_options(options, self.config.top_k);
        self.run(query, &search).await
    }

    /// Context for a whole note, queried by its key phrases.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding the query or searching the store fails.
    pub async fn retrieve_context_for_note(
        &self,
        content: &str,
        title: Option<&str>,
        options: &RetrievalOptions,
    ) -> Result<RetrievedContext> {
        let query = self.formatter.note_query(content, title);
        self.retrieve_context(&query, options).await
    }

    /// Tasks only, ranked by priority, then earliest due date, then relevance.
    ///
    /// Fetches twice the requested count before re-ranking.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding the query or searching the store fails.
    pub async fn retrieve_context_for_todos(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<RetrievedContext> {
        let top_k = options.top_k.unwrap_or(self.config.top_k);
        let mut search = self.search_options(options, top_k);
        search.top_k = top_k * 2;
        search.entity_types = Some(vec![EntityType::Todo]);

        let mut context = self.run(query, &search).await?;
        context.items.sort_by(todo_order);
        context.items.truncate(top_k);
        context.total_results = context.items.len();
        context.has_context = !context.items.is_empty();
        Ok(context)
    }

    /// Context for the paragraph (or sentence) around a cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding the query or searching the store fails.
    pub async fn retrieve_context_at_position(
        &self,
        content: &str,
        cursor: usize,
        options: &RetrievalOptions,
    ) -> Result<RetrievedContext> {
        let local = text_at_position(content, cursor, self.config.position_window);
        let mut query = self.formatter.note_query(&local, None);
        if query.trim().is_empty() {
            query = local;
        }
        let search = self.search_options(options, self.config.position_top_k);
        self.run(&query, &search).await
    }

    /// Note retrieval that never returns the originating entity.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding the query or searching the store fails.
    pub async fn retrieve_cross_references(
        &self,
        content: &str,
        title: Option<&str>,
        self_id: &str,
        options: &RetrievalOptions,
    ) -> Result<RetrievedContext> {
        let mut options = options.clone();
        if !options.exclude_entity_ids.iter().any(|id| id == self_id) {
            options.exclude_entity_ids.push(self_id.to_owned());
        }
        self.retrieve_context_for_note(content, title, &options).await
    }
}

fn todo_order(a: &ContextItem, b: &ContextItem) -> Ordering {
    let weight = |item: &ContextItem| item.metadata.priority.map_or(0, Priority::weight);
    weight(b)
        .cmp(&weight(a))
        .then_with(|| match (a.metadata.due_date, b.metadata.due_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| b.relevance.partial_cmp(&a.relevance).unwrap_or(Ordering::Equal))
}

/// Union of several retrievals: one entry per item id (highest relevance wins),
/// re-sorted by relevance, durations summed.
#[must_use]
pub fn merge_contexts(contexts: Vec<RetrievedContext>) -> RetrievedContext {
    let mut queries: Vec<String> = Vec::new();
    let mut duration_ms = 0u64;
    let mut best: HashMap<String, ContextItem> = HashMap::new();

    for context in contexts {
        if !context.query.is_empty() && !queries.contains(&context.query) {
            queries.push(context.query);
        }
        duration_ms = duration_ms.saturating_add(context.duration_ms);
        for item in context.items {
            match best.get(&item.id) {
                Some(existing) if existing.relevance >= item.relevance => {}
                _ => {
                    best.insert(item.id.clone(), item);
                }
            }
        }
    }

    let mut items: Vec<ContextItem> = best.into_values().collect();
    items.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    RetrievedContext::new(queries.join(" | "), items, duration_ms)
}

/// Render context for a prompt, adding whole items until `max_chars` would be exceeded.
///
/// Returns [`NO_CONTEXT`] when there is nothing to render.
#[must_use]
pub fn format_context_for_prompt(context: &RetrievedContext, max_chars: usize) -> String {
    if context.items.is_empty() {
        return NO_CONTEXT.to_owned();
    }

    let mut out = String::new();
    let mut used = 0;
    for item in &context.items {
        let block = render_item(item);
        let len = block.chars().count();
        let sep = if out.is_empty() { 0 } else { 2 };
        if used + sep + len > max_chars {
            if out.is_empty() {
                out = truncate_chars(&block, max_chars);
            }
            break;
        }
        if sep > 0 {
            out.push_str("\n\n");
        }
        out.push_str(&block);
        used += sep + len;
    }

    if out.trim().is_empty() {
        NO_CONTEXT.to_owned()
    } else {
        out
    }
}

fn render_item(item: &ContextItem) -> String {
    let mut block = format!(
        "[{}] {}",
        item.entity_type,
        item.title.as_deref().unwrap_or("Untitled")
    );
    let meta = &item.metadata;
    if !meta.tags.is_empty() {
        let _ = write!(block, "\nTags: {}", meta.tags.join(", "));
    }
    if let Some(priority) = meta.priority {
        let _ = write!(block, "\nPriority: {priority}");
    }
    if let Some(due) = meta.due_date {
        let _ = write!(block, "\nDue: {}", due.format("%Y-%m-%d"));
    }
    if !item.excerpt.trim().is_empty() {
        let _ = write!(block, "\n{}", truncate_chars(item.excerpt.trim(), EXCERPT_CHARS));
    }
    block
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
