use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use quill_memory::{EntityType, MetadataFilter, Priority, RecordMetadata, SearchHit};

/// Where a [`ContextItem`] came from in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub entity_id: String,
    pub record_id: String,
    pub chunk_index: usize,
}

/// The subset of record metadata surfaced to prompts and UIs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&RecordMetadata> for ContextMetadata {
    fn from(meta: &RecordMetadata) -> Self {
        Self {
            tags: meta.tags.clone(),
            container_id: meta.container_id.clone(),
            priority: meta.priority,
            status: meta.status.clone(),
            due_date: meta.due_date,
            updated_at: meta.updated_at,
        }
    }
}

/// One retrieved fragment, independent of the store once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub entity_type: EntityType,
    /// Record id (`{entity_id}_chunk_{n}`).
    pub id: String,
    pub title: Option<String>,
    pub excerpt: String,
    pub relevance: f32,
    pub source: SourceRef,
    pub metadata: ContextMetadata,
}

impl From<SearchHit> for ContextItem {
    fn from(hit: SearchHit) -> Self {
        let metadata = ContextMetadata::from(&hit.metadata);
        Self {
            entity_type: hit.entity_type,
            excerpt: hit.content.unwrap_or_default(),
            title: hit.metadata.title,
            relevance: hit.score,
            source: SourceRef {
                entity_id: hit.entity_id,
                record_id: hit.id.clone(),
                chunk_index: hit.chunk_index,
            },
            id: hit.id,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub query: String,
    pub items: Vec<ContextItem>,
    pub total_results: usize,
    pub duration_ms: u64,
    pub has_context: bool,
}

impl RetrievedContext {
    #[must_use]
    pub fn new(query: impl Into<String>, items: Vec<ContextItem>, duration_ms: u64) -> Self {
        Self {
            query: query.into(),
            total_results: items.len(),
            has_context: !items.is_empty(),
            items,
            duration_ms,
        }
    }

    #[must_use]
    pub fn empty(query: impl Into<String>) -> Self {
        Self::new(query, Vec::new(), 0)
    }

    /// Mean relevance of the items, or 0 when empty.
    #[must_use]
    pub fn mean_relevance(&self) -> f32 {
        if self.items.is_empty() {
            return 0.0;
        }
        #[expect(clippy::cast_precision_loss)]
        let n = self.items.len() as f32;
        self.items.iter().map(|i| i.relevance).sum::<f32>() / n
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
    Completion,
    Related,
    ActionItems,
    Summary,
    Insight,
}

impl SuggestionType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Related => "related",
            Self::ActionItems => "action_items",
            Self::Summary => "summary",
            Self::Insight => "insight",
        }
    }
}

impl std::fmt::Display for SuggestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SuggestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "completion" => Ok(Self::Completion),
            "related" => Ok(Self::Related),
            "action_items" => Ok(Self::ActionItems),
            "summary" => Ok(Self::Summary),
            "insight" => Ok(Self::Insight),
            _ => Err(format!("unknown suggestion type: {s}")),
        }
    }
}

/// What applying a suggestion does in the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuggestionAction {
    /// Insert `text` at character offset `position`.
    Insert { position: usize, text: String },
    Link {
        entity_id: String,
        entity_type: EntityType,
        title: Option<String>,
    },
    CreateTodo {
        title: String,
        source_entity_id: Option<String>,
    },
    Navigate { entity_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: SuggestionType,
    pub content: String,
    pub confidence: f32,
    pub source_context: Vec<ContextItem>,
    pub action: Option<SuggestionAction>,
    pub generated_at: DateTime<Utc>,
    pub processing_ms: u64,
}

impl Suggestion {
    #[must_use]
    pub fn new(kind: SuggestionType, content: impl Into<String>, confidence: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content: content.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source_context: Vec::new(),
            action: None,
            generated_at: Utc::now(),
            processing_ms: 0,
        }
    }

    #[must_use]
    pub fn with_sources(mut self, sources: Vec<ContextItem>) -> Self {
        self.source_context = sources;
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: SuggestionAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// The document the user is currently editing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentContext {
    pub entity_type: EntityType,
    /// Excluded from retrieval so a note is never suggested to itself.
    #[serde(default)]
    pub entity_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Character offset of the cursor in `content`.
    #[serde(default)]
    pub cursor_position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionRequest {
    pub current_context: Option<CurrentContext>,
    pub suggestion_type: SuggestionType,
    pub max_suggestions: usize,
    pub query: Option<String>,
    pub filters: Option<MetadataFilter>,
}

impl SuggestionRequest {
    #[must_use]
    pub fn new(suggestion_type: SuggestionType) -> Self {
        Self {
            current_context: None,
            suggestion_type,
            max_suggestions: 3,
            query: None,
            filters: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: CurrentContext) -> Self {
        self.current_context = Some(context);
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionResponse {
    pub suggestions: Vec<Suggestion>,
    pub context: RetrievedContext,
    pub total_ms: u64,
}

/// An upstream note, task or document excerpt, already decrypted by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub owner_id: String,
    pub entity_type: EntityType,
    pub title: String,
    /// `None` when the content could not be decrypted; such entities are skipped.
    #[serde(default)]
    pub decrypted_content: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub container_id: Option<String>,
}

impl Entity {
    #[must_use]
    pub fn metadata(&self) -> RecordMetadata {
        RecordMetadata {
            owner_id: self.owner_id.clone(),
            title: Some(self.title.clone()).filter(|t| !t.is_empty()),
            tags: self.tags.clone(),
            container_id: self.container_id.clone(),
            priority: self.priority,
            status: self.status.clone(),
            due_date: self.due_date,
            updated_at: Some(self.updated_at),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexProgress {
    /// 0-100.
    pub percent: u8,
    pub processed: usize,
    pub total: usize,
    /// Id of the entity just processed.
    pub current: String,
    pub errors: Vec<String>,
}

/// Summary of an [`crate::RagEngine::index_entities`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    /// Entities without decrypted content.
    pub skipped: usize,
    pub failed: usize,
    pub chunks_created: usize,
    pub cache_hits: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RagMetrics {
    pub vectors: usize,
    pub cache_entries: usize,
    pub approx_memory_bytes: usize,
    /// `cache_entries / (cache_entries + vectors)`. A size ratio, not a hit rate.
    pub cache_size_ratio: f32,
    /// Hits over lookups since start, from the cache's own counters.
    pub cache_hit_rate: f32,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub persistent: bool,
}
