//! Record, chunk and query types shared by the store and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    Note,
    Todo,
    DocumentChunk,
}

impl EntityType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Todo => "todo",
            Self::DocumentChunk => "document-chunk",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "note" => Ok(Self::Note),
            "todo" => Ok(Self::Todo),
            "document-chunk" => Ok(Self::DocumentChunk),
            _ => Err(format!("unknown entity type: {s}")),
        }
    }
}

/// Task priority, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[must_use]
    pub fn weight(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("unknown priority: {s}")),
        }
    }
}

/// Descriptive fields copied from the source entity at index time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
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

/// One embedded chunk of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// `{entity_id}_chunk_{chunk_index}`.
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub embedding: Vec<f32>,
    /// blake3 hex of the chunk text.
    pub content_hash: String,
    /// Unix milliseconds.
    pub indexed_at: i64,
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Plaintext chunk. Held in memory only; never serialized.
    #[serde(skip)]
    pub content: Option<String>,
    pub metadata: RecordMetadata,
}

impl VectorRecord {
    #[must_use]
    pub fn chunk_id(entity_id: &str, chunk_index: usize) -> String {
        format!("{entity_id}_chunk_{chunk_index}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingCacheEntry {
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub model_id: String,
    /// Unix milliseconds.
    pub cached_at: i64,
}

/// A span of source text produced by [`crate::chunk_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    pub text: String,
    pub index: usize,
    pub total: usize,
    /// Character offset of the first char in the source text.
    pub start: usize,
    /// Character offset one past the last char.
    pub end: usize,
    pub content_hash: String,
}

/// Conjunctive filter over [`RecordMetadata`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    pub owner_id: Option<String>,
    pub container_id: Option<String>,
    /// Record must carry at least one of these tags.
    pub tags_any: Vec<String>,
    pub status: Option<String>,
    pub min_priority: Option<Priority>,
}

impl MetadataFilter {
    #[must_use]
    pub fn matches(&self, meta: &RecordMetadata) -> bool {
        if let Some(owner) = &self.owner_id
            && &meta.owner_id != owner
        {
            return false;
        }
        if let Some(container) = &self.container_id
            && meta.container_id.as_ref() != Some(container)
        {
            return false;
        }
        if !self.tags_any.is_empty() && !meta.tags.iter().any(|t| self.tags_any.contains(t)) {
            return false;
        }
        if let Some(status) = &self.status
            && meta.status.as_ref() != Some(status)
        {
            return false;
        }
        if let Some(min) = self.min_priority
            && meta.priority.is_none_or(|p| p < min)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub threshold: f32,
    /// Restrict to these entity types; `None` searches all.
    pub entity_types: Option<Vec<EntityType>>,
    pub metadata_filter: Option<MetadataFilter>,
    pub include_content: bool,
    /// Wall-clock budget for the scan. Results found before it expires are returned.
    pub timeout_ms: u64,
    pub exclude_entity_ids: Vec<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            threshold: 0.3,
            entity_types: None,
            metadata_filter: None,
            include_content: true,
            timeout_ms: 100,
            exclude_entity_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub score: f32,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub content: Option<String>,
    pub metadata: RecordMetadata,
}
