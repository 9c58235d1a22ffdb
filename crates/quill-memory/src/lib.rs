//! Per-user vector index for quill.
//!
//! The working set lives in memory and is scanned brute-force; a [`DurableStore`]
//! mirror (SQLite by default) carries records and cached embeddings across sessions.
//! Chunk text is never written to the mirror.

pub mod cache;
pub mod chunker;
pub mod durable;
pub mod error;
mod mirror;
pub mod similarity;
pub mod sqlite;
pub mod store;
pub mod types;

pub use chunker::{ChunkConfig, chunk_text, content_hash, estimate_tokens};
pub use durable::{DurableStore, InMemoryDurableStore};
pub use error::{MemoryError, Result};
pub use similarity::DistanceMetric;
pub use sqlite::SqliteDurableStore;
pub use store::{StoreStats, VectorStore, VectorStoreConfig};
pub use types::{
    ContentChunk, EmbeddingCacheEntry, EntityType, MetadataFilter, Priority, RecordMetadata,
    SearchHit, SearchOptions, VectorRecord,
};
