//! Retrieval-augmented suggestions over the quill vector index.
//!
//! [`ContextRetriever`] turns queries, notes and cursor positions into ranked context,
//! [`SuggestionEngine`] feeds that context to a local [`quill_llm::LanguageModel`], and
//! [`RagEngine`] owns the indexing policy and lifecycle for both.

pub mod engine;
pub mod error;
pub mod prompt;
pub mod query;
pub mod retriever;
pub mod suggestion;
pub mod types;

pub use engine::{IndexOutcome, RagConfig, RagEngine};
pub use error::{RagError, Result};
pub use prompt::{DefaultPromptFormatter, PromptFormatter};
pub use query::{KeyPhraseQueryFormatter, QueryFormatter};
pub use retriever::{
    ContextRetriever, NO_CONTEXT, RetrievalOptions, RetrieverConfig, format_context_for_prompt,
    merge_contexts,
};
pub use suggestion::{SuggestionConfig, SuggestionEngine};
pub use types::{
    ContextItem, ContextMetadata, CurrentContext, Entity, IndexProgress, IndexReport,
    RagMetrics, RetrievedContext, SourceRef, Suggestion, SuggestionAction, SuggestionRequest,
    SuggestionResponse, SuggestionType,
};
