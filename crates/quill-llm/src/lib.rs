//! Model collaborator contracts for quill.
//!
//! Retrieval and suggestion code only ever talks to an [`EmbeddingProvider`] and a
//! [`LanguageModel`]. Both are assumed to run on-device; the bundled
//! [`ollama::OllamaProvider`] targets a local Ollama daemon.

pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod provider;

pub use error::{LlmError, Result};
pub use provider::{
    EmbeddingProvider, GenerateOptions, Generation, LanguageModel, SummarizeOptions,
    SummaryStyle,
};
