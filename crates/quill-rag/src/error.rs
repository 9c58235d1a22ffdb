#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("RAG engine used before initialize()")]
    NotInitialized,

    #[error("vector store error: {0}")]
    Memory(#[from] quill_memory::MemoryError),

    #[error("LLM error: {0}")]
    Llm(#[from] quill_llm::LlmError),

    #[error("embedding provider produces {provider} dimensions but the store expects {store}")]
    DimensionConfig { provider: usize, store: usize },
}

pub type Result<T> = std::result::Result<T, RagError>;
