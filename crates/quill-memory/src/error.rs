#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("vector store used before initialize()")]
    NotInitialized,

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("durable store error: {0}")]
    Durable(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
