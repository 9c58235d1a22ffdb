use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use quill_memory::VectorStoreConfig;
use quill_rag::RagConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llama3.2:3b".into(),
            embedding_model: "all-minilm".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `:memory:` keeps the durable mirror in process.
    pub sqlite_path: String,
    pub vector: VectorStoreConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "./data/quill.db".into(),
            vector: VectorStoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub rag: RagConfig,
    /// Used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            store: StoreConfig::default(),
            rag: RagConfig::default(),
            log_level: "info".into(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to sensible defaults when the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("QUILL_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("QUILL_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("QUILL_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("QUILL_SQLITE_PATH") {
            self.store.sqlite_path = v;
        }
        if let Ok(v) = std::env::var("QUILL_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("QUILL_MIN_CONFIDENCE") {
            match v.parse::<f32>() {
                Ok(min) => self.rag.suggestions.min_confidence = min,
                Err(_) => tracing::warn!("ignoring invalid QUILL_MIN_CONFIDENCE value: {v}"),
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://")
        {
            bail!("llm.base_url must be an http(s) URL, got {:?}", self.llm.base_url);
        }
        let vector = &self.store.vector;
        if vector.dimensions == 0 {
            bail!("store.vector.dimensions must be positive");
        }
        if vector.max_vectors == 0 {
            bail!("store.vector.max_vectors must be positive");
        }
        let chunking = &vector.chunking;
        if chunking.max_chunk_size == 0 || chunking.overlap >= chunking.max_chunk_size {
            bail!(
                "store.vector.chunking.overlap ({}) must be smaller than max_chunk_size ({})",
                chunking.overlap,
                chunking.max_chunk_size
            );
        }
        let suggestions = &self.rag.suggestions;
        for (name, value) in [
            ("min_confidence", suggestions.min_confidence),
            ("quick_min_relevance", suggestions.quick_min_relevance),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("rag.suggestions.{name} must be within [0, 1], got {value}");
            }
        }
        if self.rag.retrieval.top_k == 0 {
            bail!("rag.retrieval.top_k must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    const ENV_KEYS: [&str; 6] = [
        "QUILL_LLM_BASE_URL",
        "QUILL_LLM_MODEL",
        "QUILL_EMBEDDING_MODEL",
        "QUILL_SQLITE_PATH",
        "QUILL_LOG_LEVEL",
        "QUILL_MIN_CONFIDENCE",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.store.vector.dimensions, 384);
        assert!((config.rag.suggestions.min_confidence - 0.6).abs() < f32::EPSILON);
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn missing_file_yields_defaults() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    #[serial]
    fn parse_partial_toml() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quill.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
log_level = "debug"

[llm]
model = "qwen2.5:1.5b"

[store]
sqlite_path = ":memory:"

[store.vector]
dimensions = 768
max_vectors = 500

[store.vector.chunking]
max_chunk_size = 256

[rag.retrieval]
top_k = 8

[rag.suggestions]
min_confidence = 0.5
"#
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.llm.model, "qwen2.5:1.5b");
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.store.sqlite_path, ":memory:");
        assert_eq!(config.store.vector.dimensions, 768);
        assert_eq!(config.store.vector.max_vectors, 500);
        assert_eq!(config.store.vector.chunking.max_chunk_size, 256);
        assert_eq!(config.store.vector.chunking.overlap, 50);
        assert_eq!(config.rag.retrieval.top_k, 8);
        assert!((config.rag.suggestions.min_confidence - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    #[serial]
    fn env_overrides() {
        clear_env();
        let mut config = Config::default();

        unsafe {
            std::env::set_var("QUILL_LLM_MODEL", "phi3:mini");
            std::env::set_var("QUILL_SQLITE_PATH", "/tmp/q.db");
            std::env::set_var("QUILL_MIN_CONFIDENCE", "0.75");
        }
        config.apply_env_overrides();
        clear_env();

        assert_eq!(config.llm.model, "phi3:mini");
        assert_eq!(config.store.sqlite_path, "/tmp/q.db");
        assert!((config.rag.suggestions.min_confidence - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    #[serial]
    fn invalid_env_confidence_is_ignored() {
        clear_env();
        let mut config = Config::default();
        unsafe { std::env::set_var("QUILL_MIN_CONFIDENCE", "high") };
        config.apply_env_overrides();
        clear_env();
        assert!((config.rag.suggestions.min_confidence - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.llm.base_url = "localhost:11434".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.store.vector.chunking.overlap = config.store.vector.chunking.max_chunk_size;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rag.suggestions.min_confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.store.vector.dimensions = 0;
        assert!(config.validate().is_err());
    }
}
