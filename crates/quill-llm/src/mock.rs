//! Test-only mock collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::{
    EmbeddingProvider, GenerateOptions, Generation, LanguageModel, SummarizeOptions,
};

/// Deterministic embedder: bag-of-words hashed into `dimensions` buckets, with optional
/// fixed vectors for exact texts. Counts every `embed` call.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimensions: usize,
    model_id: String,
    fixed: Arc<HashMap<String, Vec<f32>>>,
    calls: Arc<AtomicUsize>,
    pub fail: bool,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model_id: "mock-embedder".into(),
            fixed: Arc::new(HashMap::new()),
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }

    #[must_use]
    pub fn with_fixed(mut self, fixed: HashMap<String, Vec<f32>>) -> Self {
        self.fixed = Arc::new(fixed);
        self
    }

    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hashed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            let mut idx_bytes = [0u8; 8];
            idx_bytes.copy_from_slice(&hash.as_bytes()[..8]);
            #[allow(clippy::cast_possible_truncation)]
            let idx = (u64::from_le_bytes(idx_bytes) % self.dimensions as u64) as usize;
            v[idx] += 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        v
    }
}

impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(LlmError::Embedding("mock embedding error".into()));
        }
        Ok(self
            .fixed
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.hashed(text)))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Scripted language model: pops queued responses, then falls back to
/// `default_response`. Records every prompt it receives.
#[derive(Debug, Clone)]
pub struct MockLanguageModel {
    responses: Arc<Mutex<Vec<String>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    pub default_response: String,
    pub fail: bool,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
}

impl Default for MockLanguageModel {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response.".into(),
            fail: false,
            delay_ms: 0,
        }
    }
}

impl MockLanguageModel {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    async fn respond(&self, prompt: &str, max_tokens: usize) -> Result<Generation, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_owned());
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail {
            return Err(LlmError::Generation("mock LLM error".into()));
        }
        let text = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                self.default_response.clone()
            } else {
                responses.remove(0)
            }
        };
        let tokens_generated = text.chars().count() / 4;
        Ok(Generation {
            truncated: tokens_generated >= max_tokens,
            tokens_generated,
            duration_ms: self.delay_ms,
            text,
        })
    }
}

impl LanguageModel for MockLanguageModel {
    async fn generate(
        &self,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<Generation, LlmError> {
        self.respond(prompt, options.max_tokens).await
    }

    async fn summarize(
        &self,
        text: &str,
        options: SummarizeOptions,
    ) -> Result<Generation, LlmError> {
        self.respond(text, options.max_length * 2).await
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}
