use std::time::Instant;

use ollama_rs::Ollama;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::models::ModelOptions;

use crate::error::LlmError;
use crate::provider::{
    EmbeddingProvider, GenerateOptions, Generation, LanguageModel, SummarizeOptions,
    summarize_prompt,
};

const DEFAULT_PORT: u16 = 11434;

/// Local Ollama daemon serving both chat and embedding models.
///
/// Nothing leaves the machine as long as `base_url` points at localhost.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Ollama,
    model: String,
    embedding_model: String,
    dimensions: usize,
}

impl OllamaProvider {
    #[must_use]
    pub fn new(base_url: &str, model: String, embedding_model: String, dimensions: usize) -> Self {
        let (host, port) = parse_host_port(base_url);
        Self {
            client: Ollama::new(host, port),
            model,
            embedding_model,
            dimensions,
        }
    }

    /// Check if Ollama is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection to Ollama fails.
    pub async fn health_check(&self) -> Result<(), LlmError> {
        self.client.list_local_models().await.map_err(|e| {
            LlmError::Unavailable(format!("failed to connect to Ollama (is it running?): {e}"))
        })?;
        Ok(())
    }

    async fn chat(&self, prompt: &str, options: GenerateOptions) -> Result<Generation, LlmError> {
        let start = Instant::now();
        let max_tokens = i32::try_from(options.max_tokens).unwrap_or(i32::MAX);
        let request = ChatMessageRequest::new(
            self.model.clone(),
            vec![ChatMessage::user(prompt.to_owned())],
        )
        .options(
            ModelOptions::default()
                .num_predict(max_tokens)
                .temperature(options.temperature)
                .top_p(options.top_p),
        );

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| LlmError::Generation(format!("Ollama chat request failed: {e}")))?;

        let text = response.message.content.trim().to_owned();
        if text.is_empty() {
            return Err(LlmError::EmptyResponse { provider: "ollama" });
        }

        let tokens_generated = text.chars().count() / 4;
        Ok(Generation {
            truncated: tokens_generated >= options.max_tokens,
            tokens_generated,
            duration_ms: start.elapsed().as_millis().try_into().unwrap_or(u64::MAX),
            text,
        })
    }
}

impl EmbeddingProvider for OllamaProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = GenerateEmbeddingsRequest::new(
            self.embedding_model.clone(),
            EmbeddingsInput::from(text),
        );

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| LlmError::Embedding(format!("Ollama embedding request failed: {e}")))?;

        let vector = response
            .embeddings
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse { provider: "ollama" })?;

        if vector.len() != self.dimensions {
            return Err(LlmError::Dimension {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.embedding_model
    }

    async fn initialize(&self) -> Result<(), LlmError> {
        self.health_check().await?;
        tracing::info!(model = %self.embedding_model, "embedding backend reachable");
        Ok(())
    }
}

impl LanguageModel for OllamaProvider {
    async fn generate(
        &self,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<Generation, LlmError> {
        self.chat(prompt, options).await
    }

    async fn summarize(
        &self,
        text: &str,
        options: SummarizeOptions,
    ) -> Result<Generation, LlmError> {
        let prompt = summarize_prompt(text, options);
        let generate = GenerateOptions {
            // ~1.5 tokens per word leaves headroom for punctuation.
            max_tokens: options.max_length * 3 / 2,
            temperature: 0.3,
            ..GenerateOptions::default()
        };
        self.chat(&prompt, generate).await
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ollama"
    }

    async fn initialize(&self) -> Result<(), LlmError> {
        self.health_check().await?;
        tracing::info!(model = %self.model, "language model backend reachable");
        Ok(())
    }
}

fn parse_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some(colon_pos) = url.rfind(':') {
        let port_str = &url[colon_pos + 1..];
        if let Ok(port) = port_str.parse::<u16>() {
            let host = url[..colon_pos].to_string();
            return (host, port);
        }
    }
    (url.to_string(), DEFAULT_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_port_with_port() {
        let (host, port) = parse_host_port("http://localhost:11434");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_without_port() {
        let (host, port) = parse_host_port("http://127.0.0.1/");
        assert_eq!(host, "http://127.0.0.1");
        assert_eq!(port, DEFAULT_PORT);
    }

    #[test]
    fn reports_configured_embedding_model() {
        let provider = OllamaProvider::new(
            "http://localhost:11434",
            "llama3.2:3b".into(),
            "all-minilm".into(),
            384,
        );
        assert_eq!(provider.model_id(), "all-minilm");
        assert_eq!(provider.dimensions(), 384);
        assert_eq!(LanguageModel::name(&provider), "ollama");
    }
}
