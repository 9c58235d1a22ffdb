use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Sampling parameters for a single generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateOptions {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStyle {
    #[default]
    Concise,
    Detailed,
    Bullets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummarizeOptions {
    pub style: SummaryStyle,
    /// Upper bound on the summary length, in words.
    pub max_length: usize,
}

impl Default for SummarizeOptions {
    fn default() -> Self {
        Self {
            style: SummaryStyle::Concise,
            max_length: 120,
        }
    }
}

/// Output of a language-model call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Generation {
    pub text: String,
    pub tokens_generated: usize,
    pub duration_ms: u64,
    /// `true` when the model stopped because it hit `max_tokens`.
    pub truncated: bool,
}

/// Text → fixed-dimension vector.
///
/// Implementations must be deterministic per `(text, model_id)`: the embedding cache in
/// `quill-memory` is keyed by content hash and reuses vectors across entities.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or returns no vector.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    /// Embed several texts. The default calls [`Self::embed`] sequentially.
    ///
    /// # Errors
    ///
    /// Returns the first embedding error encountered.
    fn batch_embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, LlmError>> + Send {
        async move {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }
    }

    fn dimensions(&self) -> usize;

    fn model_id(&self) -> &str;

    /// Bring the backend up (load weights, check connectivity).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    fn initialize(&self) -> impl Future<Output = Result<(), LlmError>> + Send {
        async { Ok(()) }
    }

    /// Drop any handles held on the backend.
    fn release(&self) {}
}

/// Local text generation.
pub trait LanguageModel: Send + Sync {
    /// Generate a continuation for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an error if the model fails or produces no output.
    fn generate(
        &self,
        prompt: &str,
        options: GenerateOptions,
    ) -> impl Future<Output = Result<Generation, LlmError>> + Send;

    /// Summarize `text`.
    ///
    /// # Errors
    ///
    /// Returns an error if the model fails or produces no output.
    fn summarize(
        &self,
        text: &str,
        options: SummarizeOptions,
    ) -> impl Future<Output = Result<Generation, LlmError>> + Send;

    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded.
    fn initialize(&self) -> impl Future<Output = Result<(), LlmError>> + Send {
        async { Ok(()) }
    }

    fn release(&self) {}
}

/// Build the instruction used by backends that have no dedicated summarization endpoint.
#[must_use]
pub fn summarize_prompt(text: &str, options: SummarizeOptions) -> String {
    let style = match options.style {
        SummaryStyle::Concise => "a concise paragraph",
        SummaryStyle::Detailed => "a detailed overview",
        SummaryStyle::Bullets => "a short bulleted list",
    };
    format!(
        "Summarize the following text as {style} of at most {} words. \
         Preserve key facts and decisions.\n\nText:\n{text}\n\nSummary:",
        options.max_length
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_generate_options() {
        let opts = GenerateOptions::default();
        assert_eq!(opts.max_tokens, 256);
        assert!(opts.temperature > 0.0 && opts.temperature <= 1.0);
    }

    #[test]
    fn summarize_prompt_mentions_style_and_limit() {
        let prompt = summarize_prompt(
            "Some text.",
            SummarizeOptions {
                style: SummaryStyle::Bullets,
                max_length: 40,
            },
        );
        assert!(prompt.contains("bulleted list"));
        assert!(prompt.contains("40 words"));
        assert!(prompt.ends_with("Summary:"));
    }

    #[test]
    fn summary_style_defaults_to_concise() {
        assert_eq!(SummaryStyle::default(), SummaryStyle::Concise);
        assert_eq!(SummarizeOptions::default().style, SummaryStyle::Concise);
    }
}
