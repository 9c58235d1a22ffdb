//! Turning retrieved context into typed suggestions.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use quill_llm::{
    EmbeddingProvider, GenerateOptions, LanguageModel, LlmError, SummarizeOptions, SummaryStyle,
};
use quill_memory::MetadataFilter;

use crate::error::Result;
use crate::prompt::{DefaultPromptFormatter, PromptFormatter};
use crate::retriever::{ContextRetriever, RetrievalOptions, format_context_for_prompt};
use crate::types::{
    ContextItem, CurrentContext, RetrievedContext, Suggestion, SuggestionAction,
    SuggestionRequest, SuggestionResponse, SuggestionType,
};

/// Summaries are scored independently of context relevance.
const SUMMARY_CONFIDENCE: f32 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    /// Suggestions below this confidence are dropped.
    pub min_confidence: f32,
    /// Relevance floor for the model-free quick path.
    pub quick_min_relevance: f32,
    pub completion_context_chars: usize,
    /// Trailing chars of the document shown to the model for completion.
    pub completion_recent_chars: usize,
    pub analysis_context_chars: usize,
    /// Shorter documents are not summarized.
    pub summary_min_chars: usize,
    pub summary_style: SummaryStyle,
    /// Upper bound on summary length, in words.
    pub summary_max_words: usize,
    pub completion_max_tokens: usize,
    pub analysis_max_tokens: usize,
    pub temperature: f32,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            quick_min_relevance: 0.6,
            completion_context_chars: 1500,
            completion_recent_chars: 500,
            analysis_context_chars: 2000,
            summary_min_chars: 200,
            summary_style: SummaryStyle::Concise,
            summary_max_words: 120,
            completion_max_tokens: 120,
            analysis_max_tokens: 300,
            temperature: 0.7,
        }
    }
}

pub struct SuggestionEngine<E: EmbeddingProvider, M: LanguageModel> {
    retriever: Arc<ContextRetriever<E>>,
    model: Arc<M>,
    prompts: Arc<dyn PromptFormatter>,
    config: SuggestionConfig,
}

impl<E: EmbeddingProvider, M: LanguageModel> SuggestionEngine<E, M> {
    #[must_use]
    pub fn new(retriever: Arc<ContextRetriever<E>>, model: Arc<M>, config: SuggestionConfig) -> Self {
        Self {
            retriever,
            model,
            prompts: Arc::new(DefaultPromptFormatter),
            config,
        }
    }

    #[must_use]
    pub fn with_prompt_formatter(mut self, prompts: Arc<dyn PromptFormatter>) -> Self {
        self.prompts = prompts;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SuggestionConfig {
        &self.config
    }

    /// Retrieve context for `request`, then generate suggestions of the requested type.
    ///
    /// A failing model yields an empty list, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error only if retrieval (query embedding or store search) fails.
    pub async fn generate_suggestions(
        &self,
        request: &SuggestionRequest,
    ) -> Result<SuggestionResponse> {
        let start = Instant::now();
        let context = self.retrieve_for(request).await?;

        let mut suggestions = if context.has_context {
            self.generate_for_type(request, &context).await
        } else {
            tracing::debug!(kind = %request.suggestion_type, "no context; skipping generation");
            Vec::new()
        };

        let before = suggestions.len();
        suggestions.retain(|s| s.confidence >= self.config.min_confidence);
        suggestions.truncate(request.max_suggestions);
        tracing::debug!(
            kind = %request.suggestion_type,
            generated = before,
            kept = suggestions.len(),
            "suggestions generated"
        );

        Ok(SuggestionResponse {
            suggestions,
            context,
            total_ms: elapsed_ms(start),
        })
    }

    /// Model-free suggestions: the most relevant items become links.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval fails.
    pub async fn generate_quick_suggestions(
        &self,
        request: &SuggestionRequest,
    ) -> Result<SuggestionResponse> {
        let start = Instant::now();
        let context = self.retrieve_for(request).await?;

        let suggestions = context
            .items
            .iter()
            .filter(|item| item.relevance >= self.config.quick_min_relevance)
            .take(request.max_suggestions)
            .map(link_suggestion)
            .collect();

        Ok(SuggestionResponse {
            suggestions,
            context,
            total_ms: elapsed_ms(start),
        })
    }

    /// Notes related to the given one, never including itself.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval fails.
    pub async fn get_related_notes(
        &self,
        content: &str,
        title: Option<&str>,
        self_id: &str,
        limit: usize,
    ) -> Result<Vec<ContextItem>> {
        let context = self
            .retriever
            .retrieve_cross_references(content, title, self_id, &RetrievalOptions::top_k(limit))
            .await?;
        Ok(context.items)
    }

    /// Related notes as `link` suggestions.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval fails.
    pub async fn get_suggested_links(
        &self,
        content: &str,
        title: Option<&str>,
        self_id: &str,
        limit: usize,
    ) -> Result<Vec<Suggestion>> {
        let related = self.get_related_notes(content, title, self_id, limit).await?;
        Ok(related
            .iter()
            .map(link_suggestion)
            .filter(|s| s.confidence >= self.config.min_confidence)
            .collect())
    }

    /// Action items for a note, grounded in related tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval fails.
    pub async fn extract_action_items(
        &self,
        current: CurrentContext,
        max_suggestions: usize,
    ) -> Result<Vec<Suggestion>> {
        let request = SuggestionRequest {
            max_suggestions,
            ..SuggestionRequest::new(SuggestionType::ActionItems).with_context(current)
        };
        Ok(self.generate_suggestions(&request).await?.suggestions)
    }

    async fn retrieve_for(&self, request: &SuggestionRequest) -> Result<RetrievedContext> {
        let options = retrieval_options(request.filters.clone(), request.current_context.as_ref());
        let current = request.current_context.as_ref();

        if let Some(cc) = current
            && let Some(cursor) = cc.cursor_position
        {
            return self
                .retriever
                .retrieve_context_at_position(&cc.content, cursor, &options)
                .await;
        }

        let query = match (&request.query, current) {
            (Some(q), _) if !q.trim().is_empty() => q.clone(),
            (_, Some(cc)) => self
                .retriever
                .query_formatter()
                .note_query(&cc.content, cc.title.as_deref()),
            _ => String::new(),
        };

        if request.suggestion_type == SuggestionType::ActionItems {
            self.retriever.retrieve_context_for_todos(&query, &options).await
        } else {
            self.retriever.retrieve_context(&query, &options).await
        }
    }

    async fn generate_for_type(
        &self,
        request: &SuggestionRequest,
        context: &RetrievedContext,
    ) -> Vec<Suggestion> {
        let start = Instant::now();
        let current = request.current_context.as_ref();
        let kind = request.suggestion_type;

        let result = match kind {
            SuggestionType::Related => Ok(related(context, request.max_suggestions)),
            SuggestionType::Completion => self.completion(current, request.query.as_deref(), context).await,
            SuggestionType::ActionItems => self.action_items(current, context).await,
            SuggestionType::Summary => self.summary(current, context).await,
            SuggestionType::Insight => self.insights(current, context).await,
        };

        let mut suggestions = match result {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "suggestion generation failed");
                Vec::new()
            }
        };

        let processing_ms = elapsed_ms(start);
        for s in &mut suggestions {
            s.processing_ms = processing_ms;
        }
        suggestions
    }

    async fn completion(
        &self,
        current: Option<&CurrentContext>,
        query: Option<&str>,
        context: &RetrievedContext,
    ) -> std::result::Result<Vec<Suggestion>, LlmError> {
        let content = current.map(|c| c.content.as_str()).or(query).unwrap_or_default();
        let recent = tail_chars(content, self.config.completion_recent_chars);
        let ctx = format_context_for_prompt(context, self.config.completion_context_chars);
        let prompt = self.prompts.completion_prompt(&ctx, recent);

        let generation = self
            .model
            .generate(&prompt, self.generate_options(self.config.completion_max_tokens))
            .await?;
        let text = generation.text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let position = current
            .and_then(|c| c.cursor_position)
            .unwrap_or_else(|| content.chars().count());
        let confidence = completion_confidence(context.mean_relevance(), text);

        Ok(vec![
            Suggestion::new(SuggestionType::Completion, text, confidence)
                .with_sources(context.items.clone())
                .with_action(SuggestionAction::Insert {
                    position,
                    text: text.to_owned(),
                }),
        ])
    }

    async fn action_items(
        &self,
        current: Option<&CurrentContext>,
        context: &RetrievedContext,
    ) -> std::result::Result<Vec<Suggestion>, LlmError> {
        let ctx = format_context_for_prompt(context, self.config.analysis_context_chars);
        let prompt = self
            .prompts
            .action_items_prompt(&ctx, current.map(|c| c.content.as_str()));
        let generation = self
            .model
            .generate(&prompt, self.generate_options(self.config.analysis_max_tokens))
            .await?;

        let source_entity_id = current.and_then(|c| c.entity_id.clone());
        Ok(self
            .prompts
            .parse_action_items(&generation.text)
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                Suggestion::new(SuggestionType::ActionItems, item.clone(), ranked_confidence(7, i, 0.3))
                    .with_sources(context.items.clone())
                    .with_action(SuggestionAction::CreateTodo {
                        title: item,
                        source_entity_id: source_entity_id.clone(),
                    })
            })
            .collect())
    }

    async fn summary(
        &self,
        current: Option<&CurrentContext>,
        context: &RetrievedContext,
    ) -> std::result::Result<Vec<Suggestion>, LlmError> {
        let Some(cc) = current else {
            return Ok(Vec::new());
        };
        if cc.content.chars().count() < self.config.summary_min_chars {
            return Ok(Vec::new());
        }

        let options = SummarizeOptions {
            style: self.config.summary_style,
            max_length: self.config.summary_max_words,
        };
        let generation = self.model.summarize(&cc.content, options).await?;
        let summary = generation.text.trim();
        if summary.is_empty() {
            return Ok(Vec::new());
        }

        let text = format!("## Summary\n\n{summary}");
        Ok(vec![
            Suggestion::new(SuggestionType::Summary, text.clone(), SUMMARY_CONFIDENCE)
                .with_sources(context.items.clone())
                .with_action(SuggestionAction::Insert { position: 0, text }),
        ])
    }

    async fn insights(
        &self,
        current: Option<&CurrentContext>,
        context: &RetrievedContext,
    ) -> std::result::Result<Vec<Suggestion>, LlmError> {
        let ctx = format_context_for_prompt(context, self.config.analysis_context_chars);
        let prompt = self
            .prompts
            .insight_prompt(&ctx, current.map(|c| c.content.as_str()));
        let generation = self
            .model
            .generate(&prompt, self.generate_options(self.config.analysis_max_tokens))
            .await?;

        let position = current.map_or(0, |c| c.content.chars().count());
        Ok(self
            .prompts
            .parse_insights(&generation.text)
            .into_iter()
            .enumerate()
            .map(|(i, insight)| {
                Suggestion::new(SuggestionType::Insight, insight.clone(), ranked_confidence(8, i, 0.0))
                    .with_sources(context.items.clone())
                    .with_action(SuggestionAction::Insert {
                        position,
                        text: insight,
                    })
            })
            .collect())
    }

    fn generate_options(&self, max_tokens: usize) -> GenerateOptions {
        GenerateOptions {
            max_tokens,
            temperature: self.config.temperature,
            ..GenerateOptions::default()
        }
    }
}

fn retrieval_options(
    filter: Option<MetadataFilter>,
    current: Option<&CurrentContext>,
) -> RetrievalOptions {
    RetrievalOptions {
        filter,
        exclude_entity_ids: current
            .and_then(|c| c.entity_id.clone())
            .into_iter()
            .collect(),
        ..RetrievalOptions::default()
    }
}

fn related(context: &RetrievedContext, max: usize) -> Vec<Suggestion> {
    context.items.iter().take(max).map(link_suggestion).collect()
}

fn link_suggestion(item: &ContextItem) -> Suggestion {
    let content = item
        .title
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| item.excerpt.chars().take(80).collect());
    Suggestion::new(SuggestionType::Related, content, item.relevance)
        .with_sources(vec![item.clone()])
        .with_action(SuggestionAction::Link {
            entity_id: item.source.entity_id.clone(),
            entity_type: item.entity_type,
            title: item.title.clone(),
        })
}

/// `(start - rank) / 10`, floored at `floor`. Integer arithmetic keeps the steps exact.
fn ranked_confidence(start: usize, rank: usize, floor: f32) -> f32 {
    #[expect(clippy::cast_precision_loss)]
    let tenths = start.saturating_sub(rank) as f32;
    (tenths / 10.0).max(floor)
}

/// Mean context relevance, penalized for very short output and for output that
/// does not end a sentence.
fn completion_confidence(mean_relevance: f32, text: &str) -> f32 {
    let mut confidence = mean_relevance;
    if text.chars().count() < 20 {
        confidence *= 0.7;
    }
    if !text.ends_with(['.', '!', '?']) {
        confidence *= 0.9;
    }
    confidence.clamp(0.0, 1.0)
}

fn tail_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    let skip = count - n;
    let byte = text.char_indices().nth(skip).map_or(text.len(), |(i, _)| i);
    &text[byte..]
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}
