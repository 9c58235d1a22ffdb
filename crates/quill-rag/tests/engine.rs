use std::sync::Arc;

use chrono::{TimeZone, Utc};
use quill_llm::EmbeddingProvider;
use quill_llm::mock::{MockEmbedder, MockLanguageModel};
use quill_memory::{
    DurableStore, EntityType, InMemoryDurableStore, Priority, VectorStore, VectorStoreConfig,
};
use quill_rag::{
    CurrentContext, Entity, IndexOutcome, RagConfig, RagEngine, RetrievalOptions, RetrieverConfig,
    SuggestionAction, SuggestionConfig, SuggestionRequest, SuggestionType,
};

const DIMS: usize = 64;

struct Harness {
    engine: RagEngine<MockEmbedder, MockLanguageModel>,
    embedder: Arc<MockEmbedder>,
    model: Arc<MockLanguageModel>,
}

fn permissive_config() -> RagConfig {
    RagConfig {
        retrieval: RetrieverConfig {
            threshold: -1.0,
            ..RetrieverConfig::default()
        },
        suggestions: SuggestionConfig::default(),
    }
}

async fn harness(
    model: MockLanguageModel,
    config: RagConfig,
    durable: Option<Arc<dyn DurableStore>>,
) -> Harness {
    let store = Arc::new(VectorStore::new(
        VectorStoreConfig {
            dimensions: DIMS,
            ..VectorStoreConfig::default()
        },
        durable,
    ));
    let embedder = Arc::new(MockEmbedder::new(DIMS));
    let model = Arc::new(model);
    let engine = RagEngine::new(store, Arc::clone(&embedder), Arc::clone(&model), config);
    engine.initialize().await.unwrap();
    Harness {
        engine,
        embedder,
        model,
    }
}

fn note(id: &str, title: &str, content: &str) -> Entity {
    Entity {
        id: id.into(),
        owner_id: "u1".into(),
        entity_type: EntityType::Note,
        title: title.into(),
        decrypted_content: Some(content.into()),
        updated_at: Utc::now(),
        tags: vec!["work".into()],
        priority: None,
        status: None,
        due_date: None,
        container_id: None,
    }
}

fn todo(id: &str, title: &str, priority: Priority, due_day: Option<u32>) -> Entity {
    Entity {
        entity_type: EntityType::Todo,
        priority: Some(priority),
        status: Some("open".into()),
        due_date: due_day.map(|d| Utc.with_ymd_and_hms(2026, 5, d, 9, 0, 0).unwrap()),
        ..note(id, title, "Follow up on the launch plan.")
    }
}

#[tokio::test]
async fn duplicate_content_is_embedded_once() {
    let h = harness(MockLanguageModel::default(), RagConfig::default(), None).await;
    let a = note("a", "Standup", "Discussed the release checklist.");
    let b = note("b", "Standup", "Discussed the release checklist.");

    let report = h.engine.index_entities(&[a, b], |_| {}).await.unwrap();

    assert_eq!(report.indexed, 2);
    assert_eq!(report.cache_hits, 1);
    assert_eq!(h.embedder.calls(), 1);
    assert_eq!(h.engine.store().len(), 2);

    let metrics = h.engine.metrics();
    assert_eq!(metrics.vectors, 2);
    assert_eq!(metrics.cache_entries, 1);
    assert!(metrics.cache_hit_rate > 0.0);
}

#[tokio::test]
async fn six_hundred_char_note_produces_overlapping_chunks() {
    let store = Arc::new(VectorStore::new(
        VectorStoreConfig {
            dimensions: DIMS,
            chunking: quill_memory::ChunkConfig {
                max_chunk_size: 50,
                min_chunk_size: 10,
                overlap: 10,
                ..quill_memory::ChunkConfig::default()
            },
            ..VectorStoreConfig::default()
        },
        None,
    ));
    let engine = RagEngine::new(
        store,
        Arc::new(MockEmbedder::new(DIMS)),
        Arc::new(MockLanguageModel::default()),
        RagConfig::default(),
    );
    engine.initialize().await.unwrap();

    let body = "Budget review notes for the quarter and the hiring plan. ".repeat(11);
    let body: String = body.chars().take(600).collect();
    engine.index_entity(&note("long", "", &body)).await.unwrap();

    let records = engine.store().get_by_entity("long");
    assert!(records.len() >= 2);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.chunk_index, i);
        assert_eq!(record.total_chunks, records.len());
        assert_eq!(record.id, format!("long_chunk_{i}"));
    }
}

#[tokio::test]
async fn critical_todo_ranks_before_high() {
    let h = harness(MockLanguageModel::default(), permissive_config(), None).await;
    let todos = [
        todo("high", "Prepare slides", Priority::High, Some(1)),
        todo("critical", "Fix outage", Priority::Critical, Some(20)),
        todo("low", "Tidy desk", Priority::Low, None),
    ];
    h.engine.index_entities(&todos, |_| {}).await.unwrap();

    let ctx = h
        .engine
        .retriever()
        .retrieve_context_for_todos("launch plan", &RetrievalOptions::default())
        .await
        .unwrap();
    let order: Vec<&str> = ctx.items.iter().map(|i| i.source.entity_id.as_str()).collect();
    assert_eq!(order, ["critical", "high", "low"]);
}

#[tokio::test]
async fn short_content_is_not_summarized() {
    let h = harness(MockLanguageModel::default(), permissive_config(), None).await;
    h.engine
        .index_entity(&note("n1", "Ideas", "Some indexed text about ideas."))
        .await
        .unwrap();

    let request = SuggestionRequest::new(SuggestionType::Summary).with_context(CurrentContext {
        entity_type: EntityType::Note,
        entity_id: None,
        content: "x".repeat(50),
        title: None,
        cursor_position: None,
    });
    let response = h.engine.generate_suggestions(&request).await.unwrap();

    assert!(response.suggestions.is_empty());
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn long_content_is_summarized_once() {
    let model = MockLanguageModel::with_responses(vec!["The team agreed on a plan.".into()]);
    let h = harness(model, permissive_config(), None).await;
    h.engine
        .index_entity(&note("n1", "Plan", "Planning notes."))
        .await
        .unwrap();

    let request = SuggestionRequest::new(SuggestionType::Summary).with_context(CurrentContext {
        entity_type: EntityType::Note,
        entity_id: Some("current".into()),
        content: "We met to plan the next quarter. ".repeat(10),
        title: Some("Meeting".into()),
        cursor_position: None,
    });
    let response = h.engine.generate_suggestions(&request).await.unwrap();

    assert_eq!(h.model.calls(), 1);
    assert_eq!(response.suggestions.len(), 1);
    assert!(response.suggestions[0].content.starts_with("## Summary"));
}

#[tokio::test]
async fn model_failure_yields_empty_list() {
    let h = harness(MockLanguageModel::failing(), permissive_config(), None).await;
    h.engine
        .index_entity(&note("n1", "Ideas", "Some indexed text about ideas."))
        .await
        .unwrap();

    let request = SuggestionRequest::new(SuggestionType::Insight).with_query("ideas");
    let response = h.engine.generate_suggestions(&request).await.unwrap();

    assert!(response.context.has_context);
    assert!(response.suggestions.is_empty());
    assert_eq!(h.model.calls(), 1);
}

#[tokio::test]
async fn empty_index_skips_the_model() {
    let h = harness(MockLanguageModel::default(), permissive_config(), None).await;
    let request = SuggestionRequest::new(SuggestionType::Completion).with_query("anything");
    let response = h.engine.generate_suggestions(&request).await.unwrap();

    assert!(!response.context.has_context);
    assert!(response.suggestions.is_empty());
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn action_items_below_min_confidence_are_dropped() {
    let model = MockLanguageModel::with_responses(vec![
        "- Email Sam about budget\n- Book the room\n- Draft agenda".into(),
    ]);
    let h = harness(model, permissive_config(), None).await;
    h.engine
        .index_entity(&todo("t1", "Budget", Priority::Medium, None))
        .await
        .unwrap();

    let items = h
        .engine
        .extract_action_items(
            CurrentContext {
                entity_type: EntityType::Note,
                entity_id: Some("meeting".into()),
                content: "Talked about the budget and the offsite.".into(),
                title: Some("Meeting".into()),
                cursor_position: None,
            },
            5,
        )
        .await
        .unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].content, "Email Sam about budget");
    assert!(matches!(
        &items[0].action,
        Some(SuggestionAction::CreateTodo { source_entity_id: Some(id), .. }) if id == "meeting"
    ));
}

#[tokio::test]
async fn completion_inserts_at_cursor() {
    let model = MockLanguageModel::with_responses(vec![
        "The rollout starts with internal users next week.".into(),
    ]);
    let config = RagConfig {
        suggestions: SuggestionConfig {
            min_confidence: 0.0,
            ..SuggestionConfig::default()
        },
        ..permissive_config()
    };
    let h = harness(model, config, None).await;
    h.engine
        .index_entity(&note("n1", "Rollout", "Rollout plan for internal users."))
        .await
        .unwrap();

    let content = "Rollout plan.\n\nWe will start small";
    let request = SuggestionRequest::new(SuggestionType::Completion).with_context(CurrentContext {
        entity_type: EntityType::Note,
        entity_id: None,
        content: content.into(),
        title: None,
        cursor_position: Some(content.len()),
    });
    let response = h.engine.generate_suggestions(&request).await.unwrap();

    assert_eq!(response.suggestions.len(), 1);
    let suggestion = &response.suggestions[0];
    assert_eq!(suggestion.kind, SuggestionType::Completion);
    assert!(matches!(
        &suggestion.action,
        Some(SuggestionAction::Insert { position, .. }) if *position == content.len()
    ));
    assert!(h.model.prompts()[0].contains("We will start small"));
}

#[tokio::test]
async fn quick_suggestions_link_without_model_calls() {
    let h = harness(MockLanguageModel::default(), RagConfig::default(), None).await;
    h.engine
        .index_entity(&note("rust", "Rust notes", "Ownership and borrowing rules."))
        .await
        .unwrap();

    let request = SuggestionRequest::new(SuggestionType::Related)
        .with_query("Rust notes\n\nOwnership and borrowing rules.");
    let response = h.engine.generate_quick_suggestions(&request).await.unwrap();

    assert!(!response.suggestions.is_empty());
    assert!(response.suggestions.iter().all(|s| s.confidence >= 0.6));
    assert!(matches!(
        &response.suggestions[0].action,
        Some(SuggestionAction::Link { entity_id, .. }) if entity_id == "rust"
    ));
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn related_notes_never_include_self() {
    let h = harness(MockLanguageModel::default(), permissive_config(), None).await;
    h.engine
        .index_entities(
            &[
                note("self", "Hiring", "Hiring plan for the platform team."),
                note("other", "Hiring sync", "Platform team hiring sync notes."),
            ],
            |_| {},
        )
        .await
        .unwrap();

    let related = h
        .engine
        .get_related_notes("Hiring plan for the platform team.", Some("Hiring"), "self", 5)
        .await
        .unwrap();
    assert!(related.iter().all(|i| i.source.entity_id != "self"));
    assert!(related.iter().any(|i| i.source.entity_id == "other"));
}

#[tokio::test]
async fn restart_reuses_persisted_embeddings() {
    let durable: Arc<dyn DurableStore> = Arc::new(InMemoryDurableStore::new());
    let entity = note("n1", "Persisted", "This note survives a restart.");

    let first = harness(
        MockLanguageModel::default(),
        RagConfig::default(),
        Some(Arc::clone(&durable)),
    )
    .await;
    first.engine.index_entity(&entity).await.unwrap();
    first.engine.dispose().await;
    assert_eq!(first.embedder.calls(), 1);

    let second = harness(MockLanguageModel::default(), RagConfig::default(), Some(durable)).await;
    let reloaded = second.engine.store().get("n1_chunk_0").unwrap();
    assert!(reloaded.content.is_none());

    second.engine.index_entity(&entity).await.unwrap();
    assert_eq!(second.embedder.calls(), 0);
    assert!(second.engine.metrics().persistent);
}

async fn persistent_engine(
    embedder: MockEmbedder,
    durable: &Arc<dyn DurableStore>,
) -> (RagEngine<MockEmbedder, MockLanguageModel>, Arc<MockEmbedder>) {
    let store = Arc::new(VectorStore::new(
        VectorStoreConfig {
            dimensions: embedder.dimensions(),
            ..VectorStoreConfig::default()
        },
        Some(Arc::clone(durable)),
    ));
    let embedder = Arc::new(embedder);
    let engine = RagEngine::new(
        store,
        Arc::clone(&embedder),
        Arc::new(MockLanguageModel::default()),
        RagConfig::default(),
    );
    engine.initialize().await.unwrap();
    (engine, embedder)
}

#[tokio::test]
async fn reindex_after_dimension_change_embeds_again() {
    let durable: Arc<dyn DurableStore> = Arc::new(InMemoryDurableStore::new());
    let entity = note("n1", "Planning", "Quarterly planning covers hiring.");

    let (first, _) = persistent_engine(MockEmbedder::new(8), &durable).await;
    first.index_entity(&entity).await.unwrap();
    first.dispose().await;

    let (second, embedder) = persistent_engine(MockEmbedder::new(16), &durable).await;
    assert!(second.store().is_empty());

    let outcome = second.index_entity(&entity).await.unwrap();
    assert_eq!(outcome, IndexOutcome::Indexed { chunks: 1, cache_hits: 0 });
    assert_eq!(embedder.calls(), 1);
    assert_eq!(second.store().get("n1_chunk_0").unwrap().embedding.len(), 16);
}

#[tokio::test]
async fn reindex_after_model_change_ignores_stale_cache() {
    let durable: Arc<dyn DurableStore> = Arc::new(InMemoryDurableStore::new());
    let entity = note("n1", "Planning", "Quarterly planning covers hiring.");

    let (first, _) =
        persistent_engine(MockEmbedder::new(DIMS).with_model_id("model-a"), &durable).await;
    first.index_entity(&entity).await.unwrap();
    first.dispose().await;

    let (second, embedder) =
        persistent_engine(MockEmbedder::new(DIMS).with_model_id("model-b"), &durable).await;
    let outcome = second.index_entity(&entity).await.unwrap();
    assert_eq!(outcome, IndexOutcome::Indexed { chunks: 1, cache_hits: 0 });
    assert_eq!(embedder.calls(), 1);

    // The refreshed entry now serves model-b.
    second.index_entity(&entity).await.unwrap();
    assert_eq!(embedder.calls(), 1);
}

#[tokio::test]
async fn insights_are_ranked_and_inserted() {
    let model = MockLanguageModel::with_responses(vec![
        "Insights:\n\
         Too short.\n\
         - Budget talks recur across the planning notes.\n\
         Hiring depends on the third quarter budget decision.\n\
         Both projects share one reviewer bottleneck.\n\
         A fourth insight that does not make the cut."
            .into(),
    ]);
    let h = harness(model, permissive_config(), None).await;
    h.engine
        .index_entity(&note("n1", "Budget", "Budget and hiring planning notes."))
        .await
        .unwrap();

    let request = SuggestionRequest::new(SuggestionType::Insight).with_query("budget hiring");
    let response = h.engine.generate_suggestions(&request).await.unwrap();

    assert_eq!(h.model.calls(), 1);
    let confidences: Vec<f32> = response.suggestions.iter().map(|s| s.confidence).collect();
    assert_eq!(confidences.len(), 3);
    for (got, want) in confidences.iter().zip([0.8, 0.7, 0.6]) {
        assert!((got - want).abs() < 1e-6, "{got} != {want}");
    }
    assert_eq!(
        response.suggestions[0].content,
        "Budget talks recur across the planning notes."
    );
    assert!(response.suggestions.iter().all(|s| matches!(
        &s.action,
        Some(SuggestionAction::Insert { position: 0, text }) if *text == s.content
    )));
}

#[tokio::test]
async fn related_suggestions_link_without_model_calls() {
    let h = harness(MockLanguageModel::default(), permissive_config(), None).await;
    h.engine
        .index_entities(
            &[
                note("rust", "Rust notes", "Ownership and borrowing rules."),
                note("garden", "Garden", "Tomatoes need full sun."),
            ],
            |_| {},
        )
        .await
        .unwrap();

    let request = SuggestionRequest::new(SuggestionType::Related)
        .with_query("Rust notes\n\nOwnership and borrowing rules.");
    let response = h.engine.generate_suggestions(&request).await.unwrap();

    assert_eq!(h.model.calls(), 0);
    assert!(!response.suggestions.is_empty());
    for s in &response.suggestions {
        let source = &s.source_context[0];
        assert!((s.confidence - source.relevance.clamp(0.0, 1.0)).abs() < 1e-6);
        assert!(matches!(
            &s.action,
            Some(SuggestionAction::Link { entity_id, .. }) if *entity_id == source.source.entity_id
        ));
    }
    assert!(matches!(
        &response.suggestions[0].action,
        Some(SuggestionAction::Link { entity_id, .. }) if entity_id == "rust"
    ));
}
