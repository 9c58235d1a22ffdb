//! quill: local retrieval and AI suggestions over a directory of notes.
//!
//! ```bash
//! quill index ./notes
//! quill search "hiring plan" -n 5
//! quill suggest action-items --file ./notes/meeting.md --corpus ./notes
//! quill quick "quarterly budget" --corpus ./notes
//! quill stats
//! ```

mod config;
mod corpus;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quill_llm::ollama::OllamaProvider;
use quill_memory::{DurableStore, SqliteDurableStore, VectorStore};
use quill_rag::{
    CurrentContext, IndexReport, RagEngine, RetrievalOptions, SuggestionRequest, SuggestionType,
    format_context_for_prompt,
};

use crate::config::Config;

type Engine = RagEngine<OllamaProvider, OllamaProvider>;

/// Local-first retrieval and suggestions for your notes.
#[derive(Parser)]
#[command(name = "quill", version, about)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Notes directory to (re)index before running a query command. Note text is
    /// kept in memory only, so excerpts need the corpus indexed in the same session.
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index every note and checklist item under a directory
    Index { dir: PathBuf },
    /// Retrieve context for a free-text query
    Search {
        query: String,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Max characters of formatted context to print
        #[arg(long, default_value = "2000")]
        max_chars: usize,
    },
    /// Generate suggestions with the language model
    Suggest {
        /// completion, related, action-items, summary or insight
        kind: SuggestionType,
        #[arg(short, long)]
        query: Option<String>,
        /// Note to use as the current document
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Cursor offset within the file, in characters
        #[arg(long)]
        cursor: Option<usize>,
        #[arg(short = 'n', long, default_value = "3")]
        max: usize,
    },
    /// Model-free link suggestions for a query
    Quick {
        query: String,
        #[arg(short = 'n', long, default_value = "3")]
        max: usize,
    },
    /// Notes worth linking from the given one
    Links {
        file: PathBuf,
        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,
    },
    /// Print index and cache metrics
    Stats,
    /// Remove every indexed vector and cached embedding
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let engine = build_engine(&config).await?;
    let result = run(&engine, cli.command, cli.corpus.as_deref()).await;
    engine.dispose().await;
    result
}

async fn build_engine(config: &Config) -> anyhow::Result<Engine> {
    let durable: Option<Arc<dyn DurableStore>> = if config.store.vector.persistence {
        let sqlite = SqliteDurableStore::open(&config.store.sqlite_path)
            .await
            .with_context(|| format!("failed to open {}", config.store.sqlite_path))?;
        Some(Arc::new(sqlite))
    } else {
        None
    };
    let store = Arc::new(VectorStore::new(config.store.vector.clone(), durable));

    let provider = Arc::new(OllamaProvider::new(
        &config.llm.base_url,
        config.llm.model.clone(),
        config.llm.embedding_model.clone(),
        config.store.vector.dimensions,
    ));
    let engine = RagEngine::new(
        store,
        Arc::clone(&provider),
        provider,
        config.rag.clone(),
    );
    engine
        .initialize()
        .await
        .context("failed to initialize the RAG engine")?;
    Ok(engine)
}

async fn index_dir(engine: &Engine, dir: &Path) -> anyhow::Result<IndexReport> {
    let entities = corpus::load(dir)?;
    let mut last_logged = 0;
    let report = engine
        .index_entities(&entities, |p| {
            if p.percent >= last_logged + 10 || p.processed == p.total {
                last_logged = p.percent;
                tracing::info!(
                    percent = p.percent,
                    processed = p.processed,
                    total = p.total,
                    "indexing"
                );
            }
        })
        .await?;
    Ok(report)
}

async fn run(engine: &Engine, command: Command, corpus: Option<&Path>) -> anyhow::Result<()> {
    if let Some(dir) = corpus
        && !matches!(command, Command::Index { .. } | Command::Clear)
    {
        let report = index_dir(engine, dir).await?;
        tracing::info!(indexed = report.indexed, failed = report.failed, "corpus indexed");
    }

    match command {
        Command::Index { dir } => print_json(&index_dir(engine, &dir).await?)?,
        Command::Search {
            query,
            limit,
            max_chars,
        } => {
            let options = RetrievalOptions {
                top_k: limit,
                ..RetrievalOptions::default()
            };
            let context = engine.search(&query, &options).await?;
            println!("{}", format_context_for_prompt(&context, max_chars));
        }
        Command::Suggest {
            kind,
            query,
            file,
            cursor,
            max,
        } => {
            let mut request = SuggestionRequest::new(kind);
            request.max_suggestions = max;
            if let Some(query) = query {
                request = request.with_query(query);
            }
            if let Some(file) = file {
                let mut current = read_current(&file, corpus)?;
                current.cursor_position = cursor;
                request = request.with_context(current);
            }
            let response = engine.generate_suggestions(&request).await?;
            print_json(&response)?;
        }
        Command::Quick { query, max } => {
            let mut request = SuggestionRequest::new(SuggestionType::Related).with_query(query);
            request.max_suggestions = max;
            let response = engine.generate_quick_suggestions(&request).await?;
            print_json(&response.suggestions)?;
        }
        Command::Links { file, limit } => {
            let current = read_current(&file, corpus)?;
            let self_id = current.entity_id.clone().unwrap_or_default();
            let links = engine
                .get_suggested_links(&current.content, current.title.as_deref(), &self_id, limit)
                .await?;
            print_json(&links)?;
        }
        Command::Stats => print_json(&engine.metrics())?,
        Command::Clear => {
            engine.clear().await?;
            tracing::info!("index cleared");
        }
    }
    Ok(())
}

fn read_current(file: &Path, corpus: Option<&Path>) -> anyhow::Result<CurrentContext> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let title = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned());
    Ok(CurrentContext {
        entity_type: quill_memory::EntityType::Note,
        entity_id: corpus.map(|root| corpus::note_id(root, file)),
        content,
        title,
        cursor_position: None,
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
