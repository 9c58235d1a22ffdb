//! Load a directory of markdown/text notes as indexable entities.
//!
//! Every file becomes a note. Checklist lines (`- [ ] ...`, `- [x] ...`) also become
//! todos, with an optional `!critical`/`!high`/`!medium`/`!low` marker and a
//! `due:YYYY-MM-DD` token.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};

use quill_memory::{EntityType, Priority};
use quill_rag::Entity;

const EXTENSIONS: &[&str] = &["md", "markdown", "txt"];
const OWNER: &str = "local";

fn is_indexable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Stable entity id for a file under `root`.
#[must_use]
pub fn note_id(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// # Errors
///
/// Returns an error if a matching file cannot be read.
pub fn load(root: &Path) -> anyhow::Result<Vec<Entity>> {
    let mut paths: Vec<_> = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .build()
        .flatten()
        .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()) && is_indexable(e.path()))
        .map(ignore::DirEntry::into_path)
        .collect();
    paths.sort();

    let mut entities = Vec::new();
    for path in paths {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let updated_at = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_or_else(|_| Utc::now(), DateTime::<Utc>::from);
        entities.extend(parse_file(&note_id(root, &path), &path, &content, updated_at));
    }
    tracing::info!(root = %root.display(), entities = entities.len(), "corpus loaded");
    Ok(entities)
}

fn parse_file(id: &str, path: &Path, content: &str, updated_at: DateTime<Utc>) -> Vec<Entity> {
    let title = content
        .lines()
        .find_map(|l| l.strip_prefix("# "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default();

    let note = Entity {
        id: id.to_owned(),
        owner_id: OWNER.into(),
        entity_type: EntityType::Note,
        title,
        decrypted_content: Some(content.to_owned()),
        updated_at,
        tags: hashtags(content),
        priority: None,
        status: None,
        due_date: None,
        container_id: None,
    };

    let todos = content
        .lines()
        .filter_map(parse_checkbox)
        .enumerate()
        .map(|(i, todo)| Entity {
            id: format!("{id}#todo-{i}"),
            entity_type: EntityType::Todo,
            title: todo.title.clone(),
            decrypted_content: Some(todo.title),
            tags: Vec::new(),
            priority: Some(todo.priority),
            status: Some(if todo.done { "done" } else { "open" }.into()),
            due_date: todo.due,
            container_id: Some(id.to_owned()),
            ..note.clone()
        })
        .collect::<Vec<_>>();

    std::iter::once(note).chain(todos).collect()
}

struct Checkbox {
    title: String,
    done: bool,
    priority: Priority,
    due: Option<DateTime<Utc>>,
}

fn parse_checkbox(line: &str) -> Option<Checkbox> {
    let line = line.trim_start();
    let (done, rest) = if let Some(rest) = line.strip_prefix("- [ ] ") {
        (false, rest)
    } else if let Some(rest) = line
        .strip_prefix("- [x] ")
        .or_else(|| line.strip_prefix("- [X] "))
    {
        (true, rest)
    } else {
        return None;
    };

    let mut priority = Priority::Medium;
    let mut due = None;
    let mut words = Vec::new();
    for word in rest.split_whitespace() {
        if let Some(p) = word.strip_prefix('!').and_then(parse_priority) {
            priority = p;
        } else if let Some(date) = word.strip_prefix("due:")
            && let Ok(date) = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        {
            due = date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        } else {
            words.push(word);
        }
    }

    let title = words.join(" ");
    if title.is_empty() {
        return None;
    }
    Some(Checkbox {
        title,
        done,
        priority,
        due,
    })
}

fn parse_priority(s: &str) -> Option<Priority> {
    match s.to_ascii_lowercase().as_str() {
        "critical" => Some(Priority::Critical),
        "high" => Some(Priority::High),
        "medium" => Some(Priority::Medium),
        "low" => Some(Priority::Low),
        _ => None,
    }
}

fn hashtags(content: &str) -> Vec<String> {
    let mut tags: Vec<String> = content
        .split_whitespace()
        .filter_map(|w| w.strip_prefix('#'))
        .map(|t| t.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '_'))
        .filter(|t| !t.is_empty() && !t.starts_with('#'))
        .map(str::to_lowercase)
        .collect();
    tags.sort();
    tags.dedup();
    tags
}
