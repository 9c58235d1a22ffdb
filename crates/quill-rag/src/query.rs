//! Building search queries from free text.

use std::collections::HashMap;

const MAX_KEY_PHRASES: usize = 5;
const TOP_WORDS: usize = 10;
const MATCH_WORDS: usize = 5;
const CANDIDATE_SENTENCES: usize = 10;
const MIN_PARTS: usize = 3;
const FIRST_SENTENCE_THRESHOLD: usize = 100;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "be", "been", "before", "being", "but", "by", "can", "could", "did", "do", "does", "for",
    "from", "had", "has", "have", "he", "her", "here", "his", "how", "i", "if", "in", "into",
    "is", "it", "its", "just", "me", "more", "most", "my", "no", "not", "now", "of", "on",
    "one", "only", "or", "other", "our", "out", "over", "she", "should", "so", "some", "such",
    "than", "that", "the", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "to", "too", "under", "up", "very", "was", "we", "were", "what", "when",
    "where", "which", "while", "who", "why", "will", "with", "would", "you", "your",
];

/// Turns a note into a search query.
pub trait QueryFormatter: Send + Sync {
    fn note_query(&self, content: &str, title: Option<&str>) -> String;
}

/// Frequency-based key-phrase extraction.
///
/// Words are ranked by frequency after stop-word removal; sentences near the top of
/// the note that mention one of the strongest words become the query, after the title.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyPhraseQueryFormatter;

impl QueryFormatter for KeyPhraseQueryFormatter {
    fn note_query(&self, content: &str, title: Option<&str>) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
            parts.push(title.to_owned());
        }
        parts.extend(extract_key_phrases(content, MAX_KEY_PHRASES));

        if parts.len() < MIN_PARTS
            && content.chars().count() > FIRST_SENTENCE_THRESHOLD
            && let Some(first) = sentences(content).next()
            && !parts.iter().any(|p| p == first)
        {
            parts.push(first.to_owned());
        }

        parts.join(" ")
    }
}

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(str::to_lowercase)
        .filter(|w| !is_stop_word(w))
}

/// Split on sentence terminators and line breaks; empty pieces are skipped.
pub fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Most frequent non-stop words, highest count first, ties alphabetical.
#[must_use]
pub fn top_words(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in words(text) {
        *counts.entry(word).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(w, _)| w).collect()
}

/// Up to `max` sentences from the start of `text` that contain one of its strongest words.
#[must_use]
pub fn extract_key_phrases(text: &str, max: usize) -> Vec<String> {
    let top = top_words(text, TOP_WORDS);
    let strongest = &top[..top.len().min(MATCH_WORDS)];
    if strongest.is_empty() {
        return Vec::new();
    }

    sentences(text)
        .take(CANDIDATE_SENTENCES)
        .filter(|s| words(s).any(|w| strongest.contains(&w)))
        .take(max)
        .map(str::to_owned)
        .collect()
}

/// The blank-line-delimited paragraph around `cursor` (a char offset), searching at
/// most `window` chars in each direction. Falls back to the enclosing sentence when
/// no blank line is found on either side, or when the paragraph is empty.
#[must_use]
pub fn text_at_position(content: &str, cursor: usize, window: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    let cursor = cursor.min(chars.len());
    let floor = cursor.saturating_sub(window);
    let ceil = (cursor + window).min(chars.len());

    let is_break = |i: usize| chars[i] == '\n' && chars[i + 1] == '\n';

    let mut start = None;
    let mut i = cursor;
    while i > floor + 1 {
        if is_break(i - 2) {
            start = Some(i);
            break;
        }
        i -= 1;
    }

    let mut end = None;
    let mut j = cursor;
    while j + 1 < ceil {
        if is_break(j) {
            end = Some(j);
            break;
        }
        j += 1;
    }

    if start.is_none() && end.is_none() {
        return sentence_at(&chars, cursor, floor, ceil);
    }
    let (start, end) = (start.unwrap_or(floor), end.unwrap_or(ceil));

    let paragraph: String = chars[start..end].iter().collect();
    let paragraph = paragraph.trim();
    if !paragraph.is_empty() {
        return paragraph.to_owned();
    }
    sentence_at(&chars, cursor, floor, ceil)
}

fn sentence_at(chars: &[char], cursor: usize, floor: usize, ceil: usize) -> String {
    let is_end = |c: char| matches!(c, '.' | '!' | '?' | '\n');

    let mut start = cursor;
    while start > floor && !is_end(chars[start - 1]) {
        start -= 1;
    }
    let mut end = cursor;
    while end < ceil && !is_end(chars[end]) {
        end += 1;
    }
    if end < ceil {
        end += 1;
    }
    chars[start..end].iter().collect::<String>().trim().to_owned()
}
