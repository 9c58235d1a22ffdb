//! Boundary-aware sliding-window chunking.
//!
//! Sizes are in estimated tokens (chars / 4). Offsets in [`ContentChunk`] are character
//! offsets, so slicing stays valid for any UTF-8 input.

use serde::{Deserialize, Serialize};

use crate::types::ContentChunk;

const CHARS_PER_TOKEN: usize = 4;

/// Fraction of the window searched backward for a natural boundary (1/5).
const LOOKBACK_DIVISOR: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
    pub overlap: usize,
    /// Tried in order at each cut point; the first one found wins.
    pub delimiters: Vec<String>,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 512,
            min_chunk_size: 50,
            overlap: 50,
            delimiters: ["\n\n", "\n", ". ", "! ", "? ", " "]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Estimate token count using the chars/4 heuristic.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// blake3 hex digest of `text`.
#[must_use]
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Split `text` into overlapping chunks that end on natural boundaries where possible.
///
/// Text that fits in one chunk is returned whole. A trailing piece shorter than
/// `min_chunk_size` is folded into the chunk before it, so the chunks always cover the
/// full input.
#[must_use]
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Vec<ContentChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();

    if estimate_tokens(text) <= config.max_chunk_size {
        return vec![ContentChunk {
            text: text.to_owned(),
            index: 0,
            total: 1,
            start: 0,
            end: len,
            content_hash: content_hash(text),
        }];
    }

    let window = (config.max_chunk_size * CHARS_PER_TOKEN).max(1);
    let overlap = (config.overlap * CHARS_PER_TOKEN).min(window - 1);
    let lookback = (window / LOOKBACK_DIVISOR).max(1);
    let min_chars = config.min_chunk_size * CHARS_PER_TOKEN;
    let delimiters: Vec<Vec<char>> = config
        .delimiters
        .iter()
        .filter(|d| !d.is_empty())
        .map(|d| d.chars().collect())
        .collect();

    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut start = 0;

    loop {
        let mut end = (start + window).min(len);
        if end < len
            && let Some(cut) = find_boundary(&chars, start, end, lookback, &delimiters)
        {
            end = cut;
        }

        match spans.last_mut() {
            Some(last) if end - start < min_chars => last.1 = end,
            _ => spans.push((start, end)),
        }

        if end >= len {
            break;
        }

        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    let total = spans.len();
    spans
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| {
            let text: String = chars[start..end].iter().collect();
            ContentChunk {
                content_hash: content_hash(&text),
                text,
                index,
                total,
                start,
                end,
            }
        })
        .collect()
}

/// Search backward from `end` (at most `lookback` chars, never reaching `start`) for
/// the first delimiter in priority order. Returns the cut position just past it.
fn find_boundary(
    chars: &[char],
    start: usize,
    end: usize,
    lookback: usize,
    delimiters: &[Vec<char>],
) -> Option<usize> {
    let floor = end.saturating_sub(lookback).max(start + 1);
    for delim in delimiters {
        let dlen = delim.len();
        if end < dlen {
            continue;
        }
        let mut pos = end - dlen;
        while pos >= floor {
            if chars[pos..pos + dlen] == delim[..] {
                return Some(pos + dlen);
            }
            if pos == 0 {
                break;
            }
            pos -= 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize, min: usize, overlap: usize) -> ChunkConfig {
        ChunkConfig {
            max_chunk_size: max,
            min_chunk_size: min,
            overlap,
            ..ChunkConfig::default()
        }
    }

    fn note_600() -> String {
        let sentence = "The quarterly planning notes cover hiring and budget. ";
        let mut text = String::new();
        while text.chars().count() < 600 {
            text.push_str(sentence);
        }
        text.chars().take(600).collect()
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(chunk_text("", &ChunkConfig::default()).is_empty());
        assert!(chunk_text("   \n ", &ChunkConfig::default()).is_empty());
    }

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = chunk_text("Hello world.", &ChunkConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello world.");
        assert_eq!(chunks[0].total, 1);
        assert_eq!(chunks[0].content_hash, content_hash("Hello world."));
    }

    #[test]
    fn six_hundred_char_note_splits_with_overlap() {
        let text = note_600();
        let cfg = config(50, 10, 10);
        let chunks = chunk_text(&text, &cfg);

        assert!(chunks.len() >= 2, "expected multiple chunks, got {}", chunks.len());
        for chunk in &chunks {
            assert!(estimate_tokens(&chunk.text) >= cfg.min_chunk_size);
            assert_eq!(chunk.total, chunks.len());
        }
        for pair in chunks.windows(2) {
            assert!(pair[1].start < pair[0].end, "chunks must overlap");
        }
    }

    #[test]
    fn cuts_prefer_sentence_boundaries() {
        let text = note_600();
        let chunks = chunk_text(&text, &config(50, 10, 10));
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                chunk.text.ends_with(". ") || chunk.text.ends_with(' '),
                "chunk ended mid-word: {:?}",
                chunk.text
            );
        }
    }

    #[test]
    fn paragraph_break_wins_over_sentence() {
        let mut text = "a".repeat(150);
        text.push_str(". Sentence here.\n\nNext paragraph ");
        text.push_str(&"b".repeat(200));
        let chunks = chunk_text(&text, &config(50, 1, 0));
        assert!(chunks[0].text.ends_with("\n\n"));
    }

    #[test]
    fn short_tail_is_absorbed() {
        // 205 chars with a 200-char window and no delimiters: the 5-char tail folds in.
        let text = "x".repeat(205);
        let chunks = chunk_text(&text, &config(50, 10, 0));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end, 205);
    }

    #[test]
    fn multibyte_text_does_not_panic() {
        let text = "日本語のテキスト。".repeat(100);
        let chunks = chunk_text(&text, &config(20, 2, 5));
        assert!(chunks.len() > 1);
        assert_eq!(chunks.last().unwrap().end, text.chars().count());
    }

    #[test]
    fn identical_text_hashes_identically() {
        assert_eq!(content_hash("same"), content_hash("same"));
        assert_ne!(content_hash("same"), content_hash("different"));
    }

    mod proptest_chunker {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(300))]

            #[test]
            fn chunking_never_panics(
                content in "\\PC{0,3000}",
                max in 1usize..200,
                min in 0usize..50,
                overlap in 0usize..100,
            ) {
                let _ = chunk_text(&content, &config(max, min, overlap));
            }

            #[test]
            fn chunks_cover_the_whole_text(
                content in "[a-z .\n]{1,2000}",
                max in 2usize..100,
                min in 0usize..20,
                overlap in 0usize..40,
            ) {
                prop_assume!(!content.trim().is_empty());
                let chunks = chunk_text(&content, &config(max, min, overlap));
                let chars: Vec<char> = content.chars().collect();

                prop_assert!(!chunks.is_empty());
                prop_assert_eq!(chunks[0].start, 0);
                prop_assert_eq!(chunks.last().unwrap().end, chars.len());
                for pair in chunks.windows(2) {
                    prop_assert!(pair[1].start <= pair[0].end, "gap between chunks");
                    prop_assert!(pair[1].start > pair[0].start, "no progress");
                }
                for (i, chunk) in chunks.iter().enumerate() {
                    prop_assert_eq!(chunk.index, i);
                    let slice: String = chars[chunk.start..chunk.end].iter().collect();
                    prop_assert_eq!(&chunk.text, &slice);
                }
            }
        }
    }
}
