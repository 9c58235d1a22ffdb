//! Prompt construction and model-output parsing.

const BULLET_PREFIXES: &[&str] = &["- [ ] ", "- ", "* ", "• ", "+ "];
const MIN_INSIGHT_CHARS: usize = 20;
const MAX_INSIGHTS: usize = 3;

/// Builds prompts for each suggestion type and parses what the model sends back.
///
/// Parsers must be total: malformed output yields an empty list, never an error.
pub trait PromptFormatter: Send + Sync {
    fn completion_prompt(&self, context: &str, recent_text: &str) -> String;

    fn action_items_prompt(&self, context: &str, content: Option<&str>) -> String;

    fn insight_prompt(&self, context: &str, content: Option<&str>) -> String;

    fn parse_action_items(&self, output: &str) -> Vec<String>;

    fn parse_insights(&self, output: &str) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPromptFormatter;

impl PromptFormatter for DefaultPromptFormatter {
    fn completion_prompt(&self, context: &str, recent_text: &str) -> String {
        format!(
            "You are helping the user write in their personal notes.\n\n\
             Related notes:\n{context}\n\n\
             Text so far:\n{recent_text}\n\n\
             Continue the text with 1-3 sentences in the same voice. \
             Reply with the continuation only."
        )
    }

    fn action_items_prompt(&self, context: &str, content: Option<&str>) -> String {
        let current = content
            .map(|c| format!("Current note:\n{c}\n\n"))
            .unwrap_or_default();
        format!(
            "Extract concrete action items from the notes below.\n\n\
             {current}Related notes and tasks:\n{context}\n\n\
             List each action item on its own line starting with \"- \". \
             Reply with the list only."
        )
    }

    fn insight_prompt(&self, context: &str, content: Option<&str>) -> String {
        let current = content
            .map(|c| format!("Current note:\n{c}\n\n"))
            .unwrap_or_default();
        format!(
            "{current}Related notes:\n{context}\n\n\
             Give 2-3 short insights connecting these notes, one sentence each, \
             one per line."
        )
    }

    fn parse_action_items(&self, output: &str) -> Vec<String> {
        output
            .lines()
            .filter_map(strip_list_marker)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_owned)
            .collect()
    }

    fn parse_insights(&self, output: &str) -> Vec<String> {
        output
            .lines()
            .map(|line| strip_list_marker(line).unwrap_or(line).trim())
            .filter(|line| line.chars().count() > MIN_INSIGHT_CHARS && !is_header(line))
            .take(MAX_INSIGHTS)
            .map(str::to_owned)
            .collect()
    }
}

/// Strip a bullet (`- `, `* `, `• `, `- [ ] `) or numbered (`1. `, `2) `) marker.
/// Returns `None` for lines without one.
fn strip_list_marker(line: &str) -> Option<&str> {
    let line = line.trim_start();
    for prefix in BULLET_PREFIXES {
        if let Some(rest) = line.strip_prefix(prefix) {
            return Some(rest);
        }
    }

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest);
        }
    }
    None
}

fn is_header(line: &str) -> bool {
    line.ends_with(':') || line.starts_with('#') || line.to_lowercase().starts_with("here are")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_prompt_includes_both_parts() {
        let p = DefaultPromptFormatter.completion_prompt("CTX", "RECENT");
        assert!(p.contains("CTX"));
        assert!(p.contains("RECENT"));
    }

    #[test]
    fn action_items_parse_bullets_and_numbers() {
        let output = "Here are the items:\n- Email Sam\n* Book room\n2. Draft agenda\n3) Send invite\nnot a bullet\n- \n";
        let items = DefaultPromptFormatter.parse_action_items(output);
        assert_eq!(items, ["Email Sam", "Book room", "Draft agenda", "Send invite"]);
    }

    #[test]
    fn checkbox_marker_is_stripped() {
        let items = DefaultPromptFormatter.parse_action_items("- [ ] Renew passport");
        assert_eq!(items, ["Renew passport"]);
    }

    #[test]
    fn insights_skip_headers_and_short_lines() {
        let output = "Insights:\nShort one.\n- Budget discussions recur across three notes.\n\
                      Hiring depends on the Q3 budget decision.\n\
                      Both projects share the same reviewer bottleneck.\n\
                      A fourth insight that should be dropped entirely.";
        let insights = DefaultPromptFormatter.parse_insights(output);
        assert_eq!(insights.len(), 3);
        assert_eq!(insights[0], "Budget discussions recur across three notes.");
    }

    #[test]
    fn garbage_output_parses_to_nothing() {
        assert!(DefaultPromptFormatter.parse_action_items("???").is_empty());
        assert!(DefaultPromptFormatter.parse_insights("").is_empty());
    }
}
