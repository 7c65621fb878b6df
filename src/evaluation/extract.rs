use serde::{Deserialize, Serialize};

use super::ExtractedSnippet;
use crate::config::LanguageProfile;

pub const FENCE: &str = "```";

/// Which fenced block wins when a response contains several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSelection {
    /// Earliest block in the response.
    #[default]
    First,
    Last,
    /// Longest block after trimming; earliest on ties.
    Longest,
}

impl BlockSelection {
    fn pick<'a>(self, candidates: Vec<&'a str>) -> Option<&'a str> {
        match self {
            BlockSelection::First => candidates.into_iter().next(),
            BlockSelection::Last => candidates.into_iter().last(),
            BlockSelection::Longest => candidates
                .into_iter()
                .rev()
                .max_by_key(|c| c.len()),
        }
    }
}

/// Pulls a source snippet out of free-form model output.
#[derive(Debug, Clone)]
pub struct SnippetExtractor {
    language: LanguageProfile,
    selection: BlockSelection,
}

impl SnippetExtractor {
    pub fn new(language: LanguageProfile, selection: BlockSelection) -> Self {
        Self {
            language,
            selection,
        }
    }

    /// Total and pure: always yields a snippet, possibly the whole trimmed input.
    pub fn extract(&self, response: &str) -> ExtractedSnippet {
        let text = self
            .selection
            .pick(self.tagged_blocks(response))
            .map(str::to_string)
            .or_else(|| self.generic_block(response))
            .unwrap_or_else(|| response.trim().to_string());

        ExtractedSnippet { text }
    }

    /// Bodies of terminated blocks whose opening fence names the language.
    fn tagged_blocks<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut blocks = Vec::new();
        let mut cursor = 0;

        while let Some(rel) = text[cursor..].find(FENCE) {
            let after_fence = cursor + rel + FENCE.len();
            let line_end = text[after_fence..]
                .find('\n')
                .map(|i| after_fence + i)
                .unwrap_or(text.len());
            let tag = text[after_fence..line_end]
                .split_whitespace()
                .next()
                .unwrap_or("");

            let body_start = (line_end + 1).min(text.len());
            let Some(close) = text[body_start..].find(FENCE) else {
                // Unterminated: nothing after it can close a tagged block.
                break;
            };
            let body_end = body_start + close;
            // A skipped block's closing fence is never read as an opener.
            cursor = body_end + FENCE.len();

            if self.language.matches_tag(tag) {
                blocks.push(text[body_start..body_end].trim());
            }
        }

        blocks
    }

    /// Split on bare fences; odd-indexed segments are the fenced regions.
    fn generic_block(&self, text: &str) -> Option<String> {
        if !text.contains(FENCE) {
            return None;
        }

        let candidates: Vec<&str> = text
            .split(FENCE)
            .enumerate()
            .filter(|(i, _)| i % 2 == 1)
            .map(|(_, segment)| segment.trim())
            .collect();

        self.selection
            .pick(candidates)
            .map(|segment| self.strip_tag_line(segment))
    }

    fn strip_tag_line(&self, segment: &str) -> String {
        match segment.split_once('\n') {
            Some((first, rest)) if self.language.matches_tag(first) => rest.trim().to_string(),
            None if self.language.matches_tag(segment) => String::new(),
            _ => segment.to_string(),
        }
    }
}

impl Default for SnippetExtractor {
    fn default() -> Self {
        Self::new(LanguageProfile::default(), BlockSelection::default())
    }
}
