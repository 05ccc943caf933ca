use anyhow::Result;
use async_trait::async_trait;

use crate::models::StoredMessage;

/// Compresses older turns into one line for the summary context strategy.
/// An LLM-backed implementation plugs in here.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[StoredMessage]) -> Result<String>;
}

/// Deterministic summarizer: the opening words of each turn, joined with " | "
pub struct ExtractiveSummarizer {
    max_chars_per_message: usize,
}

impl ExtractiveSummarizer {
    pub fn new(max_chars_per_message: usize) -> Self {
        Self {
            max_chars_per_message: max_chars_per_message.max(1),
        }
    }
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self::new(80)
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, messages: &[StoredMessage]) -> Result<String> {
        let parts: Vec<String> = messages
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| {
                let flattened = m.content.split_whitespace().collect::<Vec<_>>().join(" ");
                format!(
                    "{}: {}",
                    m.role.label(),
                    truncate_chars(&flattened, self.max_chars_per_message)
                )
            })
            .collect();

        Ok(parts.join(" | "))
    }
}

/// First `max` chars of `text`, with "…" appended when cut
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
