use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::summarizer::{truncate_chars, ExtractiveSummarizer, Summarizer};
use crate::config::{ContextStrategyKind, MemoryConfig};
use crate::models::{Role, StoredMessage};

pub const NO_CONTEXT: &str = "No previous conversation context available.";
pub const CONTEXT_HEADER: &str = "=== CONVERSATION CONTEXT ===";
pub const CONTEXT_FOOTER: &str = "=== END CONTEXT ===";
pub const NO_SUMMARY: &str = "No conversation summary available.";
pub const SUMMARY_UNAVAILABLE: &str = "Unable to generate conversation summary.";

/// Chars held back for the footer lines
pub const FOOTER_RESERVE: usize = 50;

/// Most a rendered context can exceed `max_chars` by (budget too small for the frame)
pub const CONTEXT_OVERHEAD: usize = CONTEXT_HEADER.len() + 1 + FOOTER_RESERVE;

/// Renders a session's history into prompt text within a char budget
#[async_trait]
pub trait ContextStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `history` is oldest first and never empty
    async fn render(&self, history: &[StoredMessage], max_chars: usize) -> String;
}

/// `[YYYY-MM-DD HH:MM:SS] ROLE: content`
pub fn transcript_line(message: &StoredMessage) -> String {
    format!(
        "[{}] {}: {}",
        message.timestamp.format("%Y-%m-%d %H:%M:%S"),
        message.role.label(),
        message.content
    )
}

fn speaker(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "Assistant",
    }
}

/// Chat-completion style prompt: prior turns, then the new user turn and an
/// open `Assistant:` line for the model to continue.
pub fn llm_prompt(history: &[StoredMessage], current_message: &str) -> String {
    let mut prompt = String::new();
    if !history.is_empty() {
        prompt.push_str("Previous conversation:\n");
        for message in history {
            prompt.push_str(speaker(message.role));
            prompt.push_str(": ");
            prompt.push_str(&message.content);
            prompt.push('\n');
        }
        prompt.push('\n');
    }
    prompt.push_str("User: ");
    prompt.push_str(current_message);
    prompt.push_str("\nAssistant:");
    prompt
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Chars available for body lines (each line costs its length plus a newline)
fn body_budget(max_chars: usize) -> usize {
    max_chars.saturating_sub(FOOTER_RESERVE + char_len(CONTEXT_HEADER) + 1)
}

/// Walk newest to oldest, keeping whole lines until the next one would not fit.
/// Returned oldest first.
fn fit_newest(history: &[StoredMessage], budget: usize) -> Vec<String> {
    let mut used = 0usize;
    let mut lines = Vec::new();

    for message in history.iter().rev() {
        let line = transcript_line(message);
        let cost = char_len(&line) + 1;
        if used + cost > budget {
            break;
        }
        used += cost;
        lines.push(line);
    }

    lines.reverse();
    lines
}

fn frame(preamble: Option<&str>, lines: &[String]) -> String {
    let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum::<usize>() + 128);
    out.push_str(CONTEXT_HEADER);
    out.push('\n');
    if let Some(preamble) = preamble {
        out.push_str(preamble);
        out.push('\n');
    }
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(CONTEXT_FOOTER);
    out.push('\n');
    out.push_str(&format!("[Total messages: {}]", lines.len()));
    out
}

/// Plain transcript of the most recent turns
pub struct BufferStrategy;

#[async_trait]
impl ContextStrategy for BufferStrategy {
    fn name(&self) -> &'static str {
        "buffer"
    }

    async fn render(&self, history: &[StoredMessage], max_chars: usize) -> String {
        let lines = fit_newest(history, body_budget(max_chars));
        if lines.len() < history.len() {
            debug!(
                "Context truncated: {} of {} messages fit in {} chars",
                lines.len(),
                history.len(),
                max_chars
            );
        }
        frame(None, &lines)
    }
}

/// Recent turns verbatim, everything older folded into one summary line
pub struct SummaryStrategy {
    summarizer: Arc<dyn Summarizer>,
    recent_messages: usize,
}

impl SummaryStrategy {
    pub fn new(summarizer: Arc<dyn Summarizer>, recent_messages: usize) -> Self {
        Self {
            summarizer,
            recent_messages: recent_messages.max(1),
        }
    }
}

#[async_trait]
impl ContextStrategy for SummaryStrategy {
    fn name(&self) -> &'static str {
        "summary"
    }

    async fn render(&self, history: &[StoredMessage], max_chars: usize) -> String {
        if history.len() <= self.recent_messages {
            return BufferStrategy.render(history, max_chars).await;
        }

        let (older, recent) = history.split_at(history.len() - self.recent_messages);
        let summary = match self.summarizer.summarize(older).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => return BufferStrategy.render(history, max_chars).await,
            Err(e) => {
                warn!("Summarizer failed, falling back to buffer context: {}", e);
                return BufferStrategy.render(history, max_chars).await;
            }
        };

        let preamble = truncate_chars(
            &format!("[Summary of {} earlier messages] {}", older.len(), summary),
            (max_chars / 4).max(1),
        );

        let budget = body_budget(max_chars);
        let preamble_cost = char_len(&preamble) + 1;
        if preamble_cost > budget {
            return frame(None, &fit_newest(recent, budget));
        }

        frame(Some(&preamble), &fit_newest(recent, budget - preamble_cost))
    }
}

/// Picks the configured strategy and handles the empty-history case
#[derive(Clone)]
pub struct ContextBuilder {
    strategy: Arc<dyn ContextStrategy>,
}

impl ContextBuilder {
    pub fn new(strategy: Arc<dyn ContextStrategy>) -> Self {
        Self { strategy }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        let strategy: Arc<dyn ContextStrategy> = match config.strategy {
            ContextStrategyKind::Buffer => Arc::new(BufferStrategy),
            ContextStrategyKind::Summary => Arc::new(SummaryStrategy::new(
                Arc::new(ExtractiveSummarizer::default()),
                config.summary_recent_messages,
            )),
        };
        Self::new(strategy)
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub async fn build(&self, history: &[StoredMessage], max_chars: usize) -> String {
        if history.is_empty() {
            return NO_CONTEXT.to_string();
        }
        self.strategy.render(history, max_chars).await
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(Arc::new(BufferStrategy))
    }
}
