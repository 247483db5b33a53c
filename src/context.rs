//! Context budget manager.
//!
//! Assembles the text handed to the generator. The persona, the rolling
//! summary and the new user message are reserved first; retrieval snippets
//! and then recent turns fill the remaining bytes.

use crate::provider::Snippet;
use crate::session::state::Turn;
use tracing::{debug, warn};

const SUMMARY_HEADER: &str = "Past Key Info: ";
const TOPIC_HEADER: &str = "Suggested Topic: ";
const BACKGROUND_HEADER: &str = "Assistant(You)'s Background:\n";
const HISTORY_HEADER: &str = "Recent Conversations:\n";
const USER_HEADER: &str = "User's Message: ";
const TRAILER: &str = "\nAssistant_Response:";

/// Everything that may go into one generation context.
#[derive(Debug, Clone, Copy)]
pub struct ContextInput<'a> {
    pub persona: &'a str,
    pub summary: &'a str,
    pub next_topic: &'a str,
    /// Non-compacted turns preceding the new user turn, oldest first.
    pub history: &'a [Turn],
    /// Ranked snippets already filtered by score.
    pub snippets: &'a [Snippet],
    pub user_text: &'a str,
}

/// A serialized context and what it had to leave out.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltContext {
    pub text: String,
    pub turns_kept: usize,
    pub turns_evicted: usize,
    pub snippets_kept: usize,
    /// Reserved parts were cut to fit.
    pub trimmed_reserved: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ContextBudget {
    budget_bytes: usize,
    top_k: usize,
}

impl ContextBudget {
    pub fn new(budget_bytes: usize, top_k: usize) -> Self {
        Self {
            budget_bytes,
            top_k,
        }
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    /// Builds the context. The result fits the budget unless the user message
    /// alone exceeds it; the user message is never cut.
    pub fn build(&self, input: &ContextInput<'_>) -> BuiltContext {
        let user_block = format!("{USER_HEADER}{}{TRAILER}", input.user_text);

        let mut persona = input.persona.to_string();
        let mut summary = input.summary.to_string();
        let mut topic = input.next_topic.to_string();
        let mut trimmed_reserved = false;

        let reserved = reserved_len(&persona, &summary, &topic, &user_block);
        if reserved > self.budget_bytes {
            trimmed_reserved = true;
            let over = |persona: &str, summary: &str, topic: &str| {
                reserved_len(persona, summary, topic, &user_block).saturating_sub(self.budget_bytes)
            };
            let keep = topic.len().saturating_sub(over(&persona, &summary, &topic));
            truncate_at_char_boundary(&mut topic, keep);
            let keep = summary.len().saturating_sub(over(&persona, &summary, &topic));
            truncate_at_char_boundary(&mut summary, keep);
            let keep = persona.len().saturating_sub(over(&persona, &summary, &topic));
            truncate_at_char_boundary(&mut persona, keep);
            let excess = over(&persona, &summary, &topic);
            warn!(
                budget = self.budget_bytes,
                reserved,
                user_bytes = input.user_text.len(),
                "context reservation exceeds budget, trimmed summary and persona"
            );
            if excess > 0 {
                warn!(
                    budget = self.budget_bytes,
                    over_by = excess,
                    "user message alone exceeds context budget"
                );
            }
        }

        let mut remaining = self
            .budget_bytes
            .saturating_sub(reserved_len(&persona, &summary, &topic, &user_block));

        // Snippets: best score first, drop lowest until the section fits.
        let mut ranked: Vec<&Snippet> = input.snippets.iter().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(self.top_k);
        let mut snippet_lines: Vec<String> = ranked.iter().map(|s| snippet_line(s)).collect();
        while !snippet_lines.is_empty() && block_len(BACKGROUND_HEADER, &snippet_lines) > remaining {
            snippet_lines.pop();
        }
        remaining -= block_len(BACKGROUND_HEADER, &snippet_lines);

        // History: newest first, stop at the first turn that does not fit so
        // the kept window stays contiguous.
        let usable: Vec<&Turn> = input.history.iter().filter(|t| !t.compacted).collect();
        let mut kept_rev: Vec<String> = Vec::new();
        let mut history_len = 0;
        for turn in usable.iter().rev() {
            let line = turn.transcript_line();
            let header = if kept_rev.is_empty() {
                HISTORY_HEADER.len()
            } else {
                0
            };
            let cost = header + line.len() + 1;
            if history_len + cost > remaining {
                break;
            }
            history_len += cost;
            kept_rev.push(line);
        }
        let turns_kept = kept_rev.len();
        let turns_evicted = usable.len() - turns_kept;
        kept_rev.reverse();

        let mut text = String::with_capacity(self.budget_bytes.min(64 * 1024));
        if !persona.is_empty() {
            text.push_str(&persona);
            if !persona.ends_with('\n') {
                text.push('\n');
            }
        }
        if !summary.is_empty() {
            push_section(&mut text, SUMMARY_HEADER, &summary);
        }
        if !topic.is_empty() {
            push_section(&mut text, TOPIC_HEADER, &topic);
        }
        if !snippet_lines.is_empty() {
            text.push_str(BACKGROUND_HEADER);
            for line in &snippet_lines {
                text.push_str(line);
                text.push('\n');
            }
        }
        if !kept_rev.is_empty() {
            text.push_str(HISTORY_HEADER);
            for line in &kept_rev {
                text.push_str(line);
                text.push('\n');
            }
        }
        text.push_str(&user_block);

        debug!(
            bytes = text.len(),
            budget = self.budget_bytes,
            turns_kept,
            turns_evicted,
            snippets = snippet_lines.len(),
            "context built"
        );

        BuiltContext {
            text,
            turns_kept,
            turns_evicted,
            snippets_kept: snippet_lines.len(),
            trimmed_reserved,
        }
    }
}

fn snippet_line(snippet: &Snippet) -> String {
    format!("[{:.2}] {}", snippet.score, snippet.text)
}

fn block_len(header: &str, lines: &[String]) -> usize {
    if lines.is_empty() {
        return 0;
    }
    header.len() + lines.iter().map(|l| l.len() + 1).sum::<usize>()
}

/// Bytes a persona/summary/topic section occupies once rendered.
fn section_len(body: &str, header: usize) -> usize {
    if body.is_empty() {
        0
    } else {
        header + body.len() + 1
    }
}

fn reserved_len(persona: &str, summary: &str, topic: &str, user_block: &str) -> usize {
    let persona_len = if persona.is_empty() {
        0
    } else if persona.ends_with('\n') {
        persona.len()
    } else {
        persona.len() + 1
    };
    persona_len
        + section_len(summary, SUMMARY_HEADER.len())
        + section_len(topic, TOPIC_HEADER.len())
        + user_block.len()
}

fn push_section(out: &mut String, header: &str, body: &str) {
    out.push_str(header);
    out.push_str(body);
    out.push('\n');
}

/// Truncates to at most `max` bytes without splitting a character.
pub(crate) fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}
