//! Background conversation summarizer.
//!
//! Folds the previous summary and the turns since into a new summary plus a
//! suggested next topic. Runs off the live turn: it only ever watches the
//! session-close signal, never the epoch. A process-wide semaphore bounds how
//! many summarizations run at once.

use crate::config::SummarizerConfig;
use crate::error::{ParleyError, Result};
use crate::provider::{CancelSignal, Generator};
use crate::session::state::{ContextSummary, Turn};
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Input for one summarization.
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub session: String,
    pub previous: ContextSummary,
    /// Turns not yet folded into `previous`, oldest first.
    pub turns: Vec<Turn>,
    /// Turn count the new summary will cover once installed.
    pub covered: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SummaryReply {
    summary: String,
    next_topic: String,
}

pub struct Summarizer {
    generator: Arc<dyn Generator>,
    config: SummarizerConfig,
    permits: Arc<Semaphore>,
}

impl Summarizer {
    pub fn new(generator: Arc<dyn Generator>, config: SummarizerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            generator,
            config,
            permits,
        }
    }

    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    /// Builds the summarization prompt.
    pub fn prompt(previous: &ContextSummary, turns: &[Turn]) -> String {
        let history = if previous.summary.is_empty() {
            "(none)"
        } else {
            previous.summary.as_str()
        };
        let logs: Vec<String> = turns
            .iter()
            .filter(|t| !t.compacted)
            .map(Turn::transcript_line)
            .collect();

        format!(
            "You are a helpful assistant reasoning about ongoing conversations.\n\n\
             Given:\n\
             - History: {history}\n\
             - New Logs:\n{}\n\n\
             Instructions:\n\
             1. Summarize the conversation between the user and the assistant so far.\n\
             2. Identify their roles clearly and include any key names, numbers and events.\n\
             3. Suggest an interesting next long-term topic of conversation.\n\n\
             Return only a valid JSON object, with no explanation or Markdown:\n\
             {{\"summary\": \"...\", \"next_topic\": \"...\"}}",
            logs.join("\n")
        )
    }

    /// Runs one summarization. Waits for a free slot first.
    pub async fn summarize(
        &self,
        request: SummaryRequest,
        cancel: CancelSignal,
    ) -> Result<ContextSummary> {
        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(closed()),
            permit = self.permits.clone().acquire_owned() => permit
                .map_err(|_| ParleyError::Other("summarizer shut down".to_string()))?,
        };

        debug!(
            session = %request.session,
            turns = request.turns.len(),
            "summarizing conversation"
        );
        let prompt = Self::prompt(&request.previous, &request.turns);
        let timeout = self.config.timeout();
        let collect = tokio::time::timeout(timeout, self.collect(prompt, cancel.clone()));

        let text = tokio::select! {
            _ = cancel.cancelled() => return Err(closed()),
            result = collect => result.map_err(|_| ParleyError::Timeout {
                operation: "summarization".to_string(),
                millis: timeout.as_millis() as u64,
            })??,
        };
        drop(permit);

        let (summary, next_topic) = Self::parse(&text)?;
        info!(
            session = %request.session,
            summary_len = summary.len(),
            covered = request.covered,
            "summary ready"
        );
        Ok(ContextSummary {
            summary,
            next_topic,
            covered_turns: request.covered,
        })
    }

    async fn collect(&self, prompt: String, cancel: CancelSignal) -> Result<String> {
        let mut stream = self.generator.generate(prompt, cancel).await?;
        let mut text = String::new();
        while let Some(increment) = stream.next().await {
            text.push_str(&increment?);
        }
        Ok(text)
    }

    /// Parses `{"summary", "next_topic"}`, tolerating a Markdown code fence.
    /// Anything that is not JSON becomes the summary verbatim.
    pub fn parse(text: &str) -> Result<(String, String)> {
        let body = strip_fence(text.trim());
        let (summary, next_topic) = match serde_json::from_str::<SummaryReply>(body) {
            Ok(reply) => (
                reply.summary.trim().to_string(),
                reply.next_topic.trim().to_string(),
            ),
            Err(e) => {
                warn!(error = %e, "summary is not JSON, using raw text");
                (text.trim().to_string(), String::new())
            }
        };
        if summary.is_empty() && next_topic.is_empty() {
            return Err(ParleyError::Generation {
                message: "empty summary".to_string(),
            });
        }
        Ok((summary, next_topic))
    }
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn closed() -> ParleyError {
    ParleyError::Other("session closed".to_string())
}
