//! Session data model: lifecycle state, turns, chunks, summary and settings.

use crate::catalog::Catalog;
use crate::error::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Opaque session identifier: 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle state of a session actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Listening,
    Generating,
    Speaking,
    Closed,
}

impl SessionState {
    /// A turn is in progress and new input would barge in.
    pub fn is_busy(self) -> bool {
        matches!(self, SessionState::Generating | SessionState::Speaking)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    Voice,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStatus {
    Pending,
    Ready,
    Failed,
}

/// One sentence-level unit of an agent turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceChunk {
    pub ordinal: u32,
    pub text: String,
    pub status: SynthesisStatus,
    pub epoch: u64,
}

/// One conversational exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub source: InputSource,
    pub text: String,
    pub chunks: Vec<SentenceChunk>,
    pub timestamp: SystemTime,
    pub epoch: u64,
    /// Raw text dropped after summarization; the record survives.
    pub compacted: bool,
    pub failed: bool,
}

impl Turn {
    pub fn user(text: &str, source: InputSource, epoch: u64) -> Self {
        Self {
            speaker: Speaker::User,
            source,
            text: text.to_string(),
            chunks: Vec::new(),
            timestamp: SystemTime::now(),
            epoch,
            compacted: false,
            failed: false,
        }
    }

    pub fn agent(text: String, chunks: Vec<SentenceChunk>, source: InputSource, epoch: u64) -> Self {
        Self {
            speaker: Speaker::Agent,
            source,
            text,
            chunks,
            timestamp: SystemTime::now(),
            epoch,
            compacted: false,
            failed: false,
        }
    }

    pub fn compact(&mut self) {
        self.compacted = true;
        self.text.clear();
        for chunk in &mut self.chunks {
            chunk.text.clear();
        }
    }

    /// `User: …` / `Assistant: …` line used in context and summary prompts.
    pub fn transcript_line(&self) -> String {
        match self.speaker {
            Speaker::User => format!("User: {}", self.text),
            Speaker::Agent => format!("Assistant: {}", self.text),
        }
    }
}

/// Rolling summary of compacted history. Replaced whole, never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub summary: String,
    pub next_topic: String,
    /// Number of turns, counted from the start of the session, this summary covers.
    pub covered_turns: usize,
}

impl ContextSummary {
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty() && self.next_topic.is_empty()
    }
}

/// Per-session generation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub character: String,
    pub script: String,
    pub language: String,
    pub retrieval_enabled: bool,
}

impl SessionSettings {
    pub fn from_config(config: &crate::config::SessionConfig) -> Self {
        Self {
            character: config.character.clone(),
            script: config.script.clone(),
            language: config.language.clone(),
            retrieval_enabled: config.retrieval_enabled,
        }
    }

    /// Applies the present fields of `update`.
    pub fn apply(&mut self, update: &SettingsUpdate) {
        if let Some(character) = &update.character {
            self.character = character.clone();
        }
        if let Some(script) = &update.script {
            self.script = script.clone();
        }
        if let Some(language) = &update.language {
            self.language = language.to_uppercase();
        }
        if let Some(enabled) = update.retrieval_enabled {
            self.retrieval_enabled = enabled;
        }
    }
}

/// Partial settings change; absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self == &SettingsUpdate::default()
    }

    /// Rejects ids the catalog does not know and blank languages. An empty
    /// catalog accepts any id.
    pub fn validate(&self, catalog: &Catalog) -> Result<()> {
        if let Some(character) = &self.character
            && !catalog.characters.is_empty()
            && !catalog.characters.contains_key(character)
        {
            return Err(ParleyError::InputRejected {
                reason: format!("unknown character '{character}'"),
            });
        }
        if let Some(script) = &self.script
            && !catalog.scripts.is_empty()
            && !catalog.scripts.contains_key(script)
        {
            return Err(ParleyError::InputRejected {
                reason: format!("unknown script '{script}'"),
            });
        }
        if let Some(language) = &self.language
            && (language.trim().is_empty() || !language.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(ParleyError::InputRejected {
                reason: format!("invalid language code '{language}'"),
            });
        }
        Ok(())
    }
}

/// Read-only view of a session for callers and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub state: SessionState,
    pub epoch: u64,
    pub turns: Vec<Turn>,
    pub summary: ContextSummary,
    pub settings: SessionSettings,
    pub summarizing: bool,
}

impl SessionSnapshot {
    pub fn agent_turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|t| t.speaker == Speaker::Agent)
    }
}
