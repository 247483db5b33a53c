use crate::defaults;
use crate::error::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub context: ContextConfig,
    pub retrieval: RetrievalConfig,
    pub recognition: RecognitionConfig,
    pub generation: GenerationConfig,
    pub synthesis: SynthesisConfig,
    pub summarizer: SummarizerConfig,
    pub catalog: CatalogConfig,
}

/// Per-session defaults and lifecycle limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub language: String,
    pub character: String,
    pub script: String,
    pub retrieval_enabled: bool,
    pub idle_timeout_secs: u64,
    pub inbox_capacity: usize,
    pub outbound_capacity: usize,
}

/// Context budget configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    pub budget_bytes: usize,
}

/// Retrieval lookup configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_score: f32,
    pub timeout_ms: u64,
}

/// Speech recognition configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub timeout_ms: u64,
}

/// Text generation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_sentence_bytes: usize,
    pub timeout_ms: u64,
    pub error_text: String,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub max_in_flight: usize,
    pub timeout_ms: u64,
}

/// Background summarizer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SummarizerConfig {
    pub threshold: usize,
    pub retain_turns: usize,
    pub max_concurrent: usize,
    pub timeout_ms: u64,
}

/// Character/script catalog location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory holding `characters.json` and `scripts.json`
    pub dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            character: defaults::DEFAULT_CHARACTER.to_string(),
            script: defaults::DEFAULT_SCRIPT.to_string(),
            retrieval_enabled: false,
            idle_timeout_secs: defaults::IDLE_TIMEOUT_SECS,
            inbox_capacity: defaults::INBOX_CAPACITY,
            outbound_capacity: defaults::OUTBOUND_CAPACITY,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_bytes: defaults::CONTEXT_BUDGET_BYTES,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: defaults::RETRIEVAL_TOP_K,
            min_score: defaults::RETRIEVAL_MIN_SCORE,
            timeout_ms: defaults::RETRIEVAL_TIMEOUT_MS,
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            frame_ms: defaults::FRAME_MS,
            timeout_ms: defaults::RECOGNITION_TIMEOUT_MS,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_sentence_bytes: defaults::MAX_SENTENCE_BYTES,
            timeout_ms: defaults::GENERATION_TIMEOUT_MS,
            error_text: defaults::GENERATION_ERROR_TEXT.to_string(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_in_flight: defaults::SYNTHESIS_MAX_IN_FLIGHT,
            timeout_ms: defaults::SYNTHESIS_TIMEOUT_MS,
        }
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::SUMMARY_THRESHOLD,
            retain_turns: defaults::SUMMARY_RETAIN_TURNS,
            max_concurrent: defaults::SUMMARY_MAX_CONCURRENT,
            timeout_ms: defaults::SUMMARY_TIMEOUT_MS,
        }
    }
}

impl RecognitionConfig {
    pub fn frame_bytes(&self) -> usize {
        defaults::frame_bytes(self.sample_rate, self.frame_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SummarizerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML or invalid values.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("context.budget_bytes", self.context.budget_bytes),
            ("generation.max_sentence_bytes", self.generation.max_sentence_bytes),
            ("synthesis.max_in_flight", self.synthesis.max_in_flight),
            ("summarizer.threshold", self.summarizer.threshold),
            ("summarizer.max_concurrent", self.summarizer.max_concurrent),
            ("session.inbox_capacity", self.session.inbox_capacity),
            ("session.outbound_capacity", self.session.outbound_capacity),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ParleyError::ConfigInvalidValue {
                    key: key.to_string(),
                    message: "must be positive".to_string(),
                });
            }
        }
        if self.recognition.frame_bytes() == 0 {
            return Err(ParleyError::ConfigInvalidValue {
                key: "recognition.frame_ms".to_string(),
                message: "frame must hold at least one sample".to_string(),
            });
        }
        if self.summarizer.retain_turns >= self.summarizer.threshold {
            return Err(ParleyError::ConfigInvalidValue {
                key: "summarizer.retain_turns".to_string(),
                message: "must be smaller than summarizer.threshold".to_string(),
            });
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - PARLEY_LANGUAGE → session.language
    /// - PARLEY_CHARACTER → session.character
    /// - PARLEY_SCRIPT → session.script
    /// - PARLEY_RETRIEVAL → session.retrieval_enabled ("true"/"false")
    /// - PARLEY_CATALOG_DIR → catalog.dir
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(language) = std::env::var("PARLEY_LANGUAGE")
            && !language.is_empty()
        {
            self.session.language = language.to_uppercase();
        }

        if let Ok(character) = std::env::var("PARLEY_CHARACTER")
            && !character.is_empty()
        {
            self.session.character = character;
        }

        if let Ok(script) = std::env::var("PARLEY_SCRIPT")
            && !script.is_empty()
        {
            self.session.script = script;
        }

        if let Ok(retrieval) = std::env::var("PARLEY_RETRIEVAL")
            && !retrieval.is_empty()
        {
            self.session.retrieval_enabled = retrieval.eq_ignore_ascii_case("true");
        }

        if let Ok(dir) = std::env::var("PARLEY_CATALOG_DIR")
            && !dir.is_empty()
        {
            self.catalog.dir = Some(PathBuf::from(dir));
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/parley/config.toml on Linux, or a relative
    /// `parley.toml` when no config directory is known.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("parley").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("parley.toml"))
    }
}
