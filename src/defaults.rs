//! Default configuration constants for parley.
//!
//! Shared by the config types and the components that fall back to them, so
//! every layer agrees on the same numbers.

/// Audio sample rate of client PCM in Hz.
///
/// Client audio is 16-bit little-endian mono at this rate.
pub const SAMPLE_RATE: u32 = 16000;

/// Duration of one recognition frame in milliseconds.
pub const FRAME_MS: u32 = 10;

/// Bytes per PCM sample (s16le).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Default conversation language.
pub const DEFAULT_LANGUAGE: &str = "ENG";

/// Language code that switches the reply directive to Chinese.
pub const CHINESE_LANGUAGE: &str = "CHN";

/// Character used when a session does not pick one.
pub const DEFAULT_CHARACTER: &str = "model_5";

/// Script used when a session does not pick one.
pub const DEFAULT_SCRIPT: &str = "script_1";

/// Maximum serialized context size in bytes.
pub const CONTEXT_BUDGET_BYTES: usize = 12_000;

/// Number of retrieval snippets requested per turn.
pub const RETRIEVAL_TOP_K: usize = 3;

/// Snippets scoring at or below this are never included.
pub const RETRIEVAL_MIN_SCORE: f32 = 0.1;

/// Byte length at which a boundary-free sentence buffer is force-split.
pub const MAX_SENTENCE_BYTES: usize = 800;

/// Time allowed to open a generation stream and between two increments.
pub const GENERATION_TIMEOUT_MS: u64 = 20_000;

/// Time allowed for a single synthesis call.
pub const SYNTHESIS_TIMEOUT_MS: u64 = 15_000;

/// Time allowed for a retrieval lookup.
pub const RETRIEVAL_TIMEOUT_MS: u64 = 3_000;

/// Time allowed to open a recognition stream.
pub const RECOGNITION_TIMEOUT_MS: u64 = 5_000;

/// Sentences synthesized concurrently (and buffered for reordering) per turn.
pub const SYNTHESIS_MAX_IN_FLIGHT: usize = 3;

/// Capacity of the per-session outbound packet channel.
pub const OUTBOUND_CAPACITY: usize = 32;

/// Capacity of the per-session command inbox.
pub const INBOX_CAPACITY: usize = 64;

/// Turns since the last summary that trigger a new summarization.
pub const SUMMARY_THRESHOLD: usize = 6;

/// Newest turns kept verbatim after a summary is installed.
pub const SUMMARY_RETAIN_TURNS: usize = 2;

/// Summarizations running at once across all sessions.
pub const SUMMARY_MAX_CONCURRENT: usize = 4;

/// Time allowed for one summarization call.
pub const SUMMARY_TIMEOUT_MS: u64 = 60_000;

/// Seconds without external activity before a session closes itself.
pub const IDLE_TIMEOUT_SECS: u64 = 30 * 60;

/// Text delivered to the client when a turn's generation fails.
pub const GENERATION_ERROR_TEXT: &str = "Sorry, I lost my train of thought. Could you say that again?";

/// Bytes in one recognition frame for the given rate and frame length.
pub fn frame_bytes(sample_rate: u32, frame_ms: u32) -> usize {
    BYTES_PER_SAMPLE * (sample_rate as usize) * (frame_ms as usize) / 1000
}
