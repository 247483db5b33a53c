//! parley - session orchestration for streamed voice conversations
//!
//! Turns a client's audio or text into sentence-by-sentence spoken replies:
//! speech recognition, budgeted context, streamed generation, concurrent
//! synthesis and strictly ordered delivery, with barge-in cancellation.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod catalog;
pub mod config;
pub mod context;
pub mod defaults;
pub mod error;
pub mod ingest;
pub mod ipc;
pub mod pipeline;
pub mod provider;
pub mod registry;
pub mod session;
pub mod summarizer;
pub mod sys;

// Entry points
pub use registry::SessionRegistry;
pub use session::{
    SessionHandle, SessionId, SessionSettings, SessionSnapshot, SessionState, SettingsUpdate,
    Submission,
};

// Collaborator seams
pub use provider::{Generator, Providers, Recognizer, Retriever, Synthesizer};

// Wire types
pub use ingest::{AudioInput, TranscriptEvent};
pub use pipeline::{OutboundPacket, WireFrame};

// Error handling
pub use error::{ParleyError, Result};

// Config
pub use catalog::Catalog;
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
