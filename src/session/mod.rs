//! Per-conversation session actor, its handle and data model.

pub mod actor;
pub mod handle;
pub mod state;

pub use actor::{Services, SessionActor, SessionCommand, Submission};
pub use handle::SessionHandle;
pub use state::{
    ContextSummary, InputSource, SentenceChunk, SessionId, SessionSettings, SessionSnapshot,
    SessionState, SettingsUpdate, Speaker, SynthesisStatus, Turn,
};
