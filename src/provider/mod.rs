//! Model-provider capabilities consumed by the engine.
//!
//! Recognition, generation, synthesis and retrieval are abstract async
//! capabilities. Concrete network clients live outside this crate; `mock`
//! holds scripted implementations for tests and demos.

pub mod cancel;
pub mod mock;

use crate::error::Result;
use crate::ingest::frame::AudioFrame;
use futures_util::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use cancel::{CancelSignal, EpochClock, EpochState};

/// Lazy sequence of generated text increments.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Lazy sequence of recognition results for one utterance.
pub type RecognitionStream = BoxStream<'static, Result<RecognitionEvent>>;

/// One recognition result. `is_final` closes the utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionEvent {
    pub text: String,
    pub is_final: bool,
}

impl RecognitionEvent {
    pub fn interim(text: &str) -> Self {
        Self {
            text: text.to_string(),
            is_final: false,
        }
    }

    pub fn final_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            is_final: true,
        }
    }
}

/// Ranked retrieval result.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    pub text: String,
    pub score: f32,
}

/// Streaming speech recognition.
///
/// Consumes frames for a single utterance; the returned stream is spent after
/// its final event.
#[async_trait::async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(
        &self,
        frames: mpsc::Receiver<AudioFrame>,
        language: &str,
        cancel: CancelSignal,
    ) -> Result<RecognitionStream>;
}

/// Streaming text generation.
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, context: String, cancel: CancelSignal) -> Result<TextStream>;
}

/// Speech synthesis for one sentence.
#[async_trait::async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        sentence: &str,
        language: &str,
        cancel: CancelSignal,
    ) -> Result<Vec<u8>>;
}

/// Ranked snippet lookup. Side-effect free from the engine's point of view.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    async fn lookup(&self, query: &str, top_k: usize) -> Result<Vec<Snippet>>;
}

/// The capability set a session runs against.
#[derive(Clone)]
pub struct Providers {
    pub recognizer: Arc<dyn Recognizer>,
    pub generator: Arc<dyn Generator>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub retriever: Option<Arc<dyn Retriever>>,
}

impl Providers {
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        generator: Arc<dyn Generator>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            recognizer,
            generator,
            synthesizer,
            retriever: None,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }
}
