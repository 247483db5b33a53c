//! Scripted provider implementations for tests and local runs.

use crate::error::{ParleyError, Result};
use crate::ingest::frame::AudioFrame;
use crate::provider::{
    CancelSignal, Generator, RecognitionEvent, RecognitionStream, Recognizer, Retriever, Snippet,
    Synthesizer, TextStream,
};
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

/// One scripted generation reply.
#[derive(Debug, Clone, Default)]
pub struct MockReply {
    increments: Vec<String>,
    fail_open: bool,
    fail_after: Option<usize>,
    hold_open: bool,
    delay: Duration,
}

impl MockReply {
    /// Reply streamed as the given increments.
    pub fn text(increments: &[&str]) -> Self {
        Self {
            increments: increments.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Reply whose generation call fails before streaming anything.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    /// Stream an error after `n` increments.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Keep the stream open after the last increment until cancelled.
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Sleep before every increment.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Generator that plays back scripted replies.
///
/// Queued replies are used in order; once drained, every call gets the
/// fallback reply.
pub struct MockGenerator {
    fallback: MockReply,
    queued: Mutex<VecDeque<MockReply>>,
    contexts: Mutex<Vec<String>>,
    yielded: Arc<AtomicUsize>,
}

impl MockGenerator {
    pub fn new(fallback: MockReply) -> Self {
        Self {
            fallback,
            queued: Mutex::new(VecDeque::new()),
            contexts: Mutex::new(Vec::new()),
            yielded: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Generator answering every call with a single increment.
    pub fn replying(text: &str) -> Self {
        Self::new(MockReply::text(&[text]))
    }

    /// Queue a reply ahead of the fallback.
    pub fn then(mut self, reply: MockReply) -> Self {
        self.queued.get_mut().push_back(reply);
        self
    }

    /// Contexts received so far, in call order.
    pub async fn contexts(&self) -> Vec<String> {
        self.contexts.lock().await.clone()
    }

    pub async fn calls(&self) -> usize {
        self.contexts.lock().await.len()
    }

    /// Increments handed out so far, across all calls.
    pub fn yielded(&self) -> usize {
        self.yielded.load(Ordering::SeqCst)
    }
}

struct ReplyState {
    reply: MockReply,
    index: usize,
    done: bool,
    cancel: CancelSignal,
    yielded: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, context: String, cancel: CancelSignal) -> Result<TextStream> {
        self.contexts.lock().await.push(context);
        let reply = self
            .queued
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if reply.fail_open {
            return Err(ParleyError::Generation {
                message: "mock generation failure".to_string(),
            });
        }

        let state = ReplyState {
            reply,
            index: 0,
            done: false,
            cancel,
            yielded: self.yielded.clone(),
        };
        let stream = futures_util::stream::unfold(state, |mut st| async move {
            if st.done {
                return None;
            }
            if st.reply.fail_after == Some(st.index) {
                st.done = true;
                let err = ParleyError::Generation {
                    message: "mock stream failure".to_string(),
                };
                return Some((Err(err), st));
            }
            if st.index < st.reply.increments.len() {
                if !st.reply.delay.is_zero() {
                    tokio::time::sleep(st.reply.delay).await;
                }
                let item = st.reply.increments[st.index].clone();
                st.index += 1;
                st.yielded.fetch_add(1, Ordering::SeqCst);
                return Some((Ok(item), st));
            }
            if st.reply.hold_open {
                st.cancel.cancelled().await;
            }
            None
        });
        Ok(stream.boxed())
    }
}

/// Synthesizer producing `audio:<sentence>` bytes.
#[derive(Default)]
pub struct MockSynthesizer {
    failures: Vec<String>,
    delays: Vec<(String, Duration)>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audio the mock returns for a sentence.
    pub fn audio_for(sentence: &str) -> Vec<u8> {
        format!("audio:{sentence}").into_bytes()
    }

    /// Fail every sentence containing `needle`.
    pub fn fail_on(mut self, needle: &str) -> Self {
        self.failures.push(needle.to_string());
        self
    }

    /// Delay every sentence containing `needle`.
    pub fn delay_on(mut self, needle: &str, delay: Duration) -> Self {
        self.delays.push((needle.to_string(), delay));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping synthesize calls observed.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(
        &self,
        sentence: &str,
        _language: &str,
        _cancel: CancelSignal,
    ) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(current, Ordering::SeqCst);

        let delay = self
            .delays
            .iter()
            .find(|(needle, _)| sentence.contains(needle.as_str()))
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failures.iter().any(|n| sentence.contains(n.as_str())) {
            return Err(ParleyError::Synthesis {
                message: format!("mock synthesis failure for '{sentence}'"),
            });
        }
        Ok(Self::audio_for(sentence))
    }
}

/// Recognizer that emits one scripted event per `frames_per_event` frames.
pub struct MockRecognizer {
    events: Vec<RecognitionEvent>,
    frames_per_event: usize,
    frames_seen: Arc<AtomicUsize>,
}

impl MockRecognizer {
    pub fn new(events: Vec<RecognitionEvent>) -> Self {
        Self {
            events,
            frames_per_event: 1,
            frames_seen: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Recognizer that never produces a result.
    pub fn silent() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_frames_per_event(mut self, frames: usize) -> Self {
        self.frames_per_event = frames.max(1);
        self
    }

    pub fn frames_seen(&self) -> usize {
        self.frames_seen.load(Ordering::SeqCst)
    }
}

struct RecognitionState {
    frames: mpsc::Receiver<AudioFrame>,
    events: VecDeque<RecognitionEvent>,
    frames_per_event: usize,
    frames_seen: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Recognizer for MockRecognizer {
    async fn recognize(
        &self,
        frames: mpsc::Receiver<AudioFrame>,
        _language: &str,
        _cancel: CancelSignal,
    ) -> Result<RecognitionStream> {
        let state = RecognitionState {
            frames,
            events: self.events.iter().cloned().collect(),
            frames_per_event: self.frames_per_event,
            frames_seen: self.frames_seen.clone(),
        };
        let stream = futures_util::stream::unfold(state, |mut st| async move {
            let event = st.events.pop_front()?;
            for _ in 0..st.frames_per_event {
                st.frames.recv().await?;
                st.frames_seen.fetch_add(1, Ordering::SeqCst);
            }
            Some((Ok(event), st))
        });
        Ok(stream.boxed())
    }
}

/// Retriever returning a fixed snippet set, best score first.
#[derive(Default)]
pub struct MockRetriever {
    snippets: Vec<Snippet>,
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl MockRetriever {
    pub fn new(snippets: Vec<Snippet>) -> Self {
        Self {
            snippets,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub async fn queries(&self) -> Vec<String> {
        self.queries.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl Retriever for MockRetriever {
    async fn lookup(&self, query: &str, top_k: usize) -> Result<Vec<Snippet>> {
        self.queries.lock().await.push(query.to_string());
        if self.fail {
            return Err(ParleyError::Retrieval {
                message: "mock retrieval failure".to_string(),
            });
        }
        let mut ranked = self.snippets.clone();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(top_k);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::EpochClock;

    #[tokio::test]
    async fn generator_plays_queued_then_fallback() {
        let clock = EpochClock::new();
        let generator = MockGenerator::replying("fallback.").then(MockReply::text(&["a", "b"]));

        let first: Vec<String> = generator
            .generate("ctx1".to_string(), clock.signal())
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(first, vec!["a", "b"]);

        let second: Vec<String> = generator
            .generate("ctx2".to_string(), clock.signal())
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(second, vec!["fallback."]);
        assert_eq!(generator.contexts().await, vec!["ctx1", "ctx2"]);
        assert_eq!(generator.yielded(), 3);
    }

    #[tokio::test]
    async fn generator_failing_after_yields_error_then_ends() {
        let clock = EpochClock::new();
        let generator = MockGenerator::new(MockReply::text(&["a", "b"]).failing_after(1));
        let items: Vec<Result<String>> = generator
            .generate(String::new(), clock.signal())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn held_reply_ends_on_cancel() {
        let clock = EpochClock::new();
        clock.advance();
        let generator = MockGenerator::new(MockReply::text(&["a"]).held_open());
        let mut stream = generator
            .generate(String::new(), clock.signal())
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "a");

        let pending = tokio::time::timeout(Duration::from_millis(30), stream.next()).await;
        assert!(pending.is_err(), "stream should stay open");

        clock.advance();
        let end = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn synthesizer_fails_on_marker() {
        let clock = EpochClock::new();
        let synth = MockSynthesizer::new().fail_on("bad");
        assert_eq!(
            synth.synthesize("good", "ENG", clock.signal()).await.unwrap(),
            MockSynthesizer::audio_for("good")
        );
        assert!(synth.synthesize("a bad one", "ENG", clock.signal()).await.is_err());
        assert_eq!(synth.calls(), 2);
    }

    #[tokio::test]
    async fn retriever_ranks_and_truncates() {
        let retriever = MockRetriever::new(vec![
            Snippet {
                text: "low".to_string(),
                score: 0.2,
            },
            Snippet {
                text: "high".to_string(),
                score: 0.9,
            },
            Snippet {
                text: "mid".to_string(),
                score: 0.5,
            },
        ]);
        let found = retriever.lookup("q", 2).await.unwrap();
        let texts: Vec<&str> = found.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["high", "mid"]);
        assert_eq!(retriever.queries().await, vec!["q"]);
    }
}
