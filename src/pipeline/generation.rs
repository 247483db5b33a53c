//! Generation pipeline for one turn.
//!
//! Runs retrieval, builds the budgeted context, streams the generator's
//! output through the sentence segmenter, synthesizes sentences concurrently
//! and hands them to the delivery station strictly in ordinal order.
//!
//! A synthesis permit is taken when a sentence is dispatched and released
//! only when the reorder buffer lets the sentence go, so in-flight plus parked
//! sentences never exceed `synthesis.max_in_flight`. While no permit is free
//! the generator stream is not polled.

use crate::config::Config;
use crate::context::{ContextBudget, ContextInput};
use crate::error::{ParleyError, Result};
use crate::pipeline::reorder::ReorderBuffer;
use crate::pipeline::segmenter::SentenceSegmenter;
use crate::pipeline::types::{Delivery, PipelineEvent, TurnOutcome, TurnStatus};
use crate::provider::{CancelSignal, Providers, Snippet, TextStream};
use crate::session::state::{ContextSummary, InputSource, SentenceChunk, SynthesisStatus, Turn};
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Everything a pipeline needs to answer one user turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session: String,
    pub epoch: u64,
    pub user_text: String,
    pub source: InputSource,
    pub persona: String,
    pub summary: ContextSummary,
    /// Non-compacted turns before the user turn, oldest first.
    pub history: Vec<Turn>,
    pub language: String,
    pub retrieval_enabled: bool,
}

/// Synthesis result travelling back to the pipeline loop.
struct Synthesized {
    ordinal: u32,
    sentence: String,
    result: Result<Vec<u8>>,
    permit: OwnedSemaphorePermit,
}

/// A sentence parked in the reorder buffer, still holding its permit.
struct Ready {
    sentence: String,
    audio: Option<Vec<u8>>,
    _permit: OwnedSemaphorePermit,
}

/// Why the delivery loop stopped early.
enum Abort {
    Cancelled,
    Failed(ParleyError),
}

pub struct GenerationPipeline {
    providers: Providers,
    config: Arc<Config>,
    delivery: mpsc::Sender<Delivery>,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl GenerationPipeline {
    pub fn new(
        providers: Providers,
        config: Arc<Config>,
        delivery: mpsc::Sender<Delivery>,
        events: mpsc::UnboundedSender<PipelineEvent>,
    ) -> Self {
        Self {
            providers,
            config,
            delivery,
            events,
        }
    }

    /// Runs the turn to completion, failure or cancellation.
    ///
    /// A completed or failed turn reports its outcome to the actor before the
    /// turn-end marker is queued for delivery. A cancelled turn reports
    /// nothing and emits nothing further.
    pub async fn run(self, request: TurnRequest, cancel: CancelSignal) {
        let mut turn = TurnProgress::default();

        let status = match self.drive(&request, &cancel, &mut turn).await {
            Ok(()) => TurnStatus::Completed,
            Err(Abort::Cancelled) => {
                debug!(session = %request.session, epoch = request.epoch, "turn cancelled");
                return;
            }
            Err(Abort::Failed(e)) => {
                if e.is_turn_scoped() {
                    warn!(
                        session = %request.session,
                        epoch = request.epoch,
                        error = %e,
                        "generation failed"
                    );
                } else {
                    error!(
                        session = %request.session,
                        epoch = request.epoch,
                        error = %e,
                        "turn aborted"
                    );
                }
                let error_text = self.config.generation.error_text.clone();
                let ordinal = turn.next_ordinal;
                turn.chunks.push(SentenceChunk {
                    ordinal,
                    text: error_text.clone(),
                    status: SynthesisStatus::Failed,
                    epoch: request.epoch,
                });
                turn.text = error_text.clone();
                if !self
                    .deliver(&cancel, request.epoch, ordinal, error_text, None)
                    .await
                {
                    return;
                }
                TurnStatus::Failed(e.to_string())
            }
        };

        if cancel.is_cancelled() {
            return;
        }

        info!(
            session = %request.session,
            epoch = request.epoch,
            sentences = turn.chunks.len(),
            "turn finished"
        );
        let outcome = TurnOutcome {
            epoch: request.epoch,
            source: request.source,
            text: turn.text.trim().to_string(),
            chunks: turn.chunks,
            status,
        };
        if self
            .events
            .send(PipelineEvent::TurnCompleted(outcome))
            .is_err()
        {
            return;
        }
        let end = Delivery::EndTurn {
            epoch: request.epoch,
        };
        if !self.send(&cancel, end).await {
            debug!(session = %request.session, "turn end not queued");
        }
    }

    async fn drive(
        &self,
        request: &TurnRequest,
        cancel: &CancelSignal,
        turn: &mut TurnProgress,
    ) -> std::result::Result<(), Abort> {
        let snippets = self.retrieve(request, cancel).await?;
        let context = self.build_context(request, &snippets);

        let mut stream = self.open_stream(context, cancel).await?;

        let synthesis = &self.config.synthesis;
        let permits = Arc::new(Semaphore::new(synthesis.max_in_flight.max(1)));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Synthesized>();
        let mut reorder: ReorderBuffer<Ready> = ReorderBuffer::new();
        let mut segmenter = SentenceSegmenter::new(self.config.generation.max_sentence_bytes);
        let mut pending: VecDeque<(u32, String)> = VecDeque::new();
        let mut in_flight = 0usize;
        let mut stream_done = false;
        let mut failure: Option<ParleyError> = None;
        let idle = self.config.generation.timeout();
        // Start of the current wait on the generator. Synthesis progress does
        // not move it.
        let mut waiting_since = Instant::now();

        loop {
            if stream_done && pending.is_empty() && in_flight == 0 {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Abort::Cancelled),

                Some(done) = done_rx.recv(), if in_flight > 0 => {
                    in_flight -= 1;
                    let Synthesized { ordinal, sentence, result, permit } = done;
                    let audio = match result {
                        Ok(audio) => {
                            turn.mark(ordinal, SynthesisStatus::Ready);
                            Some(audio)
                        }
                        Err(e) => {
                            warn!(
                                session = %request.session,
                                epoch = request.epoch,
                                ordinal,
                                error = %e,
                                "synthesis failed, delivering text only"
                            );
                            turn.mark(ordinal, SynthesisStatus::Failed);
                            None
                        }
                    };
                    let ready = Ready { sentence, audio, _permit: permit };
                    for (ordinal, ready) in reorder.insert(ordinal, ready) {
                        if cancel.is_cancelled() {
                            return Err(Abort::Cancelled);
                        }
                        let Ready { sentence, audio, _permit } = ready;
                        if !self.deliver(cancel, request.epoch, ordinal, sentence, audio).await {
                            return Err(Abort::Cancelled);
                        }
                    }
                }

                permit = permits.clone().acquire_owned(), if !pending.is_empty() => {
                    let Ok(permit) = permit else {
                        return Err(Abort::Failed(ParleyError::Other(
                            "synthesis permits closed".to_string(),
                        )));
                    };
                    if let Some((ordinal, sentence)) = pending.pop_front() {
                        in_flight += 1;
                        self.dispatch(ordinal, sentence, permit, request, cancel, done_tx.clone());
                        if pending.is_empty() {
                            waiting_since = Instant::now();
                        }
                    }
                }

                next = tokio::time::timeout_at(waiting_since + idle, stream.next()), if !stream_done && pending.is_empty() => {
                    let increment = match next {
                        Ok(Some(Ok(text))) => {
                            waiting_since = Instant::now();
                            Some(text)
                        }
                        Ok(Some(Err(e))) => {
                            failure = Some(e);
                            None
                        }
                        Ok(None) => None,
                        Err(_) => {
                            failure = Some(ParleyError::Timeout {
                                operation: "generation".to_string(),
                                millis: idle.as_millis() as u64,
                            });
                            None
                        }
                    };

                    match increment {
                        Some(text) => {
                            turn.text.push_str(&text);
                            for sentence in segmenter.push(&text) {
                                pending.push_back(turn.add_chunk(sentence, request.epoch));
                            }
                        }
                        None if failure.is_some() => {
                            // Unsynthesized sentences are dropped; in-flight
                            // ones still drain in order.
                            stream_done = true;
                            turn.drop_chunks(pending.len());
                            pending.clear();
                        }
                        None => {
                            stream_done = true;
                            if let Some(tail) = segmenter.finish() {
                                pending.push_back(turn.add_chunk(tail, request.epoch));
                            }
                        }
                    }
                }
            }
        }

        match failure {
            Some(e) => Err(Abort::Failed(e)),
            None => Ok(()),
        }
    }

    async fn retrieve(
        &self,
        request: &TurnRequest,
        cancel: &CancelSignal,
    ) -> std::result::Result<Vec<Snippet>, Abort> {
        let Some(retriever) = self.providers.retriever.as_ref() else {
            return Ok(Vec::new());
        };
        if !request.retrieval_enabled {
            return Ok(Vec::new());
        }

        let config = &self.config.retrieval;
        let lookup = tokio::time::timeout(
            config.timeout(),
            retriever.lookup(&request.user_text, config.top_k),
        );
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(Abort::Cancelled),
            result = lookup => result,
        };

        match result {
            Ok(Ok(snippets)) => Ok(snippets
                .into_iter()
                .filter(|s| s.score > config.min_score)
                .collect()),
            Ok(Err(e)) => {
                warn!(session = %request.session, error = %e, "retrieval failed, continuing without snippets");
                Ok(Vec::new())
            }
            Err(_) => {
                warn!(
                    session = %request.session,
                    timeout_ms = config.timeout_ms,
                    "retrieval timed out, continuing without snippets"
                );
                Ok(Vec::new())
            }
        }
    }

    fn build_context(&self, request: &TurnRequest, snippets: &[Snippet]) -> String {
        let budget = ContextBudget::new(
            self.config.context.budget_bytes,
            self.config.retrieval.top_k,
        );
        let built = budget.build(&ContextInput {
            persona: &request.persona,
            summary: &request.summary.summary,
            next_topic: &request.summary.next_topic,
            history: &request.history,
            snippets,
            user_text: &request.user_text,
        });
        if built.turns_evicted > 0 {
            debug!(
                session = %request.session,
                evicted = built.turns_evicted,
                "history evicted to fit context budget"
            );
        }
        built.text
    }

    async fn open_stream(
        &self,
        context: String,
        cancel: &CancelSignal,
    ) -> std::result::Result<TextStream, Abort> {
        let timeout = self.config.generation.timeout();
        let open = tokio::time::timeout(
            timeout,
            self.providers.generator.generate(context, cancel.clone()),
        );
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(Abort::Cancelled),
            result = open => result,
        };
        match result {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(Abort::Failed(e)),
            Err(_) => Err(Abort::Failed(ParleyError::Timeout {
                operation: "generation".to_string(),
                millis: timeout.as_millis() as u64,
            })),
        }
    }

    fn dispatch(
        &self,
        ordinal: u32,
        sentence: String,
        permit: OwnedSemaphorePermit,
        request: &TurnRequest,
        cancel: &CancelSignal,
        done: mpsc::UnboundedSender<Synthesized>,
    ) {
        let synthesizer = self.providers.synthesizer.clone();
        let language = request.language.clone();
        let cancel = cancel.clone();
        let timeout = self.config.synthesis.timeout();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = synthesize(synthesizer.as_ref(), &sentence, &language, cancel.clone(), timeout) => result,
            };
            let message = Synthesized {
                ordinal,
                sentence,
                result,
                permit,
            };
            if done.send(message).is_err() {
                debug!(ordinal, "pipeline gone before synthesis finished");
            }
        });
    }

    /// Queues one sentence for the delivery station.
    async fn deliver(
        &self,
        cancel: &CancelSignal,
        epoch: u64,
        ordinal: u32,
        sentence: String,
        audio: Option<Vec<u8>>,
    ) -> bool {
        let delivery = Delivery::Sentence {
            epoch,
            ordinal,
            sentence,
            audio,
        };
        self.send(cancel, delivery).await
    }

    /// Waits for room in the station queue. False once the turn is cancelled
    /// or the station is gone; a stale producer never stays parked on a full
    /// queue.
    async fn send(&self, cancel: &CancelSignal, delivery: Delivery) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = self.delivery.send(delivery) => sent.is_ok(),
        }
    }
}

async fn synthesize(
    synthesizer: &dyn crate::provider::Synthesizer,
    sentence: &str,
    language: &str,
    cancel: CancelSignal,
    timeout: Duration,
) -> Result<Vec<u8>> {
    match tokio::time::timeout(timeout, synthesizer.synthesize(sentence, language, cancel)).await {
        Ok(result) => result,
        Err(_) => Err(ParleyError::Timeout {
            operation: "synthesis".to_string(),
            millis: timeout.as_millis() as u64,
        }),
    }
}

/// Text and chunk bookkeeping for the agent turn being produced.
#[derive(Default)]
struct TurnProgress {
    text: String,
    chunks: Vec<SentenceChunk>,
    next_ordinal: u32,
}

impl TurnProgress {
    fn add_chunk(&mut self, sentence: String, epoch: u64) -> (u32, String) {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.chunks.push(SentenceChunk {
            ordinal,
            text: sentence.clone(),
            status: SynthesisStatus::Pending,
            epoch,
        });
        (ordinal, sentence)
    }

    /// Forgets the newest `count` chunks.
    fn drop_chunks(&mut self, count: usize) {
        let keep = self.chunks.len().saturating_sub(count);
        self.chunks.truncate(keep);
        self.next_ordinal = keep as u32;
    }

    fn mark(&mut self, ordinal: u32, status: SynthesisStatus) {
        if let Some(chunk) = self.chunks.get_mut(ordinal as usize) {
            chunk.status = status;
        }
    }
}
