//! Session actor: the single owner of one conversation.
//!
//! All state changes happen inside the actor task. Commands arrive through the
//! bounded inbox; pipeline progress, transcripts and summaries arrive on
//! unbounded channels the actor owns, so no producer can block on it.

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::Result;
use crate::ingest::{AudioInput, TranscriptEvent, TranscriptIngestor};
use crate::pipeline::{
    DeliveryHandle, DeliveryStation, GenerationPipeline, OutboundPacket, PipelineEvent,
    TurnRequest,
};
use crate::provider::{EpochClock, Providers};
use crate::session::handle::SessionHandle;
use crate::session::state::{
    ContextSummary, InputSource, SessionId, SessionSettings, SessionSnapshot, SessionState,
    SettingsUpdate, Turn,
};
use crate::summarizer::{SummaryRequest, Summarizer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Process-wide collaborators shared by every session.
pub struct Services {
    pub config: Arc<Config>,
    pub catalog: Arc<Catalog>,
    pub providers: Providers,
    pub summarizer: Arc<Summarizer>,
}

impl Services {
    pub fn new(config: Config, catalog: Catalog, providers: Providers) -> Self {
        let summarizer = Summarizer::new(providers.generator.clone(), config.summarizer.clone());
        Self {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            providers,
            summarizer: Arc::new(summarizer),
        }
    }
}

/// Result of submitting user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Submission {
    /// A new turn started under `epoch`.
    Accepted { epoch: u64 },
    /// Empty or whitespace-only input; nothing changed.
    Ignored,
}

/// Messages accepted by the actor inbox.
#[derive(Debug)]
pub enum SessionCommand {
    SubmitText {
        text: String,
        source: InputSource,
        reply: oneshot::Sender<Submission>,
    },
    Configure {
        update: SettingsUpdate,
        reply: oneshot::Sender<Result<SessionSettings>>,
    },
    OpenAudioInput {
        reply: oneshot::Sender<AudioInput>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Notifications from tasks the actor spawned off the live turn.
#[derive(Debug)]
enum BackgroundEvent {
    FinalTranscript { text: String },
    /// An interim transcript passed through the relay.
    AudioActivity,
    AudioInputEnded { error: Option<String> },
    SummaryReady { result: Result<ContextSummary> },
}

enum Flow {
    Continue,
    Close(Option<oneshot::Sender<()>>),
}

pub struct SessionActor {
    id: SessionId,
    services: Arc<Services>,
    state: SessionState,
    settings: SessionSettings,
    turns: Vec<Turn>,
    summary: ContextSummary,
    summarizing: bool,
    /// Audio inputs whose ingestor is still running.
    audio_inputs: usize,
    clock: EpochClock,
    delivery: DeliveryHandle,
    delivery_task: JoinHandle<()>,
    pipeline_tx: mpsc::UnboundedSender<PipelineEvent>,
    pipeline_rx: mpsc::UnboundedReceiver<PipelineEvent>,
    background_tx: mpsc::UnboundedSender<BackgroundEvent>,
    background_rx: mpsc::UnboundedReceiver<BackgroundEvent>,
    commands: mpsc::Receiver<SessionCommand>,
}

impl SessionActor {
    /// Spawns the actor and its delivery station.
    ///
    /// Returns the command handle, the outbound packet receiver and the actor
    /// task.
    pub fn spawn(
        id: SessionId,
        services: Arc<Services>,
        settings: SessionSettings,
    ) -> (SessionHandle, mpsc::Receiver<OutboundPacket>, JoinHandle<()>) {
        let session = &services.config.session;
        let (command_tx, command_rx) = mpsc::channel(session.inbox_capacity.max(1));
        let (out_tx, out_rx) = mpsc::channel(session.outbound_capacity.max(1));
        let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
        let (background_tx, background_rx) = mpsc::unbounded_channel();

        let (delivery, delivery_task) = DeliveryStation::new(id.as_str(), out_tx, pipeline_tx.clone())
            .spawn(session.outbound_capacity);

        let actor = SessionActor {
            id: id.clone(),
            services,
            state: SessionState::Idle,
            settings,
            turns: Vec::new(),
            summary: ContextSummary::default(),
            summarizing: false,
            audio_inputs: 0,
            clock: EpochClock::new(),
            delivery,
            delivery_task,
            pipeline_tx,
            pipeline_rx,
            background_tx,
            background_rx,
            commands: command_rx,
        };
        let task = tokio::spawn(actor.run());
        (SessionHandle::new(id, command_tx), out_rx, task)
    }

    async fn run(mut self) {
        info!(session = %self.id, "session started");
        let idle = self.services.config.session.idle_timeout();
        let mut deadline = Instant::now() + idle;

        let close_reply = loop {
            tokio::select! {
                biased;
                Some(event) = self.pipeline_rx.recv() => {
                    deadline = Instant::now() + idle;
                    self.on_pipeline_event(event);
                }
                Some(event) = self.background_rx.recv() => {
                    deadline = Instant::now() + idle;
                    self.on_background_event(event);
                }
                command = self.commands.recv() => match command {
                    Some(command) => {
                        deadline = Instant::now() + idle;
                        if let Flow::Close(reply) = self.on_command(command) {
                            break reply;
                        }
                    }
                    None => {
                        debug!(session = %self.id, "all handles dropped");
                        break None;
                    }
                },
                _ = tokio::time::sleep_until(deadline), if !self.is_active() => {
                    info!(session = %self.id, idle_secs = idle.as_secs(), "session idle, closing");
                    break None;
                }
            }
        };

        self.shutdown();
        if let Some(reply) = close_reply
            && reply.send(()).is_err()
        {
            trace!(session = %self.id, "close requester gone");
        }
    }

    /// A turn in flight or an open audio input keeps the session alive.
    fn is_active(&self) -> bool {
        self.state.is_busy() || self.audio_inputs > 0
    }

    fn shutdown(&mut self) {
        self.clock.close();
        self.delivery_task.abort();
        self.state = SessionState::Closed;
        self.commands.close();
        info!(session = %self.id, turns = self.turns.len(), "session closed");
    }

    fn on_command(&mut self, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::SubmitText {
                text,
                source,
                reply,
            } => {
                let submission = self.start_turn(&text, source);
                if reply.send(submission).is_err() {
                    trace!(session = %self.id, "submitter gone");
                }
            }
            SessionCommand::Configure { update, reply } => {
                let result = update
                    .validate(&self.services.catalog)
                    .map(|()| {
                        self.settings.apply(&update);
                        debug!(session = %self.id, settings = ?self.settings, "settings updated");
                        self.settings.clone()
                    });
                if reply.send(result).is_err() {
                    trace!(session = %self.id, "configure requester gone");
                }
            }
            SessionCommand::OpenAudioInput { reply } => {
                let input = self.open_audio_input();
                if reply.send(input).is_err() {
                    trace!(session = %self.id, "audio input requester gone");
                }
            }
            SessionCommand::Snapshot { reply } => {
                if reply.send(self.snapshot()).is_err() {
                    trace!(session = %self.id, "snapshot requester gone");
                }
            }
            SessionCommand::Close { reply } => return Flow::Close(Some(reply)),
        }
        Flow::Continue
    }

    /// Starts a new turn for non-empty input, superseding any active one.
    fn start_turn(&mut self, text: &str, source: InputSource) -> Submission {
        let text = text.trim();
        if text.is_empty() {
            debug!(session = %self.id, "ignoring empty input");
            return Submission::Ignored;
        }

        if self.state.is_busy() {
            let superseded = self.clock.current();
            info!(session = %self.id, epoch = superseded, "barge-in");
            if !self.delivery.close_epoch(superseded) {
                warn!(session = %self.id, "delivery station gone");
            }
        }

        let epoch = self.clock.advance();
        let history: Vec<Turn> = self
            .turns
            .iter()
            .filter(|t| !t.compacted)
            .cloned()
            .collect();
        self.turns.push(Turn::user(text, source, epoch));
        self.state = SessionState::Generating;

        let services = &self.services;
        let request = TurnRequest {
            session: self.id.to_string(),
            epoch,
            user_text: text.to_string(),
            source,
            persona: services.catalog.persona(
                &self.settings.character,
                &self.settings.script,
                &self.settings.language,
            ),
            summary: self.summary.clone(),
            history,
            language: self.settings.language.clone(),
            retrieval_enabled: self.settings.retrieval_enabled,
        };
        let pipeline = GenerationPipeline::new(
            services.providers.clone(),
            services.config.clone(),
            self.delivery.data.clone(),
            self.pipeline_tx.clone(),
        );
        tokio::spawn(pipeline.run(request, self.clock.signal()));

        info!(session = %self.id, epoch, source = ?source, "turn started");
        Submission::Accepted { epoch }
    }

    fn on_pipeline_event(&mut self, event: PipelineEvent) {
        let current = self.clock.current();
        match event {
            PipelineEvent::FirstDelivery { epoch } => {
                if epoch == current && self.state == SessionState::Generating {
                    self.state = SessionState::Speaking;
                }
            }
            PipelineEvent::TurnEnded { epoch } => {
                if epoch == current && self.state.is_busy() {
                    self.state = SessionState::Listening;
                }
            }
            PipelineEvent::TurnCompleted(outcome) => {
                if outcome.epoch != current {
                    debug!(session = %self.id, epoch = outcome.epoch, "discarding stale outcome");
                    return;
                }
                if let Some(turn) = outcome.into_turn() {
                    self.turns.push(turn);
                }
                self.maybe_summarize();
            }
        }
    }

    fn on_background_event(&mut self, event: BackgroundEvent) {
        match event {
            BackgroundEvent::FinalTranscript { text } => {
                if let Submission::Accepted { epoch } = self.start_turn(&text, InputSource::Voice) {
                    debug!(session = %self.id, epoch, "voice turn accepted");
                }
            }
            BackgroundEvent::AudioActivity => {}
            BackgroundEvent::AudioInputEnded { error } => {
                self.audio_inputs = self.audio_inputs.saturating_sub(1);
                match error {
                    Some(error) => warn!(session = %self.id, error = %error, "audio input ended"),
                    None => debug!(session = %self.id, "audio input ended"),
                }
            }
            BackgroundEvent::SummaryReady { result } => {
                self.summarizing = false;
                match result {
                    Ok(summary) => self.install_summary(summary),
                    Err(e) => warn!(session = %self.id, error = %e, "summarization failed"),
                }
            }
        }
    }

    fn maybe_summarize(&mut self) {
        let config = &self.services.config.summarizer;
        let covered = self.summary.covered_turns.min(self.turns.len());
        if self.summarizing || self.turns.len() - covered < config.threshold {
            return;
        }
        self.summarizing = true;

        let request = SummaryRequest {
            session: self.id.to_string(),
            previous: self.summary.clone(),
            turns: self.turns[covered..].to_vec(),
            covered: self.turns.len(),
        };
        let summarizer = self.services.summarizer.clone();
        let events = self.background_tx.clone();
        let cancel = self.clock.session_signal();
        debug!(session = %self.id, covered = request.covered, "summary scheduled");

        tokio::spawn(async move {
            let result = summarizer.summarize(request, cancel).await;
            if events.send(BackgroundEvent::SummaryReady { result }).is_err() {
                trace!("session gone before summary was installed");
            }
        });
    }

    /// Installs a finished summary and compacts covered turns except the
    /// newest `retain_turns`.
    ///
    /// An empty field never replaces a non-empty one. Without summary text
    /// nothing is compacted and the covered count stays put, so the same turns
    /// are offered to the next summary.
    fn install_summary(&mut self, summary: ContextSummary) {
        let ContextSummary {
            summary: text,
            next_topic,
            covered_turns,
        } = summary;
        if !next_topic.is_empty() {
            self.summary.next_topic = next_topic;
        }
        if text.is_empty() {
            debug!(session = %self.id, "summary came back empty, keeping previous");
            return;
        }

        let retain = self.services.config.summarizer.retain_turns;
        let covered = covered_turns.min(self.turns.len());
        let compact_through = covered.saturating_sub(retain);
        for turn in &mut self.turns[..compact_through] {
            if !turn.compacted {
                turn.compact();
            }
        }
        info!(
            session = %self.id,
            covered,
            compacted = compact_through,
            "summary installed"
        );
        self.summary.summary = text;
        self.summary.covered_turns = covered_turns;
    }

    fn open_audio_input(&mut self) -> AudioInput {
        let capacity = self.services.config.session.inbox_capacity.max(1);
        let (bytes_tx, bytes_rx) = mpsc::channel(capacity);
        let (client_tx, client_rx) = mpsc::channel(capacity);
        let (ingest_tx, mut ingest_rx) = mpsc::channel::<TranscriptEvent>(capacity);

        let ingestor = TranscriptIngestor::new(
            self.services.providers.recognizer.clone(),
            self.services.config.recognition.clone(),
            &self.settings.language,
        );
        let cancel = self.clock.session_signal();
        let events = self.background_tx.clone();
        let session = self.id.to_string();

        tokio::spawn(async move {
            // Finals reach the actor before the client; interims are dropped
            // rather than stall recognition when the client is not reading.
            let relay = async {
                while let Some(event) = ingest_rx.recv().await {
                    match &event {
                        TranscriptEvent::Final { text } => {
                            let final_text = BackgroundEvent::FinalTranscript { text: text.clone() };
                            if events.send(final_text).is_err() {
                                break;
                            }
                            if client_tx.send(event).await.is_err() {
                                trace!(session = %session, "audio client gone before final");
                            }
                        }
                        TranscriptEvent::Interim { .. } => {
                            if events.send(BackgroundEvent::AudioActivity).is_err() {
                                break;
                            }
                            if client_tx.try_send(event).is_err() {
                                trace!(session = %session, "interim dropped");
                            }
                        }
                    }
                }
            };
            let (result, ()) = tokio::join!(ingestor.run(bytes_rx, ingest_tx, cancel), relay);
            let error = result.err().map(|e| e.to_string());
            if events.send(BackgroundEvent::AudioInputEnded { error }).is_err() {
                trace!(session = %session, "session gone before audio input ended");
            }
        });

        if self.state == SessionState::Idle {
            self.state = SessionState::Listening;
        }
        self.audio_inputs += 1;
        debug!(session = %self.id, open = self.audio_inputs, "audio input opened");
        AudioInput::new(bytes_tx, client_rx)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            state: self.state,
            epoch: self.clock.current(),
            turns: self.turns.clone(),
            summary: self.summary.clone(),
            settings: self.settings.clone(),
            summarizing: self.summarizing,
        }
    }
}

impl Drop for SessionActor {
    fn drop(&mut self) {
        if !self.clock.is_closed() {
            self.clock.close();
            self.delivery_task.abort();
        }
    }
}
