//! Transcript ingestor station.
//!
//! One ingestor serves one utterance: it frames client audio, feeds a fresh
//! recognition stream and forwards interim and final transcripts. After the
//! final event the recognition stream is spent and the frame input closes.

use crate::config::RecognitionConfig;
use crate::error::{ParleyError, Result};
use crate::ingest::frame::{AudioFrame, FrameSplitter};
use crate::provider::{CancelSignal, Recognizer};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Transcript events sent back to the audio-input client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEvent {
    Interim { text: String },
    Final { text: String },
}

impl TranscriptEvent {
    pub fn text(&self) -> &str {
        match self {
            TranscriptEvent::Interim { text } | TranscriptEvent::Final { text } => text,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, TranscriptEvent::Final { .. })
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Client side of one audio input channel.
#[derive(Debug)]
pub struct AudioInput {
    frames: mpsc::Sender<Vec<u8>>,
    events: mpsc::Receiver<TranscriptEvent>,
}

impl AudioInput {
    pub fn new(frames: mpsc::Sender<Vec<u8>>, events: mpsc::Receiver<TranscriptEvent>) -> Self {
        Self { frames, events }
    }

    /// Pushes raw PCM bytes. Fails once the utterance has been finalized.
    pub async fn send_audio(&self, bytes: Vec<u8>) -> Result<()> {
        self.frames
            .send(bytes)
            .await
            .map_err(|_| ParleyError::RecognitionStreamClosed {
                message: "utterance already finalized; open a new audio input".to_string(),
            })
    }

    /// Next transcript event; `None` after the final one.
    pub async fn next_event(&mut self) -> Option<TranscriptEvent> {
        self.events.recv().await
    }

    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }

    pub fn into_parts(self) -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<TranscriptEvent>) {
        (self.frames, self.events)
    }
}

/// Frames audio and drives one recognition stream.
pub struct TranscriptIngestor {
    recognizer: Arc<dyn Recognizer>,
    config: RecognitionConfig,
    language: String,
    frame_buffer: usize,
}

impl TranscriptIngestor {
    pub fn new(recognizer: Arc<dyn Recognizer>, config: RecognitionConfig, language: &str) -> Self {
        Self {
            recognizer,
            config,
            language: language.to_string(),
            frame_buffer: 64,
        }
    }

    /// Runs the ingestor until the utterance is final, input ends or the
    /// session closes.
    ///
    /// Returns `RecognitionStreamClosed` when the upstream stream ends without
    /// a final result. Dropping `input` on return closes the client's sender.
    pub async fn run(
        self,
        mut input: mpsc::Receiver<Vec<u8>>,
        output: mpsc::Sender<TranscriptEvent>,
        cancel: CancelSignal,
    ) -> Result<()> {
        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(self.frame_buffer);
        let timeout = self.config.timeout();
        let mut results = tokio::time::timeout(
            timeout,
            self.recognizer
                .recognize(frame_rx, &self.language, cancel.clone()),
        )
        .await
        .map_err(|_| ParleyError::Timeout {
            operation: "recognition".to_string(),
            millis: timeout.as_millis() as u64,
        })??;

        let mut splitter = FrameSplitter::new(self.config.frame_bytes());
        let mut frame_tx = Some(frame_tx);
        let mut last_interim = String::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("ingestor cancelled");
                    return Ok(());
                }
                bytes = input.recv(), if frame_tx.is_some() => {
                    match bytes {
                        Some(bytes) => {
                            for frame in splitter.push(&bytes) {
                                if let Some(tx) = &frame_tx
                                    && tx.send(frame).await.is_err()
                                {
                                    frame_tx = None;
                                    break;
                                }
                            }
                        }
                        None => {
                            // Client finished the utterance; flush and let the
                            // recognizer drain.
                            if let (Some(tx), Some(tail)) = (&frame_tx, splitter.finish())
                                && tx.send(tail).await.is_err()
                            {
                                debug!("recognizer dropped its frame input");
                            }
                            frame_tx = None;
                        }
                    }
                }
                result = results.next() => {
                    match result {
                        Some(Ok(event)) if event.is_final => {
                            let text = event.text.trim().to_string();
                            info!(text = %text, "final transcript");
                            if output.send(TranscriptEvent::Final { text }).await.is_err() {
                                debug!("transcript receiver dropped before final");
                            }
                            return Ok(());
                        }
                        Some(Ok(event)) => {
                            let text = event.text.trim();
                            if text.is_empty() || text == last_interim {
                                continue;
                            }
                            last_interim = text.to_string();
                            debug!(text = %text, "interim transcript");
                            if output
                                .send(TranscriptEvent::Interim { text: last_interim.clone() })
                                .await
                                .is_err()
                            {
                                debug!("transcript receiver dropped");
                            }
                        }
                        Some(Err(e)) => return Err(e),
                        None => {
                            return Err(ParleyError::RecognitionStreamClosed {
                                message: "upstream ended without a final result".to_string(),
                            });
                        }
                    }
                }
            }
        }
    }
}
