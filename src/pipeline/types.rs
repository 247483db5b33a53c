//! Data types flowing through the generation pipeline and delivery station.

use crate::session::state::{InputSource, SentenceChunk, Turn};
use serde::{Deserialize, Serialize};

/// Item sent from a generation pipeline to the delivery station.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A released sentence. `audio` is `None` when synthesis failed.
    Sentence {
        epoch: u64,
        ordinal: u32,
        sentence: String,
        audio: Option<Vec<u8>>,
    },
    /// All sentences of the epoch have been delivered.
    EndTurn { epoch: u64 },
}

impl Delivery {
    pub fn epoch(&self) -> u64 {
        match self {
            Delivery::Sentence { epoch, .. } | Delivery::EndTurn { epoch } => *epoch,
        }
    }
}

/// Out-of-band instruction from the session actor to the delivery station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationControl {
    /// Close an epoch immediately (barge-in).
    Close { epoch: u64 },
}

/// One unit on the outbound channel.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPacket {
    Sentence {
        sentence: String,
        audio: Option<Vec<u8>>,
    },
    Stop,
}

/// JSON text frames of the output wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputMessage {
    Metadata { sentence: String },
    Stop,
}

/// A frame as the transport writes it.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl OutboundPacket {
    pub fn is_stop(&self) -> bool {
        matches!(self, OutboundPacket::Stop)
    }

    pub fn sentence(&self) -> Option<&str> {
        match self {
            OutboundPacket::Sentence { sentence, .. } => Some(sentence),
            OutboundPacket::Stop => None,
        }
    }

    /// Expands the packet into wire frames: metadata immediately followed by
    /// its audio, or a single stop frame.
    pub fn into_frames(self) -> Vec<WireFrame> {
        match self {
            OutboundPacket::Sentence { sentence, audio } => {
                let mut frames = vec![WireFrame::Text(encode(&OutputMessage::Metadata {
                    sentence,
                }))];
                if let Some(audio) = audio {
                    frames.push(WireFrame::Binary(audio));
                }
                frames
            }
            OutboundPacket::Stop => vec![WireFrame::Text(encode(&OutputMessage::Stop))],
        }
    }
}

fn encode(message: &OutputMessage) -> String {
    // Unit and string-only variants always serialize.
    serde_json::to_string(message).unwrap_or_default()
}

/// How a generation turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Cancelled,
    Failed(String),
}

/// Result of one generation pipeline run, reported to the session actor.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub epoch: u64,
    pub source: InputSource,
    pub text: String,
    pub chunks: Vec<SentenceChunk>,
    pub status: TurnStatus,
}

impl TurnOutcome {
    /// Agent turn to record, if the outcome produced one.
    pub fn into_turn(self) -> Option<Turn> {
        let failed = match self.status {
            TurnStatus::Completed => false,
            TurnStatus::Failed(_) => true,
            TurnStatus::Cancelled => return None,
        };
        let mut turn = Turn::agent(self.text, self.chunks, self.source, self.epoch);
        turn.failed = failed;
        Some(turn)
    }
}

/// Notifications from the pipeline and delivery station to the session actor.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// First sentence of the epoch reached the outbound channel.
    FirstDelivery { epoch: u64 },
    /// The stop marker of the epoch was emitted.
    TurnEnded { epoch: u64 },
    TurnCompleted(TurnOutcome),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::state::{Speaker, SynthesisStatus};

    #[test]
    fn sentence_expands_to_metadata_then_audio() {
        let packet = OutboundPacket::Sentence {
            sentence: "Hi there.".to_string(),
            audio: Some(vec![1, 2, 3]),
        };
        assert_eq!(
            packet.into_frames(),
            vec![
                WireFrame::Text(r#"{"type":"metadata","sentence":"Hi there."}"#.to_string()),
                WireFrame::Binary(vec![1, 2, 3]),
            ]
        );
    }

    #[test]
    fn metadata_only_when_audio_missing() {
        let packet = OutboundPacket::Sentence {
            sentence: "Oops.".to_string(),
            audio: None,
        };
        let frames = packet.into_frames();
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], WireFrame::Text(t) if t.contains("metadata")));
    }

    #[test]
    fn stop_frame() {
        assert_eq!(
            OutboundPacket::Stop.into_frames(),
            vec![WireFrame::Text(r#"{"type":"stop"}"#.to_string())]
        );
    }

    #[test]
    fn outcome_into_turn() {
        let chunk = SentenceChunk {
            ordinal: 0,
            text: "Hello.".to_string(),
            status: SynthesisStatus::Ready,
            epoch: 3,
        };
        let outcome = TurnOutcome {
            epoch: 3,
            source: InputSource::Voice,
            text: "Hello.".to_string(),
            chunks: vec![chunk],
            status: TurnStatus::Completed,
        };
        let turn = outcome.clone().into_turn().unwrap();
        assert_eq!(turn.speaker, Speaker::Agent);
        assert_eq!(turn.source, InputSource::Voice);
        assert!(!turn.failed);

        let failed = TurnOutcome {
            status: TurnStatus::Failed("boom".to_string()),
            ..outcome.clone()
        };
        assert!(failed.into_turn().unwrap().failed);

        let cancelled = TurnOutcome {
            status: TurnStatus::Cancelled,
            ..outcome
        };
        assert!(cancelled.into_turn().is_none());
    }
}
