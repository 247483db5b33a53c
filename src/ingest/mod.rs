//! Transcript ingestion: raw client audio in, interim/final transcripts out.

pub mod frame;
pub mod ingestor;

pub use frame::{AudioFrame, FrameSplitter};
pub use ingestor::{AudioInput, TranscriptEvent, TranscriptIngestor};
