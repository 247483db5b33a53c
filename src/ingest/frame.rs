//! PCM framing for the recognition stream.
//!
//! Clients push raw s16le bytes in arbitrary chunk sizes; the recognizer
//! expects fixed-length frames.

use std::time::Instant;

/// Fixed-length PCM frame with metadata for tracking through the ingestor.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Sequence number for ordering frames.
    pub sequence: u64,
    /// Timestamp when the frame was assembled.
    pub timestamp: Instant,
    /// Audio samples as 16-bit PCM.
    pub samples: Vec<i16>,
}

impl AudioFrame {
    /// Creates a new audio frame.
    pub fn new(sequence: u64, samples: Vec<i16>) -> Self {
        Self {
            sequence,
            timestamp: Instant::now(),
            samples,
        }
    }

    /// Decodes little-endian 16-bit samples. A trailing odd byte is ignored.
    pub fn from_le_bytes(sequence: u64, bytes: &[u8]) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(sequence, samples)
    }

    /// Re-encodes the samples as little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Returns the duration of this frame in milliseconds.
    pub fn duration_ms(&self, sample_rate: u32) -> u32 {
        (self.samples.len() as u32 * 1000) / sample_rate
    }
}

/// Cuts a byte stream into fixed-size frames, carrying leftovers across pushes.
#[derive(Debug)]
pub struct FrameSplitter {
    frame_bytes: usize,
    pending: Vec<u8>,
    sequence: u64,
}

impl FrameSplitter {
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            frame_bytes: frame_bytes.max(2),
            pending: Vec::with_capacity(frame_bytes),
            sequence: 0,
        }
    }

    /// Appends bytes and returns every complete frame.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(bytes);
        let complete = self.pending.len() / self.frame_bytes * self.frame_bytes;
        let mut frames = Vec::with_capacity(complete / self.frame_bytes);
        for chunk in self.pending[..complete].chunks_exact(self.frame_bytes) {
            frames.push(AudioFrame::from_le_bytes(self.sequence, chunk));
            self.sequence += 1;
        }
        self.pending.drain(..complete);
        frames
    }

    /// Emits the remaining whole samples as a short frame.
    pub fn finish(&mut self) -> Option<AudioFrame> {
        let usable = self.pending.len() / 2 * 2;
        if usable == 0 {
            self.pending.clear();
            return None;
        }
        let frame = AudioFrame::from_le_bytes(self.sequence, &self.pending[..usable]);
        self.sequence += 1;
        self.pending.clear();
        Some(frame)
    }

    /// Bytes waiting for the next frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_endian_samples() {
        let frame = AudioFrame::from_le_bytes(0, &[0x01, 0x00, 0xff, 0xff, 0x00, 0x80]);
        assert_eq!(frame.samples, vec![1, -1, i16::MIN]);
        assert_eq!(frame.to_le_bytes(), vec![0x01, 0x00, 0xff, 0xff, 0x00, 0x80]);
    }

    #[test]
    fn frame_duration() {
        let frame = AudioFrame::new(0, vec![0; 160]);
        assert_eq!(frame.duration_ms(16000), 10);
    }

    #[test]
    fn splitter_carries_partial_frames() {
        let mut splitter = FrameSplitter::new(4);
        assert!(splitter.push(&[1, 0, 2]).is_empty());
        assert_eq!(splitter.pending_len(), 3);

        let frames = splitter.push(&[0, 3, 0, 4, 0, 5]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples, vec![1, 2]);
        assert_eq!(frames[1].samples, vec![3, 4]);
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[1].sequence, 1);
        assert_eq!(splitter.pending_len(), 1);
    }

    #[test]
    fn splitter_handles_multi_frame_push() {
        let mut splitter = FrameSplitter::new(320);
        let frames = splitter.push(&vec![0u8; 320 * 3 + 10]);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.samples.len() == 160));
        assert_eq!(splitter.pending_len(), 10);
    }

    #[test]
    fn finish_flushes_whole_samples_only() {
        let mut splitter = FrameSplitter::new(8);
        splitter.push(&[7, 0, 8, 0, 9]);
        let tail = splitter.finish().unwrap();
        assert_eq!(tail.samples, vec![7, 8]);
        assert_eq!(splitter.pending_len(), 0);
        assert!(splitter.finish().is_none());
    }
}
