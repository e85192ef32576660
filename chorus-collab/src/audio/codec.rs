//! Codec collaborator traits and the built-in PCM codec.

use thiserror::Error;

use crate::protocol::FrameKind;

/// One block of mono f32 samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub timestamp: f32,
    pub duration: f32,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    /// Root-mean-square level of the frame, 0.0 for an empty frame.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum / self.samples.len() as f32).sqrt()
    }
}

/// An encoded chunk as carried by an `Audio` message.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub kind: FrameKind,
    pub timestamp: f32,
    pub duration: f32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("decoder requires a key frame after creation or reset")]
    KeyFrameRequired,

    #[error("codec worker is closed")]
    Closed,

    #[error("malformed chunk: {0}")]
    Malformed(String),

    #[error("codec failure: {0}")]
    Codec(String),
}

pub trait AudioEncoder: Send {
    /// Encode one frame into zero or more chunks.
    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<EncodedChunk>, CodecError>;
}

pub trait AudioDecoder: Send {
    fn decode(&mut self, chunk: &EncodedChunk) -> Result<Vec<AudioFrame>, CodecError>;

    /// Drop internal state; the next chunk must be a key frame.
    fn reset(&mut self);
}

/// Builds encoder and decoder instances, one per pipeline.
pub trait CodecFactory: Send + Sync {
    fn encoder(&self) -> Box<dyn AudioEncoder>;
    fn decoder(&self) -> Box<dyn AudioDecoder>;
}

/// Uncompressed little-endian f32 codec.
///
/// Emits a key chunk every `key_interval` frames so the key/delta
/// discipline is exercised end to end.
#[derive(Debug, Clone)]
pub struct PcmCodec {
    key_interval: u32,
}

impl Default for PcmCodec {
    fn default() -> Self {
        Self { key_interval: 50 }
    }
}

impl PcmCodec {
    pub fn new(key_interval: u32) -> Self {
        Self {
            key_interval: key_interval.max(1),
        }
    }
}

struct PcmEncoder {
    key_interval: u32,
    count: u32,
}

impl AudioEncoder for PcmEncoder {
    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<EncodedChunk>, CodecError> {
        let kind = if self.count % self.key_interval == 0 {
            FrameKind::Key
        } else {
            FrameKind::Delta
        };
        self.count = self.count.wrapping_add(1);
        let data = frame.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Ok(vec![EncodedChunk {
            kind,
            timestamp: frame.timestamp,
            duration: frame.duration,
            data,
        }])
    }
}

struct PcmDecoder;

impl AudioDecoder for PcmDecoder {
    fn decode(&mut self, chunk: &EncodedChunk) -> Result<Vec<AudioFrame>, CodecError> {
        if chunk.data.len() % 4 != 0 {
            return Err(CodecError::Malformed(format!(
                "{} bytes is not a whole number of samples",
                chunk.data.len()
            )));
        }
        let samples = chunk
            .data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(vec![AudioFrame {
            timestamp: chunk.timestamp,
            duration: chunk.duration,
            samples,
        }])
    }

    fn reset(&mut self) {}
}

impl CodecFactory for PcmCodec {
    fn encoder(&self) -> Box<dyn AudioEncoder> {
        Box::new(PcmEncoder {
            key_interval: self.key_interval,
            count: 0,
        })
    }

    fn decoder(&self) -> Box<dyn AudioDecoder> {
        Box::new(PcmDecoder)
    }
}
