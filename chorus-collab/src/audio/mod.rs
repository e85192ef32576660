//! Audio relay: framing encoded chunks into `Audio` messages and routing
//! received chunks to per-player decode pipelines.
//!
//! ```text
//! capture ──► EncoderHandle ──► AudioRelay::frame ──► Audio message ──► wire
//! wire ──► Audio message ──► AudioRelay::unframe ──► DecoderHandle (per player)
//! ```

pub mod capture;
pub mod codec;
pub mod worker;

use std::sync::Arc;

use chorus_core::PlayerId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::protocol::{FrameKind, WireMessage};
use codec::{CodecFactory, EncodedChunk, PcmCodec};
use worker::{CodecOutput, DecoderHandle, EncoderHandle};

pub use capture::CaptureHandle;
pub use codec::{AudioDecoder, AudioEncoder, AudioFrame, CodecError};

/// How received frame kinds are handed to decoders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFramePolicy {
    /// Pass the sender's key/delta marking through unchanged.
    #[default]
    Propagate,
    /// Mark every chunk as a key frame. Compatibility shim for decoders that
    /// cannot follow frame dependencies; a delta chunk then decodes without
    /// its reference.
    ForceKey,
}

#[derive(Clone)]
pub struct AudioRelay {
    factory: Arc<dyn CodecFactory>,
    policy: KeyFramePolicy,
}

impl std::fmt::Debug for AudioRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioRelay")
            .field("policy", &self.policy)
            .finish()
    }
}

impl Default for AudioRelay {
    fn default() -> Self {
        Self::new(Arc::new(PcmCodec::default()), KeyFramePolicy::default())
    }
}

impl AudioRelay {
    pub fn new(factory: Arc<dyn CodecFactory>, policy: KeyFramePolicy) -> Self {
        Self { factory, policy }
    }

    pub fn policy(&self) -> KeyFramePolicy {
        self.policy
    }

    /// Wrap an outgoing chunk as an `Audio` message from `id`.
    pub fn frame(&self, id: PlayerId, chunk: EncodedChunk) -> WireMessage {
        WireMessage::Audio {
            id,
            kind: chunk.kind,
            timestamp: chunk.timestamp,
            duration: chunk.duration,
            payload: chunk.data,
        }
    }

    /// Extract the chunk from a received `Audio` message, applying the
    /// key-frame policy. Returns `None` for any other message.
    pub fn unframe(&self, message: WireMessage) -> Option<(PlayerId, EncodedChunk)> {
        match message {
            WireMessage::Audio {
                id,
                kind,
                timestamp,
                duration,
                payload,
            } => {
                let kind = match self.policy {
                    KeyFramePolicy::Propagate => kind,
                    KeyFramePolicy::ForceKey => FrameKind::Key,
                };
                Some((
                    id,
                    EncodedChunk {
                        kind,
                        timestamp,
                        duration,
                        data: payload,
                    },
                ))
            }
            _ => None,
        }
    }

    /// Start a decoder worker for one remote player.
    pub fn open_decoder(&self) -> (DecoderHandle, mpsc::UnboundedReceiver<CodecOutput>) {
        DecoderHandle::spawn(self.factory.decoder())
    }

    /// Start an encoder worker for the local capture pipeline.
    pub fn open_encoder(&self) -> EncoderHandle {
        EncoderHandle::spawn(self.factory.encoder())
    }
}
