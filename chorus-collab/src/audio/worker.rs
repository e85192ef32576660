//! Isolated codec workers reached only through tagged commands.
//!
//! Each encoder or decoder lives on its own task and owns its codec. Callers
//! hold a handle that submits [`CodecCommand`]s over a channel; results come
//! back through a oneshot reply (encode) or an output stream (decode).
//! Dropping or closing the handle ends the worker and releases the codec.
//!
//! Workers are ordinary async tasks, one per remote player, so codecs must
//! process a chunk without blocking.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::codec::{AudioDecoder, AudioEncoder, AudioFrame, CodecError, EncodedChunk};
use crate::protocol::FrameKind;

pub enum CodecCommand {
    Encode {
        frame: AudioFrame,
        reply: oneshot::Sender<Result<Vec<EncodedChunk>, CodecError>>,
    },
    Decode {
        chunk: EncodedChunk,
    },
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodecOutput {
    Decoded(AudioFrame),
    Error(CodecError),
}

/// Tracks whether a decoder has seen a key frame since creation or reset.
#[derive(Debug, Default, Clone)]
pub struct KeyFrameGate {
    primed: bool,
}

impl KeyFrameGate {
    pub fn admit(&mut self, kind: FrameKind) -> Result<(), CodecError> {
        match kind {
            FrameKind::Key => {
                self.primed = true;
                Ok(())
            }
            FrameKind::Delta if self.primed => Ok(()),
            FrameKind::Delta => Err(CodecError::KeyFrameRequired),
        }
    }

    pub fn reset(&mut self) {
        self.primed = false;
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }
}

enum Engine {
    Encoder(Box<dyn AudioEncoder>),
    Decoder {
        decoder: Box<dyn AudioDecoder>,
        output: mpsc::UnboundedSender<CodecOutput>,
    },
}

impl Engine {
    fn handle(&mut self, command: CodecCommand) {
        match (self, command) {
            (Engine::Encoder(encoder), CodecCommand::Encode { frame, reply }) => {
                let _ = reply.send(encoder.encode(&frame));
            }
            (Engine::Decoder { decoder, output }, CodecCommand::Decode { chunk }) => {
                match decoder.decode(&chunk) {
                    Ok(frames) => {
                        for frame in frames {
                            let _ = output.send(CodecOutput::Decoded(frame));
                        }
                    }
                    Err(e) => {
                        let _ = output.send(CodecOutput::Error(e));
                    }
                }
            }
            (Engine::Decoder { decoder, .. }, CodecCommand::Reset) => decoder.reset(),
            (Engine::Encoder(_), CodecCommand::Reset) => {}
            (Engine::Decoder { .. }, CodecCommand::Encode { reply, .. }) => {
                let _ = reply.send(Err(CodecError::Codec("decoder cannot encode".into())));
            }
            (Engine::Encoder(_), CodecCommand::Decode { .. }) => {
                log::warn!("Encoder worker received a decode command, ignoring");
            }
        }
    }
}

fn spawn_worker(
    mut engine: Engine,
) -> (mpsc::UnboundedSender<CodecCommand>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<CodecCommand>();
    let task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            engine.handle(command);
        }
        log::debug!("Codec worker stopped");
    });
    (tx, task)
}

/// Handle to an encoder worker.
pub struct EncoderHandle {
    commands: mpsc::UnboundedSender<CodecCommand>,
    task: JoinHandle<()>,
}

impl EncoderHandle {
    /// Start a worker owning `encoder`. Must be called inside a tokio runtime.
    pub fn spawn(encoder: Box<dyn AudioEncoder>) -> Self {
        let (commands, task) = spawn_worker(Engine::Encoder(encoder));
        Self { commands, task }
    }

    pub async fn encode(&self, frame: AudioFrame) -> Result<Vec<EncodedChunk>, CodecError> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(CodecCommand::Encode { frame, reply })
            .map_err(|_| CodecError::Closed)?;
        result.await.map_err(|_| CodecError::Closed)?
    }

    /// Stop the worker and wait until the encoder is released.
    pub async fn close(self) -> Result<(), CodecError> {
        drop(self.commands);
        self.task
            .await
            .map_err(|e| CodecError::Codec(e.to_string()))
    }
}

/// Handle to a decoder worker.
///
/// The key-frame rule is enforced here, before a chunk crosses into the
/// worker, so a violation surfaces as an error on the submitting call.
pub struct DecoderHandle {
    commands: mpsc::UnboundedSender<CodecCommand>,
    gate: KeyFrameGate,
    task: JoinHandle<()>,
}

impl DecoderHandle {
    /// Start a worker owning `decoder`. Decoded frames and worker-side
    /// errors arrive on the returned receiver.
    pub fn spawn(
        decoder: Box<dyn AudioDecoder>,
    ) -> (Self, mpsc::UnboundedReceiver<CodecOutput>) {
        let (output, outputs) = mpsc::unbounded_channel();
        let (commands, task) = spawn_worker(Engine::Decoder { decoder, output });
        (
            Self {
                commands,
                gate: KeyFrameGate::default(),
                task,
            },
            outputs,
        )
    }

    pub fn decode(&mut self, chunk: EncodedChunk) -> Result<(), CodecError> {
        self.gate.admit(chunk.kind)?;
        self.commands
            .send(CodecCommand::Decode { chunk })
            .map_err(|_| CodecError::Closed)
    }

    pub fn reset(&mut self) -> Result<(), CodecError> {
        self.gate.reset();
        self.commands
            .send(CodecCommand::Reset)
            .map_err(|_| CodecError::Closed)
    }

    pub async fn close(self) -> Result<(), CodecError> {
        drop(self.commands);
        self.task
            .await
            .map_err(|e| CodecError::Codec(e.to_string()))
    }
}
