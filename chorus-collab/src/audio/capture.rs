//! Capture → encode → send pull loop.
//!
//! The loop owns the capture source and the encoder for its whole life and
//! releases both when it exits, whether it was stopped, the source ended,
//! the sink refused a chunk or the encoder failed.

use futures_util::{Stream, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::codec::{AudioFrame, CodecError, EncodedChunk};
use super::worker::EncoderHandle;

/// A running capture loop.
pub struct CaptureHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<u64>,
}

impl CaptureHandle {
    /// Start pulling frames from `source`. Each encoded chunk is handed to
    /// `send`; returning `false` ends the loop.
    pub fn start<S, F>(source: S, encoder: EncoderHandle, send: F) -> Self
    where
        S: Stream<Item = AudioFrame> + Send + Unpin + 'static,
        F: FnMut(EncodedChunk) -> bool + Send + 'static,
    {
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(pull_loop(source, encoder, send, stop_rx));
        Self { stop, task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Request a stop and wait for the loop to release its resources.
    /// Returns the number of frames that were encoded.
    pub async fn stop(self) -> Result<u64, CodecError> {
        let _ = self.stop.send(());
        self.task.await.map_err(|e| CodecError::Codec(e.to_string()))
    }
}

async fn pull_loop<S, F>(
    mut source: S,
    encoder: EncoderHandle,
    mut send: F,
    mut stop: oneshot::Receiver<()>,
) -> u64
where
    S: Stream<Item = AudioFrame> + Send + Unpin + 'static,
    F: FnMut(EncodedChunk) -> bool + Send + 'static,
{
    let mut frames = 0u64;
    'pull: loop {
        let frame = tokio::select! {
            biased;
            _ = &mut stop => break,
            next = source.next() => match next {
                Some(frame) => frame,
                None => {
                    log::debug!("Capture source ended");
                    break;
                }
            },
        };

        match encoder.encode(frame).await {
            Ok(chunks) => {
                frames += 1;
                for chunk in chunks {
                    if !send(chunk) {
                        log::debug!("Capture sink closed");
                        break 'pull;
                    }
                }
            }
            Err(e) => {
                log::warn!("Audio encode failed, stopping capture: {e}");
                break;
            }
        }
    }

    drop(source);
    if let Err(e) = encoder.close().await {
        log::warn!("Encoder did not shut down cleanly: {e}");
    }
    log::debug!("Capture stopped after {frames} frames");
    frames
}
