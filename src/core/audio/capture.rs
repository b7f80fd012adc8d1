//! Frame encoder forwarding captured audio to the channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{CapturedFrame, encode_frame};
use crate::core::realtime::{ChannelHandle, RealtimeError};

/// Encodes captured frames and sends them in generation order.
///
/// Sends wait for room in the channel's outbound queue, so a slow connection
/// pushes back onto the bounded capture queue instead of growing memory.
pub struct CaptureEncoder {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    sent: Arc<AtomicU64>,
}

impl CaptureEncoder {
    pub fn spawn(mut frames: mpsc::Receiver<CapturedFrame>, channel: ChannelHandle) -> Self {
        let cancel = CancellationToken::new();
        let sent = Arc::new(AtomicU64::new(0));

        let task_cancel = cancel.clone();
        let task_sent = sent.clone();
        let task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    frame = frames.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };

                let chunk = encode_frame(&frame);
                let result = tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    result = channel.send_audio(chunk) => result,
                };

                match result {
                    Ok(()) => {
                        task_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(RealtimeError::NotConnected) => {
                        tracing::debug!("Channel closed, stopping capture encoder");
                        break;
                    }
                    Err(e) => tracing::warn!("Failed to send audio chunk: {}", e),
                }
            }
            tracing::debug!("Capture encoder finished");
        });

        Self { cancel, task, sent }
    }

    /// Number of chunks handed to the channel.
    pub fn chunks_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Stop consuming frames. The frame receiver is released immediately.
    pub fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}
