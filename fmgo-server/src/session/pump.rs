//! Encoder output pump and per-listener audio streams.

use std::io;
use std::sync::Weak;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use log::{debug, info};
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::session::StreamController;

/// Pause before re-reading after an empty read from a live encoder.
const STALL_RETRY: Duration = Duration::from_millis(100);

/// Consecutive empty reads after which the encoder is treated as dead.
const MAX_STALLS: u32 = 50;

/// What the controller decided about an empty encoder read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EofVerdict {
    /// Encoder still running; retry shortly.
    Stalled,
    /// Session is gone (stopped, replaced or torn down after death).
    Finished,
}

/// Read the encoder's stdout chunk by chunk and publish it to listeners.
///
/// One pump runs per session. It ends when the session is cancelled or
/// when the controller confirms the pipeline is gone.
pub(crate) async fn run(
    controller: Weak<StreamController>,
    generation: u64,
    mut output: ChildStdout,
    tx: broadcast::Sender<Bytes>,
    cancel: CancellationToken,
    chunk_size: usize,
) {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut stalls = 0u32;

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = output.read(&mut buf) => read,
        };

        match read {
            Ok(n) if n > 0 => {
                stalls = 0;
                // Sending with no listeners is fine: the encoder still has to be drained.
                let _ = tx.send(Bytes::copy_from_slice(&buf[..n]));
            }
            other => {
                if let Err(e) = other {
                    debug!("[Session {}] Encoder read failed: {}", generation, e);
                }
                stalls += 1;
                let verdict = match controller.upgrade() {
                    Some(controller) => controller.handle_encoder_eof(generation, stalls >= MAX_STALLS).await,
                    None => EofVerdict::Finished,
                };
                if verdict == EofVerdict::Finished {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(STALL_RETRY) => {}
                }
            }
        }
    }

    debug!("[Session {}] Output pump finished", generation);
}

/// A listener's handle on the live audio.
pub struct Subscription {
    pub id: u64,
    rx: broadcast::Receiver<Bytes>,
}

impl Subscription {
    pub(crate) fn new(id: u64, rx: broadcast::Receiver<Bytes>) -> Self {
        Self { id, rx }
    }

    /// Turn the subscription into a body stream.
    ///
    /// The stream ends when the session ends. A listener that falls behind
    /// skips the chunks it missed. Dropping the stream just unsubscribes.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static {
        let guard = ListenerGuard(self.id);
        futures::stream::unfold((self.rx, guard), |(mut rx, guard)| async move {
            loop {
                match rx.recv().await {
                    Ok(chunk) => return Some((Ok::<Bytes, io::Error>(chunk), (rx, guard))),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("[Listener {}] Fell behind, skipped {} chunks", guard.0, skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }
}

struct ListenerGuard(u64);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        info!("[Listener {}] Disconnected", self.0);
    }
}
