//! Hand-off queues connecting one stage to the next.
//!
//! A queue is a bounded Tokio channel. Every blocking operation races the
//! scope's cancellation token, preferring cancellation when both are ready.
//! The queue closes when the last sender is dropped; there is no explicit close.

use crate::cancellation::CancellationToken;
use crate::errors::Result;
use tokio::sync::mpsc;

/// Creates a hand-off queue with the given capacity (at least 1).
pub(crate) fn handoff<T>(capacity: usize) -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (HandoffSender { tx }, HandoffReceiver { rx })
}

/// Producer side of a hand-off queue.
pub(crate) struct HandoffSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for HandoffSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> HandoffSender<T> {
    /// Sends a value, waiting until the consumer has room for it.
    ///
    /// Fails with a cancellation error if `token` fires first. A consumer that
    /// went away only does so while the scope is being torn down, so a closed
    /// queue also resolves to the token's cancellation error.
    pub(crate) async fn send(&self, value: T, token: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            () = token.cancelled() => Err(token.error()),
            sent = self.tx.send(value) => match sent {
                Ok(()) => Ok(()),
                Err(_) => {
                    token.cancelled().await;
                    Err(token.error())
                }
            },
        }
    }
}

/// Consumer side of a hand-off queue.
pub(crate) struct HandoffReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> HandoffReceiver<T> {
    /// Receives the next value; `Ok(None)` once every sender is gone.
    pub(crate) async fn recv(&mut self, token: &CancellationToken) -> Result<Option<T>> {
        tokio::select! {
            biased;
            () = token.cancelled() => Err(token.error()),
            value = self.rx.recv() => Ok(value),
        }
    }
}

impl<T> std::fmt::Debug for HandoffReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffReceiver")
            .field("buffered", &self.rx.len())
            .field("closed", &self.rx.is_closed())
            .finish()
    }
}
