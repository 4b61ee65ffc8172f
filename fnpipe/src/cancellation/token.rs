//! Cancellation token for cooperative cancellation.

use crate::errors::PipelineError;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::warn;

/// A callback type for cancellation notifications. Receives the reason.
pub type CancelCallback = Box<dyn FnOnce(&str) + Send>;

struct TokenState {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
    /// Wakes tasks parked in [`CancellationToken::cancelled`].
    notify: Notify,
    /// Callbacks to invoke on cancellation, in registration order.
    callbacks: Mutex<BTreeMap<u64, CancelCallback>>,
    /// Id handed to the next registered callback.
    next_callback: AtomicU64,
    /// The parent's state and the id of our entry in its callbacks.
    parent: Option<(Weak<TokenState>, u64)>,
}

impl TokenState {
    fn new(parent: Option<(Weak<TokenState>, u64)>) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            reason: RwLock::new(None),
            notify: Notify::new(),
            callbacks: Mutex::new(BTreeMap::new()),
            next_callback: AtomicU64::new(0),
            parent,
        }
    }

    fn next_id(&self) -> u64 {
        self.next_callback.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for TokenState {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Drop for TokenState {
    fn drop(&mut self) {
        // A dropped child must not stay registered on a long-lived parent.
        if let Some((parent, id)) = self.parent.take() {
            if let Some(parent) = parent.upgrade() {
                parent.callbacks.lock().remove(&id);
            }
        }
    }
}

/// A token for cooperative cancellation.
///
/// Clones share the same state. Cancellation is idempotent - only the first
/// cancellation reason is kept. Tokens created with [`child_token`] are
/// cancelled together with their parent, but never cancel it.
///
/// [`child_token`]: CancellationToken::child_token
#[derive(Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that is cancelled whenever `self` is, with the parent's reason.
    ///
    /// If `self` is already cancelled the child starts out cancelled. The
    /// link is removed from `self` once every clone of the child is dropped.
    #[must_use]
    pub fn child_token(&self) -> Self {
        let id = self.state.next_id();
        let child = Self {
            state: Arc::new(TokenState::new(Some((Arc::downgrade(&self.state), id)))),
        };
        let weak = Arc::downgrade(&child.state);
        self.register(
            id,
            Box::new(move |reason| {
                if let Some(state) = weak.upgrade() {
                    Self { state }.cancel(reason);
                }
            }),
        );
        child
    }

    /// Requests cancellation with a reason.
    ///
    /// This is idempotent - only the first reason is kept.
    /// Callbacks are invoked immediately. Panics in callbacks are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut slot = self.state.reason.write();
            if slot.is_some() {
                return;
            }
            *slot = Some(reason.clone());
            self.state.cancelled.store(true, Ordering::SeqCst);
        }

        self.state.notify.notify_waiters();

        let callbacks = std::mem::take(&mut *self.state.callbacks.lock());
        for callback in callbacks.into_values() {
            invoke(callback, &reason);
        }
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        self.register(self.state.next_id(), Box::new(callback));
    }

    fn register(&self, id: u64, callback: CancelCallback) {
        let mut callbacks = self.state.callbacks.lock();
        if !self.is_cancelled() {
            callbacks.insert(id, callback);
            return;
        }
        drop(callbacks);

        let reason = self.reason().unwrap_or_default();
        invoke(callback, &reason);
    }

    /// Number of callbacks still waiting for cancellation.
    #[cfg(test)]
    pub(crate) fn pending_callbacks(&self) -> usize {
        self.state.callbacks.lock().len()
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.state.reason.read().clone()
    }

    /// Waits until the token is cancelled.
    ///
    /// Returns immediately if cancellation was already requested.
    pub async fn cancelled(&self) {
        let notified = self.state.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel can't slip between.
        notified.as_mut().enable();

        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Builds the error a worker returns when it observes this token cancelled.
    #[must_use]
    pub fn error(&self) -> PipelineError {
        PipelineError::cancelled(self.reason().unwrap_or_else(|| "cancelled".to_string()))
    }
}

fn invoke(callback: CancelCallback, reason: &str) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        callback(reason);
    })) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
