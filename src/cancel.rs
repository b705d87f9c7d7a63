//! Cooperative cancellation signal.
//!
//! Every request gets a token that is a child of the host's shutdown token.
//! It fires when the host stops or when the client goes away (hyper drops the
//! service future, which drops the [`CancelOnDrop`] guard). Hooks and engines
//! may observe it; nothing is forced to.

use std::sync::Arc;

use futures_util::future::select_all;
use tokio::sync::watch;

/// A clonable, hierarchical cancellation signal.
///
/// Cancelling a token cancels all of its children. Cancelling a child leaves
/// the parent untouched.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    own: Arc<watch::Sender<bool>>,
    // Own receiver first, then one per ancestor.
    watched: Vec<watch::Receiver<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { own: Arc::new(tx), watched: vec![rx] }
    }

    /// A token cancelled when either it or `self` is cancelled.
    pub fn child_token(&self) -> Self {
        let (tx, rx) = watch::channel(false);
        let mut watched = Vec::with_capacity(self.watched.len() + 1);
        watched.push(rx);
        watched.extend(self.watched.iter().cloned());
        Self { own: Arc::new(tx), watched }
    }

    pub fn cancel(&self) {
        self.own.send_replace(true);
    }

    /// True once this token or any ancestor is cancelled or dropped.
    pub fn is_cancelled(&self) -> bool {
        self.watched.iter().any(|rx| *rx.borrow() || rx.has_changed().is_err())
    }

    /// Resolves once this token or any ancestor is cancelled.
    ///
    /// A dropped ancestor counts as cancelled: the thing it guarded is gone.
    pub async fn cancelled(&self) {
        let waits = self.watched.iter().cloned().map(|mut rx| {
            Box::pin(async move {
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            })
        });
        select_all(waits).await;
    }

    /// Returns a guard that cancels this token when dropped.
    pub fn drop_guard(self) -> CancelOnDrop {
        CancelOnDrop(self)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels the wrapped token on drop.
#[derive(Debug)]
pub struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
