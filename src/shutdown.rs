// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Cooperative shutdown signalling.
//!
//! A [`ShutdownToken`] ties the lifetime of a set of background resources
//! (KMS connection pools, probe tasks) to a single cancel switch. Tokens
//! form a tree: [`ShutdownToken::child`] derives a token that is cancelled
//! whenever its parent is, while cancelling the child leaves the parent
//! untouched. Each configuration reload builds its transformers under a
//! child of the server's token, so a failed attempt can be torn down on its
//! own and server shutdown still reaches every attempt in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
    }
}

/// A cloneable cancellation handle.
///
/// Cancelling is idempotent, wakes every task currently waiting in
/// [`ShutdownToken::cancelled`], and propagates to every token derived via
/// [`ShutdownToken::child`].
#[derive(Clone)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

impl ShutdownToken {
    /// Creates a new, un-cancelled root token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Derives a token that is cancelled whenever this token is cancelled.
    ///
    /// Cancelling the child does not affect the parent. A child derived
    /// from an already-cancelled token starts out cancelled.
    pub fn child(&self) -> ShutdownToken {
        let child = ShutdownToken::new();
        {
            let mut children = self.inner.children.lock();
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        // A cancel that raced the registration above may have walked the
        // list before the new entry landed; the flag check closes the gap.
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    /// Signals cancellation, here and in every derived child.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Returns true once this token (or an ancestor) has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            // Register with the notifier before re-checking the flag so a
            // cancel landing in between is never missed.
            let mut notified = std::pin::pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
