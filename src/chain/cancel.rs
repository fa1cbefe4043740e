// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Cancellation scopes
//!
//! A stage carrying a [`CancelScope`] is killed as soon as the scope fires.
//! Cancellation never spreads to sibling stages on its own: they unwind
//! through pipe closure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Cloneable cancellation handle; all clones observe the same state
#[derive(Debug, Clone)]
pub struct CancelScope {
    inner: Arc<ScopeInner>,
}

#[derive(Debug)]
struct ScopeInner {
    signal: watch::Sender<bool>,
    deadline: Option<Instant>,
}

impl CancelScope {
    /// A scope that only fires on [`CancelScope::cancel`]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A scope that also fires once `timeout` has elapsed from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout))
    }

    fn build(deadline: Option<Instant>) -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            inner: Arc::new(ScopeInner { signal, deadline }),
        }
    }

    /// Fire the scope. Idempotent.
    pub fn cancel(&self) {
        self.inner.signal.send_replace(true);
    }

    /// Whether the scope has fired, either explicitly or by deadline
    pub fn is_cancelled(&self) -> bool {
        *self.inner.signal.borrow()
            || self
                .inner
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Resolves once the scope fires
    pub async fn cancelled(&self) {
        let mut rx = self.inner.signal.subscribe();
        let explicit = async move {
            // the sender lives as long as `self`, so this only ends on cancel
            let _ = rx.wait_for(|cancelled| *cancelled).await;
        };

        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = explicit => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => explicit.await,
        }
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let scope = CancelScope::new();
        let waiter = {
            let scope = scope.clone();
            tokio::spawn(async move { scope.cancelled().await })
        };

        assert!(!scope.is_cancelled());
        scope.cancel();
        waiter.await.unwrap();
        assert!(scope.is_cancelled());
    }

    #[tokio::test]
    async fn test_timeout_fires() {
        let scope = CancelScope::with_timeout(Duration::from_millis(20));
        tokio::time::timeout(Duration::from_secs(5), scope.cancelled())
            .await
            .expect("scope should fire by deadline");
        assert!(scope.is_cancelled());
    }
}
