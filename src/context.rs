//! Cancellation context for blocking storage calls
//!
//! A `Context` is cheap to clone and is passed by reference into every
//! storage call that may block. Cancelling through the `CancelHandle`
//! wakes all in-flight `Context::run` calls.

use crate::error::{CacheGraphError, CacheGraphResult};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation and deadline carried through an operation
#[derive(Debug, Clone, Default)]
pub struct Context {
    state: Arc<CancelState>,
    deadline: Option<Instant>,
}

/// Handle used to cancel a `Context` and every clone derived from it
#[derive(Debug, Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    /// Cancel the context
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// A fresh cancellable context with its handle
    pub fn with_cancel() -> (Self, CancelHandle) {
        let ctx = Self::default();
        let handle = CancelHandle {
            state: Arc::clone(&ctx.state),
        };
        (ctx, handle)
    }

    /// Derive a context sharing this cancellation that also expires after `timeout`
    ///
    /// An existing earlier deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            state: Arc::clone(&self.state),
            deadline: Some(match self.deadline {
                Some(existing) if existing < deadline => existing,
                _ => deadline,
            }),
        }
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Fail if the context is cancelled or past its deadline
    pub fn check(&self) -> CacheGraphResult<()> {
        if self.is_cancelled() {
            return Err(CacheGraphError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(CacheGraphError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Resolves once the context is cancelled
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel is not missed
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Run `fut` unless the context is cancelled or expires first
    pub async fn run<F, T>(&self, fut: F) -> CacheGraphResult<T>
    where
        F: Future<Output = CacheGraphResult<T>>,
    {
        self.check()?;

        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.cancelled() => Err(CacheGraphError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => Err(CacheGraphError::DeadlineExceeded),
                res = fut => res,
            },
            None => tokio::select! {
                biased;
                _ = self.cancelled() => Err(CacheGraphError::Cancelled),
                res = fut => res,
            },
        }
    }
}
