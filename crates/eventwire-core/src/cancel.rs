//! Cancellation token for async operations.
//!
//! Every long-running operation (`connect`, `start`, the receive loop, the
//! accept loop) takes a [`CancellationToken`]. Tokens form a tree: cancelling
//! a token cancels all of its children, while cancelling a child leaves the
//! parent untouched. This is how a connection's receive loop observes both
//! the caller's token and the connection's own `close()`.

use std::future::Future;
use std::time::Duration;

pub use tokio_util::sync::DropGuard;

/// A cancellation token for cooperative cancellation of async operations.
///
/// Wraps [`tokio_util::sync::CancellationToken`] and adds the `Result`
/// based helpers used throughout the crate.
///
/// # Example
///
/// ```
/// use eventwire_core::cancel::CancellationToken;
///
/// let parent = CancellationToken::new();
/// let child = parent.child_token();
///
/// child.cancel();
/// assert!(!parent.is_cancelled());
///
/// let other = parent.child_token();
/// parent.cancel();
/// assert!(other.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of this token and all of its children.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Create a child token, cancelled together with this one.
    pub fn child_token(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
        }
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }

    /// Cancel this token once `delay` has elapsed.
    ///
    /// Must be called from within a tokio runtime. The timer task exits early
    /// if the token is cancelled by other means first.
    pub fn cancel_after(&self, delay: Duration) {
        let token = self.inner.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => token.cancel(),
            }
        });
    }

    /// Run `future` until it completes or this token is cancelled.
    ///
    /// If the token is already cancelled the future is never polled.
    pub async fn run_until_cancelled<F: Future>(
        &self,
        future: F,
    ) -> Result<F::Output, CancelledError> {
        tokio::select! {
            biased;
            _ = self.inner.cancelled() => Err(CancelledError),
            output = future => Ok(output),
        }
    }

    /// Check cancellation and return an error if cancelled.
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }

    /// Wrap this token in a guard that cancels it when dropped.
    pub fn drop_guard(self) -> DropGuard {
        self.inner.drop_guard()
    }
}

/// Error returned when an operation is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation was cancelled")
    }
}

impl std::error::Error for CancelledError {}

impl From<CancelledError> for crate::error::WireError {
    fn from(_: CancelledError) -> Self {
        crate::error::WireError::Cancelled
    }
}
