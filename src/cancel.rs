//! Cancellation (§5).
//!
//! Every long-lived object (listener, connection, timer, retry task) exposes
//! an idempotent `cancel`. We build that on top of [`tokio_util`]'s
//! [`CancellationToken`], which is already cooperative-cancellation shaped:
//! `cancel()` is idempotent and cheap to call from any task, and
//! `cancelled()` is awaitable from a `tokio::select!` arm.

pub use tokio_util::sync::CancellationToken;

/// Creates a fresh, uncancelled token.
#[must_use]
pub fn new_token() -> CancellationToken {
    CancellationToken::new()
}
