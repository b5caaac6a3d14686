//! Error types for lifecycle contract violations.

use thiserror::Error;

use crate::dispose::WatcherId;
use crate::thread::ThreadKey;

/// Errors raised by delegates, dispose signals and resource registries.
///
/// Everything except the watcher variants reports a bug in the caller and is
/// returned immediately without side effects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
	/// A method was bound to a receiver of the wrong runtime type.
	#[error("cannot bind method on `{expected}` to this receiver")]
	InvalidBinding {
		/// Receiver type the method expects.
		expected: &'static str,
	},

	/// A static delegate was requested for a callable that has a receiver.
	#[error("callable has a receiver and cannot be used as a static delegate")]
	NotStatic,

	/// A dispose watcher id is not currently registered.
	#[error("unknown dispose watcher {0:?}")]
	UnknownWatcher(WatcherId),

	/// The thread already has a dispose owner, or its slot was already consumed.
	#[error("thread {thread:?} is already attached to a dispose owner")]
	AlreadyAttached {
		/// Thread that was attached twice.
		thread: ThreadKey,
	},

	/// Resources were tracked on a thread without a live dispose owner.
	#[error("thread {thread:?} has no dispose owner; attach one before tracking resources")]
	NotAttached {
		/// Thread that tried to track.
		thread: ThreadKey,
	},

	/// A thread-affine operation was called from the wrong thread.
	#[error("{operation} must run on thread {expected:?}, called from {actual:?}")]
	CrossThreadAccess {
		/// Operation name.
		operation: &'static str,
		/// Thread that owns the operation.
		expected: ThreadKey,
		/// Thread that called it.
		actual: ThreadKey,
	},

	/// Thread resources were released while disposal is globally forbidden.
	#[error("thread disposed while disposal is forbidden")]
	ForbiddenDisposal,

	/// A dispose watcher reported a failure.
	#[error("dispose watcher failed: {0}")]
	WatcherFailed(String),

	/// A dispose watcher panicked.
	#[error("dispose watcher panicked: {0}")]
	WatcherPanicked(String),
}

/// One failed watcher collected during [`DisposeSignal::dispose`](crate::DisposeSignal::dispose).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherFailure {
	/// Watcher that failed.
	pub id: WatcherId,
	/// What it reported.
	pub error: LifecycleError,
}

/// Aggregate of every watcher failure from one disposal.
///
/// Watchers keep running after a failure; the failures are returned together
/// once the whole set has run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} dispose watcher(s) failed; first: {}", .failures.len(), first_message(.failures))]
pub struct DisposeError {
	/// Failures in registration order.
	pub failures: Vec<WatcherFailure>,
}

impl DisposeError {
	/// Returns true if any watcher refused to run because disposal is forbidden.
	pub fn is_forbidden(&self) -> bool {
		self.failures.iter().any(|f| f.error == LifecycleError::ForbiddenDisposal)
	}
}

fn first_message(failures: &[WatcherFailure]) -> String {
	failures.first().map(|f| f.error.to_string()).unwrap_or_default()
}

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;
