//! Error types for worker lifecycle and job execution.

use std::fmt;

use tether_lifecycle::{DisposeError, LifecycleError, ThreadKey};
use thiserror::Error;

/// Misuse of the startup handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandshakeMisuse {
	/// `interface_ready` was called a second time.
	#[error("interface_ready was already called")]
	AlreadyCalled,

	/// `interface_ready` was called off the thread that spawned the worker.
	#[error("interface_ready must run on the creator thread {expected:?}, called from {actual:?}")]
	WrongThread {
		/// Thread that spawned the worker.
		expected: ThreadKey,
		/// Thread that called.
		actual: ThreadKey,
	},

	/// The worker was disposed without the handshake ever happening.
	#[error("worker disposed before interface_ready was called")]
	NeverCalled,
}

/// Errors raised by worker owners and handles.
#[derive(Debug, Error)]
pub enum WorkerError {
	/// Handshake contract violation.
	#[error("handshake misuse: {0}")]
	HandshakeMisuse(#[from] HandshakeMisuse),

	/// The worker has been cancelled and no longer accepts work.
	#[error("worker is cancelled")]
	Cancelled,

	/// The execution thread could not be spawned.
	#[error("failed to spawn worker thread: {0}")]
	Spawn(#[from] std::io::Error),

	/// Thread-affinity or attachment violation.
	#[error(transparent)]
	Lifecycle(#[from] LifecycleError),

	/// Dispose watchers failed while tearing the worker down.
	#[error(transparent)]
	Dispose(#[from] DisposeError),
}

impl WorkerError {
	/// Returns true if teardown failed because disposal is forbidden.
	pub fn is_forbidden_disposal(&self) -> bool {
		match self {
			Self::Dispose(err) => err.is_forbidden(),
			Self::Lifecycle(err) => *err == LifecycleError::ForbiddenDisposal,
			_ => false,
		}
	}
}

/// Failure of one queued job or invoked callable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
	/// The handler returned an error.
	#[error("job failed: {0}")]
	Failed(String),

	/// The handler panicked.
	#[error("job panicked: {0}")]
	Panicked(String),
}

impl JobError {
	/// Message without the failure kind.
	pub fn message(&self) -> &str {
		match self {
			Self::Failed(msg) | Self::Panicked(msg) => msg,
		}
	}
}

/// Job handed back to a producer because the worker was cancelled.
#[derive(Clone, PartialEq, Eq)]
pub struct Rejected<J>(pub J);

impl<J> Rejected<J> {
	/// Returns the rejected job.
	pub fn into_inner(self) -> J {
		self.0
	}
}

impl<J> fmt::Debug for Rejected<J> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Rejected").finish_non_exhaustive()
	}
}

impl<J> fmt::Display for Rejected<J> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("worker is cancelled; job rejected")
	}
}

impl<J> std::error::Error for Rejected<J> {}
