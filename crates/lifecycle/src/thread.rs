use std::thread::ThreadId;

use crate::error::{LifecycleError, Result};

/// Explicit identity of one OS thread.
///
/// Wraps [`ThreadId`], which the standard library never reuses within a
/// process, so a key cannot alias a later thread that happens to recycle the
/// underlying OS handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadKey(ThreadId);

impl ThreadKey {
	/// Key of the calling thread.
	pub fn current() -> Self {
		Self(std::thread::current().id())
	}

	/// Key of an existing thread handle.
	pub fn of(thread: &std::thread::Thread) -> Self {
		Self(thread.id())
	}

	/// Returns true when called from the thread this key names.
	pub fn is_current(self) -> bool {
		self == Self::current()
	}
}

impl From<ThreadId> for ThreadKey {
	fn from(id: ThreadId) -> Self {
		Self(id)
	}
}

/// Fails with [`LifecycleError::CrossThreadAccess`] unless called on `expected`.
pub fn ensure_on_thread(expected: ThreadKey, operation: &'static str) -> Result<()> {
	let actual = ThreadKey::current();
	if actual == expected {
		return Ok(());
	}
	Err(LifecycleError::CrossThreadAccess { operation, expected, actual })
}
