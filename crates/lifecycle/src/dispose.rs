use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DisposeError, LifecycleError, Result, WatcherFailure};
use crate::panic::panic_message;
use crate::scope;
use crate::thread::ThreadKey;

/// Identifier returned by [`DisposeSignal::on_dispose`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

type Watcher = Box<dyn FnOnce() -> Result<()> + Send>;

struct SignalState {
	disposed: bool,
	next_id: u64,
	/// Ids are handed out monotonically, so key order is registration order.
	watchers: BTreeMap<WatcherId, Watcher>,
}

struct SignalInner {
	state: Mutex<SignalState>,
}

impl SignalInner {
	fn fire(&self) -> std::result::Result<(), DisposeError> {
		let watchers = {
			let mut state = self.state.lock();
			if state.disposed {
				return Ok(());
			}
			state.disposed = true;
			std::mem::take(&mut state.watchers)
		};

		tracing::debug!(watchers = watchers.len(), "lifecycle.dispose");

		let mut failures = Vec::new();
		for (id, watcher) in watchers {
			if let Err(error) = run_watcher(watcher) {
				tracing::warn!(?id, %error, "lifecycle.dispose.watcher_failed");
				failures.push(WatcherFailure { id, error });
			}
		}

		if failures.is_empty() { Ok(()) } else { Err(DisposeError { failures }) }
	}
}

impl Drop for SignalInner {
	fn drop(&mut self) {
		if self.state.get_mut().disposed {
			return;
		}
		// Last handle went away without an explicit dispose.
		if let Err(err) = self.fire() {
			tracing::warn!(%err, "lifecycle.dispose.finalizer_failed");
		}
	}
}

fn run_watcher(watcher: Watcher) -> Result<()> {
	match std::panic::catch_unwind(AssertUnwindSafe(watcher)) {
		Ok(result) => result,
		Err(payload) => Err(LifecycleError::WatcherPanicked(panic_message(payload.as_ref()))),
	}
}

/// One-shot, multi-watcher teardown notification.
///
/// Cloning yields another handle to the same signal. [`dispose`](Self::dispose)
/// flips the signal exactly once and runs every registered watcher in
/// registration order on the disposing thread. A watcher registered after that
/// runs immediately on the registering thread.
///
/// If every handle is dropped without an explicit `dispose`, the signal fires
/// from `Drop` and failures are only logged. That path exists as a safety net;
/// deterministic teardown requires calling `dispose`. Watchers that capture a
/// clone of their own signal keep it alive and will never be finalized.
#[derive(Clone)]
pub struct DisposeSignal {
	inner: Arc<SignalInner>,
}

impl Default for DisposeSignal {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for DisposeSignal {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("DisposeSignal")
			.field("disposed", &state.disposed)
			.field("watchers", &state.watchers.len())
			.finish()
	}
}

impl DisposeSignal {
	/// Creates an undisposed signal with no watchers.
	pub fn new() -> Self {
		Self {
			inner: Arc::new(SignalInner {
				state: Mutex::new(SignalState {
					disposed: false,
					next_id: 0,
					watchers: BTreeMap::new(),
				}),
			}),
		}
	}

	/// Registers a one-shot callback run on disposal.
	///
	/// On an already disposed signal the callback runs before this returns; a
	/// panic from it is logged rather than propagated.
	pub fn on_dispose(&self, callback: impl FnOnce() + Send + 'static) -> WatcherId {
		let (id, late) = self.register(Box::new(move || {
			callback();
			Ok(())
		}));
		if let Some(Err(error)) = late {
			tracing::warn!(?id, %error, "lifecycle.dispose.late_watcher_failed");
		}
		id
	}

	/// Registers a callback that may fail.
	///
	/// On an already disposed signal the callback runs before this returns and
	/// its failure is returned here.
	pub fn on_dispose_fallible(&self, callback: impl FnOnce() -> Result<()> + Send + 'static) -> Result<WatcherId> {
		let (id, late) = self.register(Box::new(callback));
		match late {
			Some(Err(error)) => Err(error),
			_ => Ok(id),
		}
	}

	fn register(&self, watcher: Watcher) -> (WatcherId, Option<Result<()>>) {
		let mut state = self.inner.state.lock();
		let id = WatcherId(state.next_id);
		state.next_id = state.next_id.wrapping_add(1);
		if state.disposed {
			drop(state);
			return (id, Some(run_watcher(watcher)));
		}
		state.watchers.insert(id, watcher);
		(id, None)
	}

	/// Unregisters a pending watcher.
	///
	/// # Errors
	///
	/// [`LifecycleError::UnknownWatcher`] if `id` is not currently registered,
	/// which includes watchers that already fired.
	pub fn off_dispose(&self, id: WatcherId) -> Result<()> {
		match self.inner.state.lock().watchers.remove(&id) {
			Some(_) => Ok(()),
			None => Err(LifecycleError::UnknownWatcher(id)),
		}
	}

	/// Returns whether [`dispose`](Self::dispose) has started.
	pub fn is_disposed(&self) -> bool {
		self.inner.state.lock().disposed
	}

	/// Number of watchers still waiting to fire.
	pub fn watcher_count(&self) -> usize {
		self.inner.state.lock().watchers.len()
	}

	/// Disposes the signal. Only the first call does anything.
	///
	/// # Errors
	///
	/// Every watcher runs even if earlier ones fail or panic; the failures are
	/// returned together afterwards.
	pub fn dispose(&self) -> std::result::Result<(), DisposeError> {
		self.inner.fire()
	}

	/// Returns true if both handles refer to the same signal.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

/// Dispose owner for the current thread's resources.
///
/// Attaches a fresh [`DisposeSignal`] to the calling thread's scope so that
/// every [`ResourceRegistry`](crate::ResourceRegistry) may track resources for
/// it. Disposing (or dropping) the guard releases them all. Wrap the whole body
/// of a thread in one guard.
#[derive(Debug)]
pub struct ThreadGuard {
	signal: DisposeSignal,
	thread: ThreadKey,
}

impl ThreadGuard {
	/// Attaches a new guard to the calling thread.
	///
	/// # Errors
	///
	/// [`LifecycleError::AlreadyAttached`] if the thread already has a dispose
	/// owner.
	pub fn attach_current() -> Result<Self> {
		let signal = DisposeSignal::new();
		let thread = ThreadKey::current();
		scope::attach(thread, &signal)?;
		Ok(Self { signal, thread })
	}

	/// Signal that releases this thread's resources.
	pub fn signal(&self) -> &DisposeSignal {
		&self.signal
	}

	/// Thread this guard owns.
	pub fn thread(&self) -> ThreadKey {
		self.thread
	}

	/// Releases the thread's resources now.
	pub fn dispose(&self) -> std::result::Result<(), DisposeError> {
		self.signal.dispose()
	}
}

impl Drop for ThreadGuard {
	fn drop(&mut self) {
		if let Err(err) = self.signal.dispose() {
			tracing::warn!(thread = ?self.thread, %err, "lifecycle.thread_guard.drop_failed");
		}
	}
}
