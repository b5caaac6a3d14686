//! Process-wide table of thread dispose owners.
//!
//! [`attach`] binds one [`DisposeSignal`] to a thread for every
//! [`ResourceRegistry`](crate::ResourceRegistry) in the process, including
//! registries created later: their per-thread slot is created on the first
//! `track`. Disposing the signal releases the thread's slots in all of them.
//!
//! Lock order: a registry's slot lock may be held while this table is
//! consulted, never the other way around.

use std::collections::HashMap;
use std::sync::{LazyLock, Weak};

use parking_lot::Mutex;

use crate::config::ensure_disposal_permitted;
use crate::dispose::DisposeSignal;
use crate::error::{LifecycleError, Result};
use crate::thread::{ThreadKey, ensure_on_thread};

/// Type-erased view of a registry used for thread teardown.
pub(crate) trait ThreadResources: Send + Sync {
	/// Registry name for logs.
	fn name(&self) -> &str;

	/// Returns true if the registry holds any slot (live or released) for `thread`.
	fn has_slot(&self, thread: ThreadKey) -> bool;

	/// Releases the slot created through the thread scope, returning how many
	/// resources were freed.
	fn release_scoped(&self, thread: ThreadKey) -> usize;

	/// Marks the scope-created slot released while keeping its resources.
	fn seal_scoped(&self, thread: ThreadKey);

	/// Drops an emptied, released slot of an exited thread.
	fn forget(&self, thread: ThreadKey) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeState {
	Attached,
	Released,
}

#[derive(Default)]
struct ScopeTable {
	threads: HashMap<ThreadKey, ScopeState>,
	registries: Vec<Weak<dyn ThreadResources>>,
}

static SCOPES: LazyLock<Mutex<ScopeTable>> = LazyLock::new(|| Mutex::new(ScopeTable::default()));

/// Enrolls a registry so thread teardown reaches it.
pub(crate) fn enroll(registry: Weak<dyn ThreadResources>) {
	let mut table = SCOPES.lock();
	table.registries.retain(|r| r.strong_count() > 0);
	table.registries.push(registry);
}

fn live_registries() -> Vec<std::sync::Arc<dyn ThreadResources>> {
	SCOPES.lock().registries.iter().filter_map(Weak::upgrade).collect()
}

/// Binds `signal` as the dispose owner of `thread` for every registry.
///
/// Must be called on `thread` itself. A thread gets exactly one owner for its
/// lifetime: once the owner has been disposed the thread cannot attach again.
///
/// # Errors
///
/// * [`LifecycleError::CrossThreadAccess`] off `thread`.
/// * [`LifecycleError::AlreadyAttached`] if the thread already has (or had) a
///   scope, or a registry was attached for it directly.
/// * Whatever the release fails with if `signal` is already disposed.
pub fn attach(thread: ThreadKey, signal: &DisposeSignal) -> Result<()> {
	ensure_on_thread(thread, "scope::attach")?;

	if let Some(registry) = live_registries().into_iter().find(|r| r.has_slot(thread)) {
		tracing::debug!(?thread, registry = registry.name(), "lifecycle.scope.clobber");
		return Err(LifecycleError::AlreadyAttached { thread });
	}

	{
		let mut table = SCOPES.lock();
		if table.threads.contains_key(&thread) {
			return Err(LifecycleError::AlreadyAttached { thread });
		}
		table.threads.insert(thread, ScopeState::Attached);
	}

	signal.on_dispose_fallible(move || release(thread))?;
	tracing::debug!(?thread, "lifecycle.scope.attach");
	Ok(())
}

/// Returns true while `thread` has a scope that has not been released.
pub fn is_attached(thread: ThreadKey) -> bool {
	SCOPES.lock().threads.get(&thread) == Some(&ScopeState::Attached)
}

/// Returns true once the scope of `thread` has released its resources.
pub fn is_released(thread: ThreadKey) -> bool {
	SCOPES.lock().threads.get(&thread) == Some(&ScopeState::Released)
}

/// Drops the released scope of `thread` and its emptied registry slots.
///
/// Only call this once `thread` has exited: the tombstone is what keeps a live
/// thread from attaching a second owner. Slots still holding resources are
/// kept. Returns whether a scope entry was removed.
pub fn forget(thread: ThreadKey) -> bool {
	if thread.is_current() {
		return false;
	}
	{
		let mut table = SCOPES.lock();
		if table.threads.get(&thread) != Some(&ScopeState::Released) {
			return false;
		}
		table.threads.remove(&thread);
	}

	let mut slots = 0usize;
	for registry in live_registries() {
		if registry.forget(thread) {
			slots = slots.wrapping_add(1);
		}
	}
	tracing::trace!(?thread, slots, "lifecycle.scope.forget");
	true
}

fn release(thread: ThreadKey) -> Result<()> {
	SCOPES.lock().threads.insert(thread, ScopeState::Released);

	if let Err(err) = ensure_disposal_permitted() {
		for registry in live_registries() {
			registry.seal_scoped(thread);
		}
		return Err(err);
	}

	let mut released = 0usize;
	for registry in live_registries() {
		released = released.wrapping_add(registry.release_scoped(thread));
	}
	tracing::debug!(?thread, released, "lifecycle.scope.release");
	Ok(())
}
