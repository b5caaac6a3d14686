use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::ensure_disposal_permitted;
use crate::dispose::DisposeSignal;
use crate::error::{LifecycleError, Result};
use crate::scope::{self, ThreadResources};
use crate::thread::{ThreadKey, ensure_on_thread};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attachment {
	/// Attached through [`ResourceRegistry::attach`].
	Signal,
	/// Created lazily for a thread holding a process-wide scope.
	Scope,
	/// Released; the slot can no longer track.
	Released,
}

struct Slot<T> {
	attachment: Attachment,
	resources: Vec<T>,
}

/// Per-thread resource slots for one resource category.
///
/// Each thread tracks its own resources; the `release` function frees them all
/// when the thread's dispose owner fires. A thread must have an owner before
/// it can track anything, either through [`attach`](Self::attach) on this
/// registry or through [`scope::attach`] for every registry at once.
///
/// Slots are mutated only by their owning thread, with one exception: the
/// release runs on whichever thread disposes the owner. A worker disposed
/// from its creator therefore frees the worker thread's resources on the
/// creator thread.
pub struct ResourceRegistry<T> {
	name: String,
	release: Box<dyn Fn(T) + Send + Sync>,
	slots: Mutex<HashMap<ThreadKey, Slot<T>>>,
}

impl<T> fmt::Debug for ResourceRegistry<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResourceRegistry")
			.field("name", &self.name)
			.field("threads", &self.slots.lock().len())
			.finish_non_exhaustive()
	}
}

impl<T> ResourceRegistry<T>
where
	T: Send + 'static,
{
	/// Creates a registry and enrolls it in the process-wide scope table.
	///
	/// Registries are meant to live as long as the resource category: keep the
	/// returned `Arc` in a `static` or in long-lived state.
	pub fn new(name: impl Into<String>, release: impl Fn(T) + Send + Sync + 'static) -> Arc<Self> {
		let registry = Arc::new(Self {
			name: name.into(),
			release: Box::new(release),
			slots: Mutex::new(HashMap::new()),
		});
		let erased: Weak<dyn ThreadResources> = Arc::downgrade(&registry) as Weak<dyn ThreadResources>;
		scope::enroll(erased);
		registry
	}

	/// Registry name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Binds `signal` as the dispose owner of `thread` for this registry.
	///
	/// # Errors
	///
	/// * [`LifecycleError::CrossThreadAccess`] off `thread`.
	/// * [`LifecycleError::AlreadyAttached`] if `thread` already has an owner here
	///   or a process-wide scope, or its slot was already released.
	/// * Whatever the release fails with if `signal` is already disposed.
	pub fn attach(self: &Arc<Self>, thread: ThreadKey, signal: &DisposeSignal) -> Result<()> {
		ensure_on_thread(thread, "ResourceRegistry::attach")?;
		if scope::is_attached(thread) || scope::is_released(thread) {
			return Err(LifecycleError::AlreadyAttached { thread });
		}

		{
			let mut slots = self.slots.lock();
			if slots.contains_key(&thread) {
				return Err(LifecycleError::AlreadyAttached { thread });
			}
			slots.insert(
				thread,
				Slot {
					attachment: Attachment::Signal,
					resources: Vec::new(),
				},
			);
		}

		let registry = Arc::downgrade(self);
		signal.on_dispose_fallible(move || {
			let registry = registry.upgrade();
			if let Err(err) = ensure_disposal_permitted() {
				// The owner is gone either way; nothing may be tracked after it.
				if let Some(registry) = registry {
					registry.seal(thread);
				}
				return Err(err);
			}
			if let Some(registry) = registry {
				registry.release_all(thread);
			}
			Ok(())
		})?;
		tracing::debug!(registry = %self.name, ?thread, "lifecycle.resource.attach");
		Ok(())
	}

	/// Adds `resource` to the slot of `thread`.
	///
	/// # Errors
	///
	/// * [`LifecycleError::CrossThreadAccess`] off `thread`.
	/// * [`LifecycleError::NotAttached`] if `thread` has no live dispose owner,
	///   including after its slot was released.
	pub fn track(&self, thread: ThreadKey, resource: T) -> Result<()> {
		ensure_on_thread(thread, "ResourceRegistry::track")?;

		let mut slots = self.slots.lock();
		match slots.get_mut(&thread) {
			Some(slot) if slot.attachment != Attachment::Released => slot.resources.push(resource),
			Some(_) => return Err(LifecycleError::NotAttached { thread }),
			None => {
				// Checked under the slot lock so a concurrent scope release
				// either sees this slot or makes us fail here.
				if !scope::is_attached(thread) {
					return Err(LifecycleError::NotAttached { thread });
				}
				slots.insert(
					thread,
					Slot {
						attachment: Attachment::Scope,
						resources: vec![resource],
					},
				);
			}
		}

		tracing::trace!(registry = %self.name, ?thread, "lifecycle.resource.track");
		Ok(())
	}

	/// Removes the first tracked resource equal to `resource`.
	///
	/// Returns whether anything was removed; an untracked resource is not an
	/// error, so callers cleaning up early need no presence check.
	///
	/// # Errors
	///
	/// [`LifecycleError::CrossThreadAccess`] off `thread`.
	pub fn untrack(&self, thread: ThreadKey, resource: &T) -> Result<bool>
	where
		T: PartialEq,
	{
		ensure_on_thread(thread, "ResourceRegistry::untrack")?;

		let mut slots = self.slots.lock();
		let Some(slot) = slots.get_mut(&thread) else {
			return Ok(false);
		};
		let Some(pos) = slot.resources.iter().position(|r| r == resource) else {
			return Ok(false);
		};
		slot.resources.remove(pos);
		tracing::trace!(registry = %self.name, ?thread, "lifecycle.resource.untrack");
		Ok(true)
	}

	/// Releases every resource of `thread` in track order and consumes its slot.
	///
	/// Normally driven by the dispose owner. Returns how many resources were
	/// released; later calls release nothing.
	pub fn release_all(&self, thread: ThreadKey) -> usize {
		let resources = {
			let mut slots = self.slots.lock();
			let slot = slots.entry(thread).or_insert_with(|| Slot {
				attachment: Attachment::Released,
				resources: Vec::new(),
			});
			slot.attachment = Attachment::Released;
			std::mem::take(&mut slot.resources)
		};
		self.release_taken(thread, resources)
	}

	/// Consumes the slot of `thread` without releasing what it holds.
	fn seal(&self, thread: ThreadKey) {
		let mut slots = self.slots.lock();
		let slot = slots.entry(thread).or_insert_with(|| Slot {
			attachment: Attachment::Released,
			resources: Vec::new(),
		});
		slot.attachment = Attachment::Released;
		tracing::debug!(registry = %self.name, ?thread, kept = slot.resources.len(), "lifecycle.resource.seal");
	}

	/// Drops the emptied, released slot of `thread`.
	///
	/// Only call this once `thread` has exited; until then the slot is what
	/// keeps the thread from attaching again. Slots still holding resources,
	/// such as those kept by a forbidden disposal, are left in place. Returns
	/// whether a slot was removed.
	pub fn forget(&self, thread: ThreadKey) -> bool {
		let mut slots = self.slots.lock();
		let removable = slots
			.get(&thread)
			.is_some_and(|slot| slot.attachment == Attachment::Released && slot.resources.is_empty());
		if removable {
			slots.remove(&thread);
		}
		removable
	}

	fn release_taken(&self, thread: ThreadKey, resources: Vec<T>) -> usize {
		let count = resources.len();
		for resource in resources {
			(self.release)(resource);
		}
		tracing::debug!(
			registry = %self.name,
			?thread,
			released = count,
			on_owner = thread.is_current(),
			"lifecycle.resource.release"
		);
		count
	}

	/// Returns true if `thread` can currently track resources here.
	pub fn is_attached(&self, thread: ThreadKey) -> bool {
		match self.slots.lock().get(&thread) {
			Some(slot) => slot.attachment != Attachment::Released,
			None => scope::is_attached(thread),
		}
	}

	/// Number of threads holding a slot here, live or released.
	pub fn thread_count(&self) -> usize {
		self.slots.lock().len()
	}

	/// Number of resources tracked for `thread`. Callable from any thread.
	pub fn tracked_len(&self, thread: ThreadKey) -> usize {
		self.slots.lock().get(&thread).map_or(0, |slot| slot.resources.len())
	}

	/// Snapshot of the resources tracked for `thread`. Callable from any thread.
	pub fn tracked(&self, thread: ThreadKey) -> Vec<T>
	where
		T: Clone,
	{
		self.slots.lock().get(&thread).map(|slot| slot.resources.clone()).unwrap_or_default()
	}
}

impl<T> ThreadResources for ResourceRegistry<T>
where
	T: Send + 'static,
{
	fn name(&self) -> &str {
		&self.name
	}

	fn has_slot(&self, thread: ThreadKey) -> bool {
		self.slots.lock().contains_key(&thread)
	}

	fn seal_scoped(&self, thread: ThreadKey) {
		let mut slots = self.slots.lock();
		if let Some(slot) = slots.get_mut(&thread) {
			if slot.attachment == Attachment::Scope {
				slot.attachment = Attachment::Released;
			}
		}
	}

	fn forget(&self, thread: ThreadKey) -> bool {
		ResourceRegistry::forget(self, thread)
	}

	fn release_scoped(&self, thread: ThreadKey) -> usize {
		let resources = {
			let mut slots = self.slots.lock();
			match slots.get_mut(&thread) {
				Some(slot) if slot.attachment == Attachment::Scope => {
					slot.attachment = Attachment::Released;
					std::mem::take(&mut slot.resources)
				}
				_ => return 0,
			}
		};
		self.release_taken(thread, resources)
	}
}
