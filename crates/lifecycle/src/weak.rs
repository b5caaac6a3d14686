//! Bound-method delegates that do not keep their receiver alive.
//!
//! A [`Delegate`] is the strong form: a receiver `Arc<C>` plus a method
//! `fn(&C, A)`, or a receiver-less `fn(A)`. The weak forms hold a [`Weak`]
//! to the receiver and report `false` from [`WeakAction::call`] once every
//! strong owner is gone.
//!
//! Multiple arguments are passed as a tuple; no arguments is `()`.
//! Receivers mutate through interior mutability since methods take `&C`.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::{LifecycleError, Result};

/// Erased interface shared by every weak delegate flavor.
pub trait WeakAction<A = ()>: Send + Sync {
	/// Invokes the method if the receiver is still alive.
	///
	/// Returns `false`, without invoking anything, once the receiver is gone.
	fn call(&self, arg: A) -> bool;

	/// Returns whether the receiver was alive at the time of the check.
	///
	/// The answer can be stale by the time the caller acts on it; `call`
	/// re-checks on its own.
	fn is_alive(&self) -> bool;

	/// Recovers the original strong delegate while something else still owns it.
	fn try_get_strong_ref(&self) -> Option<Arc<Delegate<A>>>;
}

type Downgrade<A> = dyn Fn(&Arc<Delegate<A>>) -> Box<dyn WeakAction<A>> + Send + Sync;

enum Target<A: 'static> {
	Static(fn(A)),
	Bound {
		receiver: Arc<dyn Any + Send + Sync>,
		/// The `fn(&C, A)` the delegate was built from, for typed rebinding.
		method: Box<dyn Any + Send + Sync>,
		invoke: Box<dyn Fn(A) + Send + Sync>,
		/// Built where `C` is statically known, so the untyped factory needs
		/// no type inspection.
		downgrade: Box<Downgrade<A>>,
	},
}

/// Strong bound callable: the owning counterpart of the weak delegates.
///
/// Holding a `Delegate` keeps its receiver alive. Share it as
/// `Arc<Delegate<A>>` so weak delegates built from it can hand it back through
/// [`WeakAction::try_get_strong_ref`], which lets an observer unsubscribe the
/// exact callable it registered.
pub struct Delegate<A: 'static = ()> {
	target: Target<A>,
}

impl<A: 'static> Delegate<A> {
	/// Binds `method` to `receiver`.
	pub fn bound<C>(receiver: Arc<C>, method: fn(&C, A)) -> Self
	where
		C: Send + Sync + 'static,
	{
		let weak_receiver = Arc::downgrade(&receiver);
		let strong = Arc::clone(&receiver);
		Self {
			target: Target::Bound {
				receiver,
				method: Box::new(method),
				invoke: Box::new(move |arg: A| method(&strong, arg)),
				downgrade: Box::new(move |origin: &Arc<Delegate<A>>| -> Box<dyn WeakAction<A>> {
					Box::new(WeakDelegate {
						receiver: weak_receiver.clone(),
						method,
						origin: Arc::downgrade(origin),
					})
				}),
			},
		}
	}

	/// Wraps a function that has no receiver.
	pub fn unbound(action: fn(A)) -> Self {
		Self {
			target: Target::Static(action),
		}
	}

	/// Invokes the delegate.
	pub fn call(&self, arg: A) {
		match &self.target {
			Target::Static(action) => action(arg),
			Target::Bound { invoke, .. } => invoke(arg),
		}
	}

	/// Returns true if the delegate is bound to a receiver.
	pub fn has_receiver(&self) -> bool {
		matches!(self.target, Target::Bound { .. })
	}
}

impl<A: 'static> fmt::Debug for Delegate<A> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Delegate").field("has_receiver", &self.has_receiver()).finish()
	}
}

/// Weak delegate to a method on a receiver of type `C`.
pub struct WeakDelegate<C, A: 'static = ()> {
	receiver: Weak<C>,
	method: fn(&C, A),
	/// The strong delegate this was built from, if any.
	origin: Weak<Delegate<A>>,
}

impl<C, A: 'static> Clone for WeakDelegate<C, A> {
	fn clone(&self) -> Self {
		Self {
			receiver: self.receiver.clone(),
			method: self.method,
			origin: self.origin.clone(),
		}
	}
}

impl<C, A: 'static> fmt::Debug for WeakDelegate<C, A> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WeakDelegate")
			.field("receiver", &type_name::<C>())
			.field("alive", &(self.receiver.strong_count() > 0))
			.finish()
	}
}

impl<C, A> WeakDelegate<C, A>
where
	C: Send + Sync + 'static,
	A: 'static,
{
	/// Binds `method` to `receiver` without taking ownership of it.
	pub fn bind(receiver: &Arc<C>, method: fn(&C, A)) -> Self {
		Self {
			receiver: Arc::downgrade(receiver),
			method,
			origin: Weak::new(),
		}
	}

	/// Binds `method` to a receiver whose concrete type is only known at runtime.
	///
	/// # Errors
	///
	/// [`LifecycleError::InvalidBinding`] if `receiver` is not a `C`.
	pub fn try_bind(receiver: &Arc<dyn Any + Send + Sync>, method: fn(&C, A)) -> Result<Self> {
		let receiver = Arc::clone(receiver).downcast::<C>().map_err(|_| invalid_binding::<C>())?;
		Ok(Self::bind(&receiver, method))
	}

	/// Builds a weak delegate from a strong one, keeping a weak reference to
	/// both its receiver and the delegate itself.
	///
	/// # Errors
	///
	/// [`LifecycleError::InvalidBinding`] if `delegate` has no receiver or was
	/// not bound to a `C`.
	pub fn from_delegate(delegate: &Arc<Delegate<A>>) -> Result<Self> {
		let Target::Bound { receiver, method, .. } = &delegate.target else {
			return Err(invalid_binding::<C>());
		};
		let receiver = Arc::clone(receiver).downcast::<C>().map_err(|_| invalid_binding::<C>())?;
		let Some(method) = method.downcast_ref::<fn(&C, A)>() else {
			return Err(invalid_binding::<C>());
		};
		Ok(Self {
			receiver: Arc::downgrade(&receiver),
			method: *method,
			origin: Arc::downgrade(delegate),
		})
	}

	/// Returns a strong handle to the receiver if it is still alive.
	pub fn upgrade(&self) -> Option<Arc<C>> {
		self.receiver.upgrade()
	}

	/// See [`WeakAction::call`].
	pub fn call(&self, arg: A) -> bool {
		let Some(receiver) = self.receiver.upgrade() else {
			return false;
		};
		(self.method)(&receiver, arg);
		true
	}

	/// See [`WeakAction::is_alive`].
	pub fn is_alive(&self) -> bool {
		self.receiver.strong_count() > 0
	}

	/// See [`WeakAction::try_get_strong_ref`].
	pub fn try_get_strong_ref(&self) -> Option<Arc<Delegate<A>>> {
		self.origin.upgrade()
	}
}

impl<C, A> WeakAction<A> for WeakDelegate<C, A>
where
	C: Send + Sync + 'static,
	A: 'static,
{
	fn call(&self, arg: A) -> bool {
		WeakDelegate::call(self, arg)
	}

	fn is_alive(&self) -> bool {
		WeakDelegate::is_alive(self)
	}

	fn try_get_strong_ref(&self) -> Option<Arc<Delegate<A>>> {
		WeakDelegate::try_get_strong_ref(self)
	}
}

fn invalid_binding<C>() -> LifecycleError {
	LifecycleError::InvalidBinding { expected: type_name::<C>() }
}

/// Delegate with no receiver. Nothing can die, so it is always alive.
pub struct StaticDelegate<A: 'static = ()> {
	action: fn(A),
	delegate: Arc<Delegate<A>>,
}

impl<A: 'static> Clone for StaticDelegate<A> {
	fn clone(&self) -> Self {
		Self {
			action: self.action,
			delegate: Arc::clone(&self.delegate),
		}
	}
}

impl<A: 'static> fmt::Debug for StaticDelegate<A> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StaticDelegate").finish_non_exhaustive()
	}
}

impl<A: 'static> StaticDelegate<A> {
	/// Wraps a receiver-less function.
	pub fn new(action: fn(A)) -> Self {
		Self {
			action,
			delegate: Arc::new(Delegate::unbound(action)),
		}
	}

	/// Wraps a strong delegate that must not have a receiver.
	///
	/// # Errors
	///
	/// [`LifecycleError::NotStatic`] if `delegate` is bound to a receiver.
	pub fn from_delegate(delegate: &Arc<Delegate<A>>) -> Result<Self> {
		match delegate.target {
			Target::Static(action) => Ok(Self {
				action,
				delegate: Arc::clone(delegate),
			}),
			Target::Bound { .. } => Err(LifecycleError::NotStatic),
		}
	}
}

impl<A: 'static> WeakAction<A> for StaticDelegate<A> {
	fn call(&self, arg: A) -> bool {
		(self.action)(arg);
		true
	}

	fn is_alive(&self) -> bool {
		true
	}

	fn try_get_strong_ref(&self) -> Option<Arc<Delegate<A>>> {
		Some(Arc::clone(&self.delegate))
	}
}

/// Builds the matching weak flavor for `delegate` without naming its receiver type.
///
/// Receiver-less delegates become a [`StaticDelegate`]; bound ones a
/// [`WeakDelegate`] that keeps only weak references to the receiver and to
/// `delegate`.
pub fn weak_action<A: 'static>(delegate: &Arc<Delegate<A>>) -> Box<dyn WeakAction<A>> {
	match &delegate.target {
		Target::Static(action) => Box::new(StaticDelegate {
			action: *action,
			delegate: Arc::clone(delegate),
		}),
		Target::Bound { downgrade, .. } => downgrade(delegate),
	}
}
