//! Lifetime primitives for behavior bound to independently owned objects and threads.
//!
//! * [`weak`] invokes bound methods without keeping their receiver alive.
//! * [`dispose`] provides the one-shot teardown signal every other piece chains on.
//! * [`resources`] and [`scope`] release per-thread resource slots when the owning
//!   thread's dispose signal fires.

/// Process-wide disposal policy.
pub mod config;
/// One-shot dispose notification.
pub mod dispose;
/// Error types for lifecycle contract violations.
pub mod error;
/// Panic payload formatting.
pub mod panic;
/// Per-thread resource registries.
pub mod resources;
/// Process-wide thread scope table shared by every registry.
pub mod scope;
/// Explicit thread identity keys.
pub mod thread;
/// Weak bound-method delegates.
pub mod weak;

pub use config::{DisposalPolicy, DisposalPolicyGuard, disposal_policy, set_disposal_policy};
pub use dispose::{DisposeSignal, ThreadGuard, WatcherId};
pub use error::{DisposeError, LifecycleError, Result, WatcherFailure};
pub use panic::panic_message;
pub use resources::ResourceRegistry;
pub use thread::{ThreadKey, ensure_on_thread};
pub use weak::{Delegate, StaticDelegate, WeakAction, WeakDelegate, weak_action};
