//! Dedicated-thread workers.
//!
//! Each [`WorkerThread`] owns exactly one OS thread that pulls jobs from a
//! [`JobQueue`] after a startup handshake with its creator. Disposing the
//! worker cancels the queue, joins the thread and fires the worker's
//! [`DisposeSignal`](tether_lifecycle::DisposeSignal), releasing every
//! per-thread resource the execution thread tracked.

/// Error types for workers and jobs.
pub mod error;
mod handshake;
mod panic;
/// Cancellable blocking job queue.
pub mod queue;
mod spawn;
/// Worker owner, handle and job loop.
pub mod worker;

pub use error::{HandshakeMisuse, JobError, Rejected, WorkerError};
pub use queue::{Dequeue, JobQueue};
pub use worker::{JobHandler, WorkerExit, WorkerHandle, WorkerSignal, WorkerSpec, WorkerState, WorkerThread};
